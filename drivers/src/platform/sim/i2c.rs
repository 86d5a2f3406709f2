//! Simulated I2C controller with one register-file target.
//!
//! The target at [`EEPROM_ADDRESS`] behaves like a small EEPROM: the first
//! byte of a write sets the register pointer, further bytes are stored
//! from there, and reads continue from the pointer. Both wrap at 256.
//! Any other address does not acknowledge.

use alloc::boxed::Box;

use common::sync::SpinLock;

use super::{Clock, SimBoard};
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::error::{HalError, HalResult};
use crate::hal::i2c::{Address, I2cBus, I2cConfig};

pub const EEPROM_ADDRESS: Address = 0x50;

struct Target {
    memory: [u8; 256],
    pointer: u8,
    applied: Option<I2cConfig>,
}

pub struct SimI2c {
    target: SpinLock<Target>,
}

impl Default for SimI2c {
    fn default() -> Self {
        Self {
            target: SpinLock::new(Target {
                memory: [0; 256],
                pointer: 0,
                applied: None,
            }),
        }
    }
}

impl SimI2c {
    /// Register `reg` of the target, bypassing the bus.
    pub fn peek(&self, reg: u8) -> u8 {
        self.target.lock().memory[reg as usize]
    }

    pub fn applied(&self) -> Option<I2cConfig> {
        self.target.lock().applied
    }
}

struct I2cHw {
    board: &'static SimBoard,
}

impl PeripheralHw for I2cHw {
    type Config = I2cConfig;

    fn apply(&mut self, config: &I2cConfig) -> HalResult<()> {
        self.board.i2c.target.lock().applied = Some(*config);
        Ok(())
    }

    fn set_clock(&mut self, enabled: bool) {
        self.board.clocks.set(Clock::I2c, enabled);
    }

    fn reset(&mut self) {
        self.board.i2c.target.lock().applied = None;
    }
}

pub struct SimI2cDevice {
    core: Peripheral<I2cHw>,
}

impl SimI2cDevice {
    fn target(&self, address: Address) -> HalResult<&'static SpinLock<Target>> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        if address != EEPROM_ADDRESS {
            return Err(self.core.failed(HalError::Bus));
        }
        Ok(&self.core.hw().board.i2c.target)
    }
}

impl I2cBus for SimI2cDevice {
    fn write(&mut self, address: Address, bytes: &[u8]) -> HalResult<()> {
        let mut target = self.target(address)?.lock();
        if let Some((&reg, data)) = bytes.split_first() {
            target.pointer = reg;
            for &byte in data {
                let at = target.pointer;
                target.memory[at as usize] = byte;
                target.pointer = at.wrapping_add(1);
            }
        }
        drop(target);
        self.core.stats().record_out(bytes.len());
        Ok(())
    }

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> HalResult<()> {
        let mut target = self.target(address)?.lock();
        for slot in buffer.iter_mut() {
            let at = target.pointer;
            *slot = target.memory[at as usize];
            target.pointer = at.wrapping_add(1);
        }
        drop(target);
        self.core.stats().record_in(buffer.len());
        Ok(())
    }
}

impl Device for SimI2cDevice {
    peripheral_capabilities!(core);

    fn as_i2c(&mut self) -> Option<&mut dyn I2cBus> {
        Some(self)
    }
}

pub struct SimI2cDriver {
    board: &'static SimBoard,
}

impl SimI2cDriver {
    pub fn new(board: &'static SimBoard) -> Self {
        Self { board }
    }
}

impl DeviceDriver for SimI2cDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::I2c
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        _resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = I2cConfig::try_from(*config)?;
        Ok(Box::new(SimI2cDevice {
            core: Peripheral::new(DeviceKind::I2c, I2cHw { board: self.board }, config),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Diagnostic, Lifecycle};
    use crate::platform::sim::SimConfig;

    #[test]
    fn test_register_file_round_trip() {
        let board = SimBoard::leak(SimConfig::default());
        let mut i2c = SimI2cDevice {
            core: Peripheral::new(DeviceKind::I2c, I2cHw { board }, I2cConfig::default()),
        };
        i2c.core.init().unwrap();

        i2c.write(EEPROM_ADDRESS, &[0x10, 0xaa, 0xbb]).unwrap();
        assert_eq!(board.i2c.peek(0x11), 0xbb);

        let mut buf = [0u8; 2];
        i2c.write_read(EEPROM_ADDRESS, &[0x10], &mut buf).unwrap();
        assert_eq!(buf, [0xaa, 0xbb]);
    }

    #[test]
    fn test_unknown_address_nacks() {
        let board = SimBoard::leak(SimConfig::default());
        let mut i2c = SimI2cDevice {
            core: Peripheral::new(DeviceKind::I2c, I2cHw { board }, I2cConfig::default()),
        };
        i2c.core.init().unwrap();
        assert_eq!(i2c.write(0x51, &[0]), Err(HalError::Bus));
        assert_eq!(i2c.core.status_record().error_count, 1);
    }
}
