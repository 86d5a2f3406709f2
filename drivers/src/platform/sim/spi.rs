//! Simulated SPI controller with MOSI wired to MISO.

use alloc::boxed::Box;
use alloc::vec::Vec;

use common::sync::SpinLock;

use super::{Clock, SimBoard};
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::error::{HalError, HalResult};
use crate::hal::spi::{SpiBus, SpiConfig};

#[derive(Default)]
struct Wire {
    sent: Vec<u8>,
    applied: Option<SpiConfig>,
}

#[derive(Default)]
pub struct SimSpi {
    wire: SpinLock<Wire>,
}

impl SimSpi {
    /// Every byte clocked out so far.
    pub fn sent(&self) -> Vec<u8> {
        self.wire.lock().sent.clone()
    }

    pub fn applied(&self) -> Option<SpiConfig> {
        self.wire.lock().applied
    }
}

struct SpiHw {
    board: &'static SimBoard,
}

impl PeripheralHw for SpiHw {
    type Config = SpiConfig;

    fn apply(&mut self, config: &SpiConfig) -> HalResult<()> {
        if config.frequency_hz == 0 {
            return Err(HalError::InvalidParam);
        }
        self.board.spi.wire.lock().applied = Some(*config);
        Ok(())
    }

    fn set_clock(&mut self, enabled: bool) {
        self.board.clocks.set(Clock::Spi, enabled);
    }

    fn reset(&mut self) {
        self.board.spi.wire.lock().applied = None;
    }
}

pub struct SimSpiDevice {
    core: Peripheral<SpiHw>,
}

impl SpiBus for SimSpiDevice {
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        let len = tx.len().max(rx.len());
        let mut wire = self.core.hw().board.spi.wire.lock();
        for i in 0..len {
            let out = tx.get(i).copied().unwrap_or(0);
            wire.sent.push(out);
            if let Some(slot) = rx.get_mut(i) {
                *slot = out;
            }
        }
        drop(wire);
        let stats = self.core.stats();
        stats.record_out(len);
        stats.record_in(rx.len());
        Ok(())
    }
}

impl Device for SimSpiDevice {
    peripheral_capabilities!(core);

    fn as_spi(&mut self) -> Option<&mut dyn SpiBus> {
        Some(self)
    }
}

pub struct SimSpiDriver {
    board: &'static SimBoard,
}

impl SimSpiDriver {
    pub fn new(board: &'static SimBoard) -> Self {
        Self { board }
    }
}

impl DeviceDriver for SimSpiDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Spi
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        _resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = SpiConfig::try_from(*config)?;
        Ok(Box::new(SimSpiDevice {
            core: Peripheral::new(DeviceKind::Spi, SpiHw { board: self.board }, config),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Lifecycle;
    use crate::platform::sim::SimConfig;

    #[test]
    fn test_loopback_pads_short_side() {
        let board = SimBoard::leak(SimConfig::default());
        let mut spi = SimSpiDevice {
            core: Peripheral::new(DeviceKind::Spi, SpiHw { board }, SpiConfig::default()),
        };
        assert_eq!(spi.write(&[1]), Err(HalError::NotInit));
        spi.core.init().unwrap();

        let mut rx = [0xffu8; 4];
        spi.transfer(&[1, 2], &mut rx).unwrap();
        assert_eq!(rx, [1, 2, 0, 0]);
        spi.write(&[9]).unwrap();
        assert_eq!(board.spi.sent(), [1, 2, 0, 0, 9]);
        assert_eq!(spi.core.stats().snapshot().bytes_in, 4);
    }
}
