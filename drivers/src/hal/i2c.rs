//! I2C bus Hardware Abstraction Layer.

use crate::error::HalResult;

/// 7-bit target address.
pub type Address = u8;

/// Bus speed.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum I2cSpeed {
    /// 100 kHz.
    Standard,
    /// 400 kHz.
    Fast,
    /// 1 MHz.
    FastPlus,
}

impl I2cSpeed {
    pub fn hz(self) -> u32 {
        match self {
            I2cSpeed::Standard => 100_000,
            I2cSpeed::Fast => 400_000,
            I2cSpeed::FastPlus => 1_000_000,
        }
    }
}

/// I2C controller configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct I2cConfig {
    pub speed: I2cSpeed,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self {
            speed: I2cSpeed::Standard,
        }
    }
}

/// I2C master.
///
/// A target that does not acknowledge its address is reported as
/// [`HalError::Bus`](crate::error::HalError::Bus); retry policy belongs to
/// the caller.
pub trait I2cBus {
    fn write(&mut self, address: Address, bytes: &[u8]) -> HalResult<()>;

    fn read(&mut self, address: Address, buffer: &mut [u8]) -> HalResult<()>;

    /// Write then read with a repeated start in between.
    fn write_read(&mut self, address: Address, bytes: &[u8], buffer: &mut [u8]) -> HalResult<()> {
        self.write(address, bytes)?;
        self.read(address, buffer)
    }
}
