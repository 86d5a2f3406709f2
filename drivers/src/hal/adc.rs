//! ADC Hardware Abstraction Layer.

use crate::error::HalResult;

/// ADC configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AdcConfig {
    /// Conversion resolution in bits: 8, 10 or 12.
    pub resolution_bits: u8,
    /// Sample-and-hold time in converter clock cycles.
    pub sample_cycles: u16,
}

impl AdcConfig {
    pub fn max_code(&self) -> u16 {
        (1u16 << self.resolution_bits) - 1
    }
}

impl Default for AdcConfig {
    /// 12 bits, 16 cycles.
    fn default() -> Self {
        Self {
            resolution_bits: 12,
            sample_cycles: 16,
        }
    }
}

/// Single-conversion ADC.
pub trait AdcConverter {
    /// Number of input channels.
    fn channel_count(&self) -> u8;

    /// Convert one sample on `channel`.
    fn read(&mut self, channel: u8) -> HalResult<u16>;
}
