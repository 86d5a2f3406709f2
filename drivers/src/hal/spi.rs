//! SPI bus Hardware Abstraction Layer.

use crate::error::HalResult;

/// Clock polarity and phase.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SpiMode {
    Mode0,
    Mode1,
    Mode2,
    Mode3,
}

/// Bit order on the wire.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BitOrder {
    MsbFirst,
    LsbFirst,
}

/// SPI controller configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpiConfig {
    pub mode: SpiMode,
    pub frequency_hz: u32,
    pub bit_order: BitOrder,
}

impl Default for SpiConfig {
    /// Mode 0, 1 MHz, MSB first.
    fn default() -> Self {
        Self {
            mode: SpiMode::Mode0,
            frequency_hz: 1_000_000,
            bit_order: BitOrder::MsbFirst,
        }
    }
}

/// Full-duplex SPI master.
pub trait SpiBus {
    /// Clock out `tx` while clocking into `rx`.
    ///
    /// The shorter slice is padded: missing transmit bytes are sent as
    /// zero, surplus receive bytes are discarded.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> HalResult<()>;

    /// Transmit only.
    fn write(&mut self, tx: &[u8]) -> HalResult<()> {
        self.transfer(tx, &mut [])
    }
}
