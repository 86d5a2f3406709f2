//! ARM PrimeCell PL011 UART
//!
//! Register-level access to one PL011 block. Platforms wrap a static
//! [`Pl011`] in their serial device; the block itself is also the
//! receive interrupt source for its line.
//!
//! # Features
//!
//! - Configurable baud rate, word length, parity and stop bits
//! - FIFO support
//! - Receive interrupt and transmit DMA request enables

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{HalError, HalResult};
use crate::hal::serial::{DataBits, Parity, SerialConfig, StopBits};
use crate::irq::IrqSource;

/// UART0 base address on the BCM2835.
pub const UART0_BASE: usize = 0x2020_1000;

/// PL011 reference clock frequency
pub const PL011_CLOCK_HZ: u32 = 48_000_000;

// Register offsets
const DR_OFFSET: usize = 0x00;
const FR_OFFSET: usize = 0x18;
const IBRD_OFFSET: usize = 0x24;
const FBRD_OFFSET: usize = 0x28;
const LCRH_OFFSET: usize = 0x2C;
const CR_OFFSET: usize = 0x30;
const IFLS_OFFSET: usize = 0x34;
const IMSC_OFFSET: usize = 0x38;
const MIS_OFFSET: usize = 0x40;
const ICR_OFFSET: usize = 0x44;
const DMACR_OFFSET: usize = 0x48;

// Flag Register (FR) bits
const FR_BUSY: u32 = 1 << 3;
const FR_RXFE: u32 = 1 << 4;
const FR_TXFF: u32 = 1 << 5;

// Control Register (CR) bits
const CR_UARTEN: u32 = 1 << 0;
const CR_TXE: u32 = 1 << 8;
const CR_RXE: u32 = 1 << 9;

// Line Control Register (LCRH) bits
const LCRH_PEN: u32 = 1 << 1;
const LCRH_EPS: u32 = 1 << 2;
const LCRH_STP2: u32 = 1 << 3;
const LCRH_FEN: u32 = 1 << 4;
const LCRH_WLEN_SHIFT: u32 = 5;

// Interrupt bits (IMSC, MIS, ICR)
const INT_RX: u32 = 1 << 4;
const INT_RT: u32 = 1 << 6;
const INT_ALL: u32 = 0x07FF;

const IFLS_RX_1_2: u32 = 0b010 << 3;
const DMACR_TXDMAE: u32 = 1 << 1;

/// One PL011 block.
pub struct Pl011 {
    base: usize,
    rx_events: AtomicU32,
}

impl Pl011 {
    /// # Safety
    ///
    /// - `base` must point to a valid PL011 peripheral
    /// - Only one instance should exist per UART hardware
    /// - Memory must be properly mapped as device memory
    pub const unsafe fn new(base: usize) -> Self {
        Self {
            base,
            rx_events: AtomicU32::new(0),
        }
    }

    /// Address of the data register, the target of transmit DMA.
    pub fn data_register(&self) -> usize {
        self.base + DR_OFFSET
    }

    #[inline]
    fn read_reg(&self, offset: usize) -> u32 {
        unsafe { read_volatile((self.base + offset) as *const u32) }
    }

    #[inline]
    fn write_reg(&self, offset: usize, value: u32) {
        unsafe { write_volatile((self.base + offset) as *mut u32, value) }
    }

    /// Wait for the UART to finish transmitting.
    pub fn wait_idle(&self) {
        while self.is_busy() {
            core::hint::spin_loop();
        }
    }

    pub fn is_busy(&self) -> bool {
        self.read_reg(FR_OFFSET) & FR_BUSY != 0
    }

    /// Program line settings and turn the block on.
    pub fn configure(&self, config: &SerialConfig) -> HalResult<()> {
        let (ibrd, fbrd) = calculate_divisors(config.baud_rate)?;
        let lcrh = line_control(config);

        // Disable, let the shifter drain, then flush the FIFOs
        self.write_reg(CR_OFFSET, 0);
        self.wait_idle();
        self.write_reg(LCRH_OFFSET, 0);

        self.write_reg(IBRD_OFFSET, ibrd);
        self.write_reg(FBRD_OFFSET, fbrd);
        self.write_reg(LCRH_OFFSET, lcrh);

        self.write_reg(ICR_OFFSET, INT_ALL);
        self.write_reg(IFLS_OFFSET, IFLS_RX_1_2);
        let rx = if config.rx_interrupt { INT_RX | INT_RT } else { 0 };
        self.write_reg(IMSC_OFFSET, rx);
        let dma = if config.tx_dma { DMACR_TXDMAE } else { 0 };
        self.write_reg(DMACR_OFFSET, dma);

        self.write_reg(CR_OFFSET, CR_UARTEN | CR_TXE | CR_RXE);
        Ok(())
    }

    /// Mask every interrupt and turn the block off.
    pub fn shutdown(&self) {
        self.write_reg(IMSC_OFFSET, 0);
        self.write_reg(ICR_OFFSET, INT_ALL);
        self.write_reg(DMACR_OFFSET, 0);
        self.write_reg(CR_OFFSET, 0);
    }

    /// Blocking write of one byte.
    pub fn write_byte(&self, byte: u8) {
        while self.read_reg(FR_OFFSET) & FR_TXFF != 0 {
            core::hint::spin_loop();
        }
        self.write_reg(DR_OFFSET, byte as u32);
    }

    /// One byte from the receive FIFO, if any.
    pub fn try_read_byte(&self) -> Option<u8> {
        if self.read_reg(FR_OFFSET) & FR_RXFE != 0 {
            return None;
        }
        Some((self.read_reg(DR_OFFSET) & 0xFF) as u8)
    }

    /// Receive interrupts serviced so far.
    pub fn rx_events(&self) -> u32 {
        self.rx_events.load(Ordering::Relaxed)
    }
}

impl IrqSource for Pl011 {
    fn is_pending(&self) -> bool {
        self.read_reg(MIS_OFFSET) & (INT_RX | INT_RT) != 0
    }

    /// Data stays in the FIFO for the owner to read.
    fn handle(&self) {
        self.write_reg(ICR_OFFSET, INT_RX | INT_RT);
        self.rx_events.fetch_add(1, Ordering::Relaxed);
    }
}

/// Calculate baud rate divisors.
fn calculate_divisors(baud_rate: u32) -> HalResult<(u32, u32)> {
    if baud_rate == 0 {
        return Err(HalError::InvalidParam);
    }

    // BAUDDIV = FUARTCLK / (16 * baud), with 6 fractional bits
    let divisor = ((PL011_CLOCK_HZ as u64) << 6) / (16 * baud_rate as u64);

    let integer = (divisor >> 6) as u32;
    let fractional = (divisor & 0x3F) as u32;

    if integer == 0 || integer > 0xFFFF {
        return Err(HalError::InvalidParam);
    }

    Ok((integer, fractional))
}

fn line_control(config: &SerialConfig) -> u32 {
    let wlen = match config.data_bits {
        DataBits::Five => 0b00,
        DataBits::Six => 0b01,
        DataBits::Seven => 0b10,
        DataBits::Eight => 0b11,
    };
    let parity = match config.parity {
        Parity::None => 0,
        Parity::Odd => LCRH_PEN,
        Parity::Even => LCRH_PEN | LCRH_EPS,
    };
    let stop = match config.stop_bits {
        StopBits::One => 0,
        StopBits::Two => LCRH_STP2,
    };
    (wlen << LCRH_WLEN_SHIFT) | parity | stop | LCRH_FEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_divisors_for_common_rates() {
        // 48 MHz / (16 * 115200) = 26.0417
        assert_eq!(calculate_divisors(115_200), Ok((26, 2)));
        assert_eq!(calculate_divisors(9_600), Ok((312, 32)));
        assert_eq!(calculate_divisors(0), Err(HalError::InvalidParam));
        assert_eq!(calculate_divisors(10), Err(HalError::InvalidParam));
    }

    #[test]
    fn test_line_control_bits() {
        assert_eq!(
            line_control(&SerialConfig::new_8n1(115_200)),
            (0b11 << LCRH_WLEN_SHIFT) | LCRH_FEN
        );
        let mut config = SerialConfig::new_8n1(115_200);
        config.data_bits = DataBits::Seven;
        config.parity = Parity::Even;
        config.stop_bits = StopBits::Two;
        assert_eq!(
            line_control(&config),
            (0b10 << LCRH_WLEN_SHIFT) | LCRH_PEN | LCRH_EPS | LCRH_STP2 | LCRH_FEN
        );
    }
}
