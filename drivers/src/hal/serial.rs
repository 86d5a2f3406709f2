//! Serial Port (UART) Hardware Abstraction Layer.
//!
//! This module defines platform-independent traits for serial communication.

use core::fmt;

use crate::error::HalResult;

/// Serial port configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Baud rate in bits per second.
    pub baud_rate: u32,
    /// Number of data bits per frame.
    pub data_bits: DataBits,
    /// Parity checking mode.
    pub parity: Parity,
    /// Number of stop bits.
    pub stop_bits: StopBits,
    /// Connect the receive interrupt when the port is constructed.
    pub rx_interrupt: bool,
    /// Claim a DMA channel for transmit when the port is constructed.
    pub tx_dma: bool,
}

impl SerialConfig {
    /// Create a standard 8N1 configuration at the specified baud rate.
    ///
    /// 8N1 means: 8 data bits, no parity, 1 stop bit. No interrupt or DMA
    /// resources are claimed.
    pub const fn new_8n1(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            rx_interrupt: false,
            tx_dma: false,
        }
    }

    pub const fn with_rx_interrupt(mut self) -> Self {
        self.rx_interrupt = true;
        self
    }

    pub const fn with_tx_dma(mut self) -> Self {
        self.tx_dma = true;
        self
    }
}

impl Default for SerialConfig {
    /// Default configuration: 115200 baud, 8N1.
    fn default() -> Self {
        Self::new_8n1(115200)
    }
}

/// Number of data bits per frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

/// Parity mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Parity {
    /// No parity bit.
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopBits {
    /// One stop bit.
    One,
    /// Two stop bits.
    Two,
}

/// Serial port trait.
///
/// Configuration is applied through the owning device, not through this
/// trait. Reads never block: they return what the receive FIFO holds.
pub trait SerialPort {
    /// Write a single byte.
    fn write_byte(&mut self, byte: u8) -> HalResult<()>;

    /// Write multiple bytes.
    fn write(&mut self, bytes: &[u8]) -> HalResult<usize> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(bytes.len())
    }

    /// Read one byte if the receive FIFO has one.
    fn read_byte(&mut self) -> HalResult<Option<u8>>;

    /// Read into `buffer` until it is full or the FIFO is empty.
    fn read(&mut self, buffer: &mut [u8]) -> HalResult<usize> {
        let mut count = 0;
        for slot in buffer.iter_mut() {
            match self.read_byte()? {
                Some(byte) => {
                    *slot = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }

    /// Flush the write buffer.
    fn flush(&mut self) -> HalResult<()>;

    /// Check if the serial port is busy transmitting.
    fn is_busy(&self) -> bool;
}

/// Adapter implementing `core::fmt::Write` for a serial port, so the
/// `write!`/`writeln!` macros can target it. Line feeds go out as CR LF.
pub struct SerialWriter<'a>(pub &'a mut dyn SerialPort);

impl fmt::Write for SerialWriter<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.0.write_byte(b'\r').map_err(|_| fmt::Error)?;
            }
            self.0.write_byte(byte).map_err(|_| fmt::Error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::fmt::Write;

    struct Capture(Vec<u8>);

    impl SerialPort for Capture {
        fn write_byte(&mut self, byte: u8) -> HalResult<()> {
            self.0.push(byte);
            Ok(())
        }

        fn read_byte(&mut self) -> HalResult<Option<u8>> {
            Ok(if self.0.is_empty() { None } else { Some(self.0.remove(0)) })
        }

        fn flush(&mut self) -> HalResult<()> {
            Ok(())
        }

        fn is_busy(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_writer_translates_newlines() {
        let mut port = Capture(Vec::new());
        write!(SerialWriter(&mut port), "a\nb").unwrap();
        assert_eq!(port.0, b"a\r\nb");
    }

    #[test]
    fn test_read_stops_when_fifo_empty() {
        let mut port = Capture(b"xy".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(port.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"xy");
    }
}
