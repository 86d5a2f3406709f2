//! Host simulation platform.
//!
//! [`SimBoard`] models a small microcontroller in memory: an interrupt
//! controller, DMA streams, clock gates and one block of each peripheral
//! type. Every block is shared state behind `&'static SimBoard`, so
//! drivers built from the device table and test code observe the same
//! hardware. The `drive_*`, `inject_*` and `advance_*` hooks play the
//! part of the outside world and raise interrupt lines as real hardware
//! would.

mod adc;
mod dma;
mod gpio;
mod i2c;
mod intc;
mod spi;
mod timer;
mod uart;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::Once;

pub use adc::{SimAdc, SimAdcDriver};
pub use dma::{SimDma, StreamSnapshot, StreamSource};
pub use gpio::{PinHandler, SimGpio, SimGpioDriver, SimPin};
pub use i2c::{SimI2c, SimI2cDriver, EEPROM_ADDRESS};
pub use intc::SimIntc;
pub use spi::{SimSpi, SimSpiDriver};
pub use timer::{SimTimer, SimTimerDriver};
pub use uart::{SimUart, SimUartDriver};

use super::Platform;
use crate::config::DEFAULT_IRQ_PRIORITY;
use crate::device_manager::DeviceDescriptor;
use crate::dma::DmaManager;
use crate::error::HalResult;
use crate::hal::adc::AdcConfig;
use crate::hal::dma::DmaEngine;
use crate::hal::gpio::{GpioConfig, PinLevel};
use crate::hal::i2c::I2cConfig;
use crate::hal::interrupt::{InterruptController, IrqNumber};
use crate::hal::serial::SerialConfig;
use crate::hal::spi::SpiConfig;
use crate::hal::timer::TimerConfig;
use crate::irq::InterruptManager;

/// Interrupt line assignment of the simulated board.
pub mod lines {
    use crate::hal::interrupt::IrqNumber;

    pub const LINE_COUNT: u32 = 64;
    pub const TIMER: IrqNumber = 1;
    /// Stream `n` completes on `DMA_BASE + n`.
    pub const DMA_BASE: IrqNumber = 16;
    pub const GPIO: IrqNumber = 49;
    pub const I2C: IrqNumber = 53;
    pub const SPI: IrqNumber = 54;
    pub const UART0: IrqNumber = 57;
    pub const UART1: IrqNumber = 58;
}

/// A gated peripheral clock.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Clock {
    Uart0,
    Uart1,
    Gpio,
    Spi,
    I2c,
    Timer,
    Adc,
}

/// Clock gate register.
#[derive(Debug, Default)]
pub struct ClockGates {
    mask: AtomicU32,
}

impl ClockGates {
    pub fn set(&self, clock: Clock, on: bool) {
        let bit = 1 << clock as u32;
        if on {
            self.mask.fetch_or(bit, Ordering::SeqCst);
        } else {
            self.mask.fetch_and(!bit, Ordering::SeqCst);
        }
    }

    pub fn is_enabled(&self, clock: Clock) -> bool {
        self.mask.load(Ordering::SeqCst) & (1 << clock as u32) != 0
    }
}

/// Build options for a [`SimBoard`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SimConfig {
    /// DMA streams the board offers.
    pub dma_streams: usize,
    /// Wire each UART's transmitter back into its own receiver.
    pub uart_loopback: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            dma_streams: 8,
            uart_loopback: false,
        }
    }
}

/// The simulated board.
pub struct SimBoard {
    pub intc: SimIntc,
    pub dma: SimDma,
    pub clocks: ClockGates,
    pub uart: [SimUart; 2],
    pub gpio: SimGpio,
    pub spi: SimSpi,
    pub i2c: SimI2c,
    pub timer: SimTimer,
    pub adc: SimAdc,
    dma_sources: Once<Vec<StreamSource>>,
}

impl SimBoard {
    pub fn new(config: SimConfig) -> Self {
        Self {
            intc: SimIntc::new(lines::LINE_COUNT),
            dma: SimDma::new(config.dma_streams),
            clocks: ClockGates::default(),
            uart: [
                SimUart::new(Clock::Uart0, lines::UART0, config.uart_loopback),
                SimUart::new(Clock::Uart1, lines::UART1, config.uart_loopback),
            ],
            gpio: SimGpio::new(),
            spi: SimSpi::default(),
            i2c: SimI2c::default(),
            timer: SimTimer::default(),
            adc: SimAdc::default(),
            dma_sources: Once::new(),
        }
    }

    /// A board that lives for the rest of the process.
    pub fn leak(config: SimConfig) -> &'static SimBoard {
        Box::leak(Box::new(Self::new(config)))
    }

    pub fn interrupt_controller(&'static self) -> Box<dyn InterruptController> {
        Box::new(&self.intc)
    }

    pub fn dma_engine(&'static self) -> Box<dyn DmaEngine> {
        Box::new(&self.dma)
    }

    /// Chain every stream's completion source onto its line and unmask it.
    ///
    /// Completions are forwarded to `dma`. The sources are built on the
    /// first call, so later calls reuse the manager bound then.
    pub fn connect_dma_interrupts(
        &'static self,
        irq: &InterruptManager,
        dma: &'static DmaManager,
    ) -> HalResult<()> {
        let sources = self.dma_sources.call_once(|| self.dma.stream_sources(dma));
        for source in sources {
            // Stream lines stay connected for the life of the board.
            let _handle = irq.connect(source.line(), source, DEFAULT_IRQ_PRIORITY)?;
            irq.enable(source.line())?;
        }
        Ok(())
    }

    /// `uart0`, `uart1`, `gpio0`, `spi0`, `i2c0`, `timer0`, `adc0`.
    pub fn device_table(&'static self) -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new(
                "uart0",
                SerialConfig::default(),
                SimUartDriver::new(self, 0),
            ),
            DeviceDescriptor::new(
                "uart1",
                SerialConfig::default(),
                SimUartDriver::new(self, 1),
            ),
            DeviceDescriptor::new("gpio0", GpioConfig::default(), SimGpioDriver::new(self)),
            DeviceDescriptor::new("spi0", SpiConfig::default(), SimSpiDriver::new(self)),
            DeviceDescriptor::new("i2c0", I2cConfig::default(), SimI2cDriver::new(self)),
            DeviceDescriptor::new("timer0", TimerConfig::default(), SimTimerDriver::new(self)),
            DeviceDescriptor::new("adc0", AdcConfig::default(), SimAdcDriver::new(self)),
        ]
    }

    // ========================================================================
    // Outside-world hooks
    // ========================================================================

    /// Drive an input pin from outside the chip.
    pub fn drive_pin(&self, pin: u8, level: PinLevel) {
        if self.gpio.drive(pin, level) {
            self.intc.raise(lines::GPIO);
        }
    }

    /// Deliver bytes to a UART receiver.
    pub fn inject_uart_rx(&self, port: usize, bytes: &[u8]) {
        if let Some(uart) = self.uart.get(port) {
            if uart.inject_rx(bytes) {
                self.intc.raise(uart.line());
            }
        }
    }

    /// Let simulated time pass.
    pub fn advance_time(&self, us: u64) {
        if self.timer.advance(us) {
            self.intc.raise(lines::TIMER);
        }
    }

    /// Move `beats` through a running stream. Returns whether the stream
    /// reported a completion.
    pub fn dma_advance(&self, stream: u8, beats: u32) -> bool {
        let completed = self.dma.advance(stream, beats);
        if completed {
            self.intc.raise(lines::DMA_BASE + stream as IrqNumber);
        }
        completed
    }

    /// Make a running stream fail with a bus error.
    pub fn dma_fail(&self, stream: u8) -> bool {
        let failed = self.dma.fail(stream);
        if failed {
            self.intc.raise(lines::DMA_BASE + stream as IrqNumber);
        }
        failed
    }

    pub fn clock_enabled(&self, clock: Clock) -> bool {
        self.clocks.is_enabled(clock)
    }
}

static BOARD: Once<SimBoard> = Once::new();

/// The board behind [`SimPlatform`].
pub fn board() -> &'static SimBoard {
    BOARD.call_once(|| SimBoard::new(SimConfig::default()))
}

/// Host simulation platform over [`board`].
pub struct SimPlatform;

impl Platform for SimPlatform {
    fn name() -> &'static str {
        "Host simulation"
    }

    unsafe fn early_init() {
        board();
    }

    fn interrupt_controller() -> Box<dyn InterruptController> {
        board().interrupt_controller()
    }

    fn dma_engine() -> Box<dyn DmaEngine> {
        board().dma_engine()
    }

    fn device_table() -> Vec<DeviceDescriptor> {
        board().device_table()
    }

    fn connect_dma_interrupts(irq: &InterruptManager) -> HalResult<()> {
        board().connect_dma_interrupts(irq, crate::dma::dma())
    }
}
