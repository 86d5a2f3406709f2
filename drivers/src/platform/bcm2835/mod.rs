//! BCM2835 (Raspberry Pi 1 / Zero) platform.
//!
//! Peripherals are reached through their ARM physical addresses at
//! [`PERIPHERAL_BASE`]; the DMA engine sees the same blocks through the
//! VideoCore bus alias, see [`bus_address`].

mod dma;
mod gpio;
mod interrupt;
mod timer;
mod uart;

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

pub use dma::{Bcm2835Dma, DMA_STREAMS};
pub use gpio::{Bcm2835GpioDriver, GpioPinSource, PinHandler};
pub use interrupt::Bcm2835InterruptController;
pub use timer::{Bcm2835TimerDriver, Channel};
pub use uart::Bcm2835UartDriver;

use super::Platform;
use crate::config::DEFAULT_IRQ_PRIORITY;
use crate::device_manager::DeviceDescriptor;
use crate::error::HalResult;
use crate::hal::dma::DmaEngine;
use crate::hal::gpio::{GpioConfig, PullMode};
use crate::hal::interrupt::InterruptController;
use crate::hal::serial::SerialConfig;
use crate::hal::timer::TimerConfig;
use crate::irq::InterruptManager;

pub const PERIPHERAL_BASE: usize = 0x2000_0000;
const PERIPHERAL_SIZE: usize = 0x0100_0000;

/// Peripheral window as seen from the DMA engine.
const BUS_PERIPHERAL_BASE: usize = 0x7E00_0000;

/// L2-coherent alias of SDRAM as seen from the DMA engine.
const BUS_SDRAM_ALIAS: usize = 0x4000_0000;

/// Translate an ARM physical address to a VideoCore bus address.
pub const fn bus_address(addr: usize) -> u32 {
    if addr >= PERIPHERAL_BASE && addr < PERIPHERAL_BASE + PERIPHERAL_SIZE {
        (addr - PERIPHERAL_BASE + BUS_PERIPHERAL_BASE) as u32
    } else {
        (addr | BUS_SDRAM_ALIAS) as u32
    }
}

/// Interrupt numbers in the controller's flat numbering.
pub mod lines {
    use crate::hal::interrupt::IrqNumber;

    /// Two GPU banks of 32 plus eight ARM basic sources.
    pub const LINE_COUNT: u32 = 72;
    /// System timer compare channel 1.
    pub const SYSTEM_TIMER_1: IrqNumber = 1;
    /// System timer compare channel 3.
    pub const SYSTEM_TIMER_3: IrqNumber = 3;
    /// DMA channel `n` signals on `DMA_BASE + n`.
    pub const DMA_BASE: IrqNumber = 16;
    /// GPIO bank 0 (pins 0-31).
    pub const GPIO0: IrqNumber = 49;
    pub const UART: IrqNumber = 57;
}

/// Raspberry Pi 1 / Zero.
pub struct Bcm2835Platform;

impl Platform for Bcm2835Platform {
    fn name() -> &'static str {
        "BCM2835 (Raspberry Pi 1/Zero)"
    }

    unsafe fn early_init() {
        // UART0 on GPIO 14 (TX) and 15 (RX)
        gpio::set_function(14, gpio::Function::Alt0).ok();
        gpio::set_pull(14, PullMode::None).ok();
        gpio::set_function(15, gpio::Function::Alt0).ok();
        gpio::set_pull(15, PullMode::Up).ok();

        unsafe { dma::enable_streams() };
    }

    fn interrupt_controller() -> Box<dyn InterruptController> {
        Box::new(unsafe { Bcm2835InterruptController::new() })
    }

    fn dma_engine() -> Box<dyn DmaEngine> {
        Box::new(unsafe { Bcm2835Dma::new() })
    }

    /// `uart0`, `gpio0`, `timer0`.
    fn device_table() -> Vec<DeviceDescriptor> {
        vec![
            DeviceDescriptor::new("uart0", SerialConfig::default(), Bcm2835UartDriver),
            DeviceDescriptor::new("gpio0", GpioConfig::default(), Bcm2835GpioDriver),
            DeviceDescriptor::new(
                "timer0",
                TimerConfig::default(),
                Bcm2835TimerDriver::new(Channel::Channel1),
            ),
        ]
    }

    fn connect_dma_interrupts(irq: &InterruptManager) -> HalResult<()> {
        for source in dma::stream_sources() {
            // Stream lines stay connected for the life of the system.
            let _handle = irq.connect(source.line(), source, DEFAULT_IRQ_PRIORITY)?;
            irq.enable(source.line())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_address_translation() {
        assert_eq!(bus_address(0x2020_1000), 0x7E20_1000);
        assert_eq!(bus_address(0x0010_0000), 0x4010_0000);
    }
}
