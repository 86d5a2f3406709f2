//! Hardware Abstraction Layer (HAL) - Platform-Independent Traits
//!
//! This module defines generic traits for interacting with hardware
//! peripherals. Backends in [`crate::platform`] implement them; the
//! shared managers and the device factory only ever talk to hardware
//! through these traits.
//!
//! # Available Interfaces
//!
//! - [`interrupt`]: Interrupt controller seam used by the line manager
//! - [`dma`]: DMA engine seam used by the channel allocator
//! - [`gpio`]: General Purpose Input/Output control
//! - [`serial`]: Serial port (UART) communication
//! - [`spi`]: SPI master
//! - [`i2c`]: I2C master
//! - [`timer`]: Hardware timers and delays
//! - [`adc`]: Analog-to-digital conversion

pub mod adc;
pub mod dma;
pub mod gpio;
pub mod i2c;
pub mod interrupt;
pub mod serial;
pub mod spi;
pub mod timer;
