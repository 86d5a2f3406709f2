//! Hardware Driver Subsystem
//!
//! This crate lets application code address peripherals through one
//! portable interface while a platform backend supplies the register
//! access.
//!
//! # Module Organization
//!
//! - [`hal`]: Platform-independent trait definitions
//! - [`device`]: The device model and its capability interfaces
//! - [`device_manager`]: Reference-counted device registry
//! - [`dma`]: DMA channel allocator
//! - [`irq`]: Interrupt line manager
//! - [`peripheral`]: Register-level drivers for reusable IP blocks
//! - [`platform`]: Platform backends (SoC level)
//! - [`console`]: `log` backend over a serial device
//!
//! # Design Principles
//!
//! 1. **Shared, not duplicated**: many call sites share one physical
//!    peripheral through the registry; it is built on first use and torn
//!    down after the last
//! 2. **Scarce resources are pooled**: DMA channels and interrupt entries
//!    come from fixed tables and are handed out as tokens
//! 3. **Capabilities by accessor**: lifecycle, power and diagnostics are
//!    reached through explicit accessors on every device, never by
//!    inspecting its type
//! 4. **Clear Ownership**: the registry owns devices, managers own their
//!    tables, callbacks are only borrowed
//!
//! # Usage Example
//!
//! ```rust,ignore
//! use drivers::{devices, SerialPort};
//!
//! let uart = devices().get_serial("uart0")?;
//! uart.with_serial(|port| port.write(b"Hello, world!\n"))??;
//! devices().put(uart)?;
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod console;
pub mod device;
pub mod device_manager;
pub mod dma;
pub mod error;
pub mod hal;
pub mod irq;
pub mod peripheral;
pub mod platform;

// Re-export commonly used types
pub use device::{Device, DeviceConfig, DeviceKind, Diagnostic, Lifecycle, LifecycleState, Power};
pub use device_manager::{devices, DeviceHandle, DeviceInfo, DeviceManager};
pub use dma::{dma, DmaChannel, DmaManager};
pub use error::{HalError, HalResult};
pub use hal::gpio::{GpioController, PinLevel};
pub use hal::interrupt::InterruptController;
pub use hal::serial::{SerialConfig, SerialPort};
pub use hal::timer::Timer;
pub use irq::{interrupts, InterruptManager, IrqSource};
