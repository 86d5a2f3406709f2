//! Platform Abstraction Layer
//!
//! Each supported platform implements the [`Platform`] trait: it hands the
//! shared managers their interrupt controller and DMA engine, and supplies
//! the table of devices the registry serves.
//!
//! # Usage
//!
//! ```rust,ignore
//! use drivers::platform::{CurrentPlatform, Platform};
//!
//! // Initialize platform
//! unsafe { CurrentPlatform::early_init(); }
//!
//! // The managers pick up the platform on first use
//! let uart = drivers::devices().get_serial("uart0")?;
//! ```

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::device_manager::DeviceDescriptor;
use crate::error::HalResult;
use crate::hal::dma::DmaEngine;
use crate::hal::interrupt::InterruptController;
use crate::irq::InterruptManager;

/// Platform trait - implemented by each supported platform
pub trait Platform {
    /// Platform name for debugging
    fn name() -> &'static str;

    /// Early platform initialization
    ///
    /// Called before any device is constructed. Should configure pin
    /// multiplexing and clocks the device table relies on.
    ///
    /// # Safety
    /// Must only be called once, very early in boot.
    unsafe fn early_init();

    /// The interrupt controller the line manager drives.
    fn interrupt_controller() -> Box<dyn InterruptController>;

    /// The DMA hardware the channel allocator hands out.
    fn dma_engine() -> Box<dyn DmaEngine>;

    /// Devices served by the registry, in enumeration order.
    fn device_table() -> Vec<DeviceDescriptor>;

    /// Chain the DMA stream completion sources onto `irq` and unmask their
    /// lines. Completions are delivered to [`crate::dma::dma`].
    fn connect_dma_interrupts(irq: &InterruptManager) -> HalResult<()>;
}

#[cfg(any(feature = "sim", test))]
pub mod sim;

// Platform selection based on Cargo features
cfg_if::cfg_if! {
    if #[cfg(feature = "bcm2835")] {
        pub mod bcm2835;
        pub use bcm2835::Bcm2835Platform as CurrentPlatform;
    } else if #[cfg(any(feature = "sim", test))] {
        pub use sim::SimPlatform as CurrentPlatform;
    } else {
        compile_error!(
            "No platform selected!\n\
            Use: cargo build --features sim\n\
            Or:  cargo build --no-default-features --features bcm2835"
        );
    }
}

// Ensure only one platform is selected
#[cfg(all(feature = "bcm2835", feature = "sim"))]
compile_error!("Multiple platforms selected! Choose only one: sim OR bcm2835");
