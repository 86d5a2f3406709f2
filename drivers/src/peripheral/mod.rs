//! Peripheral Blocks
//!
//! Register-level drivers for IP blocks that turn up on more than one
//! platform. Platforms wrap them in their own devices.
//!
//! # Available Peripherals
//!
//! - [`pl011`]: ARM PrimeCell PL011 UART

pub mod pl011;
