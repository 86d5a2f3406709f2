//! Shared low-level support for the driver workspace.
//!
//! - [`sync`]: spin locks and the interrupt-masking critical section
//! - [`arch`]: CPU interrupt masking for the selected architecture

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod sync;
