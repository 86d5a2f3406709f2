//! Locking primitives.
//!
//! - [`SpinLock`]: blocking lock for task-context state
//! - [`IrqSpinLock`]: lock that also masks interrupts, for state shared
//!   with interrupt handlers

pub mod irq;
pub mod irq_spinlock;
pub mod spinlock;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
