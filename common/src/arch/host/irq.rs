//! Host stand-in for CPU interrupt masking.
//!
//! A hosted process has no interrupts to mask. The nesting depth is still
//! tracked so code under test can assert that it runs inside (or outside)
//! a critical section.

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sync::irq::IrqControl;

static MASK_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Simulated interrupt masking for hosted builds.
pub struct HostIrq;

impl HostIrq {
    /// Number of critical sections currently open across the process.
    pub fn depth() -> usize {
        MASK_DEPTH.load(Ordering::Acquire)
    }
}

impl IrqControl for HostIrq {
    type State = ();

    fn disable() {
        MASK_DEPTH.fetch_add(1, Ordering::AcqRel);
    }

    fn restore(_state: ()) {
        MASK_DEPTH.fetch_sub(1, Ordering::AcqRel);
    }

    fn enabled() -> bool {
        Self::depth() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disable_restore_tracks_depth() {
        // Other tests may hold sections concurrently; only check the delta.
        HostIrq::disable();
        assert!(HostIrq::depth() >= 1);
        HostIrq::restore(());
    }
}
