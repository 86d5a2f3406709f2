//! Simulated interrupt controller: an enable mask and a pending latch per
//! line.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::error::{HalError, HalResult};
use crate::hal::interrupt::{InterruptController, IrqNumber};

#[derive(Debug)]
pub struct SimIntc {
    lines: u32,
    enabled: AtomicU64,
    pending: AtomicU64,
}

impl SimIntc {
    /// A controller with up to 64 lines, all masked and idle.
    pub fn new(lines: u32) -> Self {
        Self {
            lines: lines.min(64),
            enabled: AtomicU64::new(0),
            pending: AtomicU64::new(0),
        }
    }

    fn bit(&self, irq: IrqNumber) -> HalResult<u64> {
        if irq < self.lines {
            Ok(1 << irq)
        } else {
            Err(HalError::InvalidParam)
        }
    }

    /// Latch a request on `irq`, as a peripheral's output would.
    pub fn raise(&self, irq: IrqNumber) {
        if let Ok(bit) = self.bit(irq) {
            self.pending.fetch_or(bit, Ordering::SeqCst);
        }
    }

    /// Latched lines, masked or not.
    pub fn raw_pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }
}

impl InterruptController for &'static SimIntc {
    fn line_count(&self) -> u32 {
        self.lines
    }

    fn enable(&self, irq: IrqNumber) -> HalResult<()> {
        self.enabled.fetch_or(self.bit(irq)?, Ordering::SeqCst);
        Ok(())
    }

    fn disable(&self, irq: IrqNumber) -> HalResult<()> {
        self.enabled.fetch_and(!self.bit(irq)?, Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self, irq: IrqNumber) -> bool {
        self.bit(irq)
            .is_ok_and(|bit| self.enabled.load(Ordering::SeqCst) & bit != 0)
    }

    fn is_pending(&self, irq: IrqNumber) -> HalResult<bool> {
        Ok(self.pending.load(Ordering::SeqCst) & self.bit(irq)? != 0)
    }

    fn next_pending(&self) -> Option<IrqNumber> {
        let live = self.pending.load(Ordering::SeqCst) & self.enabled.load(Ordering::SeqCst);
        (live != 0).then(|| live.trailing_zeros())
    }

    fn clear(&self, irq: IrqNumber) -> HalResult<()> {
        self.pending.fetch_and(!self.bit(irq)?, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::boxed::Box;

    #[test]
    fn test_masked_lines_are_not_reported() {
        let intc: &'static SimIntc = Box::leak(Box::new(SimIntc::new(64)));
        intc.raise(40);
        assert_eq!(intc.next_pending(), None);
        assert_eq!(intc.is_pending(40), Ok(true));

        intc.enable(40).unwrap();
        assert_eq!(intc.next_pending(), Some(40));
        intc.clear(40).unwrap();
        assert_eq!(intc.next_pending(), None);
        assert_eq!(intc.enable(64), Err(HalError::InvalidParam));
    }
}
