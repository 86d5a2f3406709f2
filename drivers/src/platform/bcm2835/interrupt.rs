//! BCM2835 Interrupt Controller Driver

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU32, Ordering};

use super::lines;
use crate::error::{HalError, HalResult};
use crate::hal::interrupt::{InterruptController, IrqNumber};

/// Interrupt controller base address.
pub const INT_CONTROLLER_BASE: usize = 0x2000_b000;

/// Memory-mapped interrupt controller registers.
#[repr(C)]
struct Registers {
    _padding: [u8; 0x200],
    irq_basic_pend: u32,
    irq_1_pend: u32,
    irq_2_pend: u32,
    fiq_ctrl: u32,
    enable_irqs_1: u32,
    enable_irqs_2: u32,
    enable_basic_irqs: u32,
    disable_irqs_1: u32,
    disable_irqs_2: u32,
    disable_basic_irqs: u32,
}

#[inline(always)]
fn regs() -> *mut Registers {
    INT_CONTROLLER_BASE as *mut Registers
}

/// Interrupt line representation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum IrqLine {
    Irq1(u32),
    Irq2(u32),
    Basic(u32),
}

impl IrqLine {
    fn split(irq: IrqNumber) -> HalResult<Self> {
        match irq {
            0..=31 => Ok(IrqLine::Irq1(irq)),
            32..=63 => Ok(IrqLine::Irq2(irq - 32)),
            64.. if irq < lines::LINE_COUNT => Ok(IrqLine::Basic(irq - 64)),
            _ => Err(HalError::InvalidParam),
        }
    }

    fn bank(self) -> usize {
        match self {
            IrqLine::Irq1(_) => 0,
            IrqLine::Irq2(_) => 1,
            IrqLine::Basic(_) => 2,
        }
    }

    fn mask(self) -> u32 {
        match self {
            IrqLine::Irq1(bit) | IrqLine::Irq2(bit) | IrqLine::Basic(bit) => 1 << bit,
        }
    }
}

// ============================================================================
// Raw Hardware Functions
// ============================================================================

/// Raw pending words: bank 1, bank 2, basic.
fn pending_words() -> [u32; 3] {
    unsafe {
        let r = regs();
        [
            read_volatile(&(*r).irq_1_pend),
            read_volatile(&(*r).irq_2_pend),
            read_volatile(&(*r).irq_basic_pend) & BASIC_LINE_MASK,
        ]
    }
}

/// Basic pending bits 0-7 are the ARM-local sources; the rest mirror
/// bank 1 and 2 lines.
const BASIC_LINE_MASK: u32 = 0xFF;

fn write_enable(line: IrqLine) {
    unsafe {
        let r = regs();
        let reg = match line {
            IrqLine::Irq1(_) => &mut (*r).enable_irqs_1,
            IrqLine::Irq2(_) => &mut (*r).enable_irqs_2,
            IrqLine::Basic(_) => &mut (*r).enable_basic_irqs,
        };
        write_volatile(reg, line.mask());
    }
}

fn write_disable(line: IrqLine) {
    unsafe {
        let r = regs();
        let reg = match line {
            IrqLine::Irq1(_) => &mut (*r).disable_irqs_1,
            IrqLine::Irq2(_) => &mut (*r).disable_irqs_2,
            IrqLine::Basic(_) => &mut (*r).disable_basic_irqs,
        };
        write_volatile(reg, line.mask());
    }
}

// ============================================================================
// HAL Implementation
// ============================================================================

/// BCM2835 interrupt controller.
///
/// The enable registers are write-one-to-set; the controller keeps a shadow
/// of what it has unmasked so `is_enabled` and `next_pending` need not rely
/// on reading them back.
#[derive(Debug)]
pub struct Bcm2835InterruptController {
    enabled: [AtomicU32; 3],
}

impl Bcm2835InterruptController {
    /// Create a new interrupt controller with every line masked.
    ///
    /// # Safety
    ///
    /// Interrupt controller registers must be properly mapped.
    pub unsafe fn new() -> Self {
        unsafe {
            let r = regs();
            write_volatile(&mut (*r).disable_irqs_1, u32::MAX);
            write_volatile(&mut (*r).disable_irqs_2, u32::MAX);
            write_volatile(&mut (*r).disable_basic_irqs, u32::MAX);
        }
        Self {
            enabled: [AtomicU32::new(0), AtomicU32::new(0), AtomicU32::new(0)],
        }
    }
}

impl InterruptController for Bcm2835InterruptController {
    fn line_count(&self) -> u32 {
        lines::LINE_COUNT
    }

    fn enable(&self, irq: IrqNumber) -> HalResult<()> {
        let line = IrqLine::split(irq)?;
        self.enabled[line.bank()].fetch_or(line.mask(), Ordering::SeqCst);
        write_enable(line);
        Ok(())
    }

    fn disable(&self, irq: IrqNumber) -> HalResult<()> {
        let line = IrqLine::split(irq)?;
        write_disable(line);
        self.enabled[line.bank()].fetch_and(!line.mask(), Ordering::SeqCst);
        Ok(())
    }

    fn is_enabled(&self, irq: IrqNumber) -> bool {
        IrqLine::split(irq)
            .map(|line| self.enabled[line.bank()].load(Ordering::SeqCst) & line.mask() != 0)
            .unwrap_or(false)
    }

    fn is_pending(&self, irq: IrqNumber) -> HalResult<bool> {
        let line = IrqLine::split(irq)?;
        Ok(pending_words()[line.bank()] & line.mask() != 0)
    }

    fn next_pending(&self) -> Option<IrqNumber> {
        let pending = pending_words();
        (0..3).find_map(|bank| {
            let word = pending[bank] & self.enabled[bank].load(Ordering::SeqCst);
            (word != 0).then(|| bank as u32 * 32 + word.trailing_zeros())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_banks() {
        assert_eq!(IrqLine::split(1), Ok(IrqLine::Irq1(1)));
        assert_eq!(IrqLine::split(57), Ok(IrqLine::Irq2(25)));
        assert_eq!(IrqLine::split(65), Ok(IrqLine::Basic(1)));
        assert_eq!(IrqLine::split(lines::LINE_COUNT), Err(HalError::InvalidParam));
        assert_eq!(IrqLine::split(57).map(IrqLine::bank), Ok(1));
    }
}
