//! ARMv6 CPSR interrupt masking.

use crate::sync::irq::IrqControl;

const CPSR_I_BIT: u32 = 1 << 7;

/// IRQ masking through the CPSR I bit.
///
/// `disable` saves the CPSR and executes `cpsid i`; the saved state records
/// whether IRQs were enabled before, so nested critical sections only
/// re-enable on the outermost restore.
pub struct ArmIrq;

impl IrqControl for ArmIrq {
    type State = bool;

    #[inline(always)]
    fn disable() -> bool {
        let cpsr: u32;
        unsafe {
            core::arch::asm!(
                "mrs {0}, cpsr",
                "cpsid i",
                out(reg) cpsr,
                options(nomem, nostack)
            );
        }
        cpsr & CPSR_I_BIT == 0
    }

    #[inline(always)]
    fn restore(was_enabled: bool) {
        if was_enabled {
            unsafe {
                core::arch::asm!("cpsie i", options(nomem, nostack));
            }
        }
    }

    #[inline(always)]
    fn enabled() -> bool {
        let cpsr: u32;
        unsafe {
            core::arch::asm!("mrs {0}, cpsr", out(reg) cpsr, options(nomem, nostack));
        }
        cpsr & CPSR_I_BIT == 0
    }
}
