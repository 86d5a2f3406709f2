//! Interrupt Controller Hardware Abstraction Layer.
//!
//! This module defines the platform-independent seam between the
//! interrupt line manager and a platform's interrupt controller.

use crate::error::HalResult;

/// Interrupt number type.
pub type IrqNumber = u32;

/// Interrupt priority level.
///
/// Lower values are more urgent and are dispatched first within a shared
/// line.
pub type Priority = u8;

/// Interrupt controller trait.
///
/// This trait represents the system's interrupt controller. Methods take
/// `&self` because the controller is shared between task code and the
/// low-level vector; implementations write their mask registers directly.
pub trait InterruptController: Send + Sync {
    /// Number of physical lines the controller exposes.
    fn line_count(&self) -> u32;

    /// Enable (unmask) an interrupt line.
    fn enable(&self, irq: IrqNumber) -> HalResult<()>;

    /// Disable (mask) an interrupt line.
    fn disable(&self, irq: IrqNumber) -> HalResult<()>;

    /// Whether the line is currently unmasked.
    fn is_enabled(&self, irq: IrqNumber) -> bool;

    /// Check if an interrupt is currently pending.
    fn is_pending(&self, irq: IrqNumber) -> HalResult<bool>;

    /// Get the next pending, unmasked interrupt.
    ///
    /// Returns `None` if no interrupts are pending.
    fn next_pending(&self) -> Option<IrqNumber>;

    /// Acknowledge a line after its sources have been serviced.
    ///
    /// Controllers that latch nothing themselves keep the default.
    fn clear(&self, irq: IrqNumber) -> HalResult<()> {
        let _ = irq;
        Ok(())
    }
}

/// Interrupt trigger mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TriggerMode {
    /// Interrupt triggers on a rising edge.
    RisingEdge,
    /// Interrupt triggers on a falling edge.
    FallingEdge,
    /// Interrupt triggers on both edges.
    BothEdges,
    /// Interrupt is active when the signal is high.
    LevelHigh,
    /// Interrupt is active when the signal is low.
    LevelLow,
}
