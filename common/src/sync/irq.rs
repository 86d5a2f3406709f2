use core::fmt::Debug;

/// Architecture-specific interrupt masking interface.
///
/// Implemented once per architecture in [`crate::arch`].
pub trait IrqControl {
    /// Saved interrupt state.
    type State: Copy + Debug;

    /// Disable interrupts and return the previous state.
    fn disable() -> Self::State;

    /// Restore interrupts to a previous state.
    fn restore(state: Self::State);

    /// Whether interrupts are currently enabled on this CPU.
    fn enabled() -> bool;
}
