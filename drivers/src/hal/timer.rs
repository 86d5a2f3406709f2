//! Timer Hardware Abstraction Layer.
//!
//! This module defines platform-independent traits for hardware timers.

use crate::error::HalResult;
use crate::hal::interrupt::Priority;

/// Timer operating mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TimerMode {
    /// Timer fires once after the specified interval.
    OneShot,
    /// Timer automatically reloads and fires periodically.
    Periodic,
}

/// Timer configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    pub mode: TimerMode,
    /// Interval used by [`Timer::start`] in microseconds.
    pub interval_us: u32,
    /// Priority of the timer's source on its interrupt line.
    pub irq_priority: Priority,
}

impl Default for TimerConfig {
    /// One-shot, 1 ms.
    fn default() -> Self {
        Self {
            mode: TimerMode::OneShot,
            interval_us: 1000,
            irq_priority: crate::config::DEFAULT_IRQ_PRIORITY,
        }
    }
}

/// Hardware timer trait.
///
/// This trait represents one compare channel of a timer peripheral. The
/// interval and mode come from the device configuration.
pub trait Timer {
    /// Arm the timer with the configured interval and mode.
    fn start(&mut self) -> HalResult<()>;

    /// Stop a running timer.
    fn stop(&mut self) -> HalResult<()>;

    /// Clear a pending interrupt.
    fn clear_interrupt(&mut self) -> HalResult<()>;

    /// Check if the timer has expired and not been cleared.
    fn is_pending(&self) -> bool;

    /// Free-running counter in microseconds.
    fn now_us(&self) -> u64;

    /// Busy-wait delay for the specified number of microseconds.
    ///
    /// This blocks the CPU and should only be used for short delays.
    fn delay_us(&self, us: u32) {
        let start = self.now_us();
        let duration = us as u64;

        while self.now_us().wrapping_sub(start) < duration {
            core::hint::spin_loop();
        }
    }
}
