//! GPIO (General Purpose Input/Output) Hardware Abstraction Layer.
//!
//! This module defines platform-independent traits for GPIO control.

use crate::error::{HalError, HalResult};

/// Pin identifier within one GPIO bank.
pub type Pin = u8;

/// Pin logic level.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PinLevel {
    /// Logic low (0V or ground).
    Low,
    /// Logic high (VDD or 3.3V/5V depending on system).
    High,
}

impl From<bool> for PinLevel {
    fn from(value: bool) -> Self {
        if value { PinLevel::High } else { PinLevel::Low }
    }
}

impl From<PinLevel> for bool {
    fn from(level: PinLevel) -> bool {
        matches!(level, PinLevel::High)
    }
}

impl PinLevel {
    /// The opposite level.
    pub fn inverted(self) -> Self {
        match self {
            PinLevel::High => PinLevel::Low,
            PinLevel::Low => PinLevel::High,
        }
    }
}

/// Pin direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Internal pull resistor configuration.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PullMode {
    /// No pull resistor (high impedance).
    None,
    /// Enable internal pull-up resistor.
    Up,
    /// Enable internal pull-down resistor.
    Down,
}

/// Event detection configuration for GPIO pins.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EdgeDetect {
    /// Detect rising edge (low-to-high transition).
    Rising,
    /// Detect falling edge (high-to-low transition).
    Falling,
    /// Detect both rising and falling edges.
    Both,
}

/// Bank-wide GPIO configuration applied at init and resume.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GpioConfig {
    /// Bit `n` set makes pin `n` an output.
    pub output_mask: u32,
    /// Pull applied to every input pin.
    pub input_pull: PullMode,
}

impl GpioConfig {
    /// Direction of `pin` under this configuration.
    pub fn direction(&self, pin: Pin) -> Direction {
        if pin < 32 && self.output_mask & (1 << pin) != 0 {
            Direction::Output
        } else {
            Direction::Input
        }
    }
}

impl Default for GpioConfig {
    /// All pins inputs, no pulls.
    fn default() -> Self {
        Self {
            output_mask: 0,
            input_pull: PullMode::None,
        }
    }
}

/// GPIO controller trait.
///
/// This trait represents a GPIO bank capable of configuring and
/// controlling multiple pins. Edge detection is optional; controllers
/// without it keep the defaults, which report [`HalError::Unsupported`].
pub trait GpioController {
    /// Number of pins in the bank.
    fn pin_count(&self) -> Pin;

    /// Change the direction of a single pin.
    fn set_direction(&mut self, pin: Pin, direction: Direction) -> HalResult<()>;

    /// Configure the internal pull resistor for a pin.
    fn set_pull(&mut self, pin: Pin, pull: PullMode) -> HalResult<()>;

    /// Set a pin to logic high.
    fn set_high(&mut self, pin: Pin) -> HalResult<()>;

    /// Set a pin to logic low.
    fn set_low(&mut self, pin: Pin) -> HalResult<()>;

    /// Read the current logic level of a pin.
    fn read(&self, pin: Pin) -> HalResult<PinLevel>;

    /// Set the pin to a specific level.
    fn set_level(&mut self, pin: Pin, level: PinLevel) -> HalResult<()> {
        match level {
            PinLevel::High => self.set_high(pin),
            PinLevel::Low => self.set_low(pin),
        }
    }

    /// Toggle the output state of a pin.
    fn toggle(&mut self, pin: Pin) -> HalResult<()> {
        let level = self.read(pin)?;
        self.set_level(pin, level.inverted())
    }

    /// Enable edge detection for a pin.
    fn enable_edge_detect(&mut self, pin: Pin, edge: EdgeDetect) -> HalResult<()> {
        let _ = (pin, edge);
        Err(HalError::Unsupported)
    }

    /// Disable edge detection for a pin.
    fn disable_edge_detect(&mut self, pin: Pin) -> HalResult<()> {
        let _ = pin;
        Err(HalError::Unsupported)
    }

    /// Check if an event is latched for a pin.
    fn event_pending(&self, pin: Pin) -> HalResult<bool> {
        let _ = pin;
        Err(HalError::Unsupported)
    }

    /// Clear a latched event for a pin.
    fn clear_event(&mut self, pin: Pin) -> HalResult<()> {
        let _ = pin;
        Err(HalError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_from_mask() {
        let config = GpioConfig {
            output_mask: 0b1010,
            input_pull: PullMode::Up,
        };
        assert_eq!(config.direction(1), Direction::Output);
        assert_eq!(config.direction(2), Direction::Input);
        assert_eq!(config.direction(40), Direction::Input);
    }

    #[test]
    fn test_level_conversions() {
        assert_eq!(PinLevel::from(true), PinLevel::High);
        assert!(!bool::from(PinLevel::Low));
        assert_eq!(PinLevel::High.inverted(), PinLevel::Low);
    }
}
