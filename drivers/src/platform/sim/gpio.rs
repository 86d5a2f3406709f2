//! Simulated GPIO bank.
//!
//! All pins share one interrupt line. Each pin latches its own edge event
//! and is its own [`IrqSource`], so several pins can be chained on the
//! shared line and serviced independently.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use common::sync::SpinLock;

use super::{Clock, SimBoard};
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::error::{HalError, HalResult};
use crate::hal::gpio::{Direction, EdgeDetect, GpioConfig, GpioController, Pin, PinLevel, PullMode};
use crate::irq::IrqSource;

pub const PIN_COUNT: Pin = 32;

const EDGE_RISING: u8 = 1 << 0;
const EDGE_FALLING: u8 = 1 << 1;

/// Called with the pin number when a pin's event is serviced.
pub type PinHandler = &'static (dyn Fn(Pin) + Sync);

pub struct SimPin {
    index: Pin,
    level: AtomicBool,
    output: AtomicBool,
    edges: AtomicU8,
    event: AtomicBool,
    handler: SpinLock<Option<PinHandler>>,
    serviced: AtomicU32,
}

impl SimPin {
    fn new(index: Pin) -> Self {
        Self {
            index,
            level: AtomicBool::new(false),
            output: AtomicBool::new(false),
            edges: AtomicU8::new(0),
            event: AtomicBool::new(false),
            handler: SpinLock::new(None),
            serviced: AtomicU32::new(0),
        }
    }

    pub fn index(&self) -> Pin {
        self.index
    }

    pub fn set_handler(&self, handler: Option<PinHandler>) {
        *self.handler.lock() = handler;
    }

    /// Events serviced through the interrupt line.
    pub fn serviced(&self) -> u32 {
        self.serviced.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.output.store(false, Ordering::SeqCst);
        self.edges.store(0, Ordering::SeqCst);
        self.event.store(false, Ordering::SeqCst);
    }
}

impl IrqSource for SimPin {
    fn is_pending(&self) -> bool {
        self.event.load(Ordering::SeqCst)
    }

    fn handle(&self) {
        self.event.store(false, Ordering::SeqCst);
        self.serviced.fetch_add(1, Ordering::SeqCst);
        let handler = *self.handler.lock();
        if let Some(handler) = handler {
            handler(self.index);
        }
    }
}

pub struct SimGpio {
    pins: [SimPin; PIN_COUNT as usize],
    pulls: SpinLock<[PullMode; PIN_COUNT as usize]>,
    applied: SpinLock<Option<GpioConfig>>,
}

impl SimGpio {
    pub fn new() -> Self {
        Self {
            pins: core::array::from_fn(|i| SimPin::new(i as Pin)),
            pulls: SpinLock::new([PullMode::None; PIN_COUNT as usize]),
            applied: SpinLock::new(None),
        }
    }

    pub fn pin(&self, pin: Pin) -> Option<&SimPin> {
        self.pins.get(pin as usize)
    }

    pub fn pull(&self, pin: Pin) -> Option<PullMode> {
        self.pulls.lock().get(pin as usize).copied()
    }

    pub fn applied(&self) -> Option<GpioConfig> {
        *self.applied.lock()
    }

    /// Drive an input pin. Returns whether an enabled edge latched an
    /// event.
    pub fn drive(&self, pin: Pin, level: PinLevel) -> bool {
        let Some(p) = self.pin(pin) else {
            return false;
        };
        if p.output.load(Ordering::SeqCst) {
            return false;
        }
        let high = bool::from(level);
        let was = p.level.swap(high, Ordering::SeqCst);
        let edge = match (was, high) {
            (false, true) => EDGE_RISING,
            (true, false) => EDGE_FALLING,
            _ => return false,
        };
        if p.edges.load(Ordering::SeqCst) & edge == 0 {
            return false;
        }
        p.event.store(true, Ordering::SeqCst);
        true
    }
}

impl Default for SimGpio {
    fn default() -> Self {
        Self::new()
    }
}

struct GpioHw {
    board: &'static SimBoard,
}

impl GpioHw {
    fn bank(&self) -> &'static SimGpio {
        &self.board.gpio
    }
}

impl PeripheralHw for GpioHw {
    type Config = GpioConfig;

    fn apply(&mut self, config: &GpioConfig) -> HalResult<()> {
        let bank = self.bank();
        let mut pulls = bank.pulls.lock();
        for pin in &bank.pins {
            let output = config.direction(pin.index) == Direction::Output;
            pin.output.store(output, Ordering::SeqCst);
            pulls[pin.index as usize] = if output {
                PullMode::None
            } else {
                config.input_pull
            };
        }
        *bank.applied.lock() = Some(*config);
        Ok(())
    }

    fn set_clock(&mut self, enabled: bool) {
        self.board.clocks.set(Clock::Gpio, enabled);
    }

    fn reset(&mut self) {
        let bank = self.bank();
        bank.pins.iter().for_each(SimPin::reset);
        *bank.applied.lock() = None;
    }
}

/// GPIO device over the board's bank.
pub struct SimGpioDevice {
    core: Peripheral<GpioHw>,
}

impl SimGpioDevice {
    fn pin(&self, pin: Pin) -> HalResult<&'static SimPin> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        self.core
            .hw()
            .bank()
            .pin(pin)
            .ok_or_else(|| self.core.failed(HalError::InvalidParam))
    }

    fn write(&mut self, pin: Pin, high: bool) -> HalResult<()> {
        let p = self.pin(pin)?;
        if !p.output.load(Ordering::SeqCst) {
            return Err(self.core.failed(HalError::InvalidState));
        }
        p.level.store(high, Ordering::SeqCst);
        self.core.stats().record_operation();
        Ok(())
    }
}

impl GpioController for SimGpioDevice {
    fn pin_count(&self) -> Pin {
        PIN_COUNT
    }

    fn set_direction(&mut self, pin: Pin, direction: Direction) -> HalResult<()> {
        let p = self.pin(pin)?;
        p.output
            .store(direction == Direction::Output, Ordering::SeqCst);
        Ok(())
    }

    fn set_pull(&mut self, pin: Pin, pull: PullMode) -> HalResult<()> {
        self.pin(pin)?;
        self.core.hw().bank().pulls.lock()[pin as usize] = pull;
        Ok(())
    }

    fn set_high(&mut self, pin: Pin) -> HalResult<()> {
        self.write(pin, true)
    }

    fn set_low(&mut self, pin: Pin) -> HalResult<()> {
        self.write(pin, false)
    }

    fn read(&self, pin: Pin) -> HalResult<PinLevel> {
        let p = self.pin(pin)?;
        self.core.stats().record_operation();
        Ok(p.level.load(Ordering::SeqCst).into())
    }

    fn enable_edge_detect(&mut self, pin: Pin, edge: EdgeDetect) -> HalResult<()> {
        let mask = match edge {
            EdgeDetect::Rising => EDGE_RISING,
            EdgeDetect::Falling => EDGE_FALLING,
            EdgeDetect::Both => EDGE_RISING | EDGE_FALLING,
        };
        self.pin(pin)?.edges.store(mask, Ordering::SeqCst);
        Ok(())
    }

    fn disable_edge_detect(&mut self, pin: Pin) -> HalResult<()> {
        self.pin(pin)?.edges.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn event_pending(&self, pin: Pin) -> HalResult<bool> {
        Ok(self.pin(pin)?.event.load(Ordering::SeqCst))
    }

    fn clear_event(&mut self, pin: Pin) -> HalResult<()> {
        self.pin(pin)?.event.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Device for SimGpioDevice {
    peripheral_capabilities!(core);

    fn as_gpio(&mut self) -> Option<&mut dyn GpioController> {
        Some(self)
    }
}

pub struct SimGpioDriver {
    board: &'static SimBoard,
}

impl SimGpioDriver {
    pub fn new(board: &'static SimBoard) -> Self {
        Self { board }
    }
}

impl DeviceDriver for SimGpioDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Gpio
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        _resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = GpioConfig::try_from(*config)?;
        let hw = GpioHw { board: self.board };
        Ok(Box::new(SimGpioDevice {
            core: Peripheral::new(DeviceKind::Gpio, hw, config),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Lifecycle;
    use crate::platform::sim::SimConfig;

    fn device(board: &'static SimBoard, config: GpioConfig) -> SimGpioDevice {
        let mut dev = SimGpioDevice {
            core: Peripheral::new(DeviceKind::Gpio, GpioHw { board }, config),
        };
        dev.core.init().unwrap();
        dev
    }

    #[test]
    fn test_outputs_follow_config() {
        let board = SimBoard::leak(SimConfig::default());
        let config = GpioConfig {
            output_mask: 1 << 4,
            input_pull: PullMode::Up,
        };
        let mut gpio = device(board, config);
        assert_eq!(board.gpio.pull(3), Some(PullMode::Up));
        assert_eq!(board.gpio.pull(4), Some(PullMode::None));

        gpio.set_high(4).unwrap();
        assert_eq!(gpio.read(4), Ok(PinLevel::High));
        gpio.toggle(4).unwrap();
        assert_eq!(gpio.read(4), Ok(PinLevel::Low));
        assert_eq!(gpio.set_high(3), Err(HalError::InvalidState));
        assert_eq!(gpio.read(40), Err(HalError::InvalidParam));
    }

    #[test]
    fn test_edge_latching() {
        let board = SimBoard::leak(SimConfig::default());
        let mut gpio = device(board, GpioConfig::default());
        gpio.enable_edge_detect(7, EdgeDetect::Falling).unwrap();

        board.drive_pin(7, PinLevel::High);
        assert_eq!(gpio.event_pending(7), Ok(false));
        board.drive_pin(7, PinLevel::Low);
        assert_eq!(gpio.event_pending(7), Ok(true));
        assert_eq!(gpio.read(7), Ok(PinLevel::Low));

        gpio.clear_event(7).unwrap();
        gpio.disable_edge_detect(7).unwrap();
        board.drive_pin(7, PinLevel::High);
        board.drive_pin(7, PinLevel::Low);
        assert_eq!(gpio.event_pending(7), Ok(false));
    }

    #[test]
    fn test_deinit_resets_bank() {
        let board = SimBoard::leak(SimConfig::default());
        let mut gpio = device(board, GpioConfig::default());
        gpio.set_direction(2, Direction::Output).unwrap();
        gpio.core.deinit().unwrap();
        assert_eq!(board.gpio.applied(), None);
        assert!(!board.clock_enabled(Clock::Gpio));
        assert_eq!(gpio.read(2), Err(HalError::NotInit));
    }
}
