//! Simulated timer driven by [`SimBoard::advance_time`].

use alloc::boxed::Box;
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use common::sync::SpinLock;

use super::{lines, Clock, SimBoard};
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::error::{HalError, HalResult};
use crate::hal::timer::{Timer, TimerConfig, TimerMode};
use crate::irq::{IrqHandle, IrqSource};

#[derive(Default)]
struct Compare {
    running: bool,
    periodic: bool,
    interval: u64,
    deadline: u64,
    applied: Option<TimerConfig>,
}

/// Free-running microsecond counter with one compare channel.
#[derive(Default)]
pub struct SimTimer {
    now: AtomicU64,
    compare: SpinLock<Compare>,
    fired: AtomicBool,
    expirations: AtomicU32,
    serviced: AtomicU32,
}

impl SimTimer {
    pub fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    /// Compare matches since the board was built.
    pub fn expirations(&self) -> u32 {
        self.expirations.load(Ordering::SeqCst)
    }

    /// Interrupts serviced through the line manager.
    pub fn serviced(&self) -> u32 {
        self.serviced.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.compare.lock().running
    }

    pub fn applied(&self) -> Option<TimerConfig> {
        self.compare.lock().applied
    }

    /// Move time forward; returns whether the compare channel matched.
    pub fn advance(&self, us: u64) -> bool {
        let now = self.now.fetch_add(us, Ordering::SeqCst) + us;
        let mut compare = self.compare.lock();
        let mut matched = 0;
        while compare.running && now >= compare.deadline {
            matched += 1;
            if compare.periodic {
                compare.deadline += compare.interval;
            } else {
                compare.running = false;
            }
        }
        drop(compare);
        if matched == 0 {
            return false;
        }
        self.expirations.fetch_add(matched, Ordering::SeqCst);
        self.fired.store(true, Ordering::SeqCst);
        true
    }

    fn arm(&self, interval_us: u32, periodic: bool) {
        let mut compare = self.compare.lock();
        compare.interval = interval_us as u64;
        compare.deadline = self.now() + interval_us as u64;
        compare.periodic = periodic;
        compare.running = true;
    }

    fn disarm(&self) {
        self.compare.lock().running = false;
    }
}

impl IrqSource for SimTimer {
    fn is_pending(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    fn handle(&self) {
        self.fired.store(false, Ordering::SeqCst);
        self.serviced.fetch_add(1, Ordering::SeqCst);
    }
}

struct TimerHw {
    board: &'static SimBoard,
}

impl PeripheralHw for TimerHw {
    type Config = TimerConfig;

    fn apply(&mut self, config: &TimerConfig) -> HalResult<()> {
        if config.interval_us == 0 {
            return Err(HalError::InvalidParam);
        }
        self.board.timer.compare.lock().applied = Some(*config);
        Ok(())
    }

    fn set_clock(&mut self, enabled: bool) {
        self.board.clocks.set(Clock::Timer, enabled);
    }

    fn reset(&mut self) {
        let timer = &self.board.timer;
        timer.disarm();
        timer.compare.lock().applied = None;
        timer.fired.store(false, Ordering::SeqCst);
    }
}

/// Timer device over the board's compare channel.
pub struct SimTimerDevice {
    core: Peripheral<TimerHw>,
    irq: Option<IrqHandle>,
}

impl SimTimerDevice {
    fn timer(&self) -> &'static SimTimer {
        &self.core.hw().board.timer
    }
}

impl Timer for SimTimerDevice {
    fn start(&mut self) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        let config = self.core.config();
        self.timer()
            .arm(config.interval_us, config.mode == TimerMode::Periodic);
        self.core.stats().record_operation();
        self.core.begin_activity()
    }

    fn stop(&mut self) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        self.timer().disarm();
        self.core.end_activity();
        Ok(())
    }

    fn clear_interrupt(&mut self) -> HalResult<()> {
        self.timer().fired.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_pending(&self) -> bool {
        self.timer().fired.load(Ordering::SeqCst)
    }

    fn now_us(&self) -> u64 {
        self.timer().now()
    }

    /// Simulated time only moves when someone moves it, so waiting is
    /// advancing.
    fn delay_us(&self, us: u32) {
        self.core.hw().board.advance_time(us as u64);
    }
}

impl Device for SimTimerDevice {
    peripheral_capabilities!(core);

    fn as_timer(&mut self) -> Option<&mut dyn Timer> {
        Some(self)
    }

    fn release(&mut self, resources: &Resources<'_>) {
        if let Some(handle) = self.irq.take() {
            let _ = resources.irq.disconnect(handle);
        }
    }
}

/// Builds a [`SimTimerDevice`]; the timer's source is connected to
/// [`lines::TIMER`] at its configured priority.
pub struct SimTimerDriver {
    board: &'static SimBoard,
}

impl SimTimerDriver {
    pub fn new(board: &'static SimBoard) -> Self {
        Self { board }
    }
}

impl DeviceDriver for SimTimerDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Timer
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = TimerConfig::try_from(*config)?;
        let mut timer = SimTimerDevice {
            core: Peripheral::new(DeviceKind::Timer, TimerHw { board: self.board }, config),
            irq: None,
        };
        let claimed = resources
            .irq
            .connect(lines::TIMER, &self.board.timer, config.irq_priority)
            .and_then(|handle| {
                timer.irq = Some(handle);
                resources.irq.enable(lines::TIMER)
            });
        if let Err(err) = claimed {
            timer.release(resources);
            return Err(err);
        }
        Ok(Box::new(timer))
    }
}
