//! BCM2835 System Timer Driver
//!
//! The BCM2835 has a 64-bit free-running counter at 1MHz and
//! four compare channels that can generate interrupts. Channels 0 and 2
//! belong to the VideoCore; the ARM side uses 1 and 3.

use alloc::boxed::Box;
use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use super::lines;
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::error::{HalError, HalResult};
use crate::hal::interrupt::IrqNumber;
use crate::hal::timer::{Timer, TimerConfig, TimerMode};
use crate::irq::{IrqHandle, IrqSource};

/// System timer base address.
pub const TIMER_BASE: usize = 0x2000_3000;

/// Compare channels available to the ARM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum Channel {
    Channel1 = 1,
    Channel3 = 3,
}

impl Channel {
    /// Get the IRQ number for this channel.
    pub fn irq_number(self) -> IrqNumber {
        match self {
            Channel::Channel1 => lines::SYSTEM_TIMER_1,
            Channel::Channel3 => lines::SYSTEM_TIMER_3,
        }
    }

    fn bitmask(self) -> u32 {
        1 << (self as u32)
    }

    fn source(self) -> &'static CompareSource {
        match self {
            Channel::Channel1 => &COMPARE_1,
            Channel::Channel3 => &COMPARE_3,
        }
    }
}

/// Memory-mapped system timer registers.
#[repr(C)]
struct Registers {
    cs: u32,
    clo: u32,
    chi: u32,
    c: [u32; 4],
}

#[inline(always)]
fn regs() -> *mut Registers {
    TIMER_BASE as *mut Registers
}

// ============================================================================
// Raw Hardware Functions
// ============================================================================

/// Read the 64-bit free-running counter.
pub fn read_counter() -> u64 {
    unsafe {
        // Read high word first for consistency
        let hi1 = read_volatile(&(*regs()).chi);
        let lo = read_volatile(&(*regs()).clo);
        let hi2 = read_volatile(&(*regs()).chi);

        // If high word changed, re-read low word
        let (hi, lo) = if hi1 != hi2 {
            (hi2, read_volatile(&(*regs()).clo))
        } else {
            (hi1, lo)
        };

        ((hi as u64) << 32) | (lo as u64)
    }
}

/// Arm a compare match `interval_us` from now.
fn arm(channel: Channel, interval_us: u32) {
    unsafe {
        let clo = read_volatile(&(*regs()).clo);

        // Clear pending match
        write_volatile(&mut (*regs()).cs, channel.bitmask());

        write_volatile(
            &mut (*regs()).c[channel as usize],
            clo.wrapping_add(interval_us),
        );
    }
}

/// Push the compare register `interval_us` past its last match.
fn rearm(channel: Channel, interval_us: u32) {
    unsafe {
        let cmp = &mut (*regs()).c[channel as usize];
        let last = read_volatile(cmp);
        write_volatile(cmp, last.wrapping_add(interval_us));
    }
}

fn clear_match(channel: Channel) {
    unsafe {
        write_volatile(&mut (*regs()).cs, channel.bitmask());
    }
}

fn match_pending(channel: Channel) -> bool {
    unsafe { read_volatile(&(*regs()).cs) & channel.bitmask() != 0 }
}

// ============================================================================
// Interrupt Sources
// ============================================================================

/// Match source of one compare channel.
///
/// The compare registers have no enable bit, so the source ignores
/// matches while its channel is stopped.
pub struct CompareSource {
    channel: Channel,
    running: AtomicBool,
    periodic: AtomicBool,
    interval_us: AtomicU32,
    expirations: AtomicU32,
}

impl CompareSource {
    const fn new(channel: Channel) -> Self {
        Self {
            channel,
            running: AtomicBool::new(false),
            periodic: AtomicBool::new(false),
            interval_us: AtomicU32::new(0),
            expirations: AtomicU32::new(0),
        }
    }

    /// Matches serviced since boot.
    pub fn expirations(&self) -> u32 {
        self.expirations.load(Ordering::Relaxed)
    }

    fn start(&self, interval_us: u32, periodic: bool) {
        self.interval_us.store(interval_us, Ordering::SeqCst);
        self.periodic.store(periodic, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        arm(self.channel, interval_us);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        clear_match(self.channel);
    }
}

impl IrqSource for CompareSource {
    fn is_pending(&self) -> bool {
        self.running.load(Ordering::SeqCst) && match_pending(self.channel)
    }

    fn handle(&self) {
        clear_match(self.channel);
        self.expirations.fetch_add(1, Ordering::Relaxed);
        if self.periodic.load(Ordering::SeqCst) {
            rearm(self.channel, self.interval_us.load(Ordering::SeqCst));
        } else {
            self.running.store(false, Ordering::SeqCst);
        }
    }
}

static COMPARE_1: CompareSource = CompareSource::new(Channel::Channel1);
static COMPARE_3: CompareSource = CompareSource::new(Channel::Channel3);

// ============================================================================
// Device
// ============================================================================

struct TimerHw {
    channel: Channel,
}

impl PeripheralHw for TimerHw {
    type Config = TimerConfig;

    fn apply(&mut self, config: &TimerConfig) -> HalResult<()> {
        if config.interval_us == 0 {
            return Err(HalError::InvalidParam);
        }
        Ok(())
    }

    /// The counter always runs; there is nothing to gate.
    fn set_clock(&mut self, _enabled: bool) {}

    fn reset(&mut self) {
        self.channel.source().stop();
    }
}

/// One compare channel of the system timer.
pub struct Bcm2835TimerDevice {
    core: Peripheral<TimerHw>,
    irq: Option<IrqHandle>,
}

impl Bcm2835TimerDevice {
    fn source(&self) -> &'static CompareSource {
        self.core.hw().channel.source()
    }
}

impl Timer for Bcm2835TimerDevice {
    fn start(&mut self) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        let config = self.core.config();
        self.source()
            .start(config.interval_us, config.mode == TimerMode::Periodic);
        self.core.stats().record_operation();
        self.core.begin_activity()
    }

    fn stop(&mut self) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        self.source().stop();
        self.core.end_activity();
        Ok(())
    }

    fn clear_interrupt(&mut self) -> HalResult<()> {
        clear_match(self.core.hw().channel);
        Ok(())
    }

    fn is_pending(&self) -> bool {
        match_pending(self.core.hw().channel)
    }

    fn now_us(&self) -> u64 {
        read_counter()
    }
}

impl Device for Bcm2835TimerDevice {
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

/// Builds a timer device on one compare channel and connects its match
/// source at the configured priority.
pub struct Bcm2835TimerDriver {
    channel: Channel,
}

impl Bcm2835TimerDriver {
    pub const fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

impl DeviceDriver for Bcm2835TimerDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Timer
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = TimerConfig::try_from(*config)?;
        let line = self.channel.irq_number();
        let mut timer = Bcm2835TimerDevice {
            core: Peripheral::new(
                DeviceKind::Timer,
                TimerHw {
                    channel: self.channel,
                },
                config,
            ),
            irq: None,
        };
        let claimed = resources
            .irq
            .connect(line, self.channel.source(), config.irq_priority)
            .and_then(|handle| {
                timer.irq = Some(handle);
                resources.irq.enable(line)
            });
        if let Err(err) = claimed {
            timer.release(resources);
            return Err(err);
        }
        Ok(Box::new(timer))
    }
}
