//! Shared implementation of the capability interfaces.
//!
//! Every backend device embeds a [`Peripheral`] and hands it out through
//! its capability accessors, so lifecycle, power and diagnostic semantics
//! are identical across peripheral types and platforms. The backend only
//! supplies the register-level hooks in [`PeripheralHw`].

use super::capability::{
    Diagnostic, Lifecycle, LifecycleState, Power, PowerCallback, Statistics, StatisticsRecord,
    StatusRecord,
};
use super::DeviceKind;
use crate::error::{HalError, HalResult};

/// Register-level hooks a backend supplies for one peripheral.
pub trait PeripheralHw: Send {
    /// Type-specific configuration.
    type Config: Copy + Send;

    /// Program `config` into the hardware. The clock is on when called.
    fn apply(&mut self, config: &Self::Config) -> HalResult<()>;

    /// Gate the peripheral clock.
    fn set_clock(&mut self, enabled: bool);

    /// Return the block to its reset state before the clock goes off.
    fn reset(&mut self) {}
}

/// Capability bundle over a peripheral's hardware hooks.
pub struct Peripheral<H: PeripheralHw> {
    kind: DeviceKind,
    hw: H,
    config: H::Config,
    state: LifecycleState,
    resume_to: LifecycleState,
    powered: bool,
    callback: Option<PowerCallback>,
    stats: Statistics,
}

impl<H: PeripheralHw> Peripheral<H> {
    /// A powered-down, uninitialized bundle holding `config`.
    pub fn new(kind: DeviceKind, hw: H, config: H::Config) -> Self {
        Self {
            kind,
            hw,
            config,
            state: LifecycleState::Uninitialized,
            resume_to: LifecycleState::Initialized,
            powered: false,
            callback: None,
            stats: Statistics::new(),
        }
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn hw_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn config(&self) -> H::Config {
        self.config
    }

    /// Replace the configuration.
    ///
    /// An active peripheral is reprogrammed immediately and keeps its old
    /// configuration if that fails. Otherwise the value is stored and
    /// applied by the next `init` or `resume`.
    pub fn set_config(&mut self, config: H::Config) -> HalResult<()> {
        if self.state.is_active() {
            if let Err(err) = self.hw.apply(&config) {
                self.stats.record_error();
                return Err(err);
            }
        }
        self.config = config;
        Ok(())
    }

    /// Gate for type-specific operations.
    pub fn ensure_active(&self) -> HalResult<()> {
        match self.state {
            LifecycleState::Initialized | LifecycleState::Running => Ok(()),
            LifecycleState::Uninitialized => Err(HalError::NotInit),
            LifecycleState::Suspended | LifecycleState::Error => Err(HalError::InvalidState),
        }
    }

    /// Mark the start of ongoing work (a running timer, a streaming
    /// converter): `Initialized → Running`.
    pub fn begin_activity(&mut self) -> HalResult<()> {
        self.ensure_active()?;
        self.state = LifecycleState::Running;
        Ok(())
    }

    /// `Running → Initialized`; no-op in any other state.
    pub fn end_activity(&mut self) {
        if self.state == LifecycleState::Running {
            self.state = LifecycleState::Initialized;
        }
    }

    /// Record a failed operation and pass the error through.
    pub fn failed(&self, err: HalError) -> HalError {
        self.stats.record_error();
        err
    }

    fn set_power(&mut self, on: bool) {
        if self.powered == on {
            return;
        }
        self.hw.set_clock(on);
        self.powered = on;
        if let Some(callback) = self.callback {
            callback(on);
        }
    }

    fn enter_error(&mut self, err: HalError) -> HalError {
        self.state = LifecycleState::Error;
        self.failed(err)
    }
}

impl<H: PeripheralHw> Lifecycle for Peripheral<H> {
    fn init(&mut self) -> HalResult<()> {
        if self.state != LifecycleState::Uninitialized {
            return Err(HalError::AlreadyInit);
        }
        self.set_power(true);
        let config = self.config;
        self.hw.apply(&config).map_err(|err| self.enter_error(err))?;
        self.state = LifecycleState::Initialized;
        Ok(())
    }

    fn deinit(&mut self) -> HalResult<()> {
        if self.state == LifecycleState::Uninitialized {
            return Err(HalError::NotInit);
        }
        if self.powered {
            self.hw.reset();
        }
        self.set_power(false);
        self.state = LifecycleState::Uninitialized;
        Ok(())
    }

    fn suspend(&mut self) -> HalResult<()> {
        match self.state {
            LifecycleState::Initialized | LifecycleState::Running => {
                self.resume_to = self.state;
                self.set_power(false);
                self.state = LifecycleState::Suspended;
                Ok(())
            }
            LifecycleState::Uninitialized => Err(HalError::NotInit),
            LifecycleState::Suspended | LifecycleState::Error => Err(HalError::InvalidState),
        }
    }

    fn resume(&mut self) -> HalResult<()> {
        match self.state {
            LifecycleState::Suspended => {}
            LifecycleState::Uninitialized => return Err(HalError::NotInit),
            _ => return Err(HalError::InvalidState),
        }
        self.set_power(true);
        let config = self.config;
        self.hw.apply(&config).map_err(|err| self.enter_error(err))?;
        self.state = self.resume_to;
        Ok(())
    }

    fn state(&self) -> LifecycleState {
        self.state
    }
}

impl<H: PeripheralHw> Power for Peripheral<H> {
    fn enable(&mut self) -> HalResult<()> {
        self.set_power(true);
        Ok(())
    }

    fn disable(&mut self) -> HalResult<()> {
        self.set_power(false);
        Ok(())
    }

    fn is_enabled(&self) -> bool {
        self.powered
    }

    fn set_callback(&mut self, callback: Option<PowerCallback>) {
        self.callback = callback;
    }
}

impl<H: PeripheralHw> Diagnostic for Peripheral<H> {
    fn clear_statistics(&mut self) -> HalResult<()> {
        self.stats.clear();
        Ok(())
    }

    fn status_record(&self) -> StatusRecord {
        StatusRecord {
            state: self.state,
            powered: self.powered,
            kind: self.kind as u8,
            error_count: self.stats.errors(),
        }
    }

    fn statistics_record(&self) -> StatisticsRecord {
        self.stats.snapshot()
    }
}

/// Implements the configuration and capability methods of
/// [`Device`](super::Device) by delegating to a [`Peripheral`] field.
macro_rules! peripheral_capabilities {
    ($field:ident) => {
        fn kind(&self) -> $crate::device::DeviceKind {
            self.$field.kind()
        }

        fn config(&self) -> $crate::device::DeviceConfig {
            self.$field.config().into()
        }

        fn set_config(
            &mut self,
            config: &$crate::device::DeviceConfig,
        ) -> $crate::error::HalResult<()> {
            self.$field.set_config((*config).try_into()?)
        }

        fn lifecycle_state(&self) -> $crate::device::LifecycleState {
            $crate::device::Lifecycle::state(&self.$field)
        }

        fn lifecycle(&mut self) -> Option<&mut dyn $crate::device::Lifecycle> {
            Some(&mut self.$field)
        }

        fn power(&mut self) -> Option<&mut dyn $crate::device::Power> {
            Some(&mut self.$field)
        }

        fn diagnostic(&mut self) -> Option<&mut dyn $crate::device::Diagnostic> {
            Some(&mut self.$field)
        }
    };
}

pub(crate) use peripheral_capabilities;

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeHw {
        clock: bool,
        applied: Option<u32>,
        fail_apply: bool,
        resets: u32,
    }

    impl PeripheralHw for FakeHw {
        type Config = u32;

        fn apply(&mut self, config: &u32) -> HalResult<()> {
            if self.fail_apply {
                return Err(HalError::Bus);
            }
            assert!(self.clock, "config applied with clock gated");
            self.applied = Some(*config);
            Ok(())
        }

        fn set_clock(&mut self, enabled: bool) {
            self.clock = enabled;
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn bundle(config: u32) -> Peripheral<FakeHw> {
        Peripheral::new(DeviceKind::Timer, FakeHw::default(), config)
    }

    #[test]
    fn test_init_twice_fails() {
        let mut p = bundle(7);
        assert_eq!(p.init(), Ok(()));
        assert_eq!(p.state(), LifecycleState::Initialized);
        assert!(p.hw().clock);
        assert_eq!(p.hw().applied, Some(7));
        assert_eq!(p.init(), Err(HalError::AlreadyInit));
    }

    #[test]
    fn test_deinit_requires_init() {
        let mut p = bundle(1);
        assert_eq!(p.deinit(), Err(HalError::NotInit));
        p.init().unwrap();
        assert_eq!(p.deinit(), Ok(()));
        assert_eq!(p.state(), LifecycleState::Uninitialized);
        assert!(!p.is_enabled());
        assert_eq!(p.hw().resets, 1);
    }

    #[test]
    fn test_suspend_resume_restores_running() {
        let mut p = bundle(3);
        assert_eq!(p.suspend(), Err(HalError::NotInit));
        p.init().unwrap();
        p.begin_activity().unwrap();
        assert_eq!(p.state(), LifecycleState::Running);

        assert_eq!(p.suspend(), Ok(()));
        assert_eq!(p.state(), LifecycleState::Suspended);
        assert!(!p.hw().clock);
        assert_eq!(p.ensure_active(), Err(HalError::InvalidState));
        assert_eq!(p.suspend(), Err(HalError::InvalidState));

        p.hw_mut().applied = None;
        assert_eq!(p.resume(), Ok(()));
        assert_eq!(p.state(), LifecycleState::Running);
        assert_eq!(p.hw().applied, Some(3));
        assert_eq!(p.resume(), Err(HalError::InvalidState));
    }

    #[test]
    fn test_failed_init_enters_error_until_deinit() {
        let mut p = bundle(3);
        p.hw_mut().fail_apply = true;
        assert_eq!(p.init(), Err(HalError::Bus));
        assert_eq!(p.state(), LifecycleState::Error);
        assert_eq!(p.init(), Err(HalError::AlreadyInit));
        assert_eq!(p.status_record().error_count, 1);

        p.hw_mut().fail_apply = false;
        p.deinit().unwrap();
        assert_eq!(p.init(), Ok(()));
    }

    #[test]
    fn test_failed_resume_enters_error() {
        let mut p = bundle(3);
        p.init().unwrap();
        p.suspend().unwrap();
        p.hw_mut().fail_apply = true;
        assert_eq!(p.resume(), Err(HalError::Bus));
        assert_eq!(p.state(), LifecycleState::Error);
    }

    #[test]
    fn test_set_config_inactive_is_deferred() {
        let mut p = bundle(1);
        p.set_config(9).unwrap();
        assert_eq!(p.config(), 9);
        assert_eq!(p.hw().applied, None);
        p.init().unwrap();
        assert_eq!(p.hw().applied, Some(9));
    }

    #[test]
    fn test_set_config_failure_keeps_old_value() {
        let mut p = bundle(1);
        p.init().unwrap();
        p.hw_mut().fail_apply = true;
        assert_eq!(p.set_config(2), Err(HalError::Bus));
        assert_eq!(p.config(), 1);
        assert_eq!(p.state(), LifecycleState::Initialized);
    }

    #[test]
    fn test_power_callback_fires_on_transitions_only() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        let callback: PowerCallback = Box::leak(Box::new(|_on: bool| {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }));

        let mut p = bundle(1);
        p.set_callback(Some(callback));
        p.enable().unwrap();
        p.enable().unwrap();
        assert!(p.is_enabled());
        p.disable().unwrap();
        p.disable().unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);

        p.set_callback(None);
        p.enable().unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_diagnostic_buffers() {
        let mut p = bundle(1);
        p.init().unwrap();
        p.stats().record_out(5);

        let mut status = [0u8; StatusRecord::SIZE];
        assert_eq!(p.status(&mut status), Ok(StatusRecord::SIZE));
        assert_eq!(status[0], LifecycleState::Initialized as u8);
        assert_eq!(status[1], 1);
        assert_eq!(status[2], DeviceKind::Timer as u8);

        assert_eq!(p.statistics(&mut [0u8; 4]), Err(HalError::DataSize));
        assert_eq!(p.statistics_record().bytes_out, 5);
        p.clear_statistics().unwrap();
        assert_eq!(p.statistics_record(), StatisticsRecord::default());
        assert_eq!(p.state(), LifecycleState::Initialized);
    }
}
