//! Device registry and reference-counted factory.
//!
//! The registry owns one slot per [`DeviceDescriptor`]. A device is built
//! on the first [`DeviceManager::get`] for its name and torn down when the
//! last [`DeviceHandle`] is given back through [`DeviceManager::put`].
//! Between those two points every caller shares the same instance.
//!
//! Registry operations take a blocking spin lock per slot and must not be
//! called from interrupt context, nor from inside [`DeviceHandle::with`]
//! on the same device.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicUsize, Ordering};

use common::sync::SpinLock;
use log::debug;
use spin::Once;

use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, LifecycleState, Resources, StatisticsRecord,
    StatusRecord,
};
use crate::dma::dma;
use crate::error::{HalError, HalResult};
use crate::hal::adc::AdcConverter;
use crate::hal::gpio::GpioController;
use crate::hal::i2c::I2cBus;
use crate::hal::serial::SerialPort;
use crate::hal::spi::SpiBus;
use crate::hal::timer::Timer;
use crate::irq::interrupts;
use crate::platform::{CurrentPlatform, Platform};

/// Static record for one device instance.
pub struct DeviceDescriptor {
    /// Lookup key, unique within a registry.
    pub name: &'static str,
    /// Configuration the first construction uses.
    pub default_config: DeviceConfig,
    pub driver: Box<dyn DeviceDriver>,
}

impl DeviceDescriptor {
    pub fn new(
        name: &'static str,
        default_config: impl Into<DeviceConfig>,
        driver: impl DeviceDriver + 'static,
    ) -> Self {
        Self {
            name,
            default_config: default_config.into(),
            driver: Box::new(driver),
        }
    }
}

/// One row of [`DeviceManager::enumerate`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: &'static str,
    pub kind: DeviceKind,
    pub state: LifecycleState,
    pub ref_count: usize,
}

impl DeviceInfo {
    pub const EMPTY: Self = Self {
        name: "",
        kind: DeviceKind::Serial,
        state: LifecycleState::Uninitialized,
        ref_count: 0,
    };
}

/// The live device of a slot together with its working configuration.
struct Instance {
    device: Option<Box<dyn Device>>,
    config: DeviceConfig,
}

struct Ownership {
    ref_count: usize,
    failed: bool,
}

struct Slot {
    descriptor: DeviceDescriptor,
    ownership: SpinLock<Ownership>,
    instance: Arc<SpinLock<Instance>>,
}

/// Shared access to one device, returned by [`DeviceManager::get`].
///
/// Not clonable: every handle stands for one reference. Give it back with
/// [`DeviceManager::put`].
#[must_use = "a dropped handle keeps its device alive; give it back with put"]
pub struct DeviceHandle {
    registry: usize,
    index: usize,
    name: &'static str,
    kind: DeviceKind,
    instance: Arc<SpinLock<Instance>>,
}

macro_rules! typed_access {
    ($($(#[$doc:meta])* $fn:ident => $accessor:ident: $iface:ident),+ $(,)?) => {
        $(
            $(#[$doc])*
            pub fn $fn<R>(&self, f: impl FnOnce(&mut dyn $iface) -> R) -> HalResult<R> {
                self.with(|device| device.$accessor().map(f).ok_or(HalError::Unsupported))?
            }
        )+
    };
}

impl DeviceHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    /// Run `f` with exclusive access to the device.
    ///
    /// [`HalError::InvalidState`] if a failed `reinit` left no device.
    pub fn with<R>(&self, f: impl FnOnce(&mut dyn Device) -> R) -> HalResult<R> {
        let mut instance = self.instance.lock();
        let device = instance.device.as_deref_mut().ok_or(HalError::InvalidState)?;
        Ok(f(device))
    }

    /// Like [`with`](Self::with) but fails [`HalError::Busy`] instead of
    /// spinning when another caller holds the device.
    pub fn try_with<R>(&self, f: impl FnOnce(&mut dyn Device) -> R) -> HalResult<R> {
        let mut instance = self.instance.try_lock().ok_or(HalError::Busy)?;
        let device = instance.device.as_deref_mut().ok_or(HalError::InvalidState)?;
        Ok(f(device))
    }

    typed_access! {
        with_serial => as_serial: SerialPort,
        with_gpio => as_gpio: GpioController,
        with_spi => as_spi: SpiBus,
        with_i2c => as_i2c: I2cBus,
        with_timer => as_timer: Timer,
        with_adc => as_adc: AdcConverter,
    }

    pub fn config(&self) -> DeviceConfig {
        let instance = self.instance.lock();
        match &instance.device {
            Some(device) => device.config(),
            None => instance.config,
        }
    }

    /// Change the device's configuration in place.
    ///
    /// The value is also kept as the configuration for later
    /// constructions of this device.
    pub fn set_config(&self, config: &DeviceConfig) -> HalResult<()> {
        let mut instance = self.instance.lock();
        if config.kind() != self.kind {
            return Err(HalError::InvalidParam);
        }
        if let Some(device) = instance.device.as_deref_mut() {
            device.set_config(config)?;
        }
        instance.config = *config;
        Ok(())
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

static NEXT_REGISTRY: AtomicUsize = AtomicUsize::new(0);

/// Registry over a fixed device table.
pub struct DeviceManager<'r> {
    id: usize,
    slots: Vec<Slot>,
    resources: Resources<'r>,
}

impl<'r> DeviceManager<'r> {
    /// A registry over `table`; nothing is constructed yet.
    ///
    /// Names are expected to be unique; lookups resolve to the first match.
    pub fn new(table: Vec<DeviceDescriptor>, resources: Resources<'r>) -> Self {
        let slots = table
            .into_iter()
            .map(|descriptor| Slot {
                instance: Arc::new(SpinLock::new(Instance {
                    device: None,
                    config: descriptor.default_config,
                })),
                ownership: SpinLock::new(Ownership {
                    ref_count: 0,
                    failed: false,
                }),
                descriptor,
            })
            .collect();
        Self {
            id: NEXT_REGISTRY.fetch_add(1, Ordering::Relaxed),
            slots,
            resources,
        }
    }

    pub fn resources(&self) -> &Resources<'r> {
        &self.resources
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn find(&self, name: &str) -> HalResult<usize> {
        self.slots
            .iter()
            .position(|slot| slot.descriptor.name == name)
            .ok_or(HalError::NotFound)
    }

    /// Take a reference to the device called `name`, constructing it if
    /// this is the first one.
    ///
    /// When construction fails nothing stays claimed and the count stays
    /// at zero, so a later `get` tries again.
    pub fn get(&self, name: &str) -> HalResult<DeviceHandle> {
        let index = self.find(name)?;
        let slot = &self.slots[index];
        let mut ownership = slot.ownership.lock();
        if ownership.ref_count == 0 {
            self.construct(slot)?;
            ownership.failed = false;
            debug!("device {}: constructed", slot.descriptor.name);
        }
        ownership.ref_count += 1;
        Ok(DeviceHandle {
            registry: self.id,
            index,
            name: slot.descriptor.name,
            kind: slot.descriptor.default_config.kind(),
            instance: slot.instance.clone(),
        })
    }

    /// [`get`](Self::get) restricted to one peripheral kind.
    ///
    /// A kind mismatch fails [`HalError::InvalidParam`] without taking a
    /// reference.
    pub fn get_kind(&self, name: &str, kind: DeviceKind) -> HalResult<DeviceHandle> {
        let index = self.find(name)?;
        if self.slots[index].descriptor.default_config.kind() != kind {
            return Err(HalError::InvalidParam);
        }
        self.get(name)
    }

    pub fn get_serial(&self, name: &str) -> HalResult<DeviceHandle> {
        self.get_kind(name, DeviceKind::Serial)
    }

    pub fn get_gpio(&self, name: &str) -> HalResult<DeviceHandle> {
        self.get_kind(name, DeviceKind::Gpio)
    }

    pub fn get_spi(&self, name: &str) -> HalResult<DeviceHandle> {
        self.get_kind(name, DeviceKind::Spi)
    }

    pub fn get_i2c(&self, name: &str) -> HalResult<DeviceHandle> {
        self.get_kind(name, DeviceKind::I2c)
    }

    pub fn get_timer(&self, name: &str) -> HalResult<DeviceHandle> {
        self.get_kind(name, DeviceKind::Timer)
    }

    pub fn get_adc(&self, name: &str) -> HalResult<DeviceHandle> {
        self.get_kind(name, DeviceKind::Adc)
    }

    /// Give back a reference. The last one tears the device down.
    ///
    /// [`HalError::InvalidParam`] for a handle issued by another registry.
    pub fn put(&self, handle: DeviceHandle) -> HalResult<()> {
        if handle.registry != self.id {
            return Err(HalError::InvalidParam);
        }
        let slot = self.slots.get(handle.index).ok_or(HalError::InvalidParam)?;
        drop(handle);

        let mut ownership = slot.ownership.lock();
        ownership.ref_count = ownership
            .ref_count
            .checked_sub(1)
            .ok_or(HalError::InvalidState)?;
        if ownership.ref_count == 0 {
            self.destroy(slot);
            ownership.failed = false;
            debug!("device {}: torn down", slot.descriptor.name);
        }
        Ok(())
    }

    /// Alias of [`put`](Self::put).
    pub fn release(&self, handle: DeviceHandle) -> HalResult<()> {
        self.put(handle)
    }

    /// Replace the working configuration of `name` and rebuild it.
    ///
    /// The value is checked with [`DeviceConfig::validate`] first; limits
    /// particular to the backend only surface when it is applied, which for
    /// an unowned device is its next [`get`](Self::get).
    ///
    /// An unowned device only stores the value for its next construction.
    /// A device with exactly one owner is torn down and rebuilt in place;
    /// that owner's handle stays valid. If rebuilding fails the previous
    /// configuration is restored and rebuilt, and the error is returned.
    /// With more than one owner nothing changes and
    /// [`HalError::InvalidState`] is returned.
    pub fn reinit(&self, name: &str, config: DeviceConfig) -> HalResult<()> {
        let slot = &self.slots[self.find(name)?];
        if config.kind() != slot.descriptor.default_config.kind() {
            return Err(HalError::InvalidParam);
        }
        config.validate()?;

        let mut ownership = slot.ownership.lock();
        match ownership.ref_count {
            0 => {
                slot.instance.lock().config = config;
                ownership.failed = false;
                Ok(())
            }
            1 => {
                let previous = mem::replace(&mut slot.instance.lock().config, config);
                self.destroy(slot);
                match self.construct(slot) {
                    Ok(()) => {
                        ownership.failed = false;
                        debug!("device {}: reinitialized", slot.descriptor.name);
                        Ok(())
                    }
                    Err(err) => {
                        slot.instance.lock().config = previous;
                        ownership.failed = self.construct(slot).is_err();
                        debug!(
                            "device {}: reinit failed ({}), previous configuration {}",
                            slot.descriptor.name,
                            err,
                            if ownership.failed { "lost" } else { "restored" }
                        );
                        Err(err)
                    }
                }
            }
            _ => Err(HalError::InvalidState),
        }
    }

    fn construct(&self, slot: &Slot) -> HalResult<()> {
        let mut instance = slot.instance.lock();
        let mut device = slot
            .descriptor
            .driver
            .construct(&instance.config, &self.resources)?;
        if let Some(lifecycle) = device.lifecycle() {
            if let Err(err) = lifecycle.init() {
                self.teardown(slot.descriptor.name, device.as_mut());
                return Err(err);
            }
        }
        instance.device = Some(device);
        Ok(())
    }

    fn destroy(&self, slot: &Slot) {
        let device = slot.instance.lock().device.take();
        if let Some(mut device) = device {
            self.teardown(slot.descriptor.name, device.as_mut());
        }
    }

    fn teardown(&self, name: &str, device: &mut dyn Device) {
        if let Some(lifecycle) = device.lifecycle() {
            if lifecycle.state() != LifecycleState::Uninitialized {
                if let Err(err) = lifecycle.deinit() {
                    debug!("device {}: deinit failed: {}", name, err);
                }
            }
        }
        if let Some(power) = device.power() {
            let _ = power.disable();
        }
        device.release(&self.resources);
    }

    fn info(&self, slot: &Slot) -> DeviceInfo {
        let ownership = slot.ownership.lock();
        let state = if ownership.failed {
            LifecycleState::Error
        } else {
            match &slot.instance.lock().device {
                Some(device) => device.lifecycle_state(),
                None => LifecycleState::Uninitialized,
            }
        };
        DeviceInfo {
            name: slot.descriptor.name,
            kind: slot.descriptor.default_config.kind(),
            state,
            ref_count: ownership.ref_count,
        }
    }

    /// Copy one [`DeviceInfo`] per descriptor, in table order, into `list`.
    ///
    /// Returns the number of rows written.
    pub fn enumerate(&self, list: &mut [DeviceInfo]) -> usize {
        let mut written = 0;
        for (slot, row) in self.slots.iter().zip(list.iter_mut()) {
            *row = self.info(slot);
            written += 1;
        }
        written
    }

    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        self.slots.iter().map(|slot| self.info(slot)).collect()
    }

    pub fn info_of(&self, name: &str) -> HalResult<DeviceInfo> {
        Ok(self.info(&self.slots[self.find(name)?]))
    }

    /// Working configuration of `name`, whether or not it is constructed.
    pub fn config(&self, name: &str) -> HalResult<DeviceConfig> {
        let slot = &self.slots[self.find(name)?];
        let instance = slot.instance.lock();
        Ok(match &instance.device {
            Some(device) => device.config(),
            None => instance.config,
        })
    }

    fn with_owned<R>(
        &self,
        slot: &Slot,
        f: impl FnOnce(&mut dyn Device) -> HalResult<R>,
    ) -> HalResult<R> {
        let ownership = slot.ownership.lock();
        if ownership.ref_count == 0 {
            return Err(HalError::NotInit);
        }
        let mut instance = slot.instance.lock();
        let device = instance.device.as_deref_mut().ok_or(HalError::InvalidState)?;
        f(device)
    }

    /// Suspend an owned device through its lifecycle capability.
    pub fn suspend(&self, name: &str) -> HalResult<()> {
        self.with_owned(&self.slots[self.find(name)?], |device| {
            device.lifecycle().ok_or(HalError::Unsupported)?.suspend()
        })
    }

    pub fn resume(&self, name: &str) -> HalResult<()> {
        self.with_owned(&self.slots[self.find(name)?], |device| {
            device.lifecycle().ok_or(HalError::Unsupported)?.resume()
        })
    }

    /// Suspend every owned, active device.
    ///
    /// Every device is attempted. Returns how many were suspended, or the
    /// first error met.
    pub fn suspend_all(&self) -> HalResult<usize> {
        self.for_each_owned(|device| match device.lifecycle() {
            Some(lifecycle) if lifecycle.state().is_active() => lifecycle.suspend().map(|()| true),
            _ => Ok(false),
        })
    }

    /// Resume every suspended device. Same reporting as
    /// [`suspend_all`](Self::suspend_all).
    pub fn resume_all(&self) -> HalResult<usize> {
        self.for_each_owned(|device| match device.lifecycle() {
            Some(lifecycle) if lifecycle.state() == LifecycleState::Suspended => {
                lifecycle.resume().map(|()| true)
            }
            _ => Ok(false),
        })
    }

    fn for_each_owned(
        &self,
        mut f: impl FnMut(&mut dyn Device) -> HalResult<bool>,
    ) -> HalResult<usize> {
        let mut done = 0;
        let mut first_error = None;
        for slot in &self.slots {
            match self.with_owned(slot, &mut f) {
                Ok(true) => done += 1,
                Ok(false) | Err(HalError::NotInit) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(done),
        }
    }

    /// Write the status record followed by the statistics record of an
    /// owned device into `buf`.
    pub fn diagnose(&self, name: &str, buf: &mut [u8]) -> HalResult<usize> {
        if buf.len() < StatusRecord::SIZE + StatisticsRecord::SIZE {
            return Err(HalError::DataSize);
        }
        self.with_owned(&self.slots[self.find(name)?], |device| {
            let diagnostic = device.diagnostic().ok_or(HalError::Unsupported)?;
            let status = diagnostic.status(buf)?;
            let statistics = diagnostic.statistics(&mut buf[status..])?;
            Ok(status + statistics)
        })
    }
}

impl fmt::Debug for DeviceManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.slots.iter().map(|slot| slot.descriptor.name))
            .finish()
    }
}

static DEVICE_MANAGER: Once<DeviceManager<'static>> = Once::new();

/// The process-wide registry over the selected platform's device table.
pub fn devices() -> &'static DeviceManager<'static> {
    DEVICE_MANAGER.call_once(|| {
        let resources = Resources {
            dma: dma(),
            irq: interrupts(),
        };
        DeviceManager::new(CurrentPlatform::device_table(), resources)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::peripheral::peripheral_capabilities;
    use crate::device::{Lifecycle, Peripheral, PeripheralHw, Power};
    use crate::dma::{DmaChannel, DmaManager, PeripheralId};
    use crate::hal::timer::{TimerConfig, TimerMode};
    use crate::irq::InterruptManager;
    use crate::platform::sim::{SimBoard, SimConfig};
    use core::sync::atomic::AtomicBool;

    #[derive(Default)]
    struct Counters {
        constructed: AtomicUsize,
        released: AtomicUsize,
        fail_construct: AtomicBool,
        fail_init: AtomicBool,
    }

    struct TestHw {
        fail_apply: bool,
    }

    impl PeripheralHw for TestHw {
        type Config = TimerConfig;

        fn apply(&mut self, config: &TimerConfig) -> HalResult<()> {
            if self.fail_apply || config.interval_us == 0 || config.interval_us > MAX_INTERVAL_US {
                return Err(HalError::InvalidParam);
            }
            Ok(())
        }

        fn set_clock(&mut self, _enabled: bool) {}
    }

    /// Longest interval the test timer can count.
    const MAX_INTERVAL_US: u32 = 1_000_000;

    struct TestDevice {
        core: Peripheral<TestHw>,
        channel: Option<DmaChannel>,
        counters: &'static Counters,
    }

    impl Device for TestDevice {
        peripheral_capabilities!(core);

        fn release(&mut self, resources: &Resources<'_>) {
            if let Some(channel) = self.channel.take() {
                let _ = resources.dma.free(channel);
            }
            self.counters.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct TestDriver {
        counters: &'static Counters,
    }

    impl DeviceDriver for TestDriver {
        fn kind(&self) -> DeviceKind {
            DeviceKind::Timer
        }

        fn construct(
            &self,
            config: &DeviceConfig,
            resources: &Resources<'_>,
        ) -> HalResult<Box<dyn Device>> {
            if self.counters.fail_construct.load(Ordering::SeqCst) {
                return Err(HalError::Bus);
            }
            let config = TimerConfig::try_from(*config)?;
            let channel = resources.dma.alloc(PeripheralId(9)).ok_or(HalError::NoResource)?;
            self.counters.constructed.fetch_add(1, Ordering::SeqCst);
            let hw = TestHw {
                fail_apply: self.counters.fail_init.load(Ordering::SeqCst),
            };
            Ok(Box::new(TestDevice {
                core: Peripheral::new(DeviceKind::Timer, hw, config),
                channel: Some(channel),
                counters: self.counters,
            }))
        }
    }

    struct Fixture {
        dma: &'static DmaManager,
        counters: &'static Counters,
        registry: DeviceManager<'static>,
    }

    fn fixture() -> Fixture {
        let board = SimBoard::leak(SimConfig::default());
        let dma: &'static DmaManager = Box::leak(Box::new(DmaManager::with_channels(
            board.dma_engine(),
            2,
        )));
        let irq: &'static InterruptManager =
            Box::leak(Box::new(InterruptManager::new(board.interrupt_controller())));
        let counters: &'static Counters = Box::leak(Box::new(Counters::default()));
        let table = alloc::vec![
            DeviceDescriptor::new("tick", TimerConfig::default(), TestDriver { counters }),
            DeviceDescriptor::new("tock", TimerConfig::default(), TestDriver { counters }),
        ];
        Fixture {
            dma,
            counters,
            registry: DeviceManager::new(table, Resources { dma, irq }),
        }
    }

    #[test]
    fn test_matched_get_put_construct_once() {
        let fx = fixture();
        let handles: Vec<_> = (0..4).map(|_| fx.registry.get("tick").unwrap()).collect();
        assert_eq!(fx.counters.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(fx.registry.info_of("tick").unwrap().ref_count, 4);
        assert_eq!(
            fx.registry.info_of("tick").unwrap().state,
            LifecycleState::Initialized
        );

        for handle in handles {
            assert_eq!(fx.counters.released.load(Ordering::SeqCst), 0);
            fx.registry.put(handle).unwrap();
        }
        assert_eq!(fx.counters.released.load(Ordering::SeqCst), 1);
        let info = fx.registry.info_of("tick").unwrap();
        assert_eq!(info.ref_count, 0);
        assert_eq!(info.state, LifecycleState::Uninitialized);
        assert_eq!(fx.dma.free_count(), 2);
    }

    #[test]
    fn test_unknown_name() {
        let fx = fixture();
        assert_eq!(fx.registry.get("nope").err(), Some(HalError::NotFound));
        assert_eq!(
            fx.registry.reinit("nope", TimerConfig::default().into()),
            Err(HalError::NotFound)
        );
    }

    #[test]
    fn test_failed_construction_rolls_back_and_retries() {
        let fx = fixture();
        fx.counters.fail_init.store(true, Ordering::SeqCst);
        assert_eq!(fx.registry.get("tick").err(), Some(HalError::InvalidParam));
        assert_eq!(fx.registry.info_of("tick").unwrap().ref_count, 0);
        assert_eq!(fx.counters.released.load(Ordering::SeqCst), 1);
        assert_eq!(fx.dma.free_count(), 2);

        fx.counters.fail_init.store(false, Ordering::SeqCst);
        let handle = fx.registry.get("tick").unwrap();
        assert_eq!(fx.counters.constructed.load(Ordering::SeqCst), 2);
        fx.registry.put(handle).unwrap();
    }

    #[test]
    fn test_resource_exhaustion_surfaces_from_get() {
        let fx = fixture();
        let hog = fx.dma.alloc(PeripheralId(1)).unwrap();
        let tick = fx.registry.get("tick").unwrap();
        assert_eq!(fx.registry.get("tock").err(), Some(HalError::NoResource));
        assert_eq!(fx.registry.info_of("tock").unwrap().ref_count, 0);

        fx.dma.free(hog).unwrap();
        let tock = fx.registry.get("tock").unwrap();
        fx.registry.put(tock).unwrap();
        fx.registry.put(tick).unwrap();
    }

    #[test]
    fn test_put_foreign_handle() {
        let a = fixture();
        let b = fixture();
        let handle = a.registry.get("tick").unwrap();
        let other = b.registry.get("tick").unwrap();
        assert_eq!(b.registry.put(handle), Err(HalError::InvalidParam));
        assert_eq!(a.registry.info_of("tick").unwrap().ref_count, 1);
        b.registry.put(other).unwrap();
    }

    #[test]
    fn test_reinit_rules() {
        let fx = fixture();
        let periodic = TimerConfig {
            mode: TimerMode::Periodic,
            interval_us: 250,
            ..TimerConfig::default()
        };

        fx.registry.reinit("tick", periodic.into()).unwrap();
        assert_eq!(fx.counters.constructed.load(Ordering::SeqCst), 0);
        assert_eq!(fx.registry.config("tick"), Ok(periodic.into()));

        let owner = fx.registry.get("tick").unwrap();
        assert_eq!(owner.config(), periodic.into());
        fx.registry
            .reinit("tick", TimerConfig::default().into())
            .unwrap();
        assert_eq!(fx.counters.constructed.load(Ordering::SeqCst), 2);
        assert_eq!(owner.config(), TimerConfig::default().into());
        assert_eq!(
            fx.registry
                .reinit("tick", crate::hal::adc::AdcConfig::default().into()),
            Err(HalError::InvalidParam)
        );
        fx.registry.put(owner).unwrap();
    }

    #[test]
    fn test_reinit_with_two_owners_is_rejected() {
        let fx = fixture();
        let first = fx.registry.get("tick").unwrap();
        let second = fx.registry.get("tick").unwrap();
        let periodic = TimerConfig {
            mode: TimerMode::Periodic,
            ..TimerConfig::default()
        };
        assert_eq!(
            fx.registry.reinit("tick", periodic.into()),
            Err(HalError::InvalidState)
        );
        assert_eq!(fx.counters.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(first.config(), TimerConfig::default().into());
        assert!(first.with(|dev| dev.lifecycle_state()).is_ok());
        assert!(second.with(|dev| dev.lifecycle_state()).is_ok());
        fx.registry.put(first).unwrap();
        fx.registry.put(second).unwrap();
    }

    #[test]
    fn test_failed_reinit_restores_previous_config() {
        let fx = fixture();
        let owner = fx.registry.get("tick").unwrap();
        let too_long = TimerConfig {
            interval_us: MAX_INTERVAL_US + 1,
            ..TimerConfig::default()
        };
        assert_eq!(
            fx.registry.reinit("tick", too_long.into()),
            Err(HalError::InvalidParam)
        );
        // Built once, rebuilt with the new value, rebuilt with the old one.
        assert_eq!(fx.counters.constructed.load(Ordering::SeqCst), 3);
        assert_eq!(owner.config(), TimerConfig::default().into());
        assert_eq!(
            fx.registry.info_of("tick").unwrap().state,
            LifecycleState::Initialized
        );

        fx.counters.fail_construct.store(true, Ordering::SeqCst);
        assert_eq!(
            fx.registry.reinit("tick", TimerConfig::default().into()),
            Err(HalError::Bus)
        );
        assert_eq!(
            fx.registry.info_of("tick").unwrap().state,
            LifecycleState::Error
        );
        assert_eq!(owner.with(|_| ()), Err(HalError::InvalidState));
        fx.registry.put(owner).unwrap();
        assert_eq!(
            fx.registry.info_of("tick").unwrap().state,
            LifecycleState::Uninitialized
        );
    }

    #[test]
    fn test_set_config_round_trip() {
        let fx = fixture();
        let handle = fx.registry.get("tick").unwrap();
        let config = TimerConfig {
            interval_us: 42,
            ..TimerConfig::default()
        };
        handle.set_config(&config.into()).unwrap();
        assert_eq!(handle.config(), config.into());
        assert_eq!(
            handle.set_config(&crate::hal::gpio::GpioConfig::default().into()),
            Err(HalError::InvalidParam)
        );
        fx.registry.put(handle).unwrap();

        let handle = fx.registry.get("tick").unwrap();
        assert_eq!(handle.config(), config.into());
        fx.registry.put(handle).unwrap();
    }

    #[test]
    fn test_typed_access_and_kind_checks() {
        let fx = fixture();
        assert_eq!(fx.registry.get_serial("tick").err(), Some(HalError::InvalidParam));
        assert_eq!(fx.registry.info_of("tick").unwrap().ref_count, 0);

        let handle = fx.registry.get_timer("tick").unwrap();
        assert_eq!(handle.kind(), DeviceKind::Timer);
        assert_eq!(handle.with_gpio(|_| ()), Err(HalError::Unsupported));
        assert_eq!(handle.try_with(|dev| dev.kind()), Ok(DeviceKind::Timer));
        fx.registry.release(handle).unwrap();
    }

    #[test]
    fn test_enumerate_in_table_order() {
        let fx = fixture();
        let handle = fx.registry.get("tock").unwrap();
        let mut rows = [DeviceInfo::EMPTY; 1];
        assert_eq!(fx.registry.enumerate(&mut rows), 1);
        assert_eq!(rows[0].name, "tick");

        let mut rows = [DeviceInfo::EMPTY; 4];
        assert_eq!(fx.registry.enumerate(&mut rows), 2);
        assert_eq!(rows[1].name, "tock");
        assert_eq!(rows[1].ref_count, 1);
        assert_eq!(rows[1].kind, DeviceKind::Timer);
        assert_eq!(fx.registry.snapshot(), rows[..2]);
        fx.registry.put(handle).unwrap();
    }

    #[test]
    fn test_generic_suspend_resume_and_diagnose() {
        let fx = fixture();
        assert_eq!(fx.registry.suspend("tick"), Err(HalError::NotInit));
        let tick = fx.registry.get("tick").unwrap();
        let tock = fx.registry.get("tock").unwrap();

        assert_eq!(fx.registry.suspend_all(), Ok(2));
        assert_eq!(
            fx.registry.info_of("tock").unwrap().state,
            LifecycleState::Suspended
        );
        assert_eq!(fx.registry.suspend("tick"), Err(HalError::InvalidState));
        assert_eq!(fx.registry.resume("tick"), Ok(()));
        assert_eq!(fx.registry.resume_all(), Ok(1));
        assert!(tick.with(|dev| dev.power().unwrap().is_enabled()).unwrap());

        let mut buf = [0u8; 24];
        assert_eq!(fx.registry.diagnose("tick", &mut buf), Ok(24));
        assert_eq!(buf[0], LifecycleState::Initialized as u8);
        assert_eq!(
            fx.registry.diagnose("tick", &mut [0u8; 12]),
            Err(HalError::DataSize)
        );

        fx.registry.put(tick).unwrap();
        fx.registry.put(tock).unwrap();
    }

    #[test]
    fn test_last_put_powers_down() {
        let fx = fixture();
        let a = fx.registry.get("tick").unwrap();
        let b = fx.registry.get("tick").unwrap();
        fx.registry.put(a).unwrap();
        assert!(b.with(|dev| dev.power().unwrap().is_enabled()).unwrap());
        assert!(b
            .with(|dev| dev.lifecycle().unwrap().state() == LifecycleState::Initialized)
            .unwrap());
        fx.registry.put(b).unwrap();
        assert_eq!(fx.counters.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unprogrammable_config_rejected_before_storing() {
        let fx = fixture();
        let zero = TimerConfig {
            interval_us: 0,
            ..TimerConfig::default()
        };
        assert_eq!(
            fx.registry.reinit("tock", zero.into()),
            Err(HalError::InvalidParam)
        );
        assert_eq!(fx.registry.config("tock"), Ok(TimerConfig::default().into()));

        let owner = fx.registry.get("tick").unwrap();
        assert_eq!(
            fx.registry.reinit("tick", zero.into()),
            Err(HalError::InvalidParam)
        );
        assert_eq!(fx.counters.constructed.load(Ordering::SeqCst), 1);
        fx.registry.put(owner).unwrap();
    }
}
