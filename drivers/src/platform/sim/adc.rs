//! Simulated ADC with settable analog inputs.

use alloc::boxed::Box;
use core::sync::atomic::{AtomicU16, Ordering};

use common::sync::SpinLock;

use super::{Clock, SimBoard};
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::error::{HalError, HalResult};
use crate::hal::adc::{AdcConfig, AdcConverter};

pub const CHANNEL_COUNT: u8 = 8;

/// Inputs are full-scale 16-bit values; conversions scale them down to
/// the configured resolution.
#[derive(Default)]
pub struct SimAdc {
    inputs: [AtomicU16; CHANNEL_COUNT as usize],
    applied: SpinLock<Option<AdcConfig>>,
}

impl SimAdc {
    pub fn set_input(&self, channel: u8, value: u16) {
        if let Some(input) = self.inputs.get(channel as usize) {
            input.store(value, Ordering::SeqCst);
        }
    }

    pub fn applied(&self) -> Option<AdcConfig> {
        *self.applied.lock()
    }
}

struct AdcHw {
    board: &'static SimBoard,
}

impl PeripheralHw for AdcHw {
    type Config = AdcConfig;

    fn apply(&mut self, config: &AdcConfig) -> HalResult<()> {
        if !matches!(config.resolution_bits, 8 | 10 | 12) {
            return Err(HalError::InvalidParam);
        }
        *self.board.adc.applied.lock() = Some(*config);
        Ok(())
    }

    fn set_clock(&mut self, enabled: bool) {
        self.board.clocks.set(Clock::Adc, enabled);
    }

    fn reset(&mut self) {
        *self.board.adc.applied.lock() = None;
    }
}

pub struct SimAdcDevice {
    core: Peripheral<AdcHw>,
}

impl AdcConverter for SimAdcDevice {
    fn channel_count(&self) -> u8 {
        CHANNEL_COUNT
    }

    fn read(&mut self, channel: u8) -> HalResult<u16> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        let input = self
            .core
            .hw()
            .board
            .adc
            .inputs
            .get(channel as usize)
            .ok_or_else(|| self.core.failed(HalError::InvalidParam))?;
        let shift = 16 - self.core.config().resolution_bits as u32;
        self.core.stats().record_in(2);
        Ok(input.load(Ordering::SeqCst) >> shift)
    }
}

impl Device for SimAdcDevice {
    peripheral_capabilities!(core);

    fn as_adc(&mut self) -> Option<&mut dyn AdcConverter> {
        Some(self)
    }
}

pub struct SimAdcDriver {
    board: &'static SimBoard,
}

impl SimAdcDriver {
    pub fn new(board: &'static SimBoard) -> Self {
        Self { board }
    }
}

impl DeviceDriver for SimAdcDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Adc
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        _resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = AdcConfig::try_from(*config)?;
        Ok(Box::new(SimAdcDevice {
            core: Peripheral::new(DeviceKind::Adc, AdcHw { board: self.board }, config),
        }))
    }
}
