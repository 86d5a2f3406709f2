//! Device model.
//!
//! A device is a trait object owned by the registry. Its type-specific
//! base interface and its capabilities are reached only through the
//! accessor methods on [`Device`]; a device that does not provide one
//! returns `None`.

pub mod capability;
pub mod peripheral;

use alloc::boxed::Box;
use core::mem;

pub use capability::{
    Diagnostic, Lifecycle, LifecycleState, Power, PowerCallback, Statistics, StatisticsRecord,
    StatusRecord,
};
pub use peripheral::{Peripheral, PeripheralHw};

use crate::dma::DmaManager;
use crate::error::{HalError, HalResult};
use crate::hal::adc::{AdcConfig, AdcConverter};
use crate::hal::gpio::{GpioConfig, GpioController};
use crate::hal::i2c::{I2cBus, I2cConfig};
use crate::hal::serial::{SerialConfig, SerialPort};
use crate::hal::spi::{SpiBus, SpiConfig};
use crate::hal::timer::{Timer, TimerConfig};
use crate::irq::InterruptManager;

macro_rules! device_kinds {
    ($($variant:ident($config:ty) => $label:literal),+ $(,)?) => {
        /// Peripheral type of a device.
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        #[repr(u8)]
        pub enum DeviceKind {
            $($variant),+
        }

        impl DeviceKind {
            pub fn name(self) -> &'static str {
                match self {
                    $(DeviceKind::$variant => $label),+
                }
            }
        }

        /// Configuration of one device, tagged by peripheral type.
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        pub enum DeviceConfig {
            $($variant($config)),+
        }

        impl DeviceConfig {
            pub fn kind(&self) -> DeviceKind {
                match self {
                    $(DeviceConfig::$variant(_) => DeviceKind::$variant),+
                }
            }

            /// Size in bytes of the type-specific payload.
            pub fn size(&self) -> usize {
                match self {
                    $(DeviceConfig::$variant(config) => mem::size_of_val(config)),+
                }
            }
        }

        $(
            impl From<$config> for DeviceConfig {
                fn from(config: $config) -> Self {
                    DeviceConfig::$variant(config)
                }
            }

            impl TryFrom<DeviceConfig> for $config {
                type Error = HalError;

                fn try_from(config: DeviceConfig) -> HalResult<Self> {
                    match config {
                        DeviceConfig::$variant(config) => Ok(config),
                        _ => Err(HalError::InvalidParam),
                    }
                }
            }
        )+
    };
}

device_kinds! {
    Serial(SerialConfig) => "serial",
    Gpio(GpioConfig) => "gpio",
    Spi(SpiConfig) => "spi",
    I2c(I2cConfig) => "i2c",
    Timer(TimerConfig) => "timer",
    Adc(AdcConfig) => "adc",
}

impl DeviceConfig {
    /// Reject values no backend can program: a zero baud rate, SPI clock,
    /// timer interval or ADC resolution. Backend-specific limits are
    /// checked when the configuration is applied.
    pub fn validate(&self) -> HalResult<()> {
        let programmable = match self {
            DeviceConfig::Serial(config) => config.baud_rate != 0,
            DeviceConfig::Spi(config) => config.frequency_hz != 0,
            DeviceConfig::Timer(config) => config.interval_us != 0,
            DeviceConfig::Adc(config) => config.resolution_bits != 0,
            DeviceConfig::Gpio(_) | DeviceConfig::I2c(_) => true,
        };
        if programmable {
            Ok(())
        } else {
            Err(HalError::InvalidParam)
        }
    }
}

/// Shared managers a driver may claim resources from.
#[derive(Copy, Clone)]
pub struct Resources<'r> {
    pub dma: &'r DmaManager,
    pub irq: &'r InterruptManager,
}

/// Base interface of every device the registry hands out.
pub trait Device: Send {
    fn kind(&self) -> DeviceKind;

    /// Current configuration.
    fn config(&self) -> DeviceConfig;

    /// Replace the configuration. [`HalError::InvalidParam`] when the
    /// variant does not match [`Device::kind`].
    fn set_config(&mut self, config: &DeviceConfig) -> HalResult<()>;

    fn lifecycle_state(&self) -> LifecycleState {
        LifecycleState::Initialized
    }

    fn lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
        None
    }

    fn power(&mut self) -> Option<&mut dyn Power> {
        None
    }

    fn diagnostic(&mut self) -> Option<&mut dyn Diagnostic> {
        None
    }

    fn as_serial(&mut self) -> Option<&mut dyn SerialPort> {
        None
    }

    fn as_gpio(&mut self) -> Option<&mut dyn GpioController> {
        None
    }

    fn as_spi(&mut self) -> Option<&mut dyn SpiBus> {
        None
    }

    fn as_i2c(&mut self) -> Option<&mut dyn I2cBus> {
        None
    }

    fn as_timer(&mut self) -> Option<&mut dyn Timer> {
        None
    }

    fn as_adc(&mut self) -> Option<&mut dyn AdcConverter> {
        None
    }

    /// Return DMA channels and interrupt entries claimed at construction.
    ///
    /// Called once, after `deinit`, on the destruction path.
    fn release(&mut self, resources: &Resources<'_>) {
        let _ = resources;
    }
}

/// Construction entry point of one descriptor.
pub trait DeviceDriver: Send + Sync {
    fn kind(&self) -> DeviceKind;

    /// Build the device from `config`, claiming what it needs from
    /// `resources`.
    ///
    /// On failure everything claimed so far must already be returned.
    fn construct(
        &self,
        config: &DeviceConfig,
        resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_kind_and_conversion() {
        let config: DeviceConfig = SerialConfig::new_8n1(9600).into();
        assert_eq!(config.kind(), DeviceKind::Serial);
        assert_eq!(config.size(), mem::size_of::<SerialConfig>());
        assert_eq!(
            SerialConfig::try_from(config),
            Ok(SerialConfig::new_8n1(9600))
        );
        assert_eq!(TimerConfig::try_from(config), Err(HalError::InvalidParam));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(DeviceKind::I2c.name(), "i2c");
        assert_eq!(DeviceKind::Adc as u8, 5);
    }
}
