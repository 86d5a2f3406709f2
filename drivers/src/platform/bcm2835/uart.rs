//! UART0 serial device over the PL011 block.

use alloc::boxed::Box;

use super::lines;
use crate::config::DEFAULT_IRQ_PRIORITY;
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::dma::{DmaChannel, PeripheralId};
use crate::error::{HalError, HalResult};
use crate::hal::serial::{SerialConfig, SerialPort};
use crate::irq::IrqHandle;
use crate::peripheral::pl011::{Pl011, UART0_BASE};

static UART0: Pl011 = unsafe { Pl011::new(UART0_BASE) };

/// Owner recorded on the transmit DMA channel.
const UART0_DMA_OWNER: PeripheralId = PeripheralId(0x0100);

/// The UART clock is set by the firmware; powering down turns the block
/// off.
struct UartHw {
    port: &'static Pl011,
}

impl PeripheralHw for UartHw {
    type Config = SerialConfig;

    fn apply(&mut self, config: &SerialConfig) -> HalResult<()> {
        self.port.configure(config)
    }

    fn set_clock(&mut self, enabled: bool) {
        if !enabled {
            self.port.shutdown();
        }
    }

    fn reset(&mut self) {
        self.port.shutdown();
    }
}

/// Serial device on UART0.
pub struct Bcm2835Serial {
    core: Peripheral<UartHw>,
    tx_dma: Option<DmaChannel>,
    rx_irq: Option<IrqHandle>,
}

impl Bcm2835Serial {
    /// DMA channel claimed for transmit, if configured.
    pub fn tx_channel(&self) -> Option<&DmaChannel> {
        self.tx_dma.as_ref()
    }

    /// Address a transmit DMA request should target.
    pub fn tx_register(&self) -> usize {
        self.core.hw().port.data_register()
    }
}

impl SerialPort for Bcm2835Serial {
    fn write_byte(&mut self, byte: u8) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        self.core.hw().port.write_byte(byte);
        self.core.stats().record_out(1);
        Ok(())
    }

    fn read_byte(&mut self) -> HalResult<Option<u8>> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        let byte = self.core.hw().port.try_read_byte();
        if byte.is_some() {
            self.core.stats().record_in(1);
        }
        Ok(byte)
    }

    fn flush(&mut self) -> HalResult<()> {
        self.core.ensure_active()?;
        self.core.hw().port.wait_idle();
        Ok(())
    }

    fn is_busy(&self) -> bool {
        self.core.hw().port.is_busy()
    }
}

impl Device for Bcm2835Serial {
    peripheral_capabilities!(core);

    fn as_serial(&mut self) -> Option<&mut dyn SerialPort> {
        Some(self)
    }

    fn release(&mut self, resources: &Resources<'_>) {
        if let Some(handle) = self.rx_irq.take() {
            let _ = resources.irq.disconnect(handle);
        }
        if let Some(channel) = self.tx_dma.take() {
            let _ = resources.dma.free(channel);
        }
    }
}

/// Builds the UART0 device, claiming a transmit DMA channel and the
/// receive interrupt when the configuration asks for them.
pub struct Bcm2835UartDriver;

impl DeviceDriver for Bcm2835UartDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Serial
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = SerialConfig::try_from(*config)?;
        let mut serial = Bcm2835Serial {
            core: Peripheral::new(DeviceKind::Serial, UartHw { port: &UART0 }, config),
            tx_dma: None,
            rx_irq: None,
        };

        if config.tx_dma {
            serial.tx_dma = Some(
                resources
                    .dma
                    .alloc(UART0_DMA_OWNER)
                    .ok_or(HalError::NoResource)?,
            );
        }
        if config.rx_interrupt {
            let claimed = resources
                .irq
                .connect(lines::UART, &UART0, DEFAULT_IRQ_PRIORITY)
                .and_then(|handle| {
                    serial.rx_irq = Some(handle);
                    resources.irq.enable(lines::UART)
                });
            if let Err(err) = claimed {
                serial.release(resources);
                return Err(err);
            }
        }
        Ok(Box::new(serial))
    }
}
