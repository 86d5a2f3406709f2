//! Simulated UART and its serial device.

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use common::sync::SpinLock;

use super::{Clock, SimBoard};
use crate::config::DEFAULT_IRQ_PRIORITY;
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::dma::{DmaChannel, PeripheralId};
use crate::error::{HalError, HalResult};
use crate::hal::interrupt::IrqNumber;
use crate::hal::serial::{SerialConfig, SerialPort};
use crate::irq::{IrqHandle, IrqSource};

const RX_FIFO_DEPTH: usize = 64;

#[derive(Default)]
struct Fifos {
    tx: Vec<u8>,
    rx: VecDeque<u8>,
    applied: Option<SerialConfig>,
    overruns: u32,
}

/// One UART block: a transmit log, a receive FIFO and the receive
/// interrupt flag.
pub struct SimUart {
    clock: Clock,
    line: IrqNumber,
    loopback: bool,
    fifos: SpinLock<Fifos>,
    rx_flag: AtomicBool,
    rx_irq_enabled: AtomicBool,
    rx_serviced: AtomicU32,
}

impl SimUart {
    pub fn new(clock: Clock, line: IrqNumber, loopback: bool) -> Self {
        Self {
            clock,
            line,
            loopback,
            fifos: SpinLock::new(Fifos::default()),
            rx_flag: AtomicBool::new(false),
            rx_irq_enabled: AtomicBool::new(false),
            rx_serviced: AtomicU32::new(0),
        }
    }

    pub fn line(&self) -> IrqNumber {
        self.line
    }

    /// Queue bytes on the receive side. Returns whether the receive
    /// interrupt fired.
    pub fn inject_rx(&self, bytes: &[u8]) -> bool {
        let mut fifos = self.fifos.lock();
        for &byte in bytes {
            if fifos.rx.len() == RX_FIFO_DEPTH {
                fifos.overruns += 1;
            } else {
                fifos.rx.push_back(byte);
            }
        }
        drop(fifos);
        self.latch_rx(bytes.is_empty())
    }

    fn latch_rx(&self, empty: bool) -> bool {
        if empty || !self.rx_irq_enabled.load(Ordering::SeqCst) {
            return false;
        }
        self.rx_flag.store(true, Ordering::SeqCst);
        true
    }

    /// Everything transmitted since the last [`take_tx`](Self::take_tx).
    pub fn transmitted(&self) -> Vec<u8> {
        self.fifos.lock().tx.clone()
    }

    pub fn take_tx(&self) -> Vec<u8> {
        core::mem::take(&mut self.fifos.lock().tx)
    }

    /// Configuration last programmed into the block.
    pub fn applied(&self) -> Option<SerialConfig> {
        self.fifos.lock().applied
    }

    pub fn overruns(&self) -> u32 {
        self.fifos.lock().overruns
    }

    /// Receive interrupts serviced so far.
    pub fn rx_serviced(&self) -> u32 {
        self.rx_serviced.load(Ordering::SeqCst)
    }

    fn transmit(&self, byte: u8) {
        let mut fifos = self.fifos.lock();
        fifos.tx.push(byte);
        if self.loopback && fifos.rx.len() < RX_FIFO_DEPTH {
            fifos.rx.push_back(byte);
        }
    }

    fn receive(&self) -> Option<u8> {
        self.fifos.lock().rx.pop_front()
    }

    fn program(&self, config: &SerialConfig) {
        let mut fifos = self.fifos.lock();
        fifos.applied = Some(*config);
        self.rx_irq_enabled
            .store(config.rx_interrupt, Ordering::SeqCst);
    }

    fn reset(&self) {
        let mut fifos = self.fifos.lock();
        fifos.rx.clear();
        fifos.applied = None;
        self.rx_irq_enabled.store(false, Ordering::SeqCst);
        self.rx_flag.store(false, Ordering::SeqCst);
    }
}

impl IrqSource for SimUart {
    fn is_pending(&self) -> bool {
        self.rx_flag.load(Ordering::SeqCst)
    }

    fn handle(&self) {
        self.rx_flag.store(false, Ordering::SeqCst);
        self.rx_serviced.fetch_add(1, Ordering::SeqCst);
    }
}

struct UartHw {
    port: &'static SimUart,
    board: &'static SimBoard,
}

impl PeripheralHw for UartHw {
    type Config = SerialConfig;

    fn apply(&mut self, config: &SerialConfig) -> HalResult<()> {
        if config.baud_rate == 0 {
            return Err(HalError::InvalidParam);
        }
        self.port.program(config);
        Ok(())
    }

    fn set_clock(&mut self, enabled: bool) {
        self.board.clocks.set(self.port.clock, enabled);
    }

    fn reset(&mut self) {
        self.port.reset();
    }
}

/// Serial device over one [`SimUart`].
pub struct SimSerial {
    core: Peripheral<UartHw>,
    tx_dma: Option<DmaChannel>,
    rx_irq: Option<IrqHandle>,
}

impl SimSerial {
    /// DMA channel claimed for transmit, if configured.
    pub fn tx_channel(&self) -> Option<&DmaChannel> {
        self.tx_dma.as_ref()
    }
}

impl SerialPort for SimSerial {
    fn write_byte(&mut self, byte: u8) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        self.core.hw().port.transmit(byte);
        self.core.stats().record_out(1);
        Ok(())
    }

    fn read_byte(&mut self) -> HalResult<Option<u8>> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        let byte = self.core.hw().port.receive();
        if byte.is_some() {
            self.core.stats().record_in(1);
        }
        Ok(byte)
    }

    fn flush(&mut self) -> HalResult<()> {
        self.core.ensure_active()
    }

    fn is_busy(&self) -> bool {
        false
    }
}

impl Device for SimSerial {
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

/// Builds a [`SimSerial`] on UART `index` of a board.
pub struct SimUartDriver {
    board: &'static SimBoard,
    index: usize,
}

impl SimUartDriver {
    pub fn new(board: &'static SimBoard, index: usize) -> Self {
        Self { board, index }
    }
}

impl DeviceDriver for SimUartDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Serial
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = SerialConfig::try_from(*config)?;
        let port = self.board.uart.get(self.index).ok_or(HalError::NotFound)?;
        let hw = UartHw {
            port,
            board: self.board,
        };
        let mut serial = SimSerial {
            core: Peripheral::new(DeviceKind::Serial, hw, config),
            tx_dma: None,
            rx_irq: None,
        };

        if config.tx_dma {
            let owner = PeripheralId(0x0100 + self.index as u16);
            match resources.dma.alloc(owner) {
                Some(channel) => serial.tx_dma = Some(channel),
                None => return Err(HalError::NoResource),
            }
        }
        if config.rx_interrupt {
            let claimed = resources
                .irq
                .connect(port.line(), port, DEFAULT_IRQ_PRIORITY)
                .and_then(|handle| {
                    serial.rx_irq = Some(handle);
                    resources.irq.enable(port.line())
                });
            if let Err(err) = claimed {
                serial.release(resources);
                return Err(err);
            }
        }
        Ok(Box::new(serial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Lifecycle, LifecycleState, Power};
    use crate::dma::DmaManager;
    use crate::irq::InterruptManager;
    use crate::platform::sim::{lines, SimConfig};

    struct Rig {
        board: &'static SimBoard,
        dma: DmaManager,
        irq: InterruptManager,
    }

    fn rig(config: SimConfig) -> Rig {
        let board = SimBoard::leak(config);
        Rig {
            board,
            dma: DmaManager::new(board.dma_engine()),
            irq: InterruptManager::new(board.interrupt_controller()),
        }
    }

    impl Rig {
        fn resources(&self) -> Resources<'_> {
            Resources {
                dma: &self.dma,
                irq: &self.irq,
            }
        }

        fn build(&self, config: SerialConfig) -> HalResult<Box<dyn Device>> {
            SimUartDriver::new(self.board, 0).construct(&config.into(), &self.resources())
        }
    }

    #[test]
    fn test_write_requires_init() {
        let rig = rig(SimConfig::default());
        let mut dev = rig.build(SerialConfig::default()).unwrap();
        let serial = dev.as_serial().unwrap();
        assert_eq!(serial.write_byte(b'x'), Err(HalError::NotInit));

        dev.lifecycle().unwrap().init().unwrap();
        assert!(rig.board.clock_enabled(Clock::Uart0));
        assert_eq!(rig.board.uart[0].applied(), Some(SerialConfig::default()));
        dev.as_serial().unwrap().write(b"hi").unwrap();
        assert_eq!(rig.board.uart[0].transmitted(), b"hi");
        assert_eq!(dev.diagnostic().unwrap().statistics_record().bytes_out, 2);
    }

    #[test]
    fn test_loopback_and_suspend() {
        let rig = rig(SimConfig {
            uart_loopback: true,
            ..SimConfig::default()
        });
        let mut dev = rig.build(SerialConfig::default()).unwrap();
        dev.lifecycle().unwrap().init().unwrap();
        dev.as_serial().unwrap().write(b"ok").unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(dev.as_serial().unwrap().read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"ok");

        dev.lifecycle().unwrap().suspend().unwrap();
        assert!(!dev.power().unwrap().is_enabled());
        assert!(!rig.board.clock_enabled(Clock::Uart0));
        assert_eq!(
            dev.as_serial().unwrap().write_byte(b'!'),
            Err(HalError::InvalidState)
        );
        dev.lifecycle().unwrap().resume().unwrap();
        assert_eq!(dev.lifecycle_state(), LifecycleState::Initialized);
        assert!(rig.board.clock_enabled(Clock::Uart0));
    }

    #[test]
    fn test_resources_claimed_and_released() {
        let rig = rig(SimConfig::default());
        let config = SerialConfig::default().with_rx_interrupt().with_tx_dma();
        let mut dev = rig.build(config).unwrap();
        assert_eq!(rig.dma.free_count(), 7);
        assert_eq!(rig.irq.chain_len(lines::UART0), 1);
        assert!(rig.irq.is_enabled(lines::UART0));

        dev.lifecycle().unwrap().init().unwrap();
        rig.board.inject_uart_rx(0, b"abc");
        assert_eq!(rig.irq.dispatch_pending(), 1);
        assert_eq!(rig.board.uart[0].rx_serviced(), 1);

        dev.release(&rig.resources());
        assert_eq!(rig.dma.free_count(), 8);
        assert_eq!(rig.irq.chain_len(lines::UART0), 0);
        assert!(!rig.irq.is_enabled(lines::UART0));
    }

    #[test]
    fn test_construction_failure_returns_dma_channel() {
        let rig = rig(SimConfig::default());
        let config = SerialConfig::default().with_rx_interrupt().with_tx_dma();
        let first = rig.build(config).unwrap();
        assert_eq!(rig.dma.free_count(), 7);

        // Same UART, same source: the second connect is refused.
        assert_eq!(rig.build(config).err(), Some(HalError::InvalidState));
        assert_eq!(rig.dma.free_count(), 7);
        drop(first);
    }

    #[test]
    fn test_zero_baud_rejected_at_init() {
        let rig = rig(SimConfig::default());
        let mut dev = rig.build(SerialConfig::new_8n1(0)).unwrap();
        assert_eq!(dev.lifecycle().unwrap().init(), Err(HalError::InvalidParam));
        assert_eq!(dev.lifecycle_state(), LifecycleState::Error);
    }
}
