//! BCM2835 GPIO Controller Driver
//!
//! Raw register access for all 54 pins, and a device over bank 0
//! (pins 0-31) whose edge events share [`lines::GPIO0`]. Each pin of the
//! bank is its own [`IrqSource`], so several users can chain handlers on
//! the line and be serviced independently.

use alloc::boxed::Box;
use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU32, Ordering};

use common::sync::SpinLock;

use super::lines;
use crate::device::peripheral::peripheral_capabilities;
use crate::device::{
    Device, DeviceConfig, DeviceDriver, DeviceKind, Peripheral, PeripheralHw, Resources,
};
use crate::error::{HalError, HalResult};
use crate::hal::gpio::{Direction, EdgeDetect, GpioConfig, GpioController, Pin, PinLevel, PullMode};
use crate::hal::interrupt::IrqNumber;
use crate::irq::IrqSource;

/// GPIO base address.
pub const GPIO_BASE: usize = 0x2020_0000;

/// Highest pin number on the chip.
const MAX_PIN: Pin = 53;

/// Pins served by the bank 0 device.
pub const BANK0_PINS: Pin = 32;

/// GPIO function selection.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Function {
    Input = 0b000,
    Output = 0b001,
    Alt0 = 0b100,
    Alt1 = 0b101,
    Alt2 = 0b110,
    Alt3 = 0b111,
    Alt4 = 0b011,
    Alt5 = 0b010,
}

/// Memory-mapped register layout.
#[repr(C)]
struct Registers {
    gpfsel: [u32; 6],
    _r0: u32,
    gpset: [u32; 2],
    _r1: u32,
    gpclr: [u32; 2],
    _r2: u32,
    gplev: [u32; 2],
    _r3: u32,
    gped: [u32; 2],
    _r4: u32,
    gpren: [u32; 2],
    _r5: u32,
    gpfen: [u32; 2],
    _r6: u32,
    gphen: [u32; 2],
    _r7: u32,
    gplen: [u32; 2],
    _r8: u32,
    gparen: [u32; 2],
    _r9: u32,
    gpafen: [u32; 2],
    _r10: u32,
    gppud: u32,
    gppudclk: [u32; 2],
}

#[inline(always)]
fn regs() -> *mut Registers {
    GPIO_BASE as *mut Registers
}

fn check_pin(pin: Pin) -> HalResult<()> {
    if pin <= MAX_PIN {
        Ok(())
    } else {
        Err(HalError::InvalidParam)
    }
}

fn pin_reg_and_bit(pin: Pin) -> (usize, u32) {
    let reg = (pin / 32) as usize;
    let bit = 1u32 << (pin % 32);
    (reg, bit)
}

fn delay_cycles(count: u32) {
    for _ in 0..count {
        core::hint::spin_loop();
    }
}

// ============================================================================
// Raw Hardware Functions
// ============================================================================

/// Set the function of a GPIO pin.
pub fn set_function(pin: Pin, func: Function) -> HalResult<()> {
    check_pin(pin)?;

    let reg = (pin / 10) as usize;
    let shift = (pin % 10) * 3;
    let mask = 0b111 << shift;

    unsafe {
        let fsel = &mut (*regs()).gpfsel[reg];
        let val = read_volatile(fsel);
        write_volatile(fsel, (val & !mask) | ((func as u32) << shift));
    }

    Ok(())
}

fn function(pin: Pin) -> u32 {
    let reg = (pin / 10) as usize;
    let shift = (pin % 10) * 3;
    unsafe { (read_volatile(&(*regs()).gpfsel[reg]) >> shift) & 0b111 }
}

/// Drive a GPIO pin high or low.
pub fn write(pin: Pin, high: bool) -> HalResult<()> {
    check_pin(pin)?;
    let (reg, bit) = pin_reg_and_bit(pin);

    unsafe {
        if high {
            write_volatile(&mut (*regs()).gpset[reg], bit);
        } else {
            write_volatile(&mut (*regs()).gpclr[reg], bit);
        }
    }

    Ok(())
}

/// Read the current logic level of a pin.
pub fn level(pin: Pin) -> HalResult<PinLevel> {
    check_pin(pin)?;
    let (reg, bit) = pin_reg_and_bit(pin);

    let val = unsafe { read_volatile(&(*regs()).gplev[reg]) };
    Ok((val & bit != 0).into())
}

/// Configure the internal pull resistor.
pub fn set_pull(pin: Pin, pull: PullMode) -> HalResult<()> {
    check_pin(pin)?;
    let (reg, bit) = pin_reg_and_bit(pin);
    let code = match pull {
        PullMode::None => 0b00,
        PullMode::Down => 0b01,
        PullMode::Up => 0b10,
    };

    unsafe {
        let r = regs();
        write_volatile(&mut (*r).gppud, code);
        delay_cycles(150);

        write_volatile(&mut (*r).gppudclk[reg], bit);
        delay_cycles(150);

        write_volatile(&mut (*r).gppud, 0);
        write_volatile(&mut (*r).gppudclk[reg], 0);
    }

    Ok(())
}

fn event_status(pin: Pin) -> bool {
    let (reg, bit) = pin_reg_and_bit(pin);
    unsafe { read_volatile(&(*regs()).gped[reg]) & bit != 0 }
}

fn clear_event(pin: Pin) {
    let (reg, bit) = pin_reg_and_bit(pin);
    unsafe { write_volatile(&mut (*regs()).gped[reg], bit) }
}

/// Set or clear `pin` in the rising and falling edge enables.
fn configure_edges(pin: Pin, rising: bool, falling: bool) {
    let (reg, bit) = pin_reg_and_bit(pin);
    unsafe {
        let r = regs();
        for (enable_reg, on) in [(&mut (*r).gpren[reg], rising), (&mut (*r).gpfen[reg], falling)] {
            let val = read_volatile(enable_reg);
            write_volatile(enable_reg, if on { val | bit } else { val & !bit });
        }
    }
}

// ============================================================================
// Interrupt Sources
// ============================================================================

/// Called with the pin number when a pin's event is serviced.
pub type PinHandler = &'static (dyn Fn(Pin) + Sync);

/// Edge event source of one bank 0 pin.
pub struct GpioPinSource {
    pin: Pin,
    handler: SpinLock<Option<PinHandler>>,
    serviced: AtomicU32,
}

impl GpioPinSource {
    const fn new(pin: Pin) -> Self {
        Self {
            pin,
            handler: SpinLock::new(None),
            serviced: AtomicU32::new(0),
        }
    }

    /// Source for bank 0 `pin`, to connect on [`lines::GPIO0`].
    pub fn get(pin: Pin) -> Option<&'static GpioPinSource> {
        PIN_SOURCES.get(pin as usize)
    }

    pub fn line(&self) -> IrqNumber {
        lines::GPIO0
    }

    pub fn set_handler(&self, handler: Option<PinHandler>) {
        *self.handler.lock() = handler;
    }

    pub fn serviced(&self) -> u32 {
        self.serviced.load(Ordering::Relaxed)
    }
}

impl IrqSource for GpioPinSource {
    fn is_pending(&self) -> bool {
        event_status(self.pin)
    }

    fn handle(&self) {
        clear_event(self.pin);
        self.serviced.fetch_add(1, Ordering::Relaxed);
        let handler = *self.handler.lock();
        if let Some(handler) = handler {
            handler(self.pin);
        }
    }
}

static PIN_SOURCES: [GpioPinSource; BANK0_PINS as usize] = {
    let mut sources = [const { GpioPinSource::new(0) }; BANK0_PINS as usize];
    let mut pin = 0;
    while pin < BANK0_PINS {
        sources[pin as usize] = GpioPinSource::new(pin);
        pin += 1;
    }
    sources
};

// ============================================================================
// Device
// ============================================================================

/// GPIO has no clock gate of its own; turning the bank off returns every
/// pin to an input with edge detection disabled.
struct GpioHw;

impl PeripheralHw for GpioHw {
    type Config = GpioConfig;

    fn apply(&mut self, config: &GpioConfig) -> HalResult<()> {
        for pin in 0..BANK0_PINS {
            match config.direction(pin) {
                Direction::Output => {
                    set_function(pin, Function::Output)?;
                    set_pull(pin, PullMode::None)?;
                }
                Direction::Input => {
                    set_function(pin, Function::Input)?;
                    set_pull(pin, config.input_pull)?;
                }
            }
        }
        Ok(())
    }

    fn set_clock(&mut self, _enabled: bool) {}

    fn reset(&mut self) {
        for pin in 0..BANK0_PINS {
            configure_edges(pin, false, false);
            clear_event(pin);
        }
    }
}

/// GPIO bank 0 device.
pub struct Bcm2835GpioDevice {
    core: Peripheral<GpioHw>,
}

impl Bcm2835GpioDevice {
    fn check(&self, pin: Pin) -> HalResult<()> {
        self.core.ensure_active().map_err(|err| self.core.failed(err))?;
        if pin >= BANK0_PINS {
            return Err(self.core.failed(HalError::InvalidParam));
        }
        Ok(())
    }

    fn drive(&mut self, pin: Pin, high: bool) -> HalResult<()> {
        self.check(pin)?;
        if function(pin) != Function::Output as u32 {
            return Err(self.core.failed(HalError::InvalidState));
        }
        write(pin, high)?;
        self.core.stats().record_operation();
        Ok(())
    }
}

impl GpioController for Bcm2835GpioDevice {
    fn pin_count(&self) -> Pin {
        BANK0_PINS
    }

    fn set_direction(&mut self, pin: Pin, direction: Direction) -> HalResult<()> {
        self.check(pin)?;
        let func = match direction {
            Direction::Input => Function::Input,
            Direction::Output => Function::Output,
        };
        set_function(pin, func)
    }

    fn set_pull(&mut self, pin: Pin, pull: PullMode) -> HalResult<()> {
        self.check(pin)?;
        set_pull(pin, pull)
    }

    fn set_high(&mut self, pin: Pin) -> HalResult<()> {
        self.drive(pin, true)
    }

    fn set_low(&mut self, pin: Pin) -> HalResult<()> {
        self.drive(pin, false)
    }

    fn read(&self, pin: Pin) -> HalResult<PinLevel> {
        self.check(pin)?;
        self.core.stats().record_operation();
        level(pin)
    }

    fn enable_edge_detect(&mut self, pin: Pin, edge: EdgeDetect) -> HalResult<()> {
        self.check(pin)?;
        match edge {
            EdgeDetect::Rising => configure_edges(pin, true, false),
            EdgeDetect::Falling => configure_edges(pin, false, true),
            EdgeDetect::Both => configure_edges(pin, true, true),
        }
        Ok(())
    }

    fn disable_edge_detect(&mut self, pin: Pin) -> HalResult<()> {
        self.check(pin)?;
        configure_edges(pin, false, false);
        Ok(())
    }

    fn event_pending(&self, pin: Pin) -> HalResult<bool> {
        self.check(pin)?;
        Ok(event_status(pin))
    }

    fn clear_event(&mut self, pin: Pin) -> HalResult<()> {
        self.check(pin)?;
        clear_event(pin);
        Ok(())
    }
}

impl Device for Bcm2835GpioDevice {
    peripheral_capabilities!(core);

    fn as_gpio(&mut self) -> Option<&mut dyn GpioController> {
        Some(self)
    }
}

/// Builds the bank 0 device. Pin sources are connected by their users
/// through [`GpioPinSource::get`].
pub struct Bcm2835GpioDriver;

impl DeviceDriver for Bcm2835GpioDriver {
    fn kind(&self) -> DeviceKind {
        DeviceKind::Gpio
    }

    fn construct(
        &self,
        config: &DeviceConfig,
        _resources: &Resources<'_>,
    ) -> HalResult<Box<dyn Device>> {
        let config = GpioConfig::try_from(*config)?;
        Ok(Box::new(Bcm2835GpioDevice {
            core: Peripheral::new(DeviceKind::Gpio, GpioHw, config),
        }))
    }
}
