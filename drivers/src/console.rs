//! Kernel console: a [`log`] backend over a serial device.
//!
//! [`init`] takes a reference to the named serial device from the
//! registry and installs a [`ConsoleLogger`] over it. Records are written
//! without waiting: when the port is held elsewhere the record is
//! dropped, so logging from inside a serial operation cannot deadlock.

use core::fmt::{self, Write};

use common::sync::SpinLock;
use log::{LevelFilter, Log, Metadata, Record};
use spin::Once;

use crate::device_manager::{devices, DeviceHandle};
use crate::error::{HalError, HalResult};
use crate::hal::serial::SerialWriter;

pub struct ConsoleLogger {
    port: SpinLock<Option<DeviceHandle>>,
    level: LevelFilter,
}

impl ConsoleLogger {
    pub fn new(port: DeviceHandle, level: LevelFilter) -> Self {
        Self {
            port: SpinLock::new(Some(port)),
            level,
        }
    }

    /// Write preformatted text to the port. Fails [`HalError::Busy`] when
    /// the port is held elsewhere, [`HalError::NotInit`] once detached.
    pub fn write_fmt(&self, args: fmt::Arguments<'_>) -> HalResult<()> {
        let port = self.port.try_lock().ok_or(HalError::Busy)?;
        port.as_ref().ok_or(HalError::NotInit)?.try_with(|device| {
            let serial = device.as_serial().ok_or(HalError::Unsupported)?;
            SerialWriter(serial)
                .write_fmt(args)
                .map_err(|_| HalError::Bus)
        })?
    }

    /// Take the port handle back; later records are dropped.
    pub fn detach(&self) -> Option<DeviceHandle> {
        self.port.lock().take()
    }

    /// Give back the port handle.
    pub fn into_handle(self) -> Option<DeviceHandle> {
        self.port.into_inner()
    }
}

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = self.write_fmt(format_args!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        ));
    }

    fn flush(&self) {
        if let Some(port) = self.port.try_lock() {
            if let Some(port) = port.as_ref() {
                let _ = port.try_with(|device| device.as_serial().map(|serial| serial.flush()));
            }
        }
    }
}

static LOGGER: Once<ConsoleLogger> = Once::new();
static INSTALL: SpinLock<()> = SpinLock::new(());

/// Install the console logger on serial device `name` of [`devices`].
///
/// The device keeps the reference for the rest of the process.
/// [`HalError::AlreadyInit`] when a logger is already installed; the
/// device reference is given back in that case.
pub fn init(name: &str, level: LevelFilter) -> HalResult<()> {
    let _install = INSTALL.lock();
    if LOGGER.is_completed() {
        return Err(HalError::AlreadyInit);
    }
    let port = devices().get_serial(name)?;
    let logger = LOGGER.call_once(|| ConsoleLogger::new(port, level));
    if log::set_logger(logger).is_err() {
        if let Some(port) = logger.detach() {
            devices().put(port)?;
        }
        return Err(HalError::AlreadyInit);
    }
    log::set_max_level(level);
    Ok(())
}

/// Write to the installed console, if any.
pub fn console_write(s: &str) {
    if let Some(logger) = LOGGER.get() {
        let _ = logger.write_fmt(format_args!("{}", s));
    }
}

// ============================================================================
// Print Macros
// ============================================================================

/// Print to console without newline
#[macro_export]
macro_rules! kprint {
    ($($arg:tt)*) => {{
        $crate::console::print_fmt(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kprintln {
    () => { $crate::kprint!("\n") };
    ($($arg:tt)*) => {{
        $crate::kprint!($($arg)*);
        $crate::kprint!("\n");
    }};
}

#[doc(hidden)]
pub fn print_fmt(args: fmt::Arguments<'_>) {
    if let Some(logger) = LOGGER.get() {
        let _ = logger.write_fmt(args);
    }
}
