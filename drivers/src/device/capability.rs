//! Capability interfaces every device may expose.
//!
//! A capability is reached only through the matching accessor on
//! [`Device`](super::Device): [`Lifecycle`] through `lifecycle()`,
//! [`Power`] through `power()`, [`Diagnostic`] through `diagnostic()`.
//! The returned reference borrows from the device; capabilities are never
//! allocated or released on their own.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::error::{HalError, HalResult};

/// Lifecycle state of one device.
///
/// `Uninitialized → {Initialized, Running} → Suspended ⇄ {Initialized,
/// Running}`. A failed transition lands in `Error`, which only `deinit`
/// leaves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum LifecycleState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Suspended = 3,
    Error = 4,
}

impl LifecycleState {
    /// Whether type-specific operations may touch the hardware.
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Initialized | LifecycleState::Running)
    }
}

/// Init/deinit/suspend/resume contract.
pub trait Lifecycle {
    /// `Uninitialized → Initialized`; [`HalError::AlreadyInit`] otherwise.
    fn init(&mut self) -> HalResult<()>;

    /// Any state `→ Uninitialized`; [`HalError::NotInit`] if already there.
    fn deinit(&mut self) -> HalResult<()>;

    /// `Initialized | Running → Suspended`, keeping the configuration and
    /// removing power.
    fn suspend(&mut self) -> HalResult<()>;

    /// `Suspended →` the state held before suspend, reapplying the stored
    /// configuration.
    fn resume(&mut self) -> HalResult<()>;

    fn state(&self) -> LifecycleState;
}

/// Power-state notification.
///
/// Called with the new state after every real transition.
pub type PowerCallback = &'static (dyn Fn(bool) + Sync);

/// Clock/power gating contract.
pub trait Power {
    /// Gate the clock on. Idempotent.
    fn enable(&mut self) -> HalResult<()>;

    /// Gate the clock off. Idempotent.
    fn disable(&mut self) -> HalResult<()>;

    fn is_enabled(&self) -> bool;

    /// Register or, with `None`, clear the state-change notification.
    fn set_callback(&mut self, callback: Option<PowerCallback>);
}

/// Status and statistics contract.
pub trait Diagnostic {
    /// Copy the [`StatusRecord`] into `buf`; returns the bytes written.
    fn status(&self, buf: &mut [u8]) -> HalResult<usize> {
        self.status_record().encode(buf)
    }

    /// Copy the [`StatisticsRecord`] into `buf`; returns the bytes written.
    fn statistics(&self, buf: &mut [u8]) -> HalResult<usize> {
        self.statistics_record().encode(buf)
    }

    /// Reset the counters without touching operational state.
    fn clear_statistics(&mut self) -> HalResult<()>;

    fn status_record(&self) -> StatusRecord;

    fn statistics_record(&self) -> StatisticsRecord;
}

/// Fixed-size status record.
///
/// Layout (little endian): `state u8, powered u8, kind u8, reserved u8,
/// error_count u32`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StatusRecord {
    pub state: LifecycleState,
    pub powered: bool,
    pub kind: u8,
    pub error_count: u32,
}

impl StatusRecord {
    pub const SIZE: usize = 8;

    pub fn encode(&self, buf: &mut [u8]) -> HalResult<usize> {
        let out = buf.get_mut(..Self::SIZE).ok_or(HalError::DataSize)?;
        out[0] = self.state as u8;
        out[1] = self.powered as u8;
        out[2] = self.kind;
        out[3] = 0;
        out[4..8].copy_from_slice(&self.error_count.to_le_bytes());
        Ok(Self::SIZE)
    }
}

/// Fixed-size statistics record.
///
/// Layout (little endian): `operations u32, bytes_out u32, bytes_in u32,
/// errors u32`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct StatisticsRecord {
    pub operations: u32,
    pub bytes_out: u32,
    pub bytes_in: u32,
    pub errors: u32,
}

impl StatisticsRecord {
    pub const SIZE: usize = 16;

    pub fn encode(&self, buf: &mut [u8]) -> HalResult<usize> {
        let out = buf.get_mut(..Self::SIZE).ok_or(HalError::DataSize)?;
        for (chunk, value) in out
            .chunks_exact_mut(4)
            .zip([self.operations, self.bytes_out, self.bytes_in, self.errors])
        {
            chunk.copy_from_slice(&value.to_le_bytes());
        }
        Ok(Self::SIZE)
    }

    pub fn decode(buf: &[u8]) -> HalResult<Self> {
        let bytes = buf.get(..Self::SIZE).ok_or(HalError::DataSize)?;
        let word = |i: usize| {
            u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]])
        };
        Ok(Self {
            operations: word(0),
            bytes_out: word(4),
            bytes_in: word(8),
            errors: word(12),
        })
    }
}

/// Live counters behind a [`StatisticsRecord`].
///
/// Updated with relaxed atomics: a lost race costs precision, never
/// correctness, so no critical section is taken.
#[derive(Debug, Default)]
pub struct Statistics {
    operations: AtomicU32,
    bytes_out: AtomicU32,
    bytes_in: AtomicU32,
    errors: AtomicU32,
}

impl Statistics {
    pub const fn new() -> Self {
        Self {
            operations: AtomicU32::new(0),
            bytes_out: AtomicU32::new(0),
            bytes_in: AtomicU32::new(0),
            errors: AtomicU32::new(0),
        }
    }

    pub fn record_out(&self, bytes: usize) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes as u32, Ordering::Relaxed);
    }

    pub fn record_in(&self, bytes: usize) {
        self.operations.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(bytes as u32, Ordering::Relaxed);
    }

    pub fn record_operation(&self) {
        self.operations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn errors(&self) -> u32 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatisticsRecord {
        StatisticsRecord {
            operations: self.operations.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.operations.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        self.bytes_in.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_record_layout() {
        let record = StatusRecord {
            state: LifecycleState::Running,
            powered: true,
            kind: 3,
            error_count: 0x0102_0304,
        };
        let mut buf = [0xffu8; 10];
        assert_eq!(record.encode(&mut buf), Ok(StatusRecord::SIZE));
        assert_eq!(&buf[..8], &[2, 1, 3, 0, 4, 3, 2, 1]);
        assert_eq!(buf[8], 0xff);
    }

    #[test]
    fn test_short_buffers_rejected() {
        let mut small = [0u8; 7];
        let status = StatusRecord {
            state: LifecycleState::Uninitialized,
            powered: false,
            kind: 0,
            error_count: 0,
        };
        assert_eq!(status.encode(&mut small), Err(HalError::DataSize));
        assert_eq!(
            StatisticsRecord::default().encode(&mut [0u8; 15]),
            Err(HalError::DataSize)
        );
        assert_eq!(StatisticsRecord::decode(&[0u8; 3]), Err(HalError::DataSize));
    }

    #[test]
    fn test_statistics_counters() {
        let stats = Statistics::new();
        stats.record_out(10);
        stats.record_in(4);
        stats.record_error();

        let mut buf = [0u8; StatisticsRecord::SIZE];
        stats.snapshot().encode(&mut buf).unwrap();
        let decoded = StatisticsRecord::decode(&buf).unwrap();
        assert_eq!(decoded.operations, 2);
        assert_eq!(decoded.bytes_out, 10);
        assert_eq!(decoded.bytes_in, 4);
        assert_eq!(decoded.errors, 1);

        stats.clear();
        assert_eq!(stats.snapshot(), StatisticsRecord::default());
    }
}
