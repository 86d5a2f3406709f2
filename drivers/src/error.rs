//! Process-wide status enumeration.
//!
//! Every fallible operation in the driver layer returns [`HalResult`].
//! Backends translate their own failures into [`HalError`] before they
//! cross the HAL traits, so callers never see a raw platform error code.

use core::fmt;

/// Result alias used throughout the driver layer.
pub type HalResult<T> = Result<T, HalError>;

/// Status code reported for success by [`status_code`].
pub const STATUS_OK: i32 = 0;

/// Driver layer errors.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HalError {
    /// A required reference or buffer was missing.
    NullPtr,
    /// A parameter is out of range or of the wrong kind.
    InvalidParam,
    /// No device, entry or channel with that identity exists.
    NotFound,
    /// The device is already initialized.
    AlreadyInit,
    /// The device has not been initialized.
    NotInit,
    /// The operation is not legal in the current state.
    InvalidState,
    /// A fixed pool is exhausted.
    NoResource,
    /// The caller's buffer is too small for the record.
    DataSize,
    /// The hardware is busy with another request.
    Busy,
    /// The hardware did not respond in time.
    Timeout,
    /// The device does not provide this interface or feature.
    Unsupported,
    /// The hardware reported a bus or transfer error.
    Bus,
}

impl HalError {
    /// Stable numeric code for this error (always negative).
    pub const fn code(self) -> i32 {
        match self {
            HalError::NullPtr => -1,
            HalError::InvalidParam => -2,
            HalError::NotFound => -3,
            HalError::AlreadyInit => -4,
            HalError::NotInit => -5,
            HalError::InvalidState => -6,
            HalError::NoResource => -7,
            HalError::DataSize => -8,
            HalError::Busy => -9,
            HalError::Timeout => -10,
            HalError::Unsupported => -11,
            HalError::Bus => -12,
        }
    }

    /// Whether retrying after releasing something might succeed.
    pub const fn is_transient(self) -> bool {
        matches!(self, HalError::NoResource | HalError::Busy | HalError::Timeout)
    }
}

impl fmt::Display for HalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            HalError::NullPtr => "null reference",
            HalError::InvalidParam => "invalid parameter",
            HalError::NotFound => "not found",
            HalError::AlreadyInit => "already initialized",
            HalError::NotInit => "not initialized",
            HalError::InvalidState => "invalid state",
            HalError::NoResource => "no resource available",
            HalError::DataSize => "buffer too small",
            HalError::Busy => "busy",
            HalError::Timeout => "timeout",
            HalError::Unsupported => "unsupported",
            HalError::Bus => "bus error",
        };
        f.write_str(text)
    }
}

/// Collapse a result into the numeric status code.
pub fn status_code<T>(result: &HalResult<T>) -> i32 {
    match result {
        Ok(_) => STATUS_OK,
        Err(err) => err.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_negative() {
        let all = [
            HalError::NullPtr,
            HalError::InvalidParam,
            HalError::NotFound,
            HalError::AlreadyInit,
            HalError::NotInit,
            HalError::InvalidState,
            HalError::NoResource,
            HalError::DataSize,
            HalError::Busy,
            HalError::Timeout,
            HalError::Unsupported,
            HalError::Bus,
        ];
        for (i, a) in all.iter().enumerate() {
            assert!(a.code() < 0);
            for b in &all[i + 1..] {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status_code(&Ok::<(), HalError>(())), STATUS_OK);
        assert_eq!(status_code::<()>(&Err(HalError::DataSize)), -8);
    }
}
