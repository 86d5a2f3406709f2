//! DMA Engine Hardware Abstraction Layer.
//!
//! [`DmaEngine`] is what a platform supplies: a set of hardware streams
//! that can be programmed from a generic [`DmaRequest`]. Channel ownership
//! and the allocation state machine live in [`crate::dma`].

use core::fmt;

use bitflags::bitflags;

use crate::error::{HalError, HalResult};

bitflags! {
    /// Addressing and repeat options for a transfer.
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DmaFlags: u8 {
        /// Advance the source address after every beat.
        const SRC_INCREMENT = 1 << 0;
        /// Advance the destination address after every beat.
        const DST_INCREMENT = 1 << 1;
        /// Restart from the first beat when the count runs out.
        const CIRCULAR = 1 << 2;
    }
}

/// Transfer direction.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DmaDirection {
    MemoryToMemory,
    MemoryToPeripheral,
    PeripheralToMemory,
}

/// Outcome delivered to a completion callback.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DmaEvent {
    /// Pool index of the channel that finished.
    pub channel: u8,
    /// `Ok` on completion, the engine's error otherwise.
    pub result: HalResult<()>,
}

/// Completion callback.
///
/// The closure is borrowed for `'static`; the manager stores and calls the
/// reference but never owns or frees what it captures. It may run in
/// interrupt context.
pub type DmaCallback = &'static (dyn Fn(DmaEvent) + Sync);

/// A transfer description, validated by the manager before it reaches an
/// engine.
#[derive(Copy, Clone)]
pub struct DmaRequest {
    pub direction: DmaDirection,
    /// Source address as seen by the CPU.
    pub src: usize,
    /// Destination address as seen by the CPU.
    pub dst: usize,
    /// Number of beats (not bytes).
    pub transfer_count: u32,
    /// Source beat width in bits: 8, 16 or 32.
    pub src_width: u8,
    /// Destination beat width in bits: 8, 16 or 32.
    pub dst_width: u8,
    /// Arbitration priority, 0 (lowest) to 3.
    pub priority: u8,
    pub flags: DmaFlags,
    pub callback: Option<DmaCallback>,
}

impl DmaRequest {
    /// Word-wide memory copy with both addresses incrementing.
    pub fn memory_copy(src: usize, dst: usize, words: u32) -> Self {
        Self {
            direction: DmaDirection::MemoryToMemory,
            src,
            dst,
            transfer_count: words,
            src_width: 32,
            dst_width: 32,
            priority: 0,
            flags: DmaFlags::SRC_INCREMENT | DmaFlags::DST_INCREMENT,
            callback: None,
        }
    }

    /// Byte stream from memory into a fixed peripheral data register.
    pub fn to_peripheral(src: usize, register: usize, bytes: u32) -> Self {
        Self {
            direction: DmaDirection::MemoryToPeripheral,
            src,
            dst: register,
            transfer_count: bytes,
            src_width: 8,
            dst_width: 8,
            priority: 1,
            flags: DmaFlags::SRC_INCREMENT,
            callback: None,
        }
    }

    pub fn with_callback(mut self, callback: DmaCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_flags(mut self, flags: DmaFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether the transfer restarts itself when the count runs out.
    pub fn is_circular(&self) -> bool {
        self.flags.contains(DmaFlags::CIRCULAR)
    }

    /// Check the request against the limits every engine shares.
    pub fn validate(&self, max_priority: u8) -> HalResult<()> {
        if self.transfer_count == 0 {
            return Err(HalError::InvalidParam);
        }
        if !valid_width(self.src_width) || !valid_width(self.dst_width) {
            return Err(HalError::InvalidParam);
        }
        if self.priority > max_priority {
            return Err(HalError::InvalidParam);
        }
        Ok(())
    }
}

fn valid_width(bits: u8) -> bool {
    matches!(bits, 8 | 16 | 32)
}

impl fmt::Debug for DmaRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaRequest")
            .field("direction", &self.direction)
            .field("src", &format_args!("{:#x}", self.src))
            .field("dst", &format_args!("{:#x}", self.dst))
            .field("transfer_count", &self.transfer_count)
            .field("src_width", &self.src_width)
            .field("dst_width", &self.dst_width)
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Platform DMA hardware.
///
/// Implementations are called outside the manager's critical section and
/// may be called from interrupt context.
pub trait DmaEngine: Send + Sync {
    /// Number of hardware streams available to the allocator.
    fn stream_count(&self) -> usize;

    /// Hardware stream bound to pool index `channel`.
    fn stream_for(&self, channel: usize) -> u8 {
        channel as u8
    }

    /// Program `stream` from `request`, arm its completion interrupt and
    /// start it.
    fn program(&self, stream: u8, request: &DmaRequest) -> HalResult<()>;

    /// Disable `stream` and clear its pending flags.
    fn halt(&self, stream: u8);

    /// Beats still to be transferred on `stream`.
    fn remaining(&self, stream: u8) -> u32;

    /// Read and clear the completion status of `stream`.
    ///
    /// Returns `None` when the stream has nothing to report.
    fn take_completion(&self, stream: u8) -> Option<HalResult<()>>;
}
