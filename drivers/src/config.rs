//! Build-time capacities of the shared resource managers.

use crate::hal::interrupt::Priority;

/// Entries in the interrupt chain pool, shared by all lines.
pub const MAX_IRQ_ENTRIES: usize = 32;

/// Upper bound on the DMA channel pool, whatever the engine offers.
pub const MAX_DMA_CHANNELS: usize = 16;

/// Highest DMA request priority accepted by `DmaManager::start`.
pub const MAX_DMA_PRIORITY: u8 = 3;

/// Priority used by backend devices for the sources they connect.
///
/// Lower values are dispatched first.
pub const DEFAULT_IRQ_PRIORITY: Priority = 8;
