//! DMA channel allocator.
//!
//! A fixed pool of channels, one per hardware stream of the platform's
//! [`DmaEngine`]. Callers claim a channel with [`DmaManager::alloc`] and
//! receive a [`DmaChannel`] token that cannot be cloned; giving the token
//! back through [`DmaManager::free`] is the only way to return the channel.
//!
//! The channel table is guarded by an [`IrqSpinLock`] so every operation,
//! including completion dispatch, is safe from interrupt context. The lock
//! covers only the table update: the engine is programmed and completion
//! callbacks run after it has been released.

use alloc::boxed::Box;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

use common::sync::IrqSpinLock;
use log::trace;
use spin::Once;

use crate::config::{MAX_DMA_CHANNELS, MAX_DMA_PRIORITY};
use crate::error::{HalError, HalResult};
use crate::hal::dma::{DmaCallback, DmaEngine, DmaEvent, DmaRequest};
use crate::platform::{CurrentPlatform, Platform};

/// Identity of the peripheral that owns a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PeripheralId(pub u16);

/// Ownership token for one allocated channel.
#[derive(Debug, PartialEq, Eq)]
pub struct DmaChannel {
    index: u8,
}

impl DmaChannel {
    /// Pool index, as reported in [`DmaEvent::channel`].
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Allocation state of one channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    Free,
    Allocated,
    Busy,
}

#[derive(Copy, Clone)]
struct ChannelSlot {
    state: ChannelState,
    owner: Option<PeripheralId>,
    callback: Option<DmaCallback>,
    circular: bool,
}

impl ChannelSlot {
    const FREE: Self = Self {
        state: ChannelState::Free,
        owner: None,
        callback: None,
        circular: false,
    };
}

/// Counter snapshot returned by [`DmaManager::statistics`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DmaStatistics {
    pub started: u32,
    pub completed: u32,
    pub errors: u32,
    pub spurious: u32,
}

#[derive(Default)]
struct Counters {
    started: AtomicU32,
    completed: AtomicU32,
    errors: AtomicU32,
    spurious: AtomicU32,
}

fn bump(counter: &AtomicU32) {
    counter.fetch_add(1, Ordering::Relaxed);
}

pub struct DmaManager {
    engine: Box<dyn DmaEngine>,
    capacity: usize,
    channels: IrqSpinLock<[ChannelSlot; MAX_DMA_CHANNELS]>,
    counters: Counters,
}

impl DmaManager {
    /// A pool over every stream the engine offers, up to
    /// [`MAX_DMA_CHANNELS`].
    pub fn new(engine: Box<dyn DmaEngine>) -> Self {
        Self::with_channels(engine, MAX_DMA_CHANNELS)
    }

    /// A pool of at most `limit` channels.
    pub fn with_channels(engine: Box<dyn DmaEngine>, limit: usize) -> Self {
        let capacity = engine.stream_count().min(limit).min(MAX_DMA_CHANNELS);
        Self {
            engine,
            capacity,
            channels: IrqSpinLock::new([ChannelSlot::FREE; MAX_DMA_CHANNELS]),
            counters: Counters::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Claim the lowest-numbered free channel for `peripheral`.
    ///
    /// Returns `None` when the pool is exhausted; never waits.
    pub fn alloc(&self, peripheral: PeripheralId) -> Option<DmaChannel> {
        let index = self.channels.with(|slots| {
            let (index, slot) = slots[..self.capacity]
                .iter_mut()
                .enumerate()
                .find(|(_, slot)| slot.state == ChannelState::Free)?;
            *slot = ChannelSlot {
                state: ChannelState::Allocated,
                owner: Some(peripheral),
                ..ChannelSlot::FREE
            };
            Some(index)
        });
        match index {
            Some(index) => {
                trace!("dma: channel {} allocated to {:?}", index, peripheral);
                Some(DmaChannel { index: index as u8 })
            }
            None => {
                trace!("dma: pool exhausted for {:?}", peripheral);
                None
            }
        }
    }

    /// Return a channel to the pool, stopping it first if a transfer is
    /// in flight.
    ///
    /// [`HalError::InvalidState`] for a token this pool did not issue.
    pub fn free(&self, channel: DmaChannel) -> HalResult<()> {
        let index = channel.index();
        match self.state(index) {
            None | Some(ChannelState::Free) => return Err(HalError::InvalidState),
            Some(ChannelState::Busy) => self.engine.halt(self.engine.stream_for(index)),
            Some(ChannelState::Allocated) => {}
        }
        self.channels.with(|slots| slots[index] = ChannelSlot::FREE);
        trace!("dma: channel {} freed", index);
        Ok(())
    }

    /// Start `request` on an allocated channel.
    ///
    /// The request is validated before any state is touched. A channel
    /// that is not `Allocated` fails with [`HalError::InvalidState`]. If
    /// the engine rejects the request the channel goes back to `Allocated`.
    pub fn start(&self, channel: &DmaChannel, request: &DmaRequest) -> HalResult<()> {
        request.validate(MAX_DMA_PRIORITY)?;
        let index = channel.index();

        self.channels.with(|slots| {
            let slot = slots
                .get_mut(index)
                .filter(|slot| slot.state == ChannelState::Allocated)
                .ok_or(HalError::InvalidState)?;
            slot.state = ChannelState::Busy;
            slot.callback = request.callback;
            slot.circular = request.is_circular();
            Ok(())
        })?;

        if let Err(err) = self.engine.program(self.engine.stream_for(index), request) {
            self.channels.with(|slots| {
                let slot = &mut slots[index];
                if slot.state == ChannelState::Busy {
                    slot.state = ChannelState::Allocated;
                    slot.callback = None;
                }
            });
            bump(&self.counters.errors);
            return Err(err);
        }

        bump(&self.counters.started);
        Ok(())
    }

    /// Abort the transfer in flight: `Busy → Allocated`.
    pub fn stop(&self, channel: &DmaChannel) -> HalResult<()> {
        let index = channel.index();
        if self.state(index) != Some(ChannelState::Busy) {
            return Err(HalError::InvalidState);
        }
        self.engine.halt(self.engine.stream_for(index));
        self.channels.with(|slots| {
            let slot = &mut slots[index];
            if slot.state == ChannelState::Busy {
                slot.state = ChannelState::Allocated;
                slot.callback = None;
            }
        });
        Ok(())
    }

    /// Beats still to transfer; 0 unless the channel is `Busy`.
    pub fn remaining(&self, channel: &DmaChannel) -> u32 {
        let index = channel.index();
        if self.state(index) == Some(ChannelState::Busy) {
            self.engine.remaining(self.engine.stream_for(index))
        } else {
            0
        }
    }

    /// Completion dispatch for pool index `index`.
    ///
    /// A `Busy` channel returns to `Allocated` (a circular transfer that
    /// succeeded stays `Busy`) before its callback runs, so the callback
    /// may start the next transfer. Returns `false` and counts a spurious
    /// completion when the channel was not `Busy`.
    pub fn complete(&self, index: usize, result: HalResult<()>) -> bool {
        let callback = self.channels.with(|slots| {
            let slot = slots[..self.capacity].get_mut(index)?;
            if slot.state != ChannelState::Busy {
                return None;
            }
            if !(slot.circular && result.is_ok()) {
                slot.state = ChannelState::Allocated;
            }
            Some(slot.callback)
        });

        let Some(callback) = callback else {
            bump(&self.counters.spurious);
            return false;
        };

        match result {
            Ok(()) => bump(&self.counters.completed),
            Err(_) => bump(&self.counters.errors),
        }
        if let Some(callback) = callback {
            callback(DmaEvent {
                channel: index as u8,
                result,
            });
        }
        true
    }

    /// Interrupt entry for hardware stream `stream`.
    ///
    /// Reads and clears the engine's completion status, then dispatches it
    /// to the channel bound to that stream.
    pub fn handle_stream_irq(&self, stream: u8) -> bool {
        let Some(index) = (0..self.capacity).find(|&i| self.engine.stream_for(i) == stream) else {
            bump(&self.counters.spurious);
            return false;
        };
        match self.engine.take_completion(stream) {
            Some(result) => self.complete(index, result),
            None => {
                bump(&self.counters.spurious);
                false
            }
        }
    }

    /// State of pool index `index`, `None` beyond the pool.
    pub fn state(&self, index: usize) -> Option<ChannelState> {
        if index >= self.capacity {
            return None;
        }
        Some(self.channels.with(|slots| slots[index].state))
    }

    pub fn owner(&self, channel: &DmaChannel) -> Option<PeripheralId> {
        self.channels
            .with(|slots| slots.get(channel.index()).and_then(|slot| slot.owner))
    }

    pub fn free_count(&self) -> usize {
        self.channels.with(|slots| {
            slots[..self.capacity]
                .iter()
                .filter(|slot| slot.state == ChannelState::Free)
                .count()
        })
    }

    pub fn statistics(&self) -> DmaStatistics {
        DmaStatistics {
            started: self.counters.started.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
            spurious: self.counters.spurious.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for DmaManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaManager")
            .field("capacity", &self.capacity)
            .field("free", &self.free_count())
            .finish()
    }
}

static DMA: Once<DmaManager> = Once::new();

/// The process-wide channel pool over the selected platform's engine.
pub fn dma() -> &'static DmaManager {
    DMA.call_once(|| DmaManager::new(CurrentPlatform::dma_engine()))
}
