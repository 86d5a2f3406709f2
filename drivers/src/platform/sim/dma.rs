//! Simulated DMA streams.
//!
//! A stream holds a beat counter while it runs. Nothing is copied: the
//! outside world moves beats with [`SimDma::advance`] and the stream
//! latches a completion when its counter reaches zero.

use alloc::vec::Vec;

use common::sync::SpinLock;

use super::lines;
use crate::dma::DmaManager;
use crate::error::{HalError, HalResult};
use crate::hal::dma::{DmaEngine, DmaRequest};
use crate::hal::interrupt::IrqNumber;
use crate::irq::IrqSource;

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct StreamSnapshot {
    /// Transfer length of the last programmed request, in beats.
    pub transfer_count: u32,
    pub remaining: u32,
    pub running: bool,
    pub circular: bool,
    pub priority: u8,
    /// Number of times the stream has been programmed.
    pub programmed: u32,
}

#[derive(Default)]
struct Stream {
    regs: StreamSnapshot,
    completion: Option<HalResult<()>>,
}

pub struct SimDma {
    streams: Vec<SpinLock<Stream>>,
}

impl SimDma {
    pub fn new(streams: usize) -> Self {
        Self {
            streams: (0..streams).map(|_| SpinLock::new(Stream::default())).collect(),
        }
    }

    fn stream(&self, stream: u8) -> Option<&SpinLock<Stream>> {
        self.streams.get(stream as usize)
    }

    pub fn snapshot(&self, stream: u8) -> Option<StreamSnapshot> {
        self.stream(stream).map(|s| s.lock().regs)
    }

    /// Move `beats` through a running stream; returns whether it latched a
    /// completion.
    pub fn advance(&self, stream: u8, beats: u32) -> bool {
        let Some(stream) = self.stream(stream) else {
            return false;
        };
        let mut s = stream.lock();
        if !s.regs.running || beats == 0 {
            return false;
        }
        s.regs.remaining = s.regs.remaining.saturating_sub(beats);
        if s.regs.remaining > 0 {
            return false;
        }
        if s.regs.circular {
            s.regs.remaining = s.regs.transfer_count;
        } else {
            s.regs.running = false;
        }
        s.completion = Some(Ok(()));
        true
    }

    /// Whether `stream` holds a completion nobody has taken yet.
    pub fn has_completion(&self, stream: u8) -> bool {
        self.stream(stream)
            .is_some_and(|s| s.lock().completion.is_some())
    }

    /// One completion source per stream, forwarding to `manager`.
    pub fn stream_sources(&'static self, manager: &'static DmaManager) -> Vec<StreamSource> {
        (0..self.streams.len())
            .map(|stream| StreamSource {
                engine: self,
                manager,
                stream: stream as u8,
            })
            .collect()
    }

    /// Abort a running stream with a bus error.
    pub fn fail(&self, stream: u8) -> bool {
        let Some(stream) = self.stream(stream) else {
            return false;
        };
        let mut s = stream.lock();
        if !s.regs.running {
            return false;
        }
        s.regs.running = false;
        s.completion = Some(Err(HalError::Bus));
        true
    }
}

impl DmaEngine for &'static SimDma {
    fn stream_count(&self) -> usize {
        self.streams.len()
    }

    fn program(&self, stream: u8, request: &DmaRequest) -> HalResult<()> {
        let mut s = self.stream(stream).ok_or(HalError::InvalidParam)?.lock();
        if s.regs.running {
            return Err(HalError::Busy);
        }
        s.regs = StreamSnapshot {
            transfer_count: request.transfer_count,
            remaining: request.transfer_count,
            running: true,
            circular: request.is_circular(),
            priority: request.priority,
            programmed: s.regs.programmed + 1,
        };
        s.completion = None;
        Ok(())
    }

    fn halt(&self, stream: u8) {
        if let Some(stream) = self.stream(stream) {
            let mut s = stream.lock();
            s.regs.running = false;
            s.regs.remaining = 0;
            s.completion = None;
        }
    }

    fn remaining(&self, stream: u8) -> u32 {
        self.snapshot(stream).map_or(0, |regs| regs.remaining)
    }

    fn take_completion(&self, stream: u8) -> Option<HalResult<()>> {
        self.stream(stream)?.lock().completion.take()
    }
}

/// Completion source for one stream; connect on [`StreamSource::line`].
pub struct StreamSource {
    engine: &'static SimDma,
    manager: &'static DmaManager,
    stream: u8,
}

impl StreamSource {
    pub fn line(&self) -> IrqNumber {
        lines::DMA_BASE + self.stream as IrqNumber
    }
}

impl IrqSource for StreamSource {
    fn is_pending(&self) -> bool {
        self.engine.has_completion(self.stream)
    }

    fn handle(&self) {
        self.manager.handle_stream_irq(self.stream);
    }
}
