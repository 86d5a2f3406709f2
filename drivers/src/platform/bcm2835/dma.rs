//! BCM2835 DMA controller.
//!
//! Each channel executes a chain of 32-byte control blocks fetched over
//! the VideoCore bus. One control block per stream is kept in a static
//! table; a circular transfer links its block to itself.

use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU8, Ordering};

use common::sync::SpinLock;

use super::{bus_address, lines};
use crate::error::{HalError, HalResult};
use crate::hal::dma::{DmaDirection, DmaEngine, DmaFlags, DmaRequest};
use crate::hal::interrupt::IrqNumber;
use crate::irq::IrqSource;

/// DMA controller base address (channels 0-14).
pub const DMA_BASE: usize = 0x2000_7000;

const CHANNEL_STRIDE: usize = 0x100;
const ENABLE_OFFSET: usize = 0xFF0;

/// Channels left to the ARM by the firmware, each on its own line.
/// 0-6 are full engines, 7 onwards are lite engines.
const USABLE: [u8; 7] = [0, 2, 4, 5, 8, 9, 10];

/// Streams offered to the channel allocator.
pub const DMA_STREAMS: usize = USABLE.len();

const FIRST_LITE: u8 = 7;
const LITE_MAX_BYTES: u32 = 1 << 16;
const FULL_MAX_BYTES: u32 = 1 << 30;

// CS bits
const CS_ACTIVE: u32 = 1 << 0;
const CS_END: u32 = 1 << 1;
const CS_INT: u32 = 1 << 2;
const CS_ERROR: u32 = 1 << 8;
const CS_PRIORITY_SHIFT: u32 = 16;
const CS_WAIT_FOR_WRITES: u32 = 1 << 28;
const CS_RESET: u32 = 1 << 31;

// TI bits
const TI_INTEN: u32 = 1 << 0;
const TI_WAIT_RESP: u32 = 1 << 3;
const TI_DEST_INC: u32 = 1 << 4;
const TI_DEST_DREQ: u32 = 1 << 6;
const TI_SRC_INC: u32 = 1 << 8;
const TI_SRC_DREQ: u32 = 1 << 10;
const TI_PERMAP_SHIFT: u32 = 16;

// DEBUG error bits, write one to clear
const DEBUG_ERRORS: u32 = 0b111;

/// Peripheral pacing signals for the data registers we know about.
const DREQ_UART_TX: u32 = 12;
const DREQ_UART_RX: u32 = 14;

/// Per-channel register block.
#[repr(C)]
struct Registers {
    cs: u32,
    conblk_ad: u32,
    ti: u32,
    source_ad: u32,
    dest_ad: u32,
    txfr_len: u32,
    stride: u32,
    nextconbk: u32,
    debug: u32,
}

#[inline(always)]
fn regs(channel: u8) -> *mut Registers {
    (DMA_BASE + channel as usize * CHANNEL_STRIDE) as *mut Registers
}

/// Hardware control block; the engine requires 32-byte alignment.
#[repr(C, align(32))]
#[derive(Debug, Copy, Clone, Default)]
struct ControlBlock {
    ti: u32,
    source_ad: u32,
    dest_ad: u32,
    txfr_len: u32,
    stride: u32,
    nextconbk: u32,
    _reserved: [u32; 2],
}

impl ControlBlock {
    const ZERO: Self = Self {
        ti: 0,
        source_ad: 0,
        dest_ad: 0,
        txfr_len: 0,
        stride: 0,
        nextconbk: 0,
        _reserved: [0; 2],
    };
}

static CONTROL_BLOCKS: SpinLock<[ControlBlock; DMA_STREAMS]> =
    SpinLock::new([ControlBlock::ZERO; DMA_STREAMS]);

/// Map a device data register to its DREQ line; 0 runs unpaced.
fn dreq_for(register: usize) -> u32 {
    match register {
        r if r == crate::peripheral::pl011::UART0_BASE => DREQ_UART_TX,
        _ => 0,
    }
}

/// Encode the transfer information word for `request`.
fn transfer_info(request: &DmaRequest) -> u32 {
    let mut ti = TI_INTEN | TI_WAIT_RESP;
    if request.flags.contains(DmaFlags::SRC_INCREMENT) {
        ti |= TI_SRC_INC;
    }
    if request.flags.contains(DmaFlags::DST_INCREMENT) {
        ti |= TI_DEST_INC;
    }
    match request.direction {
        DmaDirection::MemoryToMemory => {}
        DmaDirection::MemoryToPeripheral => {
            ti |= TI_DEST_DREQ | (dreq_for(request.dst) << TI_PERMAP_SHIFT);
        }
        DmaDirection::PeripheralToMemory => {
            let dreq = match dreq_for(request.src) {
                DREQ_UART_TX => DREQ_UART_RX,
                other => other,
            };
            ti |= TI_SRC_DREQ | (dreq << TI_PERMAP_SHIFT);
        }
    }
    ti
}

/// Turn on the engines the allocator may hand out.
///
/// # Safety
///
/// DMA registers must be properly mapped.
pub unsafe fn enable_streams() {
    let mask = USABLE.iter().fold(0u32, |mask, &ch| mask | 1 << ch);
    unsafe {
        let enable = (DMA_BASE + ENABLE_OFFSET) as *mut u32;
        write_volatile(enable, read_volatile(enable) | mask);
    }
}

/// BCM2835 DMA engine.
#[derive(Debug)]
pub struct Bcm2835Dma {
    /// Bytes per beat of the transfer last programmed on each stream.
    beat_bytes: [AtomicU8; DMA_STREAMS],
}

impl Bcm2835Dma {
    /// # Safety
    ///
    /// DMA registers must be properly mapped and [`enable_streams`] must
    /// have run.
    pub unsafe fn new() -> Self {
        Self {
            beat_bytes: [const { AtomicU8::new(1) }; DMA_STREAMS],
        }
    }

    fn slot(stream: u8) -> HalResult<usize> {
        USABLE
            .iter()
            .position(|&ch| ch == stream)
            .ok_or(HalError::InvalidParam)
    }
}

impl DmaEngine for Bcm2835Dma {
    fn stream_count(&self) -> usize {
        DMA_STREAMS
    }

    fn stream_for(&self, channel: usize) -> u8 {
        USABLE.get(channel).copied().unwrap_or(u8::MAX)
    }

    fn program(&self, stream: u8, request: &DmaRequest) -> HalResult<()> {
        let slot = Self::slot(stream)?;
        if request.src_width != request.dst_width {
            return Err(HalError::Unsupported);
        }
        let beat = request.src_width / 8;
        let bytes = request
            .transfer_count
            .checked_mul(beat as u32)
            .ok_or(HalError::InvalidParam)?;
        let limit = if stream >= FIRST_LITE {
            LITE_MAX_BYTES
        } else {
            FULL_MAX_BYTES
        };
        if bytes > limit {
            return Err(HalError::InvalidParam);
        }

        let r = regs(stream);
        if unsafe { read_volatile(&(*r).cs) } & CS_ACTIVE != 0 {
            return Err(HalError::Busy);
        }

        let mut blocks = CONTROL_BLOCKS.lock();
        let cb = &mut blocks[slot];
        let cb_bus = bus_address(cb as *const ControlBlock as usize);
        *cb = ControlBlock {
            ti: transfer_info(request),
            source_ad: bus_address(request.src),
            dest_ad: bus_address(request.dst),
            txfr_len: bytes,
            stride: 0,
            nextconbk: if request.is_circular() { cb_bus } else { 0 },
            _reserved: [0; 2],
        };
        drop(blocks);
        self.beat_bytes[slot].store(beat, Ordering::SeqCst);

        unsafe {
            write_volatile(&mut (*r).cs, CS_RESET);
            write_volatile(&mut (*r).debug, DEBUG_ERRORS);
            write_volatile(&mut (*r).conblk_ad, cb_bus);
            write_volatile(
                &mut (*r).cs,
                CS_ACTIVE | CS_WAIT_FOR_WRITES | ((request.priority as u32) << CS_PRIORITY_SHIFT),
            );
        }
        Ok(())
    }

    fn halt(&self, stream: u8) {
        if Self::slot(stream).is_err() {
            return;
        }
        let r = regs(stream);
        unsafe {
            write_volatile(&mut (*r).cs, CS_RESET);
            write_volatile(&mut (*r).cs, CS_END | CS_INT);
            write_volatile(&mut (*r).debug, DEBUG_ERRORS);
        }
    }

    fn remaining(&self, stream: u8) -> u32 {
        let Ok(slot) = Self::slot(stream) else {
            return 0;
        };
        let bytes = unsafe { read_volatile(&(*regs(stream)).txfr_len) };
        bytes / self.beat_bytes[slot].load(Ordering::SeqCst).max(1) as u32
    }

    fn take_completion(&self, stream: u8) -> Option<HalResult<()>> {
        Self::slot(stream).ok()?;
        let r = regs(stream);
        let cs = unsafe { read_volatile(&(*r).cs) };
        if cs & CS_ERROR != 0 {
            unsafe {
                write_volatile(&mut (*r).debug, DEBUG_ERRORS);
                write_volatile(&mut (*r).cs, CS_RESET);
            }
            return Some(Err(HalError::Bus));
        }
        if cs & CS_INT != 0 {
            // END and INT are write-one-to-clear; ACTIVE must be kept for a
            // self-linked block that is still running.
            unsafe { write_volatile(&mut (*r).cs, (cs & CS_ACTIVE) | CS_END | CS_INT) };
            return Some(Ok(()));
        }
        None
    }
}

/// Completion source for one stream; connect on [`StreamSource::line`].
pub struct StreamSource {
    stream: u8,
}

impl StreamSource {
    pub fn line(&self) -> IrqNumber {
        lines::DMA_BASE + self.stream as IrqNumber
    }
}

impl IrqSource for StreamSource {
    fn is_pending(&self) -> bool {
        let cs = unsafe { read_volatile(&(*regs(self.stream)).cs) };
        cs & (CS_INT | CS_ERROR) != 0
    }

    fn handle(&self) {
        crate::dma::dma().handle_stream_irq(self.stream);
    }
}

static STREAM_SOURCES: [StreamSource; DMA_STREAMS] = {
    let mut sources = [const { StreamSource { stream: 0 } }; DMA_STREAMS];
    let mut i = 0;
    while i < DMA_STREAMS {
        sources[i] = StreamSource { stream: USABLE[i] };
        i += 1;
    }
    sources
};

pub fn stream_sources() -> &'static [StreamSource] {
    &STREAM_SOURCES
}
