//! Interrupt line manager.
//!
//! Multiplexes many logical interrupt sources onto the few physical lines
//! of the platform's [`InterruptController`]. Each connected source is an
//! entry in a fixed pool shared by all lines; [`InterruptManager::dispatch`]
//! walks the entries of one line and services every source whose own
//! pending flag is set.

use alloc::boxed::Box;
use core::fmt;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};

use common::sync::IrqSpinLock;
use log::{trace, warn};
use spin::Once;

use crate::config::MAX_IRQ_ENTRIES;
use crate::error::{HalError, HalResult};
use crate::hal::interrupt::{InterruptController, IrqNumber, Priority};
use crate::platform::{CurrentPlatform, Platform};

/// One logical interrupt source.
///
/// Both methods run in interrupt context.
pub trait IrqSource: Sync {
    /// Whether this source is asserting its request.
    fn is_pending(&self) -> bool;

    /// Service the request and clear this source's own flag.
    fn handle(&self);
}

/// Token for one connected entry; give it back to
/// [`InterruptManager::disconnect`].
#[derive(Debug, PartialEq, Eq)]
pub struct IrqHandle {
    line: IrqNumber,
    slot: u8,
    generation: u32,
}

impl IrqHandle {
    pub fn line(&self) -> IrqNumber {
        self.line
    }
}

#[derive(Copy, Clone)]
struct Entry {
    line: IrqNumber,
    source: &'static dyn IrqSource,
    priority: Priority,
    seq: u32,
}

struct Table {
    entries: [Option<Entry>; MAX_IRQ_ENTRIES],
    generations: [u32; MAX_IRQ_ENTRIES],
    next_seq: u32,
}

impl Table {
    fn on_line(&self, line: IrqNumber) -> impl Iterator<Item = &Entry> {
        self.entries.iter().flatten().filter(move |e| e.line == line)
    }
}

/// Counter snapshot returned by [`InterruptManager::statistics`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IrqStatistics {
    /// Sources serviced.
    pub dispatched: u32,
    /// Dispatches that found no pending source.
    pub spurious: u32,
    /// Lines the controller refused to acknowledge.
    pub ack_errors: u32,
}

pub struct InterruptManager {
    controller: Box<dyn InterruptController>,
    capacity: usize,
    table: IrqSpinLock<Table>,
    dispatched: AtomicU32,
    spurious: AtomicU32,
    ack_errors: AtomicU32,
}

impl InterruptManager {
    pub fn new(controller: Box<dyn InterruptController>) -> Self {
        Self::with_capacity(controller, MAX_IRQ_ENTRIES)
    }

    /// A manager whose entry pool holds at most `capacity` sources.
    pub fn with_capacity(controller: Box<dyn InterruptController>, capacity: usize) -> Self {
        Self {
            controller,
            capacity: capacity.min(MAX_IRQ_ENTRIES),
            table: IrqSpinLock::new(Table {
                entries: [None; MAX_IRQ_ENTRIES],
                generations: [0; MAX_IRQ_ENTRIES],
                next_seq: 0,
            }),
            dispatched: AtomicU32::new(0),
            spurious: AtomicU32::new(0),
            ack_errors: AtomicU32::new(0),
        }
    }

    pub fn line_count(&self) -> u32 {
        self.controller.line_count()
    }

    fn check_line(&self, line: IrqNumber) -> HalResult<()> {
        if line < self.controller.line_count() {
            Ok(())
        } else {
            Err(HalError::InvalidParam)
        }
    }

    /// Chain `source` onto `line`.
    ///
    /// The line is left masked or unmasked as it was; call
    /// [`enable`](Self::enable) to unmask it.
    pub fn connect(
        &self,
        line: IrqNumber,
        source: &'static dyn IrqSource,
        priority: Priority,
    ) -> HalResult<IrqHandle> {
        self.check_line(line)?;
        let handle = self.table.with(|table| {
            if table.on_line(line).any(|e| ptr::addr_eq(e.source, source)) {
                return Err(HalError::InvalidState);
            }
            let slot = table.entries[..self.capacity]
                .iter()
                .position(Option::is_none)
                .ok_or(HalError::NoResource)?;

            let seq = table.next_seq;
            table.next_seq = seq.wrapping_add(1);
            table.generations[slot] = table.generations[slot].wrapping_add(1);
            table.entries[slot] = Some(Entry {
                line,
                source,
                priority,
                seq,
            });
            Ok(IrqHandle {
                line,
                slot: slot as u8,
                generation: table.generations[slot],
            })
        })?;
        trace!(
            "irq: source connected to line {} (slot {}, priority {})",
            line,
            handle.slot,
            priority
        );
        Ok(handle)
    }

    /// Remove the entry behind `handle`.
    ///
    /// Masks the line when this was its last source; the mask is written
    /// while the table is still locked.
    pub fn disconnect(&self, handle: IrqHandle) -> HalResult<()> {
        let line = handle.line;
        let slot = handle.slot as usize;
        self.table.with(|table| {
            let live = table.generations.get(slot) == Some(&handle.generation)
                && table.entries[slot].is_some_and(|e| e.line == line);
            if !live {
                return Err(HalError::NotFound);
            }
            table.entries[slot] = None;
            if table.on_line(line).next().is_none() {
                self.controller.disable(line)?;
            }
            Ok(())
        })?;
        trace!("irq: slot {} disconnected from line {}", slot, line);
        Ok(())
    }

    pub fn enable(&self, line: IrqNumber) -> HalResult<()> {
        self.check_line(line)?;
        self.controller.enable(line)
    }

    pub fn disable(&self, line: IrqNumber) -> HalResult<()> {
        self.check_line(line)?;
        self.controller.disable(line)
    }

    pub fn is_enabled(&self, line: IrqNumber) -> bool {
        line < self.controller.line_count() && self.controller.is_enabled(line)
    }

    /// Number of sources chained on `line`.
    pub fn chain_len(&self, line: IrqNumber) -> usize {
        self.table.with(|table| table.on_line(line).count())
    }

    /// Service `line` from the low-level handler.
    ///
    /// Every chained source that reports pending is handled, in ascending
    /// priority value and then connection order; the line is then
    /// acknowledged at the controller. Returns the number of sources
    /// serviced.
    pub fn dispatch(&self, line: IrqNumber) -> usize {
        let mut chain: [Option<Entry>; MAX_IRQ_ENTRIES] = [None; MAX_IRQ_ENTRIES];
        let len = self.table.with(|table| {
            let mut len = 0;
            for entry in table.on_line(line) {
                chain[len] = Some(*entry);
                len += 1;
            }
            len
        });
        let chain = &mut chain[..len];
        chain.sort_unstable_by_key(|e| e.map(|e| (e.priority, e.seq)));

        let mut serviced = 0;
        for entry in chain.iter().flatten() {
            if entry.source.is_pending() {
                entry.source.handle();
                serviced += 1;
            }
        }
        if let Err(err) = self.controller.clear(line) {
            self.ack_errors.fetch_add(1, Ordering::Relaxed);
            trace!("irq: acknowledging line {} failed: {}", line, err);
        }

        if serviced == 0 {
            self.spurious.fetch_add(1, Ordering::Relaxed);
        } else {
            self.dispatched.fetch_add(serviced as u32, Ordering::Relaxed);
        }
        serviced
    }

    /// Drain the controller's pending lines through [`dispatch`](Self::dispatch).
    ///
    /// Visits at most one line per controller line so a source that never
    /// clears cannot trap the caller. Returns the sources serviced.
    pub fn dispatch_pending(&self) -> usize {
        let mut serviced = 0;
        for _ in 0..self.controller.line_count() {
            let Some(line) = self.controller.next_pending() else {
                break;
            };
            serviced += self.dispatch(line);
        }
        serviced
    }

    pub fn statistics(&self) -> IrqStatistics {
        IrqStatistics {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            spurious: self.spurious.load(Ordering::Relaxed),
            ack_errors: self.ack_errors.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for InterruptManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptManager")
            .field("lines", &self.controller.line_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

static INTERRUPTS: Once<InterruptManager> = Once::new();

/// The process-wide line manager over the selected platform's controller.
///
/// The platform's DMA stream completions are connected when it is built.
pub fn interrupts() -> &'static InterruptManager {
    INTERRUPTS.call_once(|| {
        let manager = InterruptManager::new(CurrentPlatform::interrupt_controller());
        if let Err(err) = CurrentPlatform::connect_dma_interrupts(&manager) {
            warn!("irq: DMA completion lines not connected: {}", err);
        }
        manager
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::arch::CpuIrq;
    use common::sync::irq::IrqControl;
    use core::sync::atomic::{AtomicBool, AtomicU64};
    use std::sync::Mutex;
    use std::vec::Vec;

    #[derive(Default)]
    struct FakeController {
        enabled: AtomicU64,
        pending: AtomicU64,
        cleared: AtomicU32,
        refuse_clear: AtomicBool,
    }

    impl InterruptController for &'static FakeController {
        fn line_count(&self) -> u32 {
            16
        }

        fn enable(&self, irq: IrqNumber) -> HalResult<()> {
            self.enabled.fetch_or(1 << irq, Ordering::SeqCst);
            Ok(())
        }

        fn disable(&self, irq: IrqNumber) -> HalResult<()> {
            self.enabled.fetch_and(!(1 << irq), Ordering::SeqCst);
            Ok(())
        }

        fn is_enabled(&self, irq: IrqNumber) -> bool {
            self.enabled.load(Ordering::SeqCst) & (1 << irq) != 0
        }

        fn is_pending(&self, irq: IrqNumber) -> HalResult<bool> {
            Ok(self.pending.load(Ordering::SeqCst) & (1 << irq) != 0)
        }

        fn next_pending(&self) -> Option<IrqNumber> {
            let pending = self.pending.load(Ordering::SeqCst) & self.enabled.load(Ordering::SeqCst);
            (pending != 0).then(|| pending.trailing_zeros())
        }

        fn clear(&self, irq: IrqNumber) -> HalResult<()> {
            if self.refuse_clear.load(Ordering::SeqCst) {
                return Err(HalError::Bus);
            }
            self.pending.fetch_and(!(1 << irq), Ordering::SeqCst);
            self.cleared.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Flagged {
        id: u32,
        flag: AtomicBool,
        log: &'static Mutex<Vec<u32>>,
    }

    impl IrqSource for Flagged {
        fn is_pending(&self) -> bool {
            self.flag.load(Ordering::SeqCst)
        }

        fn handle(&self) {
            self.flag.store(false, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.id);
        }
    }

    fn source(id: u32, log: &'static Mutex<Vec<u32>>) -> &'static Flagged {
        Box::leak(Box::new(Flagged {
            id,
            flag: AtomicBool::new(false),
            log,
        }))
    }

    fn fixture() -> (&'static FakeController, InterruptManager, &'static Mutex<Vec<u32>>) {
        let controller: &'static FakeController = Box::leak(Box::new(FakeController::default()));
        let log: &'static Mutex<Vec<u32>> = Box::leak(Box::new(Mutex::new(Vec::new())));
        (controller, InterruptManager::new(Box::new(controller)), log)
    }

    #[test]
    fn test_dispatch_order_is_priority_then_connection() {
        let (_, irqs, log) = fixture();
        let sources = [
            (source(1, log), 5),
            (source(2, log), 1),
            (source(3, log), 5),
            (source(4, log), 0),
        ];
        let mut handles = Vec::new();
        for (src, prio) in sources {
            handles.push(irqs.connect(3, src, prio).unwrap());
        }
        for (src, _) in sources {
            src.flag.store(true, Ordering::SeqCst);
        }

        assert_eq!(irqs.dispatch(3), 4);
        assert_eq!(*log.lock().unwrap(), [4, 2, 1, 3]);

        log.lock().unwrap().clear();
        irqs.disconnect(handles.remove(1)).unwrap();
        for (src, _) in sources {
            src.flag.store(true, Ordering::SeqCst);
        }
        assert_eq!(irqs.dispatch(3), 3);
        assert_eq!(*log.lock().unwrap(), [4, 1, 3]);
    }

    #[test]
    fn test_only_pending_sources_are_handled() {
        let (controller, irqs, log) = fixture();
        let quiet = source(1, log);
        let loud = source(2, log);
        irqs.connect(2, quiet, 0).unwrap();
        irqs.connect(2, loud, 0).unwrap();

        loud.flag.store(true, Ordering::SeqCst);
        assert_eq!(irqs.dispatch(2), 1);
        assert_eq!(*log.lock().unwrap(), [2]);
        assert_eq!(controller.cleared.load(Ordering::SeqCst), 1);

        assert_eq!(irqs.dispatch(2), 0);
        assert_eq!(irqs.statistics(), IrqStatistics {
            dispatched: 1,
            spurious: 1,
            ack_errors: 0,
        });
    }

    #[test]
    fn test_double_connect_rejected() {
        let (_, irqs, log) = fixture();
        let src = source(1, log);
        let handle = irqs.connect(4, src, 2).unwrap();
        assert_eq!(irqs.connect(4, src, 3).err(), Some(HalError::InvalidState));
        let other_line = irqs.connect(5, src, 2).unwrap();
        irqs.disconnect(handle).unwrap();
        assert!(irqs.connect(4, src, 2).is_ok());
        irqs.disconnect(other_line).unwrap();
    }

    #[test]
    fn test_line_out_of_range() {
        let (_, irqs, log) = fixture();
        assert_eq!(
            irqs.connect(16, source(1, log), 0).err(),
            Some(HalError::InvalidParam)
        );
        assert_eq!(irqs.enable(99), Err(HalError::InvalidParam));
        assert!(!irqs.is_enabled(99));
    }

    #[test]
    fn test_pool_exhaustion() {
        let (controller, _, log) = fixture();
        let irqs = InterruptManager::with_capacity(Box::new(controller), 2);
        let a = irqs.connect(0, source(1, log), 0).unwrap();
        irqs.connect(1, source(2, log), 0).unwrap();
        assert_eq!(
            irqs.connect(2, source(3, log), 0).err(),
            Some(HalError::NoResource)
        );
        irqs.disconnect(a).unwrap();
        assert!(irqs.connect(2, source(3, log), 0).is_ok());
    }

    #[test]
    fn test_connect_leaves_mask_and_last_disconnect_masks() {
        let (_, irqs, log) = fixture();
        let a = irqs.connect(6, source(1, log), 0).unwrap();
        let b = irqs.connect(6, source(2, log), 0).unwrap();
        assert!(!irqs.is_enabled(6));
        irqs.enable(6).unwrap();
        assert!(irqs.is_enabled(6));

        irqs.disconnect(a).unwrap();
        assert!(irqs.is_enabled(6));
        assert_eq!(irqs.chain_len(6), 1);
        irqs.disconnect(b).unwrap();
        assert!(!irqs.is_enabled(6));
        assert_eq!(irqs.chain_len(6), 0);
    }

    #[test]
    fn test_stale_handle_not_found() {
        let (_, irqs, log) = fixture();
        let handle = irqs.connect(1, source(1, log), 0).unwrap();
        let stale = IrqHandle {
            line: handle.line,
            slot: handle.slot,
            generation: handle.generation,
        };
        irqs.disconnect(handle).unwrap();
        irqs.connect(1, source(2, log), 0).unwrap();
        assert_eq!(irqs.disconnect(stale), Err(HalError::NotFound));
        assert_eq!(irqs.chain_len(1), 1);
    }

    #[test]
    fn test_dispatch_pending_drains_enabled_lines() {
        let (controller, irqs, log) = fixture();
        let a = source(1, log);
        let b = source(2, log);
        irqs.connect(2, a, 0).unwrap();
        irqs.connect(9, b, 0).unwrap();
        irqs.enable(2).unwrap();
        irqs.enable(9).unwrap();

        a.flag.store(true, Ordering::SeqCst);
        b.flag.store(true, Ordering::SeqCst);
        controller.pending.store((1 << 2) | (1 << 9), Ordering::SeqCst);
        assert_eq!(irqs.dispatch_pending(), 2);
        assert_eq!(*log.lock().unwrap(), [1, 2]);
        assert_eq!(controller.pending.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_refused_acknowledge_is_counted() {
        let (controller, irqs, log) = fixture();
        let src = source(1, log);
        irqs.connect(7, src, 0).unwrap();
        controller.refuse_clear.store(true, Ordering::SeqCst);

        src.flag.store(true, Ordering::SeqCst);
        assert_eq!(irqs.dispatch(7), 1);
        assert_eq!(irqs.statistics().ack_errors, 1);
        assert_eq!(irqs.statistics().dispatched, 1);
    }

    /// Controller whose `disable` is a window for an interrupt handler that
    /// chains a new source onto line 3 and unmasks it. The handler only
    /// runs there if CPU interrupts are open; otherwise it is held until
    /// the test delivers it.
    struct HandlerInWindow {
        inner: &'static FakeController,
        manager: Once<&'static InterruptManager>,
        late: &'static Flagged,
        delivered: AtomicBool,
    }

    impl HandlerInWindow {
        fn deliver(&self) {
            if self.delivered.swap(true, Ordering::SeqCst) {
                return;
            }
            if let Some(manager) = self.manager.get() {
                manager.connect(3, self.late, 0).unwrap();
                manager.enable(3).unwrap();
            }
        }
    }

    impl InterruptController for &'static HandlerInWindow {
        fn line_count(&self) -> u32 {
            self.inner.line_count()
        }

        fn enable(&self, irq: IrqNumber) -> HalResult<()> {
            self.inner.enable(irq)
        }

        fn disable(&self, irq: IrqNumber) -> HalResult<()> {
            if CpuIrq::enabled() {
                self.deliver();
            }
            self.inner.disable(irq)
        }

        fn is_enabled(&self, irq: IrqNumber) -> bool {
            self.inner.is_enabled(irq)
        }

        fn is_pending(&self, irq: IrqNumber) -> HalResult<bool> {
            self.inner.is_pending(irq)
        }

        fn next_pending(&self) -> Option<IrqNumber> {
            self.inner.next_pending()
        }

        fn clear(&self, irq: IrqNumber) -> HalResult<()> {
            self.inner.clear(irq)
        }
    }

    #[test]
    fn test_source_connected_during_last_disconnect_stays_enabled() {
        let log: &'static Mutex<Vec<u32>> = Box::leak(Box::new(Mutex::new(Vec::new())));
        let window: &'static HandlerInWindow = Box::leak(Box::new(HandlerInWindow {
            inner: Box::leak(Box::new(FakeController::default())),
            manager: Once::new(),
            late: source(2, log),
            delivered: AtomicBool::new(false),
        }));
        let irqs: &'static InterruptManager =
            Box::leak(Box::new(InterruptManager::new(Box::new(window))));
        window.manager.call_once(|| irqs);

        let first = irqs.connect(3, source(1, log), 0).unwrap();
        irqs.enable(3).unwrap();
        irqs.disconnect(first).unwrap();
        window.deliver();

        assert_eq!(irqs.chain_len(3), 1);
        assert!(irqs.is_enabled(3));
    }
}
