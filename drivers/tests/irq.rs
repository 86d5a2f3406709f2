//! Shared interrupt line scenarios: GPIO pins chained on one line.

#![cfg(feature = "sim")]

use std::sync::Mutex;

use drivers::device::Resources;
use drivers::hal::gpio::{EdgeDetect, Pin};
use drivers::platform::sim::{lines, PinHandler, SimBoard, SimConfig};
use drivers::{DeviceManager, DmaManager, HalError, InterruptManager, PinLevel};

fn recorder() -> (&'static Mutex<Vec<Pin>>, PinHandler) {
    let log: &'static Mutex<Vec<Pin>> = Box::leak(Box::new(Mutex::new(Vec::new())));
    let handler = Box::leak(Box::new(move |pin: Pin| log.lock().unwrap().push(pin)));
    (log, handler)
}

#[test]
fn chained_pins_fire_in_priority_order() {
    let board = SimBoard::leak(SimConfig::default());
    let dma = DmaManager::new(board.dma_engine());
    let irq = InterruptManager::new(board.interrupt_controller());
    let registry = DeviceManager::new(
        board.device_table(),
        Resources {
            dma: &dma,
            irq: &irq,
        },
    );
    let gpio = registry.get_gpio("gpio0").unwrap();
    let (log, handler) = recorder();

    // (pin, priority): connected out of priority order on purpose.
    let wiring: [(Pin, u8); 4] = [(5, 3), (2, 1), (9, 3), (7, 0)];
    let mut handles = Vec::new();
    for (pin, priority) in wiring {
        let source = board.gpio.pin(pin).unwrap();
        source.set_handler(Some(handler));
        gpio.with_gpio(|g| g.enable_edge_detect(pin, EdgeDetect::Rising))
            .unwrap()
            .unwrap();
        handles.push(irq.connect(lines::GPIO, source, priority).unwrap());
    }
    irq.enable(lines::GPIO).unwrap();
    assert_eq!(irq.chain_len(lines::GPIO), 4);

    for (pin, _) in wiring {
        board.drive_pin(pin, PinLevel::High);
    }
    assert_eq!(irq.dispatch_pending(), 4);
    // Priority 0, then 1, then the two 3s in connection order.
    assert_eq!(*log.lock().unwrap(), [7, 2, 5, 9]);
    for (pin, _) in wiring {
        assert_eq!(board.gpio.pin(pin).unwrap().serviced(), 1);
    }

    // Drop pin 2 out of the middle of the chain and fire everything again.
    let middle = handles.remove(1);
    irq.disconnect(middle).unwrap();
    log.lock().unwrap().clear();
    for (pin, _) in wiring {
        board.drive_pin(pin, PinLevel::Low);
        board.drive_pin(pin, PinLevel::High);
    }
    assert_eq!(irq.dispatch_pending(), 3);
    assert_eq!(*log.lock().unwrap(), [7, 5, 9]);
    assert_eq!(board.gpio.pin(2).unwrap().serviced(), 1);

    for handle in handles {
        irq.disconnect(handle).unwrap();
    }
    assert!(!irq.is_enabled(lines::GPIO));
    registry.put(gpio).unwrap();
}

#[test]
fn only_pending_sources_are_serviced() {
    let board = SimBoard::leak(SimConfig::default());
    let dma = DmaManager::new(board.dma_engine());
    let irq = InterruptManager::new(board.interrupt_controller());
    let registry = DeviceManager::new(
        board.device_table(),
        Resources {
            dma: &dma,
            irq: &irq,
        },
    );
    let gpio = registry.get_gpio("gpio0").unwrap();
    for pin in [0, 1] {
        gpio.with_gpio(|g| g.enable_edge_detect(pin, EdgeDetect::Both))
            .unwrap()
            .unwrap();
        let _ = irq.connect(lines::GPIO, board.gpio.pin(pin).unwrap(), 8).unwrap();
    }
    irq.enable(lines::GPIO).unwrap();

    board.drive_pin(1, PinLevel::High);
    assert_eq!(irq.dispatch_pending(), 1);
    assert_eq!(board.gpio.pin(0).unwrap().serviced(), 0);
    assert_eq!(board.gpio.pin(1).unwrap().serviced(), 1);

    // A line raised with nothing pending behind it counts as spurious.
    board.intc.raise(lines::GPIO);
    assert_eq!(irq.dispatch_pending(), 0);
    assert_eq!(irq.statistics().spurious, 1);

    let source = board.gpio.pin(0).unwrap();
    assert_eq!(
        irq.connect(lines::GPIO, source, 1).err(),
        Some(HalError::InvalidState)
    );
    registry.put(gpio).unwrap();
}

#[test]
fn timer_interrupt_through_registry() {
    let board = SimBoard::leak(SimConfig::default());
    let dma = DmaManager::new(board.dma_engine());
    let irq = InterruptManager::new(board.interrupt_controller());
    let registry = DeviceManager::new(
        board.device_table(),
        Resources {
            dma: &dma,
            irq: &irq,
        },
    );
    let timer = registry.get_timer("timer0").unwrap();
    assert!(irq.is_enabled(lines::TIMER));

    timer.with_timer(|t| t.start()).unwrap().unwrap();
    timer.with_timer(|t| t.delay_us(999)).unwrap();
    assert_eq!(irq.dispatch_pending(), 0);
    timer.with_timer(|t| t.delay_us(1)).unwrap();
    assert_eq!(irq.dispatch_pending(), 1);
    assert_eq!(board.timer.serviced(), 1);
    assert_eq!(board.timer.expirations(), 1);

    registry.put(timer).unwrap();
    assert_eq!(irq.chain_len(lines::TIMER), 0);
    assert!(!irq.is_enabled(lines::TIMER));
}
