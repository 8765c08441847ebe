use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorKind, ErrorType, InputPin, OutputPin};

use super::SimTime;

#[derive(Default)]
struct PinState {
    high: bool,
    rising_edges: u32,
    failing: bool,
}

/// Output pin that remembers its level and counts rising edges.
#[derive(Clone, Default)]
pub struct RecordingPin(Rc<RefCell<PinState>>);

impl RecordingPin {
    pub fn is_high(&self) -> bool {
        self.0.borrow().high
    }

    pub fn rising_edges(&self) -> u32 {
        self.0.borrow().rising_edges
    }

    /// A failing pin keeps its level and returns errors.
    pub fn set_failing(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }

    fn drive(&mut self, high: bool) -> Result<(), ErrorKind> {
        let mut pin = self.0.borrow_mut();
        if pin.failing {
            return Err(ErrorKind::Other);
        }
        if high && !pin.high {
            pin.rising_edges += 1;
        }
        pin.high = high;
        Ok(())
    }
}

impl ErrorType for RecordingPin {
    type Error = ErrorKind;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true)
    }
}

#[derive(Default)]
struct ToggleState {
    high: bool,
    failing: bool,
}

/// Manual override switch.
#[derive(Clone, Default)]
pub struct MockToggle(Rc<RefCell<ToggleState>>);

impl MockToggle {
    pub fn set_level(&self, high: bool) {
        self.0.borrow_mut().high = high;
    }

    pub fn set_failing(&self, failing: bool) {
        self.0.borrow_mut().failing = failing;
    }
}

impl ErrorType for MockToggle {
    type Error = ErrorKind;
}

impl InputPin for MockToggle {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        let pin = self.0.borrow();
        if pin.failing {
            Err(ErrorKind::Other)
        } else {
            Ok(pin.high)
        }
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Delay that returns immediately and adds up what was asked of it.
#[derive(Clone, Default)]
pub struct NoopDelay {
    total_ns: Rc<Cell<u64>>,
}

impl NoopDelay {
    pub fn total_ms(&self) -> u64 {
        self.total_ns.get() / 1_000_000
    }
}

impl DelayNs for NoopDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns.set(self.total_ns.get() + ns as u64);
    }

    fn delay_us(&mut self, us: u32) {
        self.total_ns.set(self.total_ns.get() + us as u64 * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.total_ns.set(self.total_ns.get() + ms as u64 * 1_000_000);
    }
}

/// Delay that moves simulated time forward, so busy-waits show up in the
/// cycle duration and in clock estimates.
#[derive(Clone)]
pub struct SimDelay {
    time: SimTime,
    residual_ns: Rc<Cell<u64>>,
}

impl SimDelay {
    pub fn new(time: SimTime) -> Self {
        Self {
            time,
            residual_ns: Rc::default(),
        }
    }

    fn advance_ns(&mut self, ns: u64) {
        let total = self.residual_ns.get() + ns;
        self.time.advance_ms(total / 1_000_000);
        self.residual_ns.set(total % 1_000_000);
    }
}

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.advance_ns(ns as u64);
    }

    fn delay_us(&mut self, us: u32) {
        self.advance_ns(us as u64 * 1_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.advance_ns(ms as u64 * 1_000_000);
    }
}
