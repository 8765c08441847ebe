use alloc::rc::Rc;
use core::cell::RefCell;

use crate::clock::{MonotonicClock, RtcDevice};
use crate::error::Fault;

struct SimClock {
    /// True wall time.
    true_ms: u64,
    /// What the RTC reads, relative to true time.
    rtc_offset_secs: i64,
    mono_ms: u64,
}

/// Simulated passage of time shared by the RTC, the monotonic counter and
/// the delay provider.
#[derive(Clone)]
pub struct SimTime(Rc<RefCell<SimClock>>);

impl SimTime {
    pub fn new(start_secs: u32) -> Self {
        Self(Rc::new(RefCell::new(SimClock {
            true_ms: start_secs as u64 * 1000,
            rtc_offset_secs: 0,
            mono_ms: 0,
        })))
    }

    pub fn advance_ms(&self, ms: u64) {
        let mut clock = self.0.borrow_mut();
        clock.true_ms += ms;
        clock.mono_ms += ms;
    }

    pub fn advance_secs(&self, secs: u32) {
        self.advance_ms(secs as u64 * 1000);
    }

    pub fn now_secs(&self) -> u32 {
        (self.0.borrow().true_ms / 1000) as u32
    }

    pub fn now_ms(&self) -> u64 {
        self.0.borrow().true_ms
    }

    pub fn rtc_secs(&self) -> u32 {
        let clock = self.0.borrow();
        ((clock.true_ms / 1000) as i64 + clock.rtc_offset_secs).max(0) as u32
    }

    /// Make the RTC read `secs` from now on (as if it had been reset).
    pub fn set_rtc(&self, secs: u32) {
        let mut clock = self.0.borrow_mut();
        clock.rtc_offset_secs = secs as i64 - (clock.true_ms / 1000) as i64;
    }

    pub fn mono_ms(&self) -> u64 {
        self.0.borrow().mono_ms
    }

    /// The MCU lost power: its counter restarts from zero.
    pub fn reset_monotonic(&self) {
        self.0.borrow_mut().mono_ms = 0;
    }
}

#[derive(Default)]
struct RtcState {
    failing: bool,
    alarm_failing: bool,
    alarm: Option<u32>,
}

#[derive(Clone)]
pub struct MockRtc {
    time: SimTime,
    state: Rc<RefCell<RtcState>>,
}

impl MockRtc {
    pub fn new(time: SimTime) -> Self {
        Self {
            time,
            state: Rc::default(),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.state.borrow_mut().failing = failing;
    }

    pub fn set_alarm_failing(&self, failing: bool) {
        self.state.borrow_mut().alarm_failing = failing;
    }

    pub fn alarm(&self) -> Option<u32> {
        self.state.borrow().alarm
    }
}

impl RtcDevice for MockRtc {
    fn read_time(&mut self) -> Result<u32, Fault> {
        if self.state.borrow().failing {
            return Err(Fault::ClockUnavailable);
        }
        Ok(self.time.rtc_secs())
    }

    fn set_alarm(&mut self, at: u32) -> Result<(), Fault> {
        let mut state = self.state.borrow_mut();
        if state.alarm_failing || state.failing {
            return Err(Fault::BusTimeout);
        }
        state.alarm = Some(at);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MockMonotonic {
    time: SimTime,
}

impl MockMonotonic {
    pub fn new(time: SimTime) -> Self {
        Self { time }
    }
}

impl MonotonicClock for MockMonotonic {
    fn now_ms(&mut self) -> u64 {
        self.time.mono_ms()
    }
}
