//! Clock source: RTC time with a monotonic fallback
//!
//! The external RTC is authoritative. When it cannot be read, the time is
//! estimated from the last good reading plus the elapsed count of the
//! microcontroller's free-running timer, which keeps counting through deep
//! sleep. If that counter went backwards (the MCU lost power) the last
//! planned sleep duration stands in for the elapsed time.
//!
//! Timestamps handed out never go backwards, even when the RTC is reset or
//! the estimate ran fast.

pub mod ds3231;

use serde::{Deserialize, Serialize};

use crate::error::Fault;

pub use ds3231::Ds3231;

/// Battery-backed real-time clock with one wake alarm.
pub trait RtcDevice {
    /// Seconds since the Unix epoch.
    fn read_time(&mut self) -> Result<u32, Fault>;

    /// Program the wake alarm, superseding any pending one.
    fn set_alarm(&mut self, at: u32) -> Result<(), Fault>;
}

/// Free-running millisecond counter that survives deep sleep.
pub trait MonotonicClock {
    fn now_ms(&mut self) -> u64;
}

/// Reference point for estimating time without the RTC. Retained across
/// sleep.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClockAnchor {
    /// Last time obtained from the RTC (or re-anchored estimate).
    pub time: Option<u32>,
    /// Monotonic counter value when `time` was taken.
    pub mono_ms: u64,
    /// Duration of the last planned sleep.
    pub sleep_hint_secs: u32,
    /// Latest timestamp handed out.
    pub issued: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockReading {
    pub secs: u32,
    /// Derived from the monotonic fallback rather than the RTC.
    pub degraded: bool,
}

pub struct ClockSource<R, M> {
    rtc: R,
    mono: M,
    anchor: ClockAnchor,
}

impl<R, M> ClockSource<R, M>
where
    R: RtcDevice,
    M: MonotonicClock,
{
    pub fn new(rtc: R, mono: M) -> Self {
        Self {
            rtc,
            mono,
            anchor: ClockAnchor::default(),
        }
    }

    /// Restore the anchor saved by the previous cycle.
    pub fn restore(&mut self, anchor: ClockAnchor) {
        self.anchor = anchor;
    }

    pub fn anchor(&self) -> ClockAnchor {
        self.anchor
    }

    pub fn last_known(&self) -> Option<u32> {
        self.anchor.time
    }

    /// Remember how long the coming sleep is meant to last.
    pub fn note_sleep(&mut self, secs: u32) {
        self.anchor.sleep_hint_secs = secs;
    }

    pub fn monotonic_ms(&mut self) -> u64 {
        self.mono.now_ms()
    }

    /// Current time, from the RTC when it answers.
    pub fn now(&mut self) -> ClockReading {
        let mono_now = self.mono.now_ms();

        match self.rtc.read_time() {
            Ok(secs) => {
                if secs < self.anchor.issued {
                    log::warn!(
                        "RTC reads {} but {} was already issued, holding",
                        secs,
                        self.anchor.issued
                    );
                }
                let secs = self.issue(secs);
                self.anchor.time = Some(secs);
                self.anchor.mono_ms = mono_now;
                ClockReading {
                    secs,
                    degraded: false,
                }
            }
            Err(e) => {
                log::warn!("RTC unavailable ({}), using monotonic estimate", e);
                if mono_now < self.anchor.mono_ms {
                    // Counter restarted: fall back on the planned sleep and
                    // re-anchor so later estimates count from here.
                    let secs = self.estimate_at(mono_now);
                    self.anchor.time = Some(secs);
                    self.anchor.mono_ms = mono_now;
                }
                let secs = self.estimate_at(mono_now);
                ClockReading {
                    secs: self.issue(secs),
                    degraded: true,
                }
            }
        }
    }

    /// Estimate the current time without touching the RTC bus.
    pub fn estimate_now(&mut self) -> u32 {
        let mono_now = self.mono.now_ms();
        self.estimate_at(mono_now).max(self.anchor.issued)
    }

    pub fn set_alarm(&mut self, at: u32) -> Result<(), Fault> {
        self.rtc.set_alarm(at)
    }

    pub fn rtc_mut(&mut self) -> &mut R {
        &mut self.rtc
    }

    pub fn monotonic_mut(&mut self) -> &mut M {
        &mut self.mono
    }

    fn estimate_at(&self, mono_now: u64) -> u32 {
        match self.anchor.time {
            Some(time) if mono_now >= self.anchor.mono_ms => {
                let elapsed = (mono_now - self.anchor.mono_ms) / 1000;
                time.saturating_add(u32::try_from(elapsed).unwrap_or(u32::MAX))
            }
            Some(time) => time.saturating_add(self.anchor.sleep_hint_secs),
            // Never synchronized: seconds since the counter started.
            None => u32::try_from(mono_now / 1000).unwrap_or(u32::MAX),
        }
    }

    fn issue(&mut self, secs: u32) -> u32 {
        let secs = secs.max(self.anchor.issued);
        self.anchor.issued = secs;
        secs
    }
}
