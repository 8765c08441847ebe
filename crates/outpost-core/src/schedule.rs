//! Wake scheduling
//!
//! Wakes follow a fixed cadence anchored to the previously scheduled time,
//! not to when the cycle happened to finish, so a slow cycle does not drift
//! the grid. Slots missed entirely are skipped rather than run back to back.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    /// RTC alarm programmed for `wake_at`.
    Alarm,
    /// MCU timer for `duration_secs`; used when the alarm could not be set.
    Timer,
}

/// How and when the device sleeps after a cycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPlan {
    pub wake_at: u32,
    pub duration_secs: u32,
    pub wake_source: WakeSource,
}

/// Next wake on the cadence grid.
///
/// `prev` is the wake the previous cycle scheduled. Without one, or when it
/// lies implausibly far ahead of `now` (the clock was corrected), the grid
/// restarts at `now`. A wake well before `prev` (a reset or a manual wake)
/// keeps `prev` as the next slot.
pub fn next_wake(prev: Option<u32>, now: u32, interval_secs: u32) -> u32 {
    let interval = interval_secs.max(1);
    let restart = now.saturating_add(interval);

    let Some(prev) = prev else {
        return restart;
    };
    if prev > restart {
        return restart;
    }
    if prev > now.saturating_add(interval / 2) {
        return prev;
    }

    let candidate = prev.saturating_add(interval);
    if candidate > now {
        return candidate;
    }

    // Overrun: first slot strictly after now.
    let missed = (now - candidate) / interval + 1;
    candidate.saturating_add(missed.saturating_mul(interval))
}

/// Wake after a low-battery cycle: the interval stretched by the backoff
/// multiplier.
pub fn backoff_wake(now: u32, interval_secs: u32, multiplier: u32) -> (u32, u32) {
    let duration = interval_secs.saturating_mul(multiplier.max(1));
    (now.saturating_add(duration), duration)
}

/// Seconds to sleep from `now` until `wake_at`, at least one.
pub fn sleep_duration(wake_at: u32, now: u32) -> u32 {
    wake_at.saturating_sub(now).max(1)
}
