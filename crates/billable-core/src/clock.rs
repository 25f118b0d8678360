//! Duration clock and wall-clock sources
//!
//! `elapsed_at` is the single place where a timer's banked duration and its
//! running-since timestamp are combined into a "duration as of now" value.
//! It is recomputed on every display tick and never cached.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

use crate::models::{Timer, TimerState};

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Milliseconds between `since` and `now`, clamped at zero when the wall
/// clock has moved backwards.
pub fn millis_between(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    now.signed_duration_since(since)
        .num_milliseconds()
        .max(0) as u64
}

/// Whole seconds between `since` and `now`, clamped at zero.
pub fn seconds_between(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    millis_between(since, now) / 1000
}

/// Duration of `timer` as of `now`, in whole seconds.
///
/// Banked seconds plus, while running, the time since `running_since`
/// (including the sub-second remainder carried over from earlier cycles).
/// Never mutates the timer.
pub fn elapsed_at(timer: &Timer, now: DateTime<Utc>) -> u64 {
    match (timer.state, timer.running_since) {
        (TimerState::Running, Some(since)) => {
            let running = u64::from(timer.carry_millis) + millis_between(since, now);
            timer.accumulated_seconds + running / 1000
        }
        _ => timer.accumulated_seconds,
    }
}
