//! Timer events

use billable_core::models::{Timer, TimerState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event emitted by the timer system
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerEvent {
    pub event_type: TimerEventType,
    pub task_id: String,
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Types of timer events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimerEventType {
    /// Timer created for a task that had none
    Started,
    /// Timer paused
    Paused { elapsed_seconds: u64 },
    /// Paused or stopped timer running again
    Resumed { elapsed_seconds: u64 },
    /// Timer stopped with its final duration
    Stopped { duration_seconds: u64 },
    /// Timer removed, task is idle again
    Reset,
    /// Display refresh while running
    Tick { elapsed_seconds: u64 },
    /// Timer rebuilt from the remote store on startup
    Rehydrated {
        state: TimerState,
        elapsed_seconds: u64,
    },
}

impl TimerEvent {
    pub fn new(event_type: TimerEventType, timer: &Timer, timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type,
            task_id: timer.task_id.clone(),
            project_id: timer.project_id.clone(),
            timestamp,
        }
    }

    pub fn started(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self::new(TimerEventType::Started, timer, now)
    }

    pub fn paused(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self::new(
            TimerEventType::Paused {
                elapsed_seconds: timer.elapsed_at(now),
            },
            timer,
            now,
        )
    }

    pub fn resumed(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self::new(
            TimerEventType::Resumed {
                elapsed_seconds: timer.elapsed_at(now),
            },
            timer,
            now,
        )
    }

    pub fn stopped(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self::new(
            TimerEventType::Stopped {
                duration_seconds: timer.elapsed_at(now),
            },
            timer,
            now,
        )
    }

    pub fn reset(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self::new(TimerEventType::Reset, timer, now)
    }

    pub fn tick(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self::new(
            TimerEventType::Tick {
                elapsed_seconds: timer.elapsed_at(now),
            },
            timer,
            now,
        )
    }

    pub fn rehydrated(timer: &Timer, now: DateTime<Utc>) -> Self {
        Self::new(
            TimerEventType::Rehydrated {
                state: timer.state,
                elapsed_seconds: timer.elapsed_at(now),
            },
            timer,
            now,
        )
    }
}
