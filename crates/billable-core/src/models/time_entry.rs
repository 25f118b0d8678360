//! Remote time entry data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TimerState;

/// Row in the remote system of record, one per timed task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeEntry {
    pub id: String,
    pub task_id: String,
    pub project_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Authoritative persisted duration.
    pub duration_seconds: u64,
    pub timer_status: TimerState,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Payload for creating a time entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewTimeEntry {
    pub task_id: String,
    pub project_id: String,
    pub start_time: DateTime<Utc>,
}

/// Complete timer state sent on every remote update.
///
/// Updates always carry the whole snapshot, so applying them twice or out of
/// order leaves the row self-consistent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimerSnapshot {
    pub duration_seconds: u64,
    pub status: TimerState,
    pub end_time: Option<DateTime<Utc>>,
    pub captured_at: DateTime<Utc>,
    pub revision: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeEntryFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<TimerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_before: Option<DateTime<Utc>>,
}

impl TimeEntry {
    /// Apply a snapshot the way the remote store does.
    pub fn apply(&mut self, snapshot: &TimerSnapshot) {
        self.duration_seconds = snapshot.duration_seconds;
        self.timer_status = snapshot.status;
        self.end_time = snapshot.end_time;
        self.updated_at = Some(snapshot.captured_at);
    }

    pub fn is_running(&self) -> bool {
        self.timer_status == TimerState::Running
    }
}

impl TimeEntryFilter {
    pub fn for_task(task_id: impl Into<String>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &TimeEntry) -> bool {
        if let Some(ref task_id) = self.task_id {
            if &entry.task_id != task_id {
                return false;
            }
        }

        if let Some(status) = self.status {
            if entry.timer_status != status {
                return false;
            }
        }

        if let Some(start) = self.start_after {
            if entry.start_time < start {
                return false;
            }
        }

        if let Some(end) = self.start_before {
            if entry.start_time >= end {
                return false;
            }
        }

        true
    }
}

/// Format seconds as HH:MM:SS.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let seconds = seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
