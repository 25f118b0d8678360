//! Work session data model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Contiguous span during which at least one timer was running.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkSession {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// Full session state sent on every remote update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSnapshot {
    pub duration_seconds: u64,
    pub status: SessionStatus,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WorkSessionFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<SessionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_after: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_before: Option<DateTime<Utc>>,
}

impl WorkSession {
    pub fn apply(&mut self, snapshot: &SessionSnapshot) {
        self.duration_seconds = snapshot.duration_seconds;
        self.status = snapshot.status;
        self.end_time = snapshot.end_time;
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

impl SessionSnapshot {
    pub fn active(duration_seconds: u64) -> Self {
        Self {
            duration_seconds,
            status: SessionStatus::Active,
            end_time: None,
        }
    }

    pub fn completed(duration_seconds: u64, end_time: DateTime<Utc>) -> Self {
        Self {
            duration_seconds,
            status: SessionStatus::Completed,
            end_time: Some(end_time),
        }
    }
}

impl WorkSessionFilter {
    pub fn active() -> Self {
        Self {
            status: Some(SessionStatus::Active),
            ..Self::default()
        }
    }

    pub fn completed_since(start: DateTime<Utc>) -> Self {
        Self {
            status: Some(SessionStatus::Completed),
            start_after: Some(start),
            start_before: None,
        }
    }

    pub fn matches(&self, session: &WorkSession) -> bool {
        if let Some(status) = self.status {
            if session.status != status {
                return false;
            }
        }

        if let Some(start) = self.start_after {
            if session.start_time < start {
                return false;
            }
        }

        if let Some(end) = self.start_before {
            if session.start_time >= end {
                return false;
            }
        }

        true
    }
}
