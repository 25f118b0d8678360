use billable_core::models::PeriodStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sync::{HeartbeatReport, SyncHealth};
use crate::timer::TimerEvent;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum DaemonEvent {
    Timer(TimerEvent),
    Session(SessionEvent),
    Sync(SyncEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    pub event_type: SessionEventType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventType {
    Started {
        start_time: DateTime<Utc>,
    },
    Ended {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        duration_seconds: u64,
    },
    StatsUpdated {
        stats: PeriodStats,
    },
}

impl SessionEvent {
    pub fn started(start_time: DateTime<Utc>) -> Self {
        Self {
            event_type: SessionEventType::Started { start_time },
            timestamp: start_time,
        }
    }

    pub fn ended(start_time: DateTime<Utc>, end_time: DateTime<Utc>, duration_seconds: u64) -> Self {
        Self {
            event_type: SessionEventType::Ended {
                start_time,
                end_time,
                duration_seconds,
            },
            timestamp: end_time,
        }
    }

    pub fn stats_updated(stats: PeriodStats, now: DateTime<Utc>) -> Self {
        Self {
            event_type: SessionEventType::StatsUpdated { stats },
            timestamp: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub event_type: SyncEventType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEventType {
    /// A remote write failed; the local state stands and is retried later.
    WriteFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
        operation: String,
        error: String,
    },
    HealthChanged {
        health: SyncHealth,
    },
    HeartbeatCompleted {
        report: HeartbeatReport,
    },
}

impl SyncEvent {
    pub fn write_failed(
        task_id: Option<&str>,
        operation: &str,
        error: impl ToString,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            event_type: SyncEventType::WriteFailed {
                task_id: task_id.map(str::to_string),
                operation: operation.to_string(),
                error: error.to_string(),
            },
            timestamp: now,
        }
    }

    pub fn health_changed(health: SyncHealth, now: DateTime<Utc>) -> Self {
        Self {
            event_type: SyncEventType::HealthChanged { health },
            timestamp: now,
        }
    }

    pub fn heartbeat_completed(report: HeartbeatReport, now: DateTime<Utc>) -> Self {
        Self {
            event_type: SyncEventType::HeartbeatCompleted { report },
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_event_serialization() {
        let now = Utc::now();
        let event = DaemonEvent::Session(SessionEvent::ended(now, now, 90));
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["category"], "session");
        assert_eq!(json["event_type"]["type"], "ended");
        assert_eq!(json["event_type"]["duration_seconds"], 90);
    }

    #[test]
    fn test_write_failed_serialization() {
        let event = SyncEvent::write_failed(Some("task-a"), "update", "timeout", Utc::now());
        let json = serde_json::to_string(&event).unwrap();
        let deserialized: SyncEvent = serde_json::from_str(&json).unwrap();

        match deserialized.event_type {
            SyncEventType::WriteFailed {
                task_id,
                operation,
                error,
            } => {
                assert_eq!(task_id.as_deref(), Some("task-a"));
                assert_eq!(operation, "update");
                assert_eq!(error, "timeout");
            }
            other => panic!("Expected WriteFailed, got {:?}", other),
        }
    }
}
