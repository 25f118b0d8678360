//! In-memory remote store
//!
//! Behaves like the HTTP backend (conflicts, not-found, full-snapshot
//! updates) and supports failure injection. Used when no remote URL is
//! configured and throughout the tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use billable_core::models::{
    NewTimeEntry, SessionSnapshot, SessionStatus, TimeEntry, TimeEntryFilter, TimerSnapshot,
    TimerState, WorkSession, WorkSessionFilter,
};

use super::{RemoteError, RemoteStore, Result};

/// Number of calls received per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create_entry: usize,
    pub update_entry: usize,
    pub delete_entry: usize,
    pub list_entries: usize,
    pub create_session: usize,
    pub update_session: usize,
    pub list_sessions: usize,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, TimeEntry>,
    sessions: HashMap<String, WorkSession>,
    fail_writes: bool,
    fail_reads: bool,
    write_delay: Option<Duration>,
    calls: CallCounts,
}

#[derive(Default)]
pub struct InMemoryRemoteStore {
    state: RwLock<State>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_fail_writes(&self, fail: bool) {
        self.state.write().await.fail_writes = fail;
    }

    pub async fn set_fail_reads(&self, fail: bool) {
        self.state.write().await.fail_reads = fail;
    }

    /// Delay every write by `delay` before it is applied.
    pub async fn set_write_delay(&self, delay: Option<Duration>) {
        self.state.write().await.write_delay = delay;
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.read().await.calls.clone()
    }

    pub async fn time_entries(&self) -> Vec<TimeEntry> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        entries
    }

    pub async fn time_entry_for_task(&self, task_id: &str) -> Option<TimeEntry> {
        let state = self.state.read().await;
        state
            .entries
            .values()
            .find(|e| e.task_id == task_id)
            .cloned()
    }

    pub async fn work_sessions(&self) -> Vec<WorkSession> {
        let state = self.state.read().await;
        let mut sessions: Vec<_> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        sessions
    }

    pub async fn insert_time_entry(&self, entry: TimeEntry) {
        let mut state = self.state.write().await;
        state.entries.insert(entry.id.clone(), entry);
    }

    pub async fn insert_work_session(&self, session: WorkSession) {
        let mut state = self.state.write().await;
        state.sessions.insert(session.id.clone(), session);
    }

    /// Applies the configured delay and failure mode for a write.
    async fn before_write(&self) -> Result<()> {
        let (delay, fail) = {
            let state = self.state.read().await;
            (state.write_delay, state.fail_writes)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(RemoteError::Unavailable("simulated write failure".to_string()));
        }
        Ok(())
    }

    async fn before_read(&self) -> Result<()> {
        if self.state.read().await.fail_reads {
            return Err(RemoteError::Unavailable("simulated read failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create_time_entry(&self, new: &NewTimeEntry) -> Result<String> {
        self.state.write().await.calls.create_entry += 1;
        self.before_write().await?;

        let mut state = self.state.write().await;
        if let Some(existing) = state.entries.values().find(|e| e.task_id == new.task_id) {
            return Err(RemoteError::Conflict {
                existing_id: existing.id.clone(),
            });
        }

        let id = Uuid::new_v4().to_string();
        state.entries.insert(
            id.clone(),
            TimeEntry {
                id: id.clone(),
                task_id: new.task_id.clone(),
                project_id: new.project_id.clone(),
                start_time: new.start_time,
                end_time: None,
                duration_seconds: 0,
                timer_status: TimerState::Running,
                updated_at: Some(new.start_time),
            },
        );

        Ok(id)
    }

    async fn update_time_entry(&self, entry_id: &str, snapshot: &TimerSnapshot) -> Result<()> {
        self.state.write().await.calls.update_entry += 1;
        self.before_write().await?;

        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| RemoteError::NotFound(entry_id.to_string()))?;
        entry.apply(snapshot);
        Ok(())
    }

    async fn delete_time_entry(&self, entry_id: &str) -> Result<()> {
        self.state.write().await.calls.delete_entry += 1;
        self.before_write().await?;

        let mut state = self.state.write().await;
        state
            .entries
            .remove(entry_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(entry_id.to_string()))
    }

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>> {
        self.state.write().await.calls.list_entries += 1;
        self.before_read().await?;

        let state = self.state.read().await;
        Ok(state
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect())
    }

    async fn create_work_session(&self, start_time: DateTime<Utc>) -> Result<String> {
        self.state.write().await.calls.create_session += 1;
        self.before_write().await?;

        let mut state = self.state.write().await;
        if let Some(active) = state.sessions.values().find(|s| s.is_active()) {
            return Err(RemoteError::Conflict {
                existing_id: active.id.clone(),
            });
        }

        let id = Uuid::new_v4().to_string();
        state.sessions.insert(
            id.clone(),
            WorkSession {
                id: id.clone(),
                start_time,
                end_time: None,
                duration_seconds: 0,
                status: SessionStatus::Active,
            },
        );

        Ok(id)
    }

    async fn update_work_session(
        &self,
        session_id: &str,
        snapshot: &SessionSnapshot,
    ) -> Result<()> {
        self.state.write().await.calls.update_session += 1;
        self.before_write().await?;

        let mut state = self.state.write().await;
        let session = state
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| RemoteError::NotFound(session_id.to_string()))?;
        session.apply(snapshot);
        Ok(())
    }

    async fn list_work_sessions(&self, filter: &WorkSessionFilter) -> Result<Vec<WorkSession>> {
        self.state.write().await.calls.list_sessions += 1;
        self.before_read().await?;

        let state = self.state.read().await;
        Ok(state
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect())
    }
}
