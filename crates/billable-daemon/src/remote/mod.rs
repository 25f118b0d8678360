//! Remote system of record
//!
//! The timer engine only talks to the remote store through [`RemoteStore`].
//! Updates always carry a full snapshot so they are idempotent.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use billable_core::models::{
    NewTimeEntry, SessionSnapshot, TimeEntry, TimeEntryFilter, TimerSnapshot, WorkSession,
    WorkSessionFilter,
};

pub use http::HttpRemoteStore;
pub use memory::InMemoryRemoteStore;

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("Entry already exists: {existing_id}")]
    Conflict { existing_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Remote API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Remote unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

impl RemoteError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RemoteError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create the entry for a task. Fails with [`RemoteError::Conflict`]
    /// carrying the existing id when the task already has one.
    async fn create_time_entry(&self, entry: &NewTimeEntry) -> Result<String>;

    async fn update_time_entry(&self, entry_id: &str, snapshot: &TimerSnapshot) -> Result<()>;

    async fn delete_time_entry(&self, entry_id: &str) -> Result<()>;

    async fn list_time_entries(&self, filter: &TimeEntryFilter) -> Result<Vec<TimeEntry>>;

    /// Create an active work session. Fails with [`RemoteError::Conflict`]
    /// when one is already active.
    async fn create_work_session(&self, start_time: DateTime<Utc>) -> Result<String>;

    async fn update_work_session(&self, session_id: &str, snapshot: &SessionSnapshot)
        -> Result<()>;

    async fn list_work_sessions(&self, filter: &WorkSessionFilter) -> Result<Vec<WorkSession>>;
}
