//! Remote syncer - the single writer for time entries
//!
//! Every remote time-entry write goes through one worker task fed by a FIFO
//! channel. Writes always read the timer's current state when they are
//! sent, so whichever write lands last reflects the latest local transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use billable_core::models::{NewTimeEntry, TimeEntryFilter};
use billable_core::Clock;

use crate::event_manager::EventManager;
use crate::events::SyncEvent;
use crate::remote::{RemoteError, RemoteStore};
use crate::timer::LocalTimerStore;

/// Sync error
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("No timer for task {0}")]
    TimerMissing(String),

    #[error("Sync worker is not running")]
    WorkerStopped,
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncHealth {
    Healthy,
    /// Remote writes are failing; local state keeps working and the
    /// heartbeat keeps retrying.
    Degraded {
        since: DateTime<Utc>,
        last_error: String,
    },
}

impl SyncHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, SyncHealth::Healthy)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HeartbeatReport {
    pub pushed: usize,
    pub created: usize,
    pub failed: usize,
    pub deletes_retried: usize,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub health: SyncHealth,
    pub dirty_timers: usize,
    pub pending_deletes: usize,
    pub heartbeat_in_flight: bool,
    pub last_heartbeat: Option<HeartbeatReport>,
}

#[derive(Debug, Clone, PartialEq)]
struct PendingDelete {
    task_id: String,
    entry_id: String,
}

enum SyncCommand {
    Create {
        task_id: String,
        reply: oneshot::Sender<Result<String>>,
    },
    Push {
        task_id: String,
        revision: u64,
    },
    Delete {
        task_id: String,
        entry_id: String,
    },
    Heartbeat {
        reply: oneshot::Sender<HeartbeatReport>,
    },
    Settle {
        reply: oneshot::Sender<()>,
    },
}

/// Outcome of making sure a timer has a remote entry.
enum Ensured {
    Existing(String),
    Created { id: String, revision: u64 },
    Adopted(String),
}

struct SyncShared {
    health: RwLock<SyncHealth>,
    pending_deletes: Mutex<Vec<PendingDelete>>,
    last_heartbeat: RwLock<Option<HeartbeatReport>>,
    heartbeat_in_flight: AtomicBool,
    events: Arc<EventManager>,
    clock: Arc<dyn Clock>,
}

impl SyncShared {
    async fn record_failure(
        &self,
        task_id: Option<&str>,
        operation: &str,
        error: &(dyn Display + Sync),
    ) {
        tracing::warn!(
            "Remote {} failed for {}: {}",
            operation,
            task_id.unwrap_or("-"),
            error
        );

        let now = self.clock.now();
        self.events
            .emit_sync(SyncEvent::write_failed(task_id, operation, error, now));

        let mut health = self.health.write().await;
        let since = match *health {
            SyncHealth::Degraded { since, .. } => since,
            SyncHealth::Healthy => now,
        };
        let was_healthy = health.is_healthy();
        *health = SyncHealth::Degraded {
            since,
            last_error: error.to_string(),
        };

        if was_healthy {
            self.events
                .emit_sync(SyncEvent::health_changed(health.clone(), now));
        }
    }

    async fn set_healthy(&self) {
        let mut health = self.health.write().await;
        if !health.is_healthy() {
            tracing::info!("Remote sync recovered");
            *health = SyncHealth::Healthy;
            self.events
                .emit_sync(SyncEvent::health_changed(SyncHealth::Healthy, self.clock.now()));
        }
    }

    async fn add_pending_delete(&self, task_id: &str, entry_id: &str) {
        let mut pending = self.pending_deletes.lock().await;
        if !pending.iter().any(|p| p.entry_id == entry_id) {
            pending.push(PendingDelete {
                task_id: task_id.to_string(),
                entry_id: entry_id.to_string(),
            });
        }
    }

    async fn take_pending_delete(&self, entry_id: &str) -> bool {
        let mut pending = self.pending_deletes.lock().await;
        let before = pending.len();
        pending.retain(|p| p.entry_id != entry_id);
        pending.len() != before
    }
}

/// Handle to the sync worker.
pub struct RemoteSyncer {
    tx: mpsc::UnboundedSender<SyncCommand>,
    shared: Arc<SyncShared>,
    store: Arc<LocalTimerStore>,
    token: CancellationToken,
}

impl RemoteSyncer {
    pub fn spawn(
        store: Arc<LocalTimerStore>,
        remote: Arc<dyn RemoteStore>,
        events: Arc<EventManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let shared = Arc::new(SyncShared {
            health: RwLock::new(SyncHealth::Healthy),
            pending_deletes: Mutex::new(Vec::new()),
            last_heartbeat: RwLock::new(None),
            heartbeat_in_flight: AtomicBool::new(false),
            events,
            clock,
        });

        let worker = SyncWorker {
            store: store.clone(),
            remote,
            shared: shared.clone(),
        };
        tokio::spawn(worker.run(rx, token.clone()));

        Self {
            tx,
            shared,
            store,
            token,
        }
    }

    /// Create the remote entry for a freshly started timer and wait for the
    /// outcome. An existing entry for the task is adopted and resumed.
    pub async fn create(&self, task_id: &str) -> Result<String> {
        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::Create {
            task_id: task_id.to_string(),
            reply,
        })?;
        rx.await.map_err(|_| SyncError::WorkerStopped)?
    }

    /// Queue a full-snapshot write for the task's timer.
    pub fn push(&self, task_id: &str, revision: u64) {
        if let Err(e) = self.send(SyncCommand::Push {
            task_id: task_id.to_string(),
            revision,
        }) {
            tracing::warn!("Dropping push for {}: {}", task_id, e);
        }
    }

    /// Queue deletion of a reset timer's entry.
    pub fn delete(&self, task_id: &str, entry_id: &str) {
        if let Err(e) = self.send(SyncCommand::Delete {
            task_id: task_id.to_string(),
            entry_id: entry_id.to_string(),
        }) {
            tracing::warn!("Dropping delete of {}: {}", entry_id, e);
        }
    }

    /// Run one heartbeat cycle. Returns None when a cycle is already in
    /// flight and this one was skipped.
    pub async fn heartbeat(&self) -> Option<HeartbeatReport> {
        if self
            .shared
            .heartbeat_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Heartbeat still in flight, skipping cycle");
            return None;
        }
        let _in_flight = InFlight(&self.shared.heartbeat_in_flight);

        let (reply, rx) = oneshot::channel();
        self.send(SyncCommand::Heartbeat { reply }).ok()?;
        rx.await.ok()
    }

    /// Wait until every write queued so far has been attempted.
    pub async fn settle(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(SyncCommand::Settle { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    /// Record a failure that happened outside the worker, such as a failed
    /// rehydration read.
    pub async fn report_failure(&self, operation: &str, error: &(dyn Display + Sync)) {
        self.shared.record_failure(None, operation, error).await;
    }

    pub async fn health(&self) -> SyncHealth {
        self.shared.health.read().await.clone()
    }

    pub async fn pending_delete_count(&self) -> usize {
        self.shared.pending_deletes.lock().await.len()
    }

    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            health: self.health().await,
            dirty_timers: self.store.dirty_count().await,
            pending_deletes: self.pending_delete_count().await,
            heartbeat_in_flight: self.shared.heartbeat_in_flight.load(Ordering::Acquire),
            last_heartbeat: self.shared.last_heartbeat.read().await.clone(),
        }
    }

    /// Stop the worker. Queued writes that have not started are dropped.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    fn send(&self, command: SyncCommand) -> Result<()> {
        self.tx.send(command).map_err(|_| SyncError::WorkerStopped)
    }
}

impl Drop for RemoteSyncer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct SyncWorker {
    store: Arc<LocalTimerStore>,
    remote: Arc<dyn RemoteStore>,
    shared: Arc<SyncShared>,
}

impl SyncWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<SyncCommand>, token: CancellationToken) {
        tracing::debug!("Sync worker started");
        loop {
            let command = tokio::select! {
                _ = token.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }
        tracing::debug!("Sync worker stopped");
    }

    async fn handle(&self, command: SyncCommand) {
        match command {
            SyncCommand::Create { task_id, reply } => {
                let result = self.create(&task_id).await;
                let _ = reply.send(result);
            }
            SyncCommand::Push { task_id, revision } => {
                self.push(&task_id, Some(revision)).await;
            }
            SyncCommand::Delete { task_id, entry_id } => {
                self.delete(&task_id, &entry_id).await;
            }
            SyncCommand::Heartbeat { reply } => {
                let report = self.heartbeat().await;
                let _ = reply.send(report);
            }
            SyncCommand::Settle { reply } => {
                let _ = reply.send(());
            }
        }
    }

    async fn create(&self, task_id: &str) -> Result<String> {
        match self.ensure_created(task_id).await {
            Ok(Ensured::Created { id, revision }) => {
                self.store.mark_synced(task_id, revision).await;
                self.maybe_recover().await;
                Ok(id)
            }
            Ok(Ensured::Existing(id)) | Ok(Ensured::Adopted(id)) => {
                self.push(task_id, None).await;
                Ok(id)
            }
            Err(e) => {
                if !matches!(e, SyncError::TimerMissing(_)) {
                    self.shared
                        .record_failure(Some(task_id), "create", &e)
                        .await;
                }
                Err(e)
            }
        }
    }

    /// Make sure the task's timer has a remote entry, creating or adopting
    /// one as needed.
    async fn ensure_created(&self, task_id: &str) -> Result<Ensured> {
        let timer = self
            .store
            .get(task_id)
            .await
            .ok_or_else(|| SyncError::TimerMissing(task_id.to_string()))?;

        if let Some(id) = timer.id {
            return Ok(Ensured::Existing(id));
        }

        let new_entry = NewTimeEntry {
            task_id: timer.task_id.clone(),
            project_id: timer.project_id.clone(),
            start_time: timer.started_at,
        };

        let mut cleared_stale = false;
        loop {
            match self.remote.create_time_entry(&new_entry).await {
                Ok(id) => {
                    if self
                        .store
                        .attach_remote_id(task_id, timer.started_at, &id)
                        .await
                    {
                        tracing::info!("Created time entry {} for task {}", id, task_id);
                        return Ok(Ensured::Created {
                            id,
                            revision: timer.revision,
                        });
                    }

                    tracing::info!(
                        "Timer for task {} was reset during create, removing entry {}",
                        task_id,
                        id
                    );
                    self.delete(task_id, &id).await;
                    return Err(SyncError::TimerMissing(task_id.to_string()));
                }
                Err(RemoteError::Conflict { existing_id }) => {
                    // An entry left behind by a reset is removed so the task
                    // starts over from zero
                    if !cleared_stale && self.shared.take_pending_delete(&existing_id).await {
                        match self.remote.delete_time_entry(&existing_id).await {
                            Ok(()) | Err(RemoteError::NotFound(_)) => {
                                cleared_stale = true;
                                continue;
                            }
                            Err(e) => {
                                self.shared.add_pending_delete(task_id, &existing_id).await;
                                return Err(e.into());
                            }
                        }
                    }

                    return self.adopt(task_id, &existing_id).await.map(Ensured::Adopted);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn adopt(&self, task_id: &str, entry_id: &str) -> Result<String> {
        let banked = match self
            .remote
            .list_time_entries(&TimeEntryFilter::for_task(task_id))
            .await
        {
            Ok(entries) => entries
                .into_iter()
                .find(|e| e.id == entry_id)
                .map(|e| e.duration_seconds),
            Err(e) => {
                tracing::warn!(
                    "Could not read existing entry {} for task {}: {}",
                    entry_id,
                    task_id,
                    e
                );
                None
            }
        };

        self.store
            .adopt_entry(task_id, entry_id, banked)
            .await
            .ok_or_else(|| SyncError::TimerMissing(task_id.to_string()))?;

        tracing::info!(
            "Task {} already had entry {}, resuming it ({}s banked)",
            task_id,
            entry_id,
            banked.unwrap_or(0)
        );
        Ok(entry_id.to_string())
    }

    /// Write the timer's current snapshot. Returns false on failure.
    async fn push(&self, task_id: &str, revision: Option<u64>) -> bool {
        let Some(timer) = self.store.get(task_id).await else {
            tracing::debug!("Timer for task {} is gone, nothing to push", task_id);
            return true;
        };

        if let Some(revision) = revision {
            if timer.revision > revision {
                tracing::debug!(
                    "Skipping superseded push for task {} (revision {} < {})",
                    task_id,
                    revision,
                    timer.revision
                );
                return true;
            }
        }

        let entry_id = match self.ensure_created(task_id).await {
            Ok(Ensured::Existing(id)) | Ok(Ensured::Adopted(id)) => id,
            Ok(Ensured::Created { id, .. }) => id,
            Err(SyncError::TimerMissing(_)) => return true,
            Err(e) => {
                self.shared
                    .record_failure(Some(task_id), "create", &e)
                    .await;
                return false;
            }
        };

        let Some((_, snapshot)) = self.store.snapshot(task_id).await else {
            return true;
        };

        match self.remote.update_time_entry(&entry_id, &snapshot).await {
            Ok(()) => {
                self.store.mark_synced(task_id, snapshot.revision).await;
                self.maybe_recover().await;
                true
            }
            Err(e) => {
                if e.is_not_found() {
                    // Recreated on the next heartbeat
                    self.store.detach_remote_id(task_id, &entry_id).await;
                }
                self.shared
                    .record_failure(Some(task_id), "update", &e)
                    .await;
                false
            }
        }
    }

    async fn delete(&self, task_id: &str, entry_id: &str) {
        match self.remote.delete_time_entry(entry_id).await {
            Ok(()) | Err(RemoteError::NotFound(_)) => {
                tracing::info!("Deleted time entry {} for task {}", entry_id, task_id);
                self.maybe_recover().await;
            }
            Err(e) => {
                self.shared.add_pending_delete(task_id, entry_id).await;
                self.shared
                    .record_failure(Some(task_id), "delete", &e)
                    .await;
            }
        }
    }

    async fn heartbeat(&self) -> HeartbeatReport {
        let mut report = HeartbeatReport::default();

        let pending = std::mem::take(&mut *self.shared.pending_deletes.lock().await);
        for delete in pending {
            report.deletes_retried += 1;
            match self.remote.delete_time_entry(&delete.entry_id).await {
                Ok(()) | Err(RemoteError::NotFound(_)) => {}
                Err(e) => {
                    report.failed += 1;
                    self.shared
                        .add_pending_delete(&delete.task_id, &delete.entry_id)
                        .await;
                    self.shared
                        .record_failure(Some(&delete.task_id), "delete", &e)
                        .await;
                }
            }
        }

        let timers = self.store.list().await;
        for timer in timers.into_iter().filter(|t| t.is_live() || t.dirty) {
            let had_id = timer.id.is_some();
            if self.push(&timer.task_id, None).await {
                report.pushed += 1;
                if !had_id {
                    report.created += 1;
                }
            } else {
                report.failed += 1;
            }
        }

        let now = self.shared.clock.now();
        report.completed_at = Some(now);
        tracing::debug!(
            "Heartbeat: {} pushed, {} created, {} failed, {} deletes retried",
            report.pushed,
            report.created,
            report.failed,
            report.deletes_retried
        );

        if report.failed == 0 {
            self.shared.set_healthy().await;
        }

        *self.shared.last_heartbeat.write().await = Some(report.clone());
        self.shared
            .events
            .emit_sync(SyncEvent::heartbeat_completed(report.clone(), now));
        report
    }

    /// Restore health once nothing is left to retry.
    async fn maybe_recover(&self) {
        if self.shared.health.read().await.is_healthy() {
            return;
        }
        if self.store.dirty_count().await == 0
            && self.shared.pending_deletes.lock().await.is_empty()
        {
            self.shared.set_healthy().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DaemonEvent, SyncEventType};
    use crate::remote::InMemoryRemoteStore;
    use billable_core::models::{TimeEntry, TimerState};
    use billable_core::ManualClock;
    use std::time::Duration;

    struct Harness {
        clock: Arc<ManualClock>,
        store: Arc<LocalTimerStore>,
        remote: Arc<InMemoryRemoteStore>,
        events: Arc<EventManager>,
        syncer: RemoteSyncer,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let store = Arc::new(LocalTimerStore::in_memory(clock.clone()));
        let remote = Arc::new(InMemoryRemoteStore::new());
        let events = Arc::new(EventManager::new());
        let syncer = RemoteSyncer::spawn(
            store.clone(),
            remote.clone(),
            events.clone(),
            clock.clone(),
        );

        Harness {
            clock,
            store,
            remote,
            events,
            syncer,
        }
    }

    #[tokio::test]
    async fn test_create_on_start() {
        let h = harness();
        h.store.start("task-a", "proj-1").await.unwrap();

        let id = h.syncer.create("task-a").await.unwrap();

        let entry = h.remote.time_entry_for_task("task-a").await.unwrap();
        assert_eq!(entry.id, id);
        assert_eq!(entry.timer_status, TimerState::Running);

        let timer = h.store.get("task-a").await.unwrap();
        assert_eq!(timer.id.as_deref(), Some(id.as_str()));
        assert!(!timer.dirty);
    }

    #[tokio::test]
    async fn test_conflict_resumes_existing_entry() {
        let h = harness();
        let now = h.clock.now();
        h.remote
            .insert_time_entry(TimeEntry {
                id: "existing".to_string(),
                task_id: "task-a".to_string(),
                project_id: "proj-1".to_string(),
                start_time: now,
                end_time: None,
                duration_seconds: 120,
                timer_status: TimerState::Paused,
                updated_at: Some(now),
            })
            .await;

        h.store.start("task-a", "proj-1").await.unwrap();
        let id = h.syncer.create("task-a").await.unwrap();
        assert_eq!(id, "existing");

        h.clock.advance_secs(5);
        let timer = h.store.get("task-a").await.unwrap();
        assert_eq!(timer.elapsed_at(h.clock.now()), 125);

        let entries = h.remote.time_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timer_status, TimerState::Running);
        assert_eq!(entries[0].duration_seconds, 120);
    }

    #[tokio::test]
    async fn test_start_twice_never_duplicates_entry() {
        let h = harness();

        h.store.start("task-a", "proj-1").await.unwrap();
        h.syncer.create("task-a").await.unwrap();
        h.clock.advance_secs(3);
        let paused = h.store.pause("task-a").await.unwrap();
        h.syncer.push("task-a", paused.revision);

        let resumed = h.store.start("task-a", "proj-1").await.unwrap().into_timer();
        h.syncer.push("task-a", resumed.revision);
        h.syncer.settle().await;

        assert_eq!(h.remote.time_entries().await.len(), 1);
        assert_eq!(h.remote.calls().await.create_entry, 1);
    }

    #[tokio::test]
    async fn test_superseded_push_is_skipped() {
        let h = harness();

        let started = h.store.start("task-a", "proj-1").await.unwrap().into_timer();
        h.syncer.create("task-a").await.unwrap();
        h.clock.advance_secs(10);
        let paused = h.store.pause("task-a").await.unwrap();

        h.syncer.push("task-a", started.revision);
        h.syncer.push("task-a", paused.revision);
        h.syncer.settle().await;

        assert_eq!(h.remote.calls().await.update_entry, 1);
        let entry = h.remote.time_entry_for_task("task-a").await.unwrap();
        assert_eq!(entry.timer_status, TimerState::Paused);
        assert_eq!(entry.duration_seconds, 10);
    }

    #[tokio::test]
    async fn test_write_failure_degrades_then_heartbeat_recovers() {
        let h = harness();
        let mut rx = h.events.subscribe();
        h.remote.set_fail_writes(true).await;

        h.store.start("task-a", "proj-1").await.unwrap();
        assert!(h.syncer.create("task-a").await.is_err());
        assert!(!h.syncer.health().await.is_healthy());
        assert!(h.store.get("task-a").await.unwrap().is_running());

        let mut saw_failure = false;
        while let Ok(event) = rx.try_recv() {
            if let DaemonEvent::Sync(sync) = event {
                if matches!(sync.event_type, SyncEventType::WriteFailed { .. }) {
                    saw_failure = true;
                }
            }
        }
        assert!(saw_failure);

        h.remote.set_fail_writes(false).await;
        let report = h.syncer.heartbeat().await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 0);
        assert!(h.syncer.health().await.is_healthy());
        assert!(h.remote.time_entry_for_task("task-a").await.is_some());
        assert_eq!(h.syncer.status().await.dirty_timers, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_pushes_live_durations() {
        let h = harness();
        h.store.start("task-a", "proj-1").await.unwrap();
        h.syncer.create("task-a").await.unwrap();

        h.clock.advance_secs(300);
        let report = h.syncer.heartbeat().await.unwrap();
        assert_eq!(report.pushed, 1);

        let entry = h.remote.time_entry_for_task("task-a").await.unwrap();
        assert_eq!(entry.duration_seconds, 300);
        assert_eq!(entry.timer_status, TimerState::Running);
    }

    #[tokio::test]
    async fn test_heartbeat_skips_stopped_clean_timers() {
        let h = harness();
        h.store.start("task-a", "proj-1").await.unwrap();
        h.syncer.create("task-a").await.unwrap();
        let stopped = h.store.stop("task-a").await.unwrap();
        h.syncer.push("task-a", stopped.revision);
        h.syncer.settle().await;

        let report = h.syncer.heartbeat().await.unwrap();
        assert_eq!(report.pushed, 0);
    }

    #[tokio::test]
    async fn test_heartbeat_does_not_overlap() {
        let h = harness();
        h.remote.set_write_delay(Some(Duration::from_millis(50))).await;
        h.store.start("task-a", "proj-1").await.unwrap();

        let (first, second) = tokio::join!(h.syncer.heartbeat(), h.syncer.heartbeat());
        assert!(first.is_some());
        assert!(second.is_none());

        assert!(h.syncer.heartbeat().await.is_some());
    }

    #[tokio::test]
    async fn test_transition_during_heartbeat_lands_last() {
        let h = harness();
        h.store.start("task-a", "proj-1").await.unwrap();
        h.syncer.create("task-a").await.unwrap();
        h.remote.set_write_delay(Some(Duration::from_millis(50))).await;

        h.clock.advance_secs(20);
        let heartbeat = h.syncer.heartbeat();
        let transition = async {
            let paused = h.store.pause("task-a").await.unwrap();
            h.syncer.push("task-a", paused.revision);
        };
        let (report, _) = tokio::join!(heartbeat, transition);
        assert!(report.is_some());

        h.clock.advance_secs(100);
        h.syncer.settle().await;

        let entry = h.remote.time_entry_for_task("task-a").await.unwrap();
        assert_eq!(entry.timer_status, TimerState::Paused);
        assert_eq!(entry.duration_seconds, 20);
    }

    #[tokio::test]
    async fn test_failed_delete_is_retried_on_heartbeat() {
        let h = harness();
        h.store.start("task-a", "proj-1").await.unwrap();
        let id = h.syncer.create("task-a").await.unwrap();

        h.remote.set_fail_writes(true).await;
        h.store.reset("task-a").await.unwrap();
        h.syncer.delete("task-a", &id);
        h.syncer.settle().await;
        assert_eq!(h.syncer.pending_delete_count().await, 1);

        h.remote.set_fail_writes(false).await;
        let report = h.syncer.heartbeat().await.unwrap();
        assert_eq!(report.deletes_retried, 1);
        assert_eq!(h.syncer.pending_delete_count().await, 0);
        assert!(h.remote.time_entries().await.is_empty());
        assert!(h.syncer.health().await.is_healthy());
    }

    #[tokio::test]
    async fn test_start_after_reset_with_pending_delete_is_fresh() {
        let h = harness();
        h.store.start("task-a", "proj-1").await.unwrap();
        let old_id = h.syncer.create("task-a").await.unwrap();
        h.clock.advance_secs(60);
        let paused = h.store.pause("task-a").await.unwrap();
        h.syncer.push("task-a", paused.revision);

        h.remote.set_fail_writes(true).await;
        h.store.reset("task-a").await.unwrap();
        h.syncer.delete("task-a", &old_id);
        h.syncer.settle().await;
        h.remote.set_fail_writes(false).await;

        h.clock.advance_secs(1);
        h.store.start("task-a", "proj-1").await.unwrap();
        let new_id = h.syncer.create("task-a").await.unwrap();

        assert_ne!(new_id, old_id);
        let entries = h.remote.time_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].duration_seconds, 0);
        assert_eq!(h.store.get("task-a").await.unwrap().accumulated_seconds, 0);
    }

    #[tokio::test]
    async fn test_delete_of_missing_entry_is_success() {
        let h = harness();
        h.syncer.delete("task-a", "never-existed");
        h.syncer.settle().await;

        assert_eq!(h.syncer.pending_delete_count().await, 0);
        assert!(h.syncer.health().await.is_healthy());
    }

    #[test]
    fn test_worker_futures_are_send() {
        fn assert_send<T: Send>(_: &T) {}

        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let shared = Arc::new(SyncShared {
            health: RwLock::new(SyncHealth::Healthy),
            pending_deletes: Mutex::new(Vec::new()),
            last_heartbeat: RwLock::new(None),
            heartbeat_in_flight: AtomicBool::new(false),
            events: Arc::new(EventManager::new()),
            clock: clock.clone(),
        });
        let worker = SyncWorker {
            store: Arc::new(LocalTimerStore::in_memory(clock)),
            remote: Arc::new(InMemoryRemoteStore::new()),
            shared: shared.clone(),
        };

        let (_tx, rx) = mpsc::unbounded_channel();
        let run = worker.run(rx, CancellationToken::new());
        assert_send(&run);

        let failure = shared.record_failure(None, "update", &"timeout");
        assert_send(&failure);
    }

    #[tokio::test]
    async fn test_report_failure_degrades() {
        let h = harness();
        h.syncer
            .report_failure("rehydrate", &"connection refused")
            .await;

        match h.syncer.health().await {
            SyncHealth::Degraded { last_error, .. } => {
                assert_eq!(last_error, "connection refused")
            }
            SyncHealth::Healthy => panic!("Expected degraded health"),
        }
    }
}
