//! Local timer table - the single owner of timer state
//!
//! Every transition updates the in-memory table and rewrites the durable
//! cache before returning, so callers always see the optimistic local state
//! regardless of what the remote store does afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use billable_core::models::{Timer, TimerAction, TimerSnapshot};
use billable_core::storage::TimerCache;
use billable_core::Clock;

/// Timer error
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    #[error("Cannot {action} timer for this task")]
    Validation { action: TimerAction, task_id: String },

    #[error("Cannot {action} timer for this task: another action is still in progress")]
    Busy { action: TimerAction, task_id: String },

    #[error("Storage error: {0}")]
    Storage(#[from] billable_core::Error),

    #[error("Task join error: {0}")]
    JoinError(String),
}

impl TimerError {
    pub fn validation(action: TimerAction, task_id: &str) -> Self {
        Self::Validation {
            action,
            task_id: task_id.to_string(),
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Busy { .. })
    }
}

pub type Result<T> = std::result::Result<T, TimerError>;

/// What `start` did to the table.
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// No timer existed; a fresh one was created.
    Created(Timer),
    /// A paused or stopped timer was resumed instead.
    Resumed(Timer),
}

impl StartOutcome {
    pub fn timer(&self) -> &Timer {
        match self {
            StartOutcome::Created(timer) | StartOutcome::Resumed(timer) => timer,
        }
    }

    pub fn into_timer(self) -> Timer {
        match self {
            StartOutcome::Created(timer) | StartOutcome::Resumed(timer) => timer,
        }
    }
}

pub struct LocalTimerStore {
    timers: RwLock<HashMap<String, Timer>>,
    /// Last revision of each reset timer. A later timer for the same task
    /// continues from it, so writes queued for the old one read as stale.
    retired_revisions: Mutex<HashMap<String, u64>>,
    cache: Option<Arc<TimerCache>>,
    clock: Arc<dyn Clock>,
}

impl LocalTimerStore {
    pub fn new(cache: TimerCache, clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            retired_revisions: Mutex::new(HashMap::new()),
            cache: Some(Arc::new(cache)),
            clock,
        }
    }

    /// Store without a durable cache.
    pub fn in_memory(clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: RwLock::new(HashMap::new()),
            retired_revisions: Mutex::new(HashMap::new()),
            cache: None,
            clock,
        }
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Read the last committed table from the durable cache.
    pub async fn load_cache(&self) -> Result<Vec<Timer>> {
        let Some(cache) = self.cache.clone() else {
            return Ok(Vec::new());
        };

        let timers = tokio::task::spawn_blocking(move || cache.load())
            .await
            .map_err(|e| TimerError::JoinError(e.to_string()))??;
        Ok(timers)
    }

    /// Start timing a task. An existing paused or stopped timer is resumed.
    pub async fn start(&self, task_id: &str, project_id: &str) -> Result<StartOutcome> {
        let now = self.clock.now();
        let mut timers = self.timers.write().await;

        let outcome = match timers.get_mut(task_id) {
            None => {
                let mut timer = Timer::start(task_id, project_id, now);
                if let Some(retired) = self.retired_revisions.lock().await.remove(task_id) {
                    timer.revision += retired;
                }
                timers.insert(task_id.to_string(), timer.clone());
                StartOutcome::Created(timer)
            }
            Some(timer) if timer.can_resume() => {
                timer.resume(now)?;
                StartOutcome::Resumed(timer.clone())
            }
            Some(_) => return Err(TimerError::validation(TimerAction::Start, task_id)),
        };

        self.persist(&mut timers).await;
        Ok(outcome)
    }

    pub async fn pause(&self, task_id: &str) -> Result<Timer> {
        self.transition(task_id, TimerAction::Pause, |timer, now| {
            timer.can_pause().then(|| timer.pause(now))
        })
        .await
    }

    pub async fn resume(&self, task_id: &str) -> Result<Timer> {
        self.transition(task_id, TimerAction::Resume, |timer, now| {
            timer.can_resume().then(|| timer.resume(now))
        })
        .await
    }

    pub async fn stop(&self, task_id: &str) -> Result<Timer> {
        self.transition(task_id, TimerAction::Stop, |timer, now| {
            timer.can_stop().then(|| timer.stop(now))
        })
        .await
    }

    /// Remove the task's timer, returning it to idle.
    pub async fn reset(&self, task_id: &str) -> Result<Timer> {
        let mut timers = self.timers.write().await;
        let removed = timers
            .remove(task_id)
            .ok_or_else(|| TimerError::validation(TimerAction::Reset, task_id))?;
        self.retired_revisions
            .lock()
            .await
            .insert(task_id.to_string(), removed.revision);

        self.persist(&mut timers).await;
        Ok(removed)
    }

    /// Pause every running timer in one pass.
    pub async fn pause_all(&self) -> Vec<Timer> {
        let now = self.clock.now();
        let mut timers = self.timers.write().await;

        let mut paused = Vec::new();
        for timer in timers.values_mut().filter(|t| t.is_running()) {
            if timer.pause(now).is_ok() {
                paused.push(timer.clone());
            }
        }

        if !paused.is_empty() {
            self.persist(&mut timers).await;
        }
        paused.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        paused
    }

    /// Record the remote id after a successful create.
    ///
    /// Returns false when the timer was reset, or replaced by a newer one,
    /// while the create was in flight.
    pub async fn attach_remote_id(
        &self,
        task_id: &str,
        started_at: chrono::DateTime<chrono::Utc>,
        entry_id: &str,
    ) -> bool {
        let mut timers = self.timers.write().await;
        match timers.get_mut(task_id) {
            Some(timer) if timer.started_at == started_at && timer.id.is_none() => {
                timer.id = Some(entry_id.to_string());
                self.persist(&mut timers).await;
                true
            }
            _ => false,
        }
    }

    /// Take over an entry that already existed remotely for the task.
    pub async fn adopt_entry(
        &self,
        task_id: &str,
        entry_id: &str,
        banked_seconds: Option<u64>,
    ) -> Option<Timer> {
        let mut timers = self.timers.write().await;
        let timer = timers.get_mut(task_id)?;

        let banked = banked_seconds.unwrap_or(timer.accumulated_seconds);
        timer.adopt_entry(entry_id.to_string(), banked);
        let adopted = timer.clone();

        self.persist(&mut timers).await;
        Some(adopted)
    }

    /// Forget a remote id the remote store no longer knows about.
    pub async fn detach_remote_id(&self, task_id: &str, entry_id: &str) {
        let mut timers = self.timers.write().await;
        if let Some(timer) = timers.get_mut(task_id) {
            if timer.id.as_deref() == Some(entry_id) {
                timer.id = None;
                timer.dirty = true;
                self.persist(&mut timers).await;
            }
        }
    }

    /// Record a successful remote write of `revision`.
    pub async fn mark_synced(&self, task_id: &str, revision: u64) -> bool {
        let now = self.clock.now();
        let mut timers = self.timers.write().await;
        match timers.get_mut(task_id) {
            Some(timer) => timer.mark_synced(revision, now),
            None => false,
        }
    }

    /// Replace the whole table, e.g. after rehydration.
    pub async fn replace_all(&self, replacement: Vec<Timer>) {
        let mut timers = self.timers.write().await;
        *timers = replacement
            .into_iter()
            .map(|t| (t.task_id.clone(), t))
            .collect();
        self.persist(&mut timers).await;
    }

    /// Rewrite the durable cache with the current table.
    pub async fn flush(&self) {
        let mut timers = self.timers.write().await;
        self.persist(&mut timers).await;
    }

    pub async fn get(&self, task_id: &str) -> Option<Timer> {
        self.timers.read().await.get(task_id).cloned()
    }

    /// The remote id and full snapshot to push for a task, as of now.
    pub async fn snapshot(&self, task_id: &str) -> Option<(Option<String>, TimerSnapshot)> {
        let now = self.clock.now();
        let timers = self.timers.read().await;
        timers
            .get(task_id)
            .map(|timer| (timer.id.clone(), timer.snapshot(now)))
    }

    /// All timers ordered by task id.
    pub async fn list(&self) -> Vec<Timer> {
        let timers = self.timers.read().await;
        let mut list: Vec<_> = timers.values().cloned().collect();
        list.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        list
    }

    pub async fn running_count(&self) -> usize {
        let timers = self.timers.read().await;
        timers.values().filter(|t| t.is_running()).count()
    }

    /// Timers the heartbeat still has to look after: running, paused or
    /// carrying unsynced changes.
    pub async fn needs_sync_count(&self) -> usize {
        let timers = self.timers.read().await;
        timers.values().filter(|t| t.is_live() || t.dirty).count()
    }

    pub async fn dirty_count(&self) -> usize {
        let timers = self.timers.read().await;
        timers.values().filter(|t| t.dirty).count()
    }

    pub async fn can_start(&self, task_id: &str) -> bool {
        !self.timers.read().await.contains_key(task_id)
    }

    pub async fn can_pause(&self, task_id: &str) -> bool {
        self.check(task_id, Timer::can_pause).await
    }

    pub async fn can_resume(&self, task_id: &str) -> bool {
        self.check(task_id, Timer::can_resume).await
    }

    pub async fn can_stop(&self, task_id: &str) -> bool {
        self.check(task_id, Timer::can_stop).await
    }

    async fn check(&self, task_id: &str, predicate: fn(&Timer) -> bool) -> bool {
        self.timers
            .read()
            .await
            .get(task_id)
            .map(predicate)
            .unwrap_or(false)
    }

    /// Apply `apply` to the task's timer. `apply` returns None when the
    /// action is illegal in the timer's current state.
    async fn transition<F>(&self, task_id: &str, action: TimerAction, apply: F) -> Result<Timer>
    where
        F: FnOnce(&mut Timer, chrono::DateTime<chrono::Utc>) -> Option<billable_core::Result<()>>,
    {
        let now = self.clock.now();
        let mut timers = self.timers.write().await;

        let timer = timers
            .get_mut(task_id)
            .ok_or_else(|| TimerError::validation(action, task_id))?;

        match apply(timer, now) {
            Some(result) => result?,
            None => return Err(TimerError::validation(action, task_id)),
        }
        let updated = timer.clone();

        self.persist(&mut timers).await;
        Ok(updated)
    }

    /// Write the table to the durable cache. Failures are logged; the
    /// in-memory table stays authoritative for this process.
    async fn persist(&self, timers: &mut HashMap<String, Timer>) {
        let Some(cache) = self.cache.clone() else {
            return;
        };

        let now = self.clock.now();
        let mut table: Vec<Timer> = timers.values().cloned().collect();
        table.sort_by(|a, b| a.task_id.cmp(&b.task_id));
        for timer in table.iter_mut() {
            timer.last_local_persist_at = Some(now);
        }

        let result = tokio::task::spawn_blocking(move || cache.save(&table, now)).await;
        match result {
            Ok(Ok(())) => {
                for timer in timers.values_mut() {
                    timer.last_local_persist_at = Some(now);
                }
            }
            Ok(Err(e)) => tracing::warn!("Failed to write timer cache: {}", e),
            Err(e) => tracing::warn!("Timer cache write task failed: {}", e),
        }
    }
}
