use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use billable_core::models::{SyncConfig, TimeEntryFilter, Timer, TimerAction};
use billable_core::Clock;

use super::events::TimerEvent;
use super::store::{LocalTimerStore, Result, StartOutcome, TimerError};
use crate::event_manager::EventManager;
use crate::remote::RemoteStore;
use crate::schedule::PeriodicTask;
use crate::session::{SessionTransition, WorkSessionCoordinator};
use crate::sync::{HeartbeatReport, RemoteSyncer, SyncHealth};

/// Result of a user action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    /// The task's timer after the action; None once reset.
    pub timer: Option<Timer>,
    /// Set when the action succeeded locally but the remote store could not
    /// be updated.
    pub warning: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RehydrateReport {
    pub restored: usize,
    pub offline_merged: usize,
    /// Banner-level error when the remote store could not be read.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignOutReport {
    pub paused_tasks: Vec<String>,
    pub session_ended: bool,
    pub sync_health: SyncHealth,
}

/// Which periodic tasks are currently scheduled.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScheduleState {
    pub display_tick: bool,
    pub heartbeat: bool,
    pub cache_flush: bool,
    pub session_refresh: bool,
}

#[derive(Default)]
struct Schedules {
    display: Option<PeriodicTask>,
    heartbeat: Option<PeriodicTask>,
    cache_flush: Option<PeriodicTask>,
}

/// Orchestrates a transition end to end: local store, remote syncer,
/// session coordinator, periodic tasks and events.
pub struct TimerEngine {
    store: Arc<LocalTimerStore>,
    syncer: Arc<RemoteSyncer>,
    sessions: Arc<WorkSessionCoordinator>,
    remote: Arc<dyn RemoteStore>,
    events: Arc<EventManager>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    in_flight: Mutex<HashSet<String>>,
    /// Held while reading the running count and feeding it to the session
    /// coordinator.
    session_gate: tokio::sync::Mutex<()>,
    schedules: Mutex<Schedules>,
    last_rehydrate: Mutex<Option<RehydrateReport>>,
    me: Weak<TimerEngine>,
}

impl TimerEngine {
    pub fn new(
        store: Arc<LocalTimerStore>,
        remote: Arc<dyn RemoteStore>,
        events: Arc<EventManager>,
        clock: Arc<dyn Clock>,
        config: SyncConfig,
    ) -> Arc<Self> {
        let syncer = Arc::new(RemoteSyncer::spawn(
            store.clone(),
            remote.clone(),
            events.clone(),
            clock.clone(),
        ));
        let sessions = Arc::new(WorkSessionCoordinator::spawn(
            remote.clone(),
            events.clone(),
            clock.clone(),
            Duration::from_secs(config.session_refresh_interval_secs),
        ));

        Arc::new_cyclic(|me| Self {
            store,
            syncer,
            sessions,
            remote,
            events,
            clock,
            config,
            in_flight: Mutex::new(HashSet::new()),
            session_gate: tokio::sync::Mutex::new(()),
            schedules: Mutex::new(Schedules::default()),
            last_rehydrate: Mutex::new(None),
            me: me.clone(),
        })
    }

    pub fn store(&self) -> &Arc<LocalTimerStore> {
        &self.store
    }

    pub fn syncer(&self) -> &Arc<RemoteSyncer> {
        &self.syncer
    }

    pub fn sessions(&self) -> &Arc<WorkSessionCoordinator> {
        &self.sessions
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// True while an action for the task is still in progress.
    pub fn is_busy(&self, task_id: &str) -> bool {
        lock(&self.in_flight).contains(task_id)
    }

    pub async fn timer(&self, task_id: &str) -> Option<Timer> {
        self.store.get(task_id).await
    }

    pub async fn timers(&self) -> Vec<Timer> {
        self.store.list().await
    }

    /// Start timing a task. Waits for the remote entry to be created (or an
    /// existing one adopted) before returning.
    pub async fn start(&self, task_id: &str, project_id: &str) -> Result<ActionOutcome> {
        let _guard = self.begin(task_id, TimerAction::Start)?;
        let outcome = self.store.start(task_id, project_id).await?;
        let now = self.clock.now();

        self.after_transition().await;

        let warning = match outcome {
            StartOutcome::Created(ref timer) => {
                self.events.emit_timer(TimerEvent::started(timer, now));
                match self.syncer.create(task_id).await {
                    Ok(entry_id) => {
                        tracing::debug!("Task {} is tracked by entry {}", task_id, entry_id);
                        None
                    }
                    Err(e) => Some(format!(
                        "Timer started locally but was not saved remotely: {}",
                        e
                    )),
                }
            }
            StartOutcome::Resumed(ref timer) => {
                self.syncer.push(task_id, timer.revision);
                self.events.emit_timer(TimerEvent::resumed(timer, now));
                None
            }
        };

        Ok(ActionOutcome {
            timer: self.store.get(task_id).await,
            warning,
        })
    }

    pub async fn pause(&self, task_id: &str) -> Result<ActionOutcome> {
        let _guard = self.begin(task_id, TimerAction::Pause)?;
        let timer = self.store.pause(task_id).await?;
        Ok(self.committed(timer, TimerEvent::paused).await)
    }

    pub async fn resume(&self, task_id: &str) -> Result<ActionOutcome> {
        let _guard = self.begin(task_id, TimerAction::Resume)?;
        let timer = self.store.resume(task_id).await?;
        Ok(self.committed(timer, TimerEvent::resumed).await)
    }

    pub async fn stop(&self, task_id: &str) -> Result<ActionOutcome> {
        let _guard = self.begin(task_id, TimerAction::Stop)?;
        let timer = self.store.stop(task_id).await?;
        Ok(self.committed(timer, TimerEvent::stopped).await)
    }

    /// Return the task to idle and delete its remote entry.
    pub async fn reset(&self, task_id: &str) -> Result<ActionOutcome> {
        let _guard = self.begin(task_id, TimerAction::Reset)?;
        let removed = self.store.reset(task_id).await?;

        if let Some(ref entry_id) = removed.id {
            self.syncer.delete(task_id, entry_id);
        }
        self.events
            .emit_timer(TimerEvent::reset(&removed, self.clock.now()));
        self.after_transition().await;

        Ok(ActionOutcome {
            timer: None,
            warning: None,
        })
    }

    /// Rebuild the timer table from the remote store.
    pub async fn rehydrate(&self) -> RehydrateReport {
        let cached = match self.store.load_cache().await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("Ignoring unreadable timer cache: {}", e);
                Vec::new()
            }
        };

        let now = self.clock.now();
        let report = match self
            .remote
            .list_time_entries(&TimeEntryFilter::default())
            .await
        {
            Ok(entries) => {
                let mut timers: Vec<Timer> = entries
                    .iter()
                    .map(|entry| Timer::from_entry(entry, now))
                    .collect();
                let known: HashSet<String> = timers.iter().map(|t| t.task_id.clone()).collect();

                // Timers started offline never reached the remote store
                let offline: Vec<Timer> = cached
                    .into_iter()
                    .filter(|t| t.id.is_none() && !known.contains(&t.task_id))
                    .map(|mut t| {
                        t.dirty = true;
                        t
                    })
                    .collect();

                let report = RehydrateReport {
                    restored: timers.len(),
                    offline_merged: offline.len(),
                    error: None,
                };
                timers.extend(offline);
                self.store.replace_all(timers).await;
                report
            }
            Err(e) => {
                tracing::error!("Failed to rehydrate timers from remote store: {}", e);
                self.store.replace_all(Vec::new()).await;
                self.syncer.report_failure("rehydrate", &e).await;
                RehydrateReport {
                    error: Some(e.to_string()),
                    ..RehydrateReport::default()
                }
            }
        };

        tracing::info!(
            "Rehydrated {} timers ({} offline)",
            report.restored,
            report.offline_merged
        );
        for timer in self.store.list().await {
            self.events.emit_timer(TimerEvent::rehydrated(&timer, now));
        }

        {
            let _gate = self.session_gate.lock().await;
            self.sessions
                .rehydrate(self.store.running_count().await)
                .await;
        }
        self.reconcile_schedules().await;

        *lock(&self.last_rehydrate) = Some(report.clone());
        report
    }

    pub fn last_rehydrate(&self) -> Option<RehydrateReport> {
        lock(&self.last_rehydrate).clone()
    }

    /// Run a heartbeat cycle now. None when one is already in flight.
    pub async fn heartbeat(&self) -> Option<HeartbeatReport> {
        let report = self.syncer.heartbeat().await;
        self.reconcile_schedules().await;
        report
    }

    /// Pause everything, persist it, then close the work session.
    pub async fn sign_out(&self) -> SignOutReport {
        let now = self.clock.now();
        let paused = self.store.pause_all().await;
        for timer in &paused {
            self.syncer.push(&timer.task_id, timer.revision);
            self.events.emit_timer(TimerEvent::paused(timer, now));
        }
        self.syncer.settle().await;

        let session_ended = {
            let _gate = self.session_gate.lock().await;
            matches!(
                self.sessions.observe(0),
                Some(SessionTransition::Ended { .. })
            )
        };
        self.sessions.settle().await;
        self.stop_schedules();

        tracing::info!(
            "Signed out: paused {} timers, session ended: {}",
            paused.len(),
            session_ended
        );
        SignOutReport {
            paused_tasks: paused.into_iter().map(|t| t.task_id).collect(),
            session_ended,
            sync_health: self.syncer.health().await,
        }
    }

    /// Stop background work, giving queued writes a moment to land.
    pub async fn shutdown(&self) {
        self.stop_schedules();
        self.store.flush().await;

        if tokio::time::timeout(Duration::from_secs(5), self.syncer.settle())
            .await
            .is_err()
        {
            tracing::warn!("Timed out waiting for remote writes");
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), self.sessions.settle()).await;

        self.sessions.shutdown();
        self.syncer.shutdown();
    }

    pub fn schedule_state(&self) -> ScheduleState {
        let schedules = lock(&self.schedules);
        ScheduleState {
            display_tick: schedules.display.is_some(),
            heartbeat: schedules.heartbeat.is_some(),
            cache_flush: schedules.cache_flush.is_some(),
            session_refresh: self.sessions.is_active(),
        }
    }

    async fn committed(
        &self,
        timer: Timer,
        event: fn(&Timer, DateTime<Utc>) -> TimerEvent,
    ) -> ActionOutcome {
        self.syncer.push(&timer.task_id, timer.revision);
        self.events.emit_timer(event(&timer, self.clock.now()));
        self.after_transition().await;

        ActionOutcome {
            timer: Some(timer),
            warning: None,
        }
    }

    async fn after_transition(&self) {
        {
            let _gate = self.session_gate.lock().await;
            let running = self.store.running_count().await;
            self.sessions.observe(running);
        }
        self.reconcile_schedules().await;
    }

    fn begin(&self, task_id: &str, action: TimerAction) -> Result<ActionGuard<'_>> {
        let mut in_flight = lock(&self.in_flight);
        if !in_flight.insert(task_id.to_string()) {
            tracing::debug!("Rejected {} for task {}: busy", action, task_id);
            return Err(TimerError::Busy {
                action,
                task_id: task_id.to_string(),
            });
        }

        Ok(ActionGuard {
            in_flight: &self.in_flight,
            task_id: task_id.to_string(),
        })
    }

    /// Start or stop each periodic task to match the current table.
    async fn reconcile_schedules(&self) {
        let running = self.store.running_count().await > 0;
        let needs_sync = self.store.needs_sync_count().await > 0
            || self.syncer.pending_delete_count().await > 0;

        let mut schedules = lock(&self.schedules);

        if running != schedules.display.is_some() {
            schedules.display = running.then(|| self.spawn_display_tick());
        }
        if needs_sync != schedules.heartbeat.is_some() {
            schedules.heartbeat = needs_sync.then(|| self.spawn_heartbeat());
        }
        if needs_sync != schedules.cache_flush.is_some() {
            schedules.cache_flush = needs_sync.then(|| self.spawn_cache_flush());
        }
    }

    fn stop_schedules(&self) {
        let mut schedules = lock(&self.schedules);
        *schedules = Schedules::default();
    }

    fn spawn_display_tick(&self) -> PeriodicTask {
        let store = self.store.clone();
        let events = self.events.clone();
        let clock = self.clock.clone();
        let period = Duration::from_millis(self.config.display_tick_millis);

        PeriodicTask::spawn("display-tick", period, move || {
            let (store, events, clock) = (store.clone(), events.clone(), clock.clone());
            async move {
                let now = clock.now();
                for timer in store.list().await.iter().filter(|t| t.is_running()) {
                    events.emit_timer(TimerEvent::tick(timer, now));
                }
            }
        })
    }

    fn spawn_heartbeat(&self) -> PeriodicTask {
        let me = self.me.clone();
        let period = Duration::from_secs(self.config.heartbeat_interval_secs);

        PeriodicTask::spawn("heartbeat", period, move || {
            let me = me.clone();
            async move {
                if let Some(engine) = me.upgrade() {
                    engine.heartbeat().await;
                }
            }
        })
    }

    fn spawn_cache_flush(&self) -> PeriodicTask {
        let store = self.store.clone();
        let period = Duration::from_secs(self.config.cache_flush_interval_secs);

        PeriodicTask::spawn("cache-flush", period, move || {
            let store = store.clone();
            async move { store.flush().await }
        })
    }
}

impl Drop for TimerEngine {
    fn drop(&mut self) {
        self.sessions.shutdown();
        self.syncer.shutdown();
    }
}

/// Marks a task busy until dropped.
struct ActionGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    task_id: String,
}

impl Drop for ActionGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.task_id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{DaemonEvent, SessionEventType};
    use crate::remote::InMemoryRemoteStore;
    use crate::timer::TimerEventType;
    use billable_core::models::{SessionStatus, TimeEntry, TimerState};
    use billable_core::storage::TimerCache;
    use billable_core::ManualClock;
    use tempfile::TempDir;

    struct Harness {
        clock: Arc<ManualClock>,
        remote: Arc<InMemoryRemoteStore>,
        engine: Arc<TimerEngine>,
    }

    fn harness() -> Harness {
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let store = Arc::new(LocalTimerStore::in_memory(clock.clone()));
        build(clock, store, Arc::new(InMemoryRemoteStore::new()))
    }

    fn build(
        clock: Arc<ManualClock>,
        store: Arc<LocalTimerStore>,
        remote: Arc<InMemoryRemoteStore>,
    ) -> Harness {
        let engine = TimerEngine::new(
            store,
            remote.clone(),
            Arc::new(EventManager::new()),
            clock.clone(),
            SyncConfig::default(),
        );
        Harness {
            clock,
            remote,
            engine,
        }
    }

    async fn settle(engine: &TimerEngine) {
        engine.syncer().settle().await;
        engine.sessions().settle().await;
    }

    #[tokio::test]
    async fn test_pause_resume_stop_scenario() {
        let h = harness();

        h.engine.start("task-a", "proj-1").await.unwrap();
        h.clock.advance_secs(10);
        let paused = h.engine.pause("task-a").await.unwrap();
        assert_eq!(paused.timer.unwrap().accumulated_seconds, 10);

        h.engine.resume("task-a").await.unwrap();
        h.clock.advance_secs(5);
        let stopped = h.engine.stop("task-a").await.unwrap();
        assert_eq!(stopped.timer.unwrap().accumulated_seconds, 15);
        settle(&h.engine).await;

        let entry = h.remote.time_entry_for_task("task-a").await.unwrap();
        assert_eq!(entry.timer_status, TimerState::Stopped);
        assert_eq!(entry.duration_seconds, 15);
        assert_eq!(entry.end_time, Some(h.clock.now()));
    }

    #[tokio::test]
    async fn test_two_timers_share_one_session() {
        let h = harness();

        h.engine.start("task-a", "proj-1").await.unwrap();
        h.clock.advance_secs(5);
        h.engine.start("task-b", "proj-1").await.unwrap();
        assert_eq!(h.engine.store().running_count().await, 2);

        h.clock.advance_secs(5);
        h.engine.stop("task-a").await.unwrap();
        assert!(h.engine.sessions().is_active());

        h.clock.advance_secs(5);
        h.engine.stop("task-b").await.unwrap();
        assert!(!h.engine.sessions().is_active());
        settle(&h.engine).await;

        let sessions = h.remote.work_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Completed);
        assert_eq!(sessions[0].duration_seconds, 15);
    }

    #[tokio::test]
    async fn test_toggle_single_timer_cycles_session() {
        let h = harness();

        h.engine.start("task-a", "proj-1").await.unwrap();
        h.clock.advance_secs(3);
        h.engine.pause("task-a").await.unwrap();
        h.engine.resume("task-a").await.unwrap();
        h.clock.advance_secs(3);
        h.engine.pause("task-a").await.unwrap();
        settle(&h.engine).await;

        let sessions = h.remote.work_sessions().await;
        assert_eq!(sessions.len(), 2);
        assert!(sessions
            .iter()
            .all(|s| s.status == SessionStatus::Completed));
    }

    #[tokio::test]
    async fn test_start_twice_never_duplicates_entry() {
        let h = harness();

        h.engine.start("task-a", "proj-1").await.unwrap();
        let err = h.engine.start("task-a", "proj-1").await.unwrap_err();
        assert!(err.is_validation());

        h.engine.pause("task-a").await.unwrap();
        let resumed = h.engine.start("task-a", "proj-1").await.unwrap();
        assert!(resumed.timer.unwrap().is_running());
        settle(&h.engine).await;

        assert_eq!(h.remote.time_entries().await.len(), 1);
        assert_eq!(h.remote.calls().await.create_entry, 1);
    }

    #[tokio::test]
    async fn test_reset_then_start_is_fresh() {
        let h = harness();

        h.engine.start("task-a", "proj-1").await.unwrap();
        h.clock.advance_secs(40);
        h.engine.stop("task-a").await.unwrap();
        h.engine.reset("task-a").await.unwrap();
        assert!(h.engine.store().can_start("task-a").await);

        let started = h.engine.start("task-a", "proj-1").await.unwrap();
        assert!(started.warning.is_none());
        let timer = started.timer.unwrap();
        assert_eq!(timer.accumulated_seconds, 0);
        let entry_id = timer.id.expect("fresh entry id");
        settle(&h.engine).await;

        let entries = h.remote.time_entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, entry_id);
        assert_eq!(entries[0].duration_seconds, 0);
        assert_eq!(entries[0].timer_status, TimerState::Running);
        assert_eq!(
            h.engine.timer("task-a").await.unwrap().id.as_deref(),
            Some(entry_id.as_str())
        );
    }

    #[tokio::test]
    async fn test_interleaved_actions_keep_session_open() {
        let h = harness();
        h.engine.start("task-a", "proj-1").await.unwrap();
        settle(&h.engine).await;

        let gate = h.engine.session_gate.lock().await;
        let engine = h.engine.clone();
        let pause_a = tokio::spawn(async move { engine.pause("task-a").await });
        let engine = h.engine.clone();
        let start_b = tokio::spawn(async move { engine.start("task-b", "proj-1").await });

        while h.engine.store().running_count().await != 1
            || h.engine.timer("task-b").await.is_none()
        {
            tokio::task::yield_now().await;
        }
        drop(gate);

        pause_a.await.unwrap().unwrap();
        start_b.await.unwrap().unwrap();
        settle(&h.engine).await;

        assert!(h.engine.sessions().is_active());
        let sessions = h.remote.work_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_active());
    }

    #[tokio::test]
    async fn test_pause_on_idle_is_validation_error() {
        let h = harness();

        let err = h.engine.pause("task-a").await.unwrap_err();
        assert_eq!(err.to_string(), "Cannot pause timer for this task");
        assert!(h.engine.timer("task-a").await.is_none());
        assert!(!h.engine.sessions().is_active());
        assert_eq!(h.remote.calls().await, Default::default());
    }

    #[tokio::test]
    async fn test_concurrent_action_on_same_task_is_busy() {
        let h = harness();

        let (started, paused) = tokio::join!(
            h.engine.start("task-a", "proj-1"),
            h.engine.pause("task-a")
        );
        assert!(started.is_ok());
        assert!(paused.unwrap_err().is_busy());
        assert!(!h.engine.is_busy("task-a"));
        assert!(h.engine.pause("task-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_remote_failure_is_a_warning() {
        let h = harness();
        h.remote.set_fail_writes(true).await;

        let outcome = h.engine.start("task-a", "proj-1").await.unwrap();
        assert!(outcome.warning.is_some());
        assert!(outcome.timer.unwrap().is_running());
        assert!(!h.engine.syncer().health().await.is_healthy());

        h.clock.advance_secs(10);
        h.engine.pause("task-a").await.unwrap();
        settle(&h.engine).await;
        assert_eq!(
            h.engine.timer("task-a").await.unwrap().state,
            TimerState::Paused
        );

        h.remote.set_fail_writes(false).await;
        h.engine.heartbeat().await.unwrap();
        assert!(h.engine.syncer().health().await.is_healthy());

        let entry = h.remote.time_entry_for_task("task-a").await.unwrap();
        assert_eq!(entry.timer_status, TimerState::Paused);
        assert_eq!(entry.duration_seconds, 10);
    }

    #[tokio::test]
    async fn test_rehydrate_from_remote() {
        let h = harness();
        let now = h.clock.now();
        h.remote
            .insert_time_entry(TimeEntry {
                id: "e-1".to_string(),
                task_id: "task-a".to_string(),
                project_id: "proj-1".to_string(),
                start_time: now - chrono::Duration::seconds(600),
                end_time: None,
                duration_seconds: 300,
                timer_status: TimerState::Running,
                updated_at: Some(now - chrono::Duration::seconds(300)),
            })
            .await;
        h.remote
            .insert_time_entry(TimeEntry {
                id: "e-2".to_string(),
                task_id: "task-b".to_string(),
                project_id: "proj-1".to_string(),
                start_time: now - chrono::Duration::seconds(900),
                end_time: None,
                duration_seconds: 120,
                timer_status: TimerState::Paused,
                updated_at: Some(now - chrono::Duration::seconds(700)),
            })
            .await;

        let report = h.engine.rehydrate().await;
        assert_eq!(report.restored, 2);
        assert!(report.error.is_none());

        let a = h.engine.timer("task-a").await.unwrap();
        assert!(a.is_running());
        assert_eq!(a.elapsed_at(now), 600);

        let b = h.engine.timer("task-b").await.unwrap();
        assert_eq!(b.elapsed_at(now), 120);

        assert!(h.engine.sessions().is_active());
        assert!(h.engine.schedule_state().display_tick);
    }

    #[tokio::test]
    async fn test_rehydrate_read_failure_falls_back_to_empty() {
        let h = harness();
        h.engine.start("task-a", "proj-1").await.unwrap();
        h.remote.set_fail_reads(true).await;

        let report = h.engine.rehydrate().await;
        assert!(report.error.is_some());
        assert!(h.engine.timers().await.is_empty());
        assert!(!h.engine.syncer().health().await.is_healthy());
        assert_eq!(h.engine.last_rehydrate(), Some(report));
    }

    #[tokio::test]
    async fn test_rehydrate_merges_offline_timers() {
        let dir = TempDir::new().unwrap();
        let clock = Arc::new(ManualClock::new(
            DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        ));
        let remote = Arc::new(InMemoryRemoteStore::new());

        // Previous run: started while the remote store was down
        {
            let store = Arc::new(LocalTimerStore::new(
                TimerCache::new(dir.path().to_path_buf()),
                clock.clone(),
            ));
            let h = build(clock.clone(), store, remote.clone());
            remote.set_fail_writes(true).await;
            h.engine.start("task-a", "proj-1").await.unwrap();
            settle(&h.engine).await;
            h.engine.shutdown().await;
            remote.set_fail_writes(false).await;
        }

        let store = Arc::new(LocalTimerStore::new(
            TimerCache::new(dir.path().to_path_buf()),
            clock.clone(),
        ));
        let h = build(clock, store, remote.clone());
        let report = h.engine.rehydrate().await;
        assert_eq!(report.offline_merged, 1);

        h.engine.heartbeat().await.unwrap();
        assert!(remote.time_entry_for_task("task-a").await.is_some());
    }

    #[tokio::test]
    async fn test_sign_out_pauses_before_ending_session() {
        let h = harness();
        let mut rx = h.engine.events().subscribe();

        h.engine.start("task-a", "proj-1").await.unwrap();
        h.engine.start("task-b", "proj-1").await.unwrap();
        h.clock.advance_secs(30);

        let report = h.engine.sign_out().await;
        assert_eq!(report.paused_tasks, vec!["task-a", "task-b"]);
        assert!(report.session_ended);
        assert!(report.sync_health.is_healthy());
        assert_eq!(h.engine.schedule_state(), ScheduleState::default());

        for entry in h.remote.time_entries().await {
            assert_eq!(entry.timer_status, TimerState::Paused);
            assert_eq!(entry.duration_seconds, 30);
        }
        let sessions = h.remote.work_sessions().await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].status, SessionStatus::Completed);

        let mut last_pause = None;
        let mut session_end = None;
        let mut index = 0;
        while let Ok(event) = rx.try_recv() {
            match event {
                DaemonEvent::Timer(e) if matches!(e.event_type, TimerEventType::Paused { .. }) => {
                    last_pause = Some(index)
                }
                DaemonEvent::Session(e)
                    if matches!(e.event_type, SessionEventType::Ended { .. }) =>
                {
                    session_end = Some(index)
                }
                _ => {}
            }
            index += 1;
        }
        assert!(last_pause.unwrap() < session_end.unwrap());
    }

    #[tokio::test]
    async fn test_schedules_follow_timer_state() {
        let h = harness();
        assert_eq!(h.engine.schedule_state(), ScheduleState::default());

        h.engine.start("task-a", "proj-1").await.unwrap();
        let state = h.engine.schedule_state();
        assert!(state.display_tick && state.heartbeat && state.cache_flush);
        assert!(state.session_refresh);

        h.engine.pause("task-a").await.unwrap();
        let state = h.engine.schedule_state();
        assert!(!state.display_tick);
        assert!(state.heartbeat);
        assert!(!state.session_refresh);

        h.engine.stop("task-a").await.unwrap();
        h.engine.syncer().settle().await;
        h.engine.heartbeat().await.unwrap();
        assert_eq!(h.engine.schedule_state(), ScheduleState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_display_tick_emits_live_elapsed() {
        let h = harness();
        let mut rx = h.engine.events().subscribe();

        h.engine.start("task-a", "proj-1").await.unwrap();
        h.clock.advance_secs(7);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut ticks = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let DaemonEvent::Timer(e) = event {
                if let TimerEventType::Tick { elapsed_seconds } = e.event_type {
                    ticks.push(elapsed_seconds);
                }
            }
        }
        assert_eq!(ticks, vec![7]);
    }
}
