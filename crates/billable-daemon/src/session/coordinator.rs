//! Work session coordinator
//!
//! Derives a single "is the user working" session from the number of
//! running timers. The session starts when that number goes from zero to
//! non-zero and ends when it drops back to zero; redundant observations of
//! the same count do nothing.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;

use billable_core::clock::seconds_between;
use billable_core::models::stats::start_of_week;
use billable_core::models::{PeriodStats, SessionSnapshot, WorkSessionFilter};
use billable_core::Clock;

use crate::event_manager::EventManager;
use crate::events::{SessionEvent, SyncEvent};
use crate::remote::{RemoteError, RemoteStore};
use crate::schedule::PeriodicTask;

/// A change in the derived session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionTransition {
    Started {
        start_time: DateTime<Utc>,
    },
    Ended {
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        duration_seconds: u64,
    },
}

/// The active session as seen by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionView {
    pub start_time: DateTime<Utc>,
    pub duration_seconds: u64,
    pub remote_id: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct ActiveSession {
    start_time: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CoordinatorState {
    last_count: usize,
    active: Option<ActiveSession>,
}

enum SessionCommand {
    Start {
        start_time: DateTime<Utc>,
    },
    Adopt {
        remote_id: String,
        start_time: DateTime<Utc>,
    },
    Refresh {
        duration_seconds: u64,
    },
    End {
        end_time: DateTime<Utc>,
        duration_seconds: u64,
    },
    /// Close a session left active by a previous run.
    Close {
        remote_id: String,
        start_time: DateTime<Utc>,
        snapshot: SessionSnapshot,
    },
    RecomputeStats,
    Settle {
        reply: oneshot::Sender<()>,
    },
}

#[derive(Default)]
struct SessionShared {
    remote_id: RwLock<Option<String>>,
    stats: RwLock<PeriodStats>,
}

pub struct WorkSessionCoordinator {
    state: Mutex<CoordinatorState>,
    refresh: Mutex<Option<PeriodicTask>>,
    refresh_interval: Duration,
    tx: mpsc::UnboundedSender<SessionCommand>,
    shared: Arc<SessionShared>,
    remote: Arc<dyn RemoteStore>,
    events: Arc<EventManager>,
    clock: Arc<dyn Clock>,
    token: CancellationToken,
}

impl WorkSessionCoordinator {
    pub fn spawn(
        remote: Arc<dyn RemoteStore>,
        events: Arc<EventManager>,
        clock: Arc<dyn Clock>,
        refresh_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(SessionShared::default());
        let token = CancellationToken::new();

        let writer = SessionWriter {
            remote: remote.clone(),
            shared: shared.clone(),
            events: events.clone(),
            clock: clock.clone(),
            current: None,
            backlog: Vec::new(),
        };
        tokio::spawn(writer.run(rx, token.clone()));

        Self {
            state: Mutex::new(CoordinatorState::default()),
            refresh: Mutex::new(None),
            refresh_interval,
            tx,
            shared,
            remote,
            events,
            clock,
            token,
        }
    }

    /// Feed the current number of running timers.
    pub fn observe(&self, running_count: usize) -> Option<SessionTransition> {
        let now = self.clock.now();

        let transition = {
            let mut state = self.lock_state();
            let previous = std::mem::replace(&mut state.last_count, running_count);

            if previous == 0 && running_count > 0 && state.active.is_none() {
                state.active = Some(ActiveSession { start_time: now });
                Some(SessionTransition::Started { start_time: now })
            } else if previous > 0 && running_count == 0 {
                state.active.take().map(|session| SessionTransition::Ended {
                    start_time: session.start_time,
                    end_time: now,
                    duration_seconds: seconds_between(session.start_time, now),
                })
            } else {
                None
            }
        };

        match transition {
            Some(SessionTransition::Started { start_time }) => {
                tracing::info!("Work session started");
                self.send(SessionCommand::Start { start_time });
                self.send(SessionCommand::RecomputeStats);
                self.start_refresh(start_time);
                self.events.emit_session(SessionEvent::started(start_time));
            }
            Some(SessionTransition::Ended {
                start_time,
                end_time,
                duration_seconds,
            }) => {
                tracing::info!("Work session ended after {}s", duration_seconds);
                self.stop_refresh();
                self.send(SessionCommand::End {
                    end_time,
                    duration_seconds,
                });
                self.send(SessionCommand::RecomputeStats);
                self.events.emit_session(SessionEvent::ended(
                    start_time,
                    end_time,
                    duration_seconds,
                ));
            }
            None => {}
        }

        transition
    }

    /// Reconcile with the remote store after a restart.
    ///
    /// An active remote session is continued when timers are running and
    /// closed at its last refreshed duration otherwise.
    pub async fn rehydrate(&self, running_count: usize) {
        let mut adopted = false;

        match self
            .remote
            .list_work_sessions(&WorkSessionFilter::active())
            .await
        {
            Ok(mut sessions) => {
                sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
                for session in sessions {
                    if running_count > 0 && !adopted {
                        self.adopt(session.id, session.start_time, running_count);
                        adopted = true;
                        continue;
                    }

                    let end_time = session.start_time
                        + ChronoDuration::seconds(session.duration_seconds as i64);
                    tracing::info!("Closing stale work session {}", session.id);
                    self.send(SessionCommand::Close {
                        remote_id: session.id,
                        start_time: session.start_time,
                        snapshot: SessionSnapshot::completed(session.duration_seconds, end_time),
                    });
                }
            }
            Err(e) => {
                tracing::warn!("Failed to read active work sessions: {}", e);
            }
        }

        if !adopted {
            self.observe(running_count);
        }
        self.send(SessionCommand::RecomputeStats);
    }

    pub fn active_start(&self) -> Option<DateTime<Utc>> {
        self.lock_state().active.map(|s| s.start_time)
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().active.is_some()
    }

    pub async fn active_session(&self) -> Option<SessionView> {
        let start_time = self.active_start()?;
        Some(SessionView {
            start_time,
            duration_seconds: seconds_between(start_time, self.clock.now()),
            remote_id: self.shared.remote_id.read().await.clone(),
        })
    }

    /// Last computed statistics.
    pub async fn stats(&self) -> PeriodStats {
        self.shared.stats.read().await.clone()
    }

    /// Recompute statistics from the remote store and return them.
    pub async fn refresh_stats(&self) -> PeriodStats {
        self.send(SessionCommand::RecomputeStats);
        self.settle().await;
        self.stats().await
    }

    /// Wait until every queued session write has been attempted.
    pub async fn settle(&self) {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(SessionCommand::Settle { reply }).is_ok() {
            let _ = rx.await;
        }
    }

    pub fn shutdown(&self) {
        self.stop_refresh();
        self.token.cancel();
    }

    fn adopt(&self, remote_id: String, start_time: DateTime<Utc>, running_count: usize) {
        {
            let mut state = self.lock_state();
            state.last_count = running_count;
            state.active = Some(ActiveSession { start_time });
        }

        tracing::info!("Continuing work session {}", remote_id);
        self.send(SessionCommand::Adopt {
            remote_id,
            start_time,
        });
        self.start_refresh(start_time);
        self.events.emit_session(SessionEvent::started(start_time));
    }

    fn start_refresh(&self, start_time: DateTime<Utc>) {
        let tx = self.tx.clone();
        let clock = self.clock.clone();

        let task = PeriodicTask::spawn("session-refresh", self.refresh_interval, move || {
            let duration_seconds = seconds_between(start_time, clock.now());
            let _ = tx.send(SessionCommand::Refresh { duration_seconds });
            async {}
        });

        let mut refresh = self.refresh.lock().unwrap_or_else(|e| e.into_inner());
        *refresh = Some(task);
    }

    fn stop_refresh(&self) {
        let mut refresh = self.refresh.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = refresh.take() {
            task.cancel();
        }
    }

    fn send(&self, command: SessionCommand) {
        if self.tx.send(command).is_err() {
            tracing::warn!("Session writer is not running");
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for WorkSessionCoordinator {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

struct WriterSession {
    start_time: DateTime<Utc>,
    remote_id: Option<String>,
}

/// A finished session whose remote write has not landed yet.
struct BacklogSession {
    start_time: DateTime<Utc>,
    remote_id: Option<String>,
    snapshot: SessionSnapshot,
}

/// Applies session writes to the remote store in order.
struct SessionWriter {
    remote: Arc<dyn RemoteStore>,
    shared: Arc<SessionShared>,
    events: Arc<EventManager>,
    clock: Arc<dyn Clock>,
    current: Option<WriterSession>,
    backlog: Vec<BacklogSession>,
}

impl SessionWriter {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionCommand>, token: CancellationToken) {
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
        tracing::debug!("Session writer stopped");
    }

    async fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Start { start_time } => {
                self.flush_backlog().await;
                self.current = Some(WriterSession {
                    start_time,
                    remote_id: None,
                });
                self.ensure_created().await;
            }
            SessionCommand::Adopt {
                remote_id,
                start_time,
            } => {
                *self.shared.remote_id.write().await = Some(remote_id.clone());
                self.current = Some(WriterSession {
                    start_time,
                    remote_id: Some(remote_id),
                });
            }
            SessionCommand::Refresh { duration_seconds } => {
                self.flush_backlog().await;
                if let Some(id) = self.ensure_created().await {
                    if let Err(e) = self
                        .remote
                        .update_work_session(&id, &SessionSnapshot::active(duration_seconds))
                        .await
                    {
                        self.report_failure("refresh_session", &e);
                    }
                }
            }
            SessionCommand::End {
                end_time,
                duration_seconds,
            } => {
                self.flush_backlog().await;
                let remote_id = self.ensure_created().await;
                let Some(session) = self.current.take() else {
                    return;
                };
                *self.shared.remote_id.write().await = None;

                let snapshot = SessionSnapshot::completed(duration_seconds, end_time);
                let mut pending = BacklogSession {
                    start_time: session.start_time,
                    remote_id,
                    snapshot,
                };
                if !self.write_backlog(&mut pending).await {
                    self.backlog.push(pending);
                }
            }
            SessionCommand::Close {
                remote_id,
                start_time,
                snapshot,
            } => {
                let mut pending = BacklogSession {
                    start_time,
                    remote_id: Some(remote_id),
                    snapshot,
                };
                if !self.write_backlog(&mut pending).await {
                    self.backlog.push(pending);
                }
            }
            SessionCommand::RecomputeStats => self.recompute_stats().await,
            SessionCommand::Settle { reply } => {
                let _ = reply.send(());
            }
        }
    }

    /// Create the current session remotely if that has not happened yet.
    async fn ensure_created(&mut self) -> Option<String> {
        let (start_time, existing) = match self.current {
            Some(ref session) => (session.start_time, session.remote_id.clone()),
            None => return None,
        };
        if existing.is_some() {
            return existing;
        }

        let id = match self.remote.create_work_session(start_time).await {
            Ok(id) => id,
            Err(RemoteError::Conflict { existing_id }) => {
                tracing::info!("Work session {} already active, continuing it", existing_id);
                existing_id
            }
            Err(e) => {
                self.report_failure("create_session", &e);
                return None;
            }
        };

        if let Some(ref mut session) = self.current {
            session.remote_id = Some(id.clone());
        }
        *self.shared.remote_id.write().await = Some(id.clone());
        Some(id)
    }

    /// Write a finished session. Returns false when it must be retried.
    async fn write_backlog(&self, pending: &mut BacklogSession) -> bool {
        let id = match pending.remote_id {
            Some(ref id) => id.clone(),
            None => match self.remote.create_work_session(pending.start_time).await {
                Ok(id) => {
                    pending.remote_id = Some(id.clone());
                    id
                }
                Err(RemoteError::Conflict { existing_id }) => {
                    tracing::warn!(
                        "Dropping unrecorded session from {}: session {} is active",
                        pending.start_time,
                        existing_id
                    );
                    return true;
                }
                Err(e) => {
                    self.report_failure("create_session", &e);
                    return false;
                }
            },
        };

        match self.remote.update_work_session(&id, &pending.snapshot).await {
            Ok(()) => true,
            Err(e) if e.is_not_found() => {
                tracing::warn!("Work session {} no longer exists remotely", id);
                true
            }
            Err(e) => {
                self.report_failure("end_session", &e);
                false
            }
        }
    }

    async fn flush_backlog(&mut self) {
        if self.backlog.is_empty() {
            return;
        }

        let mut remaining = Vec::new();
        for mut pending in std::mem::take(&mut self.backlog) {
            if !self.write_backlog(&mut pending).await {
                remaining.push(pending);
            }
        }
        self.backlog = remaining;
    }

    async fn recompute_stats(&self) {
        let now = self.clock.now();
        let filter = WorkSessionFilter::completed_since(start_of_week(now));

        match self.remote.list_work_sessions(&filter).await {
            Ok(sessions) => {
                let stats = PeriodStats::from_sessions(&sessions, now);
                *self.shared.stats.write().await = stats.clone();
                self.events
                    .emit_session(SessionEvent::stats_updated(stats, now));
            }
            Err(e) => tracing::warn!("Failed to recompute session stats: {}", e),
        }
    }

    fn report_failure(&self, operation: &str, error: &RemoteError) {
        tracing::warn!("Remote {} failed: {}", operation, error);
        self.events.emit_sync(SyncEvent::write_failed(
            None,
            operation,
            error,
            self.clock.now(),
        ));
    }
}
