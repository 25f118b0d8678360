//! Read-through view of a single task's timer
//!
//! `TimerActions` holds no state of its own. Every read goes to the local
//! store and the duration clock; every action goes through the engine and
//! its errors come back untouched.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use billable_core::models::{format_duration, Timer, TimerState};

use crate::timer::store::Result;
use crate::timer::{ActionOutcome, TimerEngine};

/// What a presentation layer should show for a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayState {
    Idle,
    Running,
    Paused,
    Stopped,
}

impl From<TimerState> for DisplayState {
    fn from(state: TimerState) -> Self {
        match state {
            TimerState::Running => DisplayState::Running,
            TimerState::Paused => DisplayState::Paused,
            TimerState::Stopped => DisplayState::Stopped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerView {
    pub task_id: String,
    pub project_id: String,
    pub state: DisplayState,
    pub elapsed_seconds: u64,
    pub elapsed: String,
    pub can_start: bool,
    pub can_pause: bool,
    pub can_resume: bool,
    pub can_stop: bool,
    pub busy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Local changes the remote store has not confirmed yet.
    pub unsynced: bool,
}

impl TimerView {
    /// Build a view from a timer record (or its absence) at `now`.
    pub fn build(
        task_id: &str,
        project_id: &str,
        timer: Option<&Timer>,
        busy: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let elapsed_seconds = timer.map(|t| t.elapsed_at(now)).unwrap_or(0);

        Self {
            task_id: task_id.to_string(),
            project_id: timer
                .map(|t| t.project_id.clone())
                .unwrap_or_else(|| project_id.to_string()),
            state: timer.map(|t| t.state.into()).unwrap_or(DisplayState::Idle),
            elapsed_seconds,
            elapsed: format_duration(elapsed_seconds),
            can_start: !busy && timer.is_none(),
            can_pause: !busy && timer.is_some_and(Timer::can_pause),
            can_resume: !busy && timer.is_some_and(Timer::can_resume),
            can_stop: !busy && timer.is_some_and(Timer::can_stop),
            busy,
            remote_id: timer.and_then(|t| t.id.clone()),
            unsynced: timer.is_some_and(|t| t.dirty),
        }
    }

    pub fn from_timer(timer: &Timer, busy: bool, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self::build(&timer.task_id, &timer.project_id, Some(timer), busy, now)
    }
}

/// Timer controls bound to one (task, project) pair.
pub struct TimerActions {
    engine: Arc<TimerEngine>,
    task_id: String,
    project_id: String,
}

impl TimerActions {
    pub fn new(
        engine: Arc<TimerEngine>,
        task_id: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            task_id: task_id.into(),
            project_id: project_id.into(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn view(&self) -> TimerView {
        let timer = self.engine.timer(&self.task_id).await;
        TimerView::build(
            &self.task_id,
            &self.project_id,
            timer.as_ref(),
            self.engine.is_busy(&self.task_id),
            self.engine.now(),
        )
    }

    pub async fn display_state(&self) -> DisplayState {
        self.view().await.state
    }

    pub async fn elapsed_now(&self) -> u64 {
        self.view().await.elapsed_seconds
    }

    pub async fn can_start(&self) -> bool {
        self.view().await.can_start
    }

    pub async fn can_pause(&self) -> bool {
        self.view().await.can_pause
    }

    pub async fn can_resume(&self) -> bool {
        self.view().await.can_resume
    }

    pub async fn can_stop(&self) -> bool {
        self.view().await.can_stop
    }

    pub async fn start(&self) -> Result<ActionOutcome> {
        self.engine.start(&self.task_id, &self.project_id).await
    }

    pub async fn pause(&self) -> Result<ActionOutcome> {
        self.engine.pause(&self.task_id).await
    }

    pub async fn resume(&self) -> Result<ActionOutcome> {
        self.engine.resume(&self.task_id).await
    }

    pub async fn stop(&self) -> Result<ActionOutcome> {
        self.engine.stop(&self.task_id).await
    }

    pub async fn reset(&self) -> Result<ActionOutcome> {
        self.engine.reset(&self.task_id).await
    }
}
