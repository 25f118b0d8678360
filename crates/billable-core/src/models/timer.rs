use crate::{clock, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TimeEntry, TimerSnapshot};

/// Local timer for a single task.
///
/// A task with no `Timer` is idle. While `state` is `Running`,
/// `running_since` holds the checkpoint from which time is accruing;
/// every transition away from `Running` banks that time into
/// `accumulated_seconds` (whole seconds) and `carry_millis` (remainder).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timer {
    /// Remote time entry id, once the entry has been created.
    pub id: Option<String>,
    pub task_id: String,
    pub project_id: String,
    pub state: TimerState,
    pub accumulated_seconds: u64,
    #[serde(default)]
    pub carry_millis: u32,
    pub running_since: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Bumped on every local transition.
    #[serde(default)]
    pub revision: u64,
    /// Local changes not yet confirmed by the remote store.
    #[serde(default)]
    pub dirty: bool,
    pub last_local_persist_at: Option<DateTime<Utc>>,
    pub last_remote_persist_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerState {
    Running,
    Paused,
    Stopped,
}

/// User-facing timer actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimerAction {
    Start,
    Pause,
    Resume,
    Stop,
    Reset,
}

impl Timer {
    /// Create a running timer for a task that has never been timed.
    pub fn start(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            task_id: task_id.into(),
            project_id: project_id.into(),
            state: TimerState::Running,
            accumulated_seconds: 0,
            carry_millis: 0,
            running_since: Some(now),
            started_at: now,
            ended_at: None,
            revision: 1,
            dirty: true,
            last_local_persist_at: None,
            last_remote_persist_at: None,
        }
    }

    /// Rebuild a timer from its remote time entry.
    ///
    /// A running entry keeps accruing from the moment it was last written,
    /// so time spent with no client attached is not lost.
    pub fn from_entry(entry: &TimeEntry, now: DateTime<Utc>) -> Self {
        let running_since = entry
            .is_running()
            .then(|| entry.updated_at.unwrap_or(now));

        Self {
            id: Some(entry.id.clone()),
            task_id: entry.task_id.clone(),
            project_id: entry.project_id.clone(),
            state: entry.timer_status,
            accumulated_seconds: entry.duration_seconds,
            carry_millis: 0,
            running_since,
            started_at: entry.start_time,
            ended_at: entry.end_time,
            revision: 0,
            dirty: false,
            last_local_persist_at: None,
            last_remote_persist_at: entry.updated_at,
        }
    }

    pub fn pause(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.can_pause() {
            return Err(Error::InvalidData("Timer is not running".to_string()));
        }

        self.bank(now);
        self.state = TimerState::Paused;
        self.touch();
        Ok(())
    }

    /// Resume a paused or stopped timer.
    pub fn resume(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.can_resume() {
            return Err(Error::InvalidData(
                "Timer is not paused or stopped".to_string(),
            ));
        }

        self.running_since = Some(now);
        self.ended_at = None;
        self.state = TimerState::Running;
        self.touch();
        Ok(())
    }

    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.can_stop() {
            return Err(Error::InvalidData("Timer is already stopped".to_string()));
        }

        if self.is_running() {
            self.bank(now);
        }
        self.state = TimerState::Stopped;
        self.ended_at = Some(now);
        self.touch();
        Ok(())
    }

    /// Take over an entry that already existed remotely for this task.
    ///
    /// The remote banked duration replaces the local one; time accrued
    /// locally since `running_since` keeps counting on top of it.
    pub fn adopt_entry(&mut self, entry_id: String, banked_seconds: u64) {
        self.id = Some(entry_id);
        self.accumulated_seconds = banked_seconds;
        self.carry_millis = 0;
        self.touch();
    }

    pub fn elapsed_at(&self, now: DateTime<Utc>) -> u64 {
        clock::elapsed_at(self, now)
    }

    /// Full state to send to the remote store. Never a delta.
    pub fn snapshot(&self, now: DateTime<Utc>) -> TimerSnapshot {
        TimerSnapshot {
            duration_seconds: self.elapsed_at(now),
            status: self.state,
            end_time: self.ended_at,
            captured_at: now,
            revision: self.revision,
        }
    }

    /// Record a successful remote write. Returns true when the write carried
    /// the current revision and the timer is now clean.
    pub fn mark_synced(&mut self, revision: u64, at: DateTime<Utc>) -> bool {
        self.last_remote_persist_at = Some(at);
        if revision >= self.revision {
            self.dirty = false;
            return true;
        }
        false
    }

    pub fn can_pause(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn can_resume(&self) -> bool {
        matches!(self.state, TimerState::Paused | TimerState::Stopped)
    }

    pub fn can_stop(&self) -> bool {
        matches!(self.state, TimerState::Running | TimerState::Paused)
    }

    pub fn is_running(&self) -> bool {
        self.state == TimerState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state == TimerState::Paused
    }

    pub fn is_stopped(&self) -> bool {
        self.state == TimerState::Stopped
    }

    /// Running or paused.
    pub fn is_live(&self) -> bool {
        self.can_stop()
    }

    fn bank(&mut self, now: DateTime<Utc>) {
        if let Some(since) = self.running_since.take() {
            let total = u64::from(self.carry_millis) + clock::millis_between(since, now);
            self.accumulated_seconds += total / 1000;
            self.carry_millis = (total % 1000) as u32;
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
        self.dirty = true;
    }
}

impl TimerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerState::Running => "running",
            TimerState::Paused => "paused",
            TimerState::Stopped => "stopped",
        }
    }
}

impl TimerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerAction::Start => "start",
            TimerAction::Pause => "pause",
            TimerAction::Resume => "resume",
            TimerAction::Stop => "stop",
            TimerAction::Reset => "reset",
        }
    }
}

impl std::fmt::Display for TimerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_start_timer() {
        let timer = Timer::start("task-a", "proj-1", at(0));
        assert!(timer.is_running());
        assert_eq!(timer.running_since, Some(at(0)));
        assert_eq!(timer.accumulated_seconds, 0);
        assert!(timer.id.is_none());
        assert!(timer.dirty);
    }

    #[test]
    fn test_pause_banks_elapsed() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        timer.pause(at(10)).unwrap();

        assert!(timer.is_paused());
        assert_eq!(timer.accumulated_seconds, 10);
        assert!(timer.running_since.is_none());
    }

    #[test]
    fn test_pause_resume_stop_scenario() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        timer.pause(at(10)).unwrap();
        timer.resume(at(10)).unwrap();
        timer.stop(at(15)).unwrap();

        assert!(timer.is_stopped());
        assert_eq!(timer.accumulated_seconds, 15);
        assert_eq!(timer.ended_at, Some(at(15)));

        let snapshot = timer.snapshot(at(99));
        assert_eq!(snapshot.duration_seconds, 15);
        assert_eq!(snapshot.status, TimerState::Stopped);
        assert_eq!(snapshot.end_time, Some(at(15)));
    }

    #[test]
    fn test_many_cycles_do_not_drift() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        let mut now = at(0);

        // 100 cycles of 1.7s running with 3s paused in between
        for _ in 0..100 {
            now += Duration::milliseconds(1700);
            timer.pause(now).unwrap();
            now += Duration::seconds(3);
            timer.resume(now).unwrap();
        }
        timer.pause(now).unwrap();

        // 170s of real running time
        assert!(timer.accumulated_seconds.abs_diff(170) <= 1);
    }

    #[test]
    fn test_illegal_transitions() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        assert!(timer.resume(at(1)).is_err());

        timer.pause(at(1)).unwrap();
        assert!(timer.pause(at(2)).is_err());

        timer.stop(at(3)).unwrap();
        assert!(timer.stop(at(4)).is_err());
        assert!(timer.pause(at(4)).is_err());
    }

    #[test]
    fn test_stopped_is_resumable() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        timer.stop(at(20)).unwrap();
        assert!(timer.can_resume());

        timer.resume(at(100)).unwrap();
        assert!(timer.is_running());
        assert!(timer.ended_at.is_none());
        assert_eq!(timer.elapsed_at(at(105)), 25);
    }

    #[test]
    fn test_stop_from_paused_keeps_banked() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        timer.pause(at(7)).unwrap();
        timer.stop(at(50)).unwrap();
        assert_eq!(timer.accumulated_seconds, 7);
    }

    #[test]
    fn test_revision_and_sync_marking() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        let started = timer.revision;
        timer.pause(at(1)).unwrap();
        assert_eq!(timer.revision, started + 1);

        assert!(!timer.mark_synced(started, at(2)));
        assert!(timer.dirty);

        assert!(timer.mark_synced(timer.revision, at(3)));
        assert!(!timer.dirty);
        assert_eq!(timer.last_remote_persist_at, Some(at(3)));
    }

    #[test]
    fn test_adopt_entry_replaces_banked_duration() {
        let mut timer = Timer::start("task-a", "proj-1", at(0));
        timer.adopt_entry("entry-1".to_string(), 120);

        assert_eq!(timer.id.as_deref(), Some("entry-1"));
        assert_eq!(timer.elapsed_at(at(5)), 125);
    }

    #[test]
    fn test_from_running_entry_keeps_accruing() {
        let entry = TimeEntry {
            id: "entry-1".to_string(),
            task_id: "task-a".to_string(),
            project_id: "proj-1".to_string(),
            start_time: at(0),
            end_time: None,
            duration_seconds: 300,
            timer_status: TimerState::Running,
            updated_at: Some(at(300)),
        };

        let timer = Timer::from_entry(&entry, at(1000));
        assert!(timer.is_running());
        assert!(!timer.dirty);
        assert_eq!(timer.elapsed_at(at(360)), 360);
    }

    #[test]
    fn test_serialization_roundtrip_defaults() {
        let json = r#"{
            "id": null,
            "task_id": "task-a",
            "project_id": "proj-1",
            "state": "paused",
            "accumulated_seconds": 42,
            "running_since": null,
            "started_at": "2024-01-01T00:00:00Z",
            "ended_at": null,
            "last_local_persist_at": null,
            "last_remote_persist_at": null
        }"#;

        let timer: Timer = serde_json::from_str(json).unwrap();
        assert_eq!(timer.state, TimerState::Paused);
        assert_eq!(timer.carry_millis, 0);
        assert_eq!(timer.revision, 0);
        assert!(!timer.dirty);
    }
}
