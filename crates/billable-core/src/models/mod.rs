pub mod config;
pub mod stats;
pub mod time_entry;
pub mod timer;
pub mod work_session;

pub use config::{Config, DaemonConfig, RemoteConfig, SyncConfig};
pub use stats::PeriodStats;
pub use time_entry::{format_duration, NewTimeEntry, TimeEntry, TimeEntryFilter, TimerSnapshot};
pub use timer::{Timer, TimerAction, TimerState};
pub use work_session::{SessionSnapshot, SessionStatus, WorkSession, WorkSessionFilter};
