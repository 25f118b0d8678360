pub mod engine;
pub mod events;
pub mod store;

pub use engine::{ActionOutcome, RehydrateReport, ScheduleState, SignOutReport, TimerEngine};
pub use events::{TimerEvent, TimerEventType};
pub use store::{LocalTimerStore, StartOutcome, TimerError};
