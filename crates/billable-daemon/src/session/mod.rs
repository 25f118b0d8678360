pub mod coordinator;

pub use coordinator::{SessionTransition, SessionView, WorkSessionCoordinator};
