//! Billable daemon library
//!
//! Local-first timer engine: the local timer table, remote sync, the derived
//! work session and the JSON-RPC surface the daemon serves.

pub mod api;
pub mod config;
pub mod event_manager;
pub mod events;
pub mod facade;
pub mod ipc;
pub mod remote;
pub mod schedule;
pub mod session;
pub mod sync;
pub mod timer;

pub use api::ApiHandler;
pub use config::ConfigManager;
pub use event_manager::EventManager;
pub use facade::{DisplayState, TimerActions, TimerView};
pub use ipc::{IpcServer, Notification, Request, Response};
pub use remote::{HttpRemoteStore, InMemoryRemoteStore, RemoteStore};
pub use session::WorkSessionCoordinator;
pub use sync::RemoteSyncer;
pub use timer::{LocalTimerStore, TimerEngine, TimerEvent};
