pub mod syncer;

pub use syncer::{HeartbeatReport, RemoteSyncer, SyncError, SyncHealth, SyncStatus};
