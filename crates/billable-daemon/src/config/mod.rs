pub mod manager;

pub use manager::{ConfigManager, ConfigManagerError, RemoteConfigUpdate, SyncConfigUpdate};
