//! Configuration manager

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use billable_core::{
    models::{Config, RemoteConfig, SyncConfig},
    storage::{init_config_dir, ConfigStorage},
    Result as CoreResult,
};

/// Config manager error
#[derive(Debug, thiserror::Error)]
pub enum ConfigManagerError {
    #[error("Storage error: {0}")]
    Storage(#[from] billable_core::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigManagerError>;

/// Partial update of the `sync` section.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct SyncConfigUpdate {
    pub heartbeat_interval_secs: Option<u64>,
    pub session_refresh_interval_secs: Option<u64>,
    pub cache_flush_interval_secs: Option<u64>,
    pub display_tick_millis: Option<u64>,
}

/// Partial update of the `remote` section.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct RemoteConfigUpdate {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Manages application configuration
pub struct ConfigManager {
    storage: ConfigStorage,
    config: Arc<RwLock<Config>>,
}

impl ConfigManager {
    pub fn new() -> CoreResult<Self> {
        Self::with_dir(init_config_dir()?)
    }

    /// Load or create the config in an explicit directory.
    pub fn with_dir(config_dir: PathBuf) -> CoreResult<Self> {
        let storage = ConfigStorage::new(config_dir);
        let config = storage.load()?;

        Ok(Self {
            storage,
            config: Arc::new(RwLock::new(config)),
        })
    }

    pub async fn get(&self) -> Config {
        self.config.read().await.clone()
    }

    pub async fn update(&self, config: Config) -> Result<Config> {
        config
            .validate()
            .map_err(|e| ConfigManagerError::Invalid(e.to_string()))?;

        self.storage.save(&config)?;

        {
            let mut current = self.config.write().await;
            *current = config.clone();
        }

        tracing::info!("Configuration updated");
        Ok(config)
    }

    pub async fn update_daemon_config(
        &self,
        socket_path: Option<String>,
        log_level: Option<String>,
    ) -> Result<Config> {
        let mut config = self.get().await;

        if let Some(path) = socket_path {
            config.daemon.socket_path = path;
        }

        if let Some(level) = log_level {
            config.daemon.log_level = level;
        }

        self.update(config).await
    }

    /// Change tick cadences. Takes effect the next time a schedule starts.
    pub async fn update_sync_config(&self, update: SyncConfigUpdate) -> Result<Config> {
        let mut config = self.get().await;
        let sync: &mut SyncConfig = &mut config.sync;

        if let Some(secs) = update.heartbeat_interval_secs {
            sync.heartbeat_interval_secs = secs;
        }

        if let Some(secs) = update.session_refresh_interval_secs {
            sync.session_refresh_interval_secs = secs;
        }

        if let Some(secs) = update.cache_flush_interval_secs {
            sync.cache_flush_interval_secs = secs;
        }

        if let Some(millis) = update.display_tick_millis {
            sync.display_tick_millis = millis;
        }

        self.update(config).await
    }

    /// Change the remote endpoint. Takes effect on daemon restart.
    /// An empty `base_url` or `api_token` clears it.
    pub async fn update_remote_config(&self, update: RemoteConfigUpdate) -> Result<Config> {
        let mut config = self.get().await;
        let remote: &mut RemoteConfig = &mut config.remote;

        if let Some(url) = update.base_url {
            remote.base_url = (!url.trim().is_empty()).then_some(url);
        }

        if let Some(token) = update.api_token {
            remote.api_token = (!token.is_empty()).then_some(token);
        }

        if let Some(secs) = update.timeout_secs {
            remote.timeout_secs = secs;
        }

        self.update(config).await
    }

    pub async fn reset_to_default(&self) -> Result<Config> {
        let config = Config::default();
        self.update(config).await
    }
}
