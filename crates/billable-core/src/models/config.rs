//! Application configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub version: String,
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    pub socket_path: String,
    pub log_level: String,
}

/// Where the remote system of record lives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteConfig {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub timeout_secs: u64,
}

/// Cadence of the background ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    pub heartbeat_interval_secs: u64,
    pub session_refresh_interval_secs: u64,
    pub cache_flush_interval_secs: u64,
    pub display_tick_millis: u64,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.daemon.validate()?;
        self.remote.validate()?;
        self.sync.validate()?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0.0".to_string(),
            daemon: DaemonConfig::default(),
            remote: RemoteConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Validate daemon configuration
    pub fn validate(&self) -> Result<()> {
        if self.socket_path.trim().is_empty() {
            return Err(Error::Validation("Socket path cannot be empty".to_string()));
        }

        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(Error::Validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.log_level,
                valid_log_levels.join(", ")
            )));
        }

        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/billable.sock".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref url) = self.base_url {
            let url = url.trim();
            if url.is_empty() {
                return Err(Error::Validation("Remote URL cannot be empty".to_string()));
            }
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::Validation(format!(
                    "Remote URL must start with http:// or https://, got '{}'",
                    url
                )));
            }
        }

        if self.timeout_secs == 0 {
            return Err(Error::Validation(
                "Remote timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_token: None,
            timeout_secs: 10,
        }
    }
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_secs == 0 {
            return Err(Error::Validation(
                "Heartbeat interval must be greater than 0".to_string(),
            ));
        }

        if self.session_refresh_interval_secs == 0 {
            return Err(Error::Validation(
                "Session refresh interval must be greater than 0".to_string(),
            ));
        }

        if self.cache_flush_interval_secs == 0 {
            return Err(Error::Validation(
                "Cache flush interval must be greater than 0".to_string(),
            ));
        }

        // Sub-100ms display ticks only burn CPU
        if self.display_tick_millis < 100 {
            return Err(Error::Validation(format!(
                "Display tick too short ({} ms, min 100 ms)",
                self.display_tick_millis
            )));
        }

        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 300,    // 5 minutes
            session_refresh_interval_secs: 60,
            cache_flush_interval_secs: 30,
            display_tick_millis: 1000,
        }
    }
}
