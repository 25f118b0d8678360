//! API handlers

pub mod account;
pub mod config;
pub mod session;
pub mod sync;
pub mod timer;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use billable_core::rpc::{APPLICATION_ERROR, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

use crate::config::{ConfigManager, ConfigManagerError};
use crate::event_manager::EventManager;
use crate::events::DaemonEvent;
use crate::timer::{TimerEngine, TimerError};

/// API error
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("{0}")]
    Timer(#[from] TimerError),

    #[error("{0}")]
    Config(#[from] ConfigManagerError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// JSON-RPC error code for this error.
    pub fn code(&self) -> i32 {
        match self {
            ApiError::MethodNotFound(_) => METHOD_NOT_FOUND,
            ApiError::InvalidParams(_) | ApiError::Json(_) => INVALID_PARAMS,
            ApiError::Timer(TimerError::Storage(_)) | ApiError::Timer(TimerError::JoinError(_)) => {
                INTERNAL_ERROR
            }
            ApiError::Timer(_) | ApiError::Config(_) => APPLICATION_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Deserialize required params.
pub(crate) fn parse<T: DeserializeOwned>(params: Option<Value>) -> Result<T> {
    let params = params.ok_or_else(|| ApiError::InvalidParams("Missing params".to_string()))?;
    Ok(serde_json::from_value(params)?)
}

/// Deserialize optional params, falling back to defaults.
pub(crate) fn parse_or_default<T: DeserializeOwned + Default>(params: Option<Value>) -> Result<T> {
    match params {
        None | Some(Value::Null) => Ok(T::default()),
        Some(params) => Ok(serde_json::from_value(params)?),
    }
}

/// Main API handler that routes requests to appropriate handlers
pub struct ApiHandler {
    event_manager: Arc<EventManager>,
    engine: Arc<TimerEngine>,
    config_manager: Arc<ConfigManager>,
}

impl ApiHandler {
    pub fn new(
        event_manager: Arc<EventManager>,
        engine: Arc<TimerEngine>,
        config_manager: Arc<ConfigManager>,
    ) -> Self {
        Self {
            event_manager,
            engine,
            config_manager,
        }
    }

    pub async fn handle(&self, method: &str, params: Option<Value>) -> Result<Value> {
        match method {
            // Timer methods
            "timer.start" => timer::start(&self.engine, params).await,
            "timer.pause" => timer::pause(&self.engine, params).await,
            "timer.resume" => timer::resume(&self.engine, params).await,
            "timer.stop" => timer::stop(&self.engine, params).await,
            "timer.reset" => timer::reset(&self.engine, params).await,
            "timer.get" => timer::get(&self.engine, params).await,
            "timer.list" => timer::list(&self.engine, params).await,

            // Session methods
            "session.get" => session::get(&self.engine, params).await,
            "session.stats" => session::stats(&self.engine, params).await,

            // Sync methods
            "sync.status" => sync::status(&self.engine, params).await,
            "sync.heartbeat" => sync::heartbeat(&self.engine, params).await,

            // Account methods
            "account.sign_out" => account::sign_out(&self.engine, params).await,

            // Config methods
            "config.get" => config::get(&self.config_manager, params).await,
            "config.update_sync" => config::update_sync(&self.config_manager, params).await,
            "config.update_remote" => config::update_remote(&self.config_manager, params).await,
            "config.reset" => config::reset(&self.config_manager, params).await,

            // Unknown method
            _ => Err(ApiError::MethodNotFound(method.to_string())),
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<DaemonEvent> {
        self.event_manager.subscribe()
    }
}
