use serde_json::Value;
use std::sync::Arc;

use super::{parse, Result};
use crate::config::{ConfigManager, RemoteConfigUpdate, SyncConfigUpdate};

pub async fn get(manager: &Arc<ConfigManager>, _params: Option<Value>) -> Result<Value> {
    let config = manager.get().await;
    Ok(serde_json::to_value(&config)?)
}

pub async fn update_sync(manager: &Arc<ConfigManager>, params: Option<Value>) -> Result<Value> {
    let update: SyncConfigUpdate = parse(params)?;

    let config = manager.update_sync_config(update).await?;
    Ok(serde_json::to_value(&config)?)
}

pub async fn update_remote(manager: &Arc<ConfigManager>, params: Option<Value>) -> Result<Value> {
    let update: RemoteConfigUpdate = parse(params)?;

    let config = manager.update_remote_config(update).await?;
    Ok(serde_json::to_value(&config)?)
}

pub async fn reset(manager: &Arc<ConfigManager>, _params: Option<Value>) -> Result<Value> {
    let config = manager.reset_to_default().await?;
    Ok(serde_json::to_value(&config)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn manager(dir: &TempDir) -> Arc<ConfigManager> {
        Arc::new(ConfigManager::with_dir(dir.path().to_path_buf()).unwrap())
    }

    #[tokio::test]
    async fn test_get_config() {
        let dir = TempDir::new().unwrap();
        let result = get(&manager(&dir), None).await.unwrap();
        assert!(result.get("version").is_some());
        assert_eq!(result["remote"]["timeout_secs"], 10);
    }

    #[tokio::test]
    async fn test_update_sync() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let result = update_sync(&manager, Some(json!({"session_refresh_interval_secs": 30})))
            .await
            .unwrap();
        assert_eq!(result["sync"]["session_refresh_interval_secs"], 30);

        let err = update_sync(&manager, Some(json!({"heartbeat_interval_secs": 0})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), -32000);
    }

    #[tokio::test]
    async fn test_update_remote_then_reset() {
        let dir = TempDir::new().unwrap();
        let manager = manager(&dir);

        let result = update_remote(
            &manager,
            Some(json!({"base_url": "https://billing.example.com"})),
        )
        .await
        .unwrap();
        assert_eq!(result["remote"]["base_url"], "https://billing.example.com");

        let result = reset(&manager, None).await.unwrap();
        assert!(result["remote"]["base_url"].is_null());
    }
}
