use serde_json::Value;
use std::sync::Arc;

use super::Result;
use crate::timer::TimerEngine;

/// Pause every running timer and close the work session
pub async fn sign_out(engine: &Arc<TimerEngine>, _params: Option<Value>) -> Result<Value> {
    let report = engine.sign_out().await;
    Ok(serde_json::to_value(&report)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_api;

    #[tokio::test]
    async fn test_sign_out() {
        let api = test_api();
        api.engine.start("task-a", "proj-1").await.unwrap();

        let result = sign_out(&api.engine, None).await.unwrap();
        assert_eq!(result["paused_tasks"][0], "task-a");
        assert_eq!(result["session_ended"], true);
        assert_eq!(result["sync_health"]["state"], "healthy");
    }
}
