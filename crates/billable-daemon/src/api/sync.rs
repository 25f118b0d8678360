use serde_json::Value;
use std::sync::Arc;

use super::Result;
use crate::timer::TimerEngine;

/// Sync health plus the schedules currently running
pub async fn status(engine: &Arc<TimerEngine>, _params: Option<Value>) -> Result<Value> {
    let status = engine.syncer().status().await;

    let mut value = serde_json::to_value(&status)?;
    if let Value::Object(ref mut map) = value {
        map.insert(
            "schedules".to_string(),
            serde_json::to_value(engine.schedule_state())?,
        );
        map.insert(
            "last_rehydrate".to_string(),
            serde_json::to_value(engine.last_rehydrate())?,
        );
    }

    Ok(value)
}

/// Run a heartbeat now. Null when one is already in flight.
pub async fn heartbeat(engine: &Arc<TimerEngine>, _params: Option<Value>) -> Result<Value> {
    let report = engine.heartbeat().await;
    Ok(serde_json::to_value(&report)?)
}
