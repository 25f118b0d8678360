//! Work session API methods

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{parse_or_default, Result};
use crate::timer::TimerEngine;

#[derive(Debug, Default, Deserialize)]
struct StatsParams {
    #[serde(default)]
    refresh: bool,
}

/// Active session (if any) and the latest period statistics
pub async fn get(engine: &Arc<TimerEngine>, _params: Option<Value>) -> Result<Value> {
    let sessions = engine.sessions();
    let active = sessions.active_session().await;
    let stats = sessions.stats().await;

    Ok(json!({
        "active": active,
        "stats": stats,
    }))
}

pub async fn stats(engine: &Arc<TimerEngine>, params: Option<Value>) -> Result<Value> {
    let params: StatsParams = parse_or_default(params)?;

    let stats = if params.refresh {
        engine.sessions().refresh_stats().await
    } else {
        engine.sessions().stats().await
    };

    Ok(serde_json::to_value(&stats)?)
}
