//! Timer API methods

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{parse, Result};
use crate::facade::TimerView;
use crate::timer::{ActionOutcome, TimerEngine};

#[derive(Debug, Deserialize)]
struct StartParams {
    task_id: String,
    project_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskParams {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct GetParams {
    task_id: String,
    #[serde(default)]
    project_id: Option<String>,
}

/// `project_id` names the project for the idle view once a timer is gone.
fn outcome_json(
    engine: &TimerEngine,
    task_id: &str,
    project_id: Option<&str>,
    outcome: ActionOutcome,
) -> Result<Value> {
    let busy = engine.is_busy(task_id);
    let view = match outcome.timer {
        Some(ref timer) => TimerView::from_timer(timer, busy, engine.now()),
        None => TimerView::build(
            task_id,
            project_id.unwrap_or_default(),
            None,
            busy,
            engine.now(),
        ),
    };

    Ok(json!({
        "timer": serde_json::to_value(&view)?,
        "warning": outcome.warning,
    }))
}

/// Start (or resume) a task's timer
pub async fn start(engine: &Arc<TimerEngine>, params: Option<Value>) -> Result<Value> {
    let params: StartParams = parse(params)?;

    let outcome = engine.start(&params.task_id, &params.project_id).await?;
    outcome_json(engine, &params.task_id, Some(&params.project_id), outcome)
}

pub async fn pause(engine: &Arc<TimerEngine>, params: Option<Value>) -> Result<Value> {
    let params: TaskParams = parse(params)?;

    let outcome = engine.pause(&params.task_id).await?;
    outcome_json(engine, &params.task_id, None, outcome)
}

pub async fn resume(engine: &Arc<TimerEngine>, params: Option<Value>) -> Result<Value> {
    let params: TaskParams = parse(params)?;

    let outcome = engine.resume(&params.task_id).await?;
    outcome_json(engine, &params.task_id, None, outcome)
}

pub async fn stop(engine: &Arc<TimerEngine>, params: Option<Value>) -> Result<Value> {
    let params: TaskParams = parse(params)?;

    let outcome = engine.stop(&params.task_id).await?;
    outcome_json(engine, &params.task_id, None, outcome)
}

/// Reset a task's timer back to idle
pub async fn reset(engine: &Arc<TimerEngine>, params: Option<Value>) -> Result<Value> {
    let params: TaskParams = parse(params)?;

    let project_id = engine.timer(&params.task_id).await.map(|t| t.project_id);
    let outcome = engine.reset(&params.task_id).await?;
    outcome_json(engine, &params.task_id, project_id.as_deref(), outcome)
}

/// Get the view for one task; idle when it has no timer
pub async fn get(engine: &Arc<TimerEngine>, params: Option<Value>) -> Result<Value> {
    let params: GetParams = parse(params)?;

    let timer = engine.timer(&params.task_id).await;
    let view = TimerView::build(
        &params.task_id,
        params.project_id.as_deref().unwrap_or_default(),
        timer.as_ref(),
        engine.is_busy(&params.task_id),
        engine.now(),
    );

    Ok(serde_json::to_value(&view)?)
}

/// List every non-idle timer
pub async fn list(engine: &Arc<TimerEngine>, _params: Option<Value>) -> Result<Value> {
    let now = engine.now();
    let views: Vec<TimerView> = engine
        .timers()
        .await
        .iter()
        .map(|timer| TimerView::from_timer(timer, engine.is_busy(&timer.task_id), now))
        .collect();

    Ok(serde_json::to_value(&views)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::tests::test_api;
    use crate::facade::DisplayState;

    fn view(result: &Value) -> TimerView {
        serde_json::from_value(result["timer"].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_start_pause_resume() {
        let api = test_api();

        let result = start(
            &api.engine,
            Some(json!({"task_id": "task-a", "project_id": "proj-1"})),
        )
        .await
        .unwrap();
        assert_eq!(view(&result).state, DisplayState::Running);
        assert!(result["warning"].is_null());

        api.clock.advance_secs(42);
        let result = pause(&api.engine, Some(json!({"task_id": "task-a"})))
            .await
            .unwrap();
        let paused = view(&result);
        assert_eq!(paused.state, DisplayState::Paused);
        assert_eq!(paused.elapsed_seconds, 42);
        assert_eq!(paused.project_id, "proj-1");

        let result = resume(&api.engine, Some(json!({"task_id": "task-a"})))
            .await
            .unwrap();
        assert_eq!(view(&result).state, DisplayState::Running);
        assert_eq!(view(&result).project_id, "proj-1");

        let result = stop(&api.engine, Some(json!({"task_id": "task-a"})))
            .await
            .unwrap();
        let stopped = view(&result);
        assert_eq!(stopped.state, DisplayState::Stopped);
        assert_eq!(stopped.project_id, "proj-1");
        assert!(!stopped.busy);
    }

    #[tokio::test]
    async fn test_start_warning_when_remote_down() {
        let api = test_api();
        api.remote.set_fail_writes(true).await;

        let result = start(
            &api.engine,
            Some(json!({"task_id": "task-a", "project_id": "proj-1"})),
        )
        .await
        .unwrap();
        assert_eq!(view(&result).state, DisplayState::Running);
        assert!(view(&result).unsynced);
        assert!(result["warning"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_reset_returns_idle_view() {
        let api = test_api();
        start(
            &api.engine,
            Some(json!({"task_id": "task-a", "project_id": "proj-1"})),
        )
        .await
        .unwrap();

        let result = reset(&api.engine, Some(json!({"task_id": "task-a"})))
            .await
            .unwrap();
        let idle = view(&result);
        assert_eq!(idle.state, DisplayState::Idle);
        assert_eq!(idle.project_id, "proj-1");
        assert!(idle.can_start);
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let api = test_api();

        let idle = get(
            &api.engine,
            Some(json!({"task_id": "task-z", "project_id": "proj-9"})),
        )
        .await
        .unwrap();
        assert_eq!(idle["state"], "idle");
        assert_eq!(idle["project_id"], "proj-9");

        for task in ["task-a", "task-b"] {
            start(
                &api.engine,
                Some(json!({"task_id": task, "project_id": "proj-1"})),
            )
            .await
            .unwrap();
        }
        stop(&api.engine, Some(json!({"task_id": "task-b"})))
            .await
            .unwrap();

        let listed: Vec<TimerView> =
            serde_json::from_value(list(&api.engine, None).await.unwrap()).unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].state, DisplayState::Running);
        assert_eq!(listed[1].state, DisplayState::Stopped);
    }
}
