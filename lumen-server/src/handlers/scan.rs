use axum::extract::{Path, Query, State};
use axum::Json;
use lumen_model::Stage;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::errors::{ApiError, ApiResult};
use crate::AppState;

pub async fn scan_status(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let snapshot = state.supervisor.snapshot();
    let history = state.catalog.list_scan_runs(10).await?;
    Ok(Json(json!({
        "running": snapshot.running,
        "current": snapshot.scan,
        "history": history,
    })))
}

pub async fn start_scan(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let scan_id = state.supervisor.trigger_scan().await?;
    info!(target: "api", %scan_id, "scan started");
    Ok(Json(json!({
        "status": "success",
        "scan_id": scan_id,
        "message": "Scan started",
    })))
}

pub async fn stop_scan(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let scan_id = state.supervisor.stop_scan()?;
    Ok(Json(json!({
        "status": "success",
        "scan_id": scan_id,
        "message": "Scan cancellation requested",
    })))
}

pub async fn clear_index(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    state.supervisor.clear_index().await?;
    info!(target: "api", "index cleared");
    Ok(Json(json!({
        "status": "success",
        "message": "Derived index cleared; trigger a scan to rebuild",
    })))
}

pub async fn pipeline_status(State(state): State<AppState>) -> Json<lumen_model::PipelineStats> {
    Json(state.supervisor.snapshot())
}

pub async fn pipeline_flow(State(state): State<AppState>) -> Json<lumen_model::PipelineFlow> {
    Json(state.supervisor.flow())
}

#[derive(Debug, Deserialize)]
pub struct FailuresQuery {
    pub limit: Option<i64>,
}

/// Failed items for one stage, addressable by filename and error.
pub async fn stage_failures(
    State(state): State<AppState>,
    Path(stage): Path<String>,
    Query(query): Query<FailuresQuery>,
) -> ApiResult<Json<Value>> {
    let stage = Stage::from_name(&stage).ok_or_else(|| {
        ApiError(lumen_core::IndexError::NotFound(format!(
            "unknown stage {stage}"
        )))
    })?;
    let failures: Vec<_> = state
        .catalog
        .failed_items(stage, query.limit.unwrap_or(100).clamp(1, 500))
        .await?
        .into_iter()
        .map(|(path, error)| json!({ "path": path, "error": error }))
        .collect();
    Ok(Json(json!({ "stage": stage.name(), "failures": failures })))
}
