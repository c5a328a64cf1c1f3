use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use lumen_core::{IndexError, PhotoFilter};
use lumen_model::PersonId;
use serde::Deserialize;
use serde_json::json;

use crate::errors::{ApiError, ApiResult};
use crate::AppState;

pub async fn list_persons(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.list_persons().await?))
}

pub async fn person_detail(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<impl IntoResponse> {
    let person = state
        .catalog
        .get_person(PersonId(id))
        .await?
        .ok_or_else(|| ApiError(IndexError::NotFound("person not found".into())))?;
    Ok(Json(person))
}

pub async fn person_photos(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(mut filter): Query<PhotoFilter>,
) -> ApiResult<impl IntoResponse> {
    filter.person_id = Some(id);
    Ok(Json(state.catalog.list_photos(&filter).await?))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub name: String,
}

pub async fn rename_person(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<RenameRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .catalog
        .rename_person(PersonId(id), request.name.trim())
        .await?;
    Ok(Json(json!({ "status": "success" })))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source: i64,
    pub target: i64,
}

pub async fn merge_persons(
    State(state): State<AppState>,
    Json(request): Json<MergeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.source == request.target {
        return Err(ApiError(IndexError::Internal(
            "cannot merge a person into itself".into(),
        )));
    }
    state
        .catalog
        .merge_persons(PersonId(request.source), PersonId(request.target))
        .await?;
    Ok(Json(json!({ "status": "success" })))
}

pub async fn list_events(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.list_events().await?))
}

pub async fn event_photos(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(mut filter): Query<PhotoFilter>,
) -> ApiResult<impl IntoResponse> {
    filter.event_id = Some(id);
    Ok(Json(state.catalog.list_photos(&filter).await?))
}

pub async fn detect_events(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let events = state.supervisor.detect_events_now().await?;
    Ok(Json(json!({ "status": "success", "events": events })))
}
