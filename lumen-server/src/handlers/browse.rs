use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use lumen_core::PhotoFilter;
use serde::Deserialize;
use serde_json::json;

use crate::errors::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct DirectoryQuery {
    #[serde(default)]
    pub parent: String,
}

pub async fn directories(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let children = state.catalog.list_directories(&query.parent).await?;
    let entries: Vec<_> = children
        .into_iter()
        .map(|(name, count)| {
            if name.is_empty() {
                json!({ "kind": "photos", "count": count })
            } else {
                json!({ "kind": "directory", "name": name, "count": count })
            }
        })
        .collect();
    Ok(Json(json!({ "parent": query.parent, "entries": entries })))
}

#[derive(Debug, Deserialize)]
pub struct TimelineQuery {
    #[serde(default)]
    pub by_day: bool,
}

pub async fn timeline(
    State(state): State<AppState>,
    Query(query): Query<TimelineQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.timeline(query.by_day).await?))
}

pub async fn years(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let years: Vec<_> = state
        .catalog
        .years_summary()
        .await?
        .into_iter()
        .map(|(year, count)| json!({ "year": year, "count": count }))
        .collect();
    Ok(Json(json!({ "years": years })))
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub async fn duplicates(
    State(state): State<AppState>,
    Query(query): Query<LimitQuery>,
) -> ApiResult<impl IntoResponse> {
    let groups = state
        .catalog
        .duplicate_groups(query.limit.unwrap_or(50).clamp(1, 200))
        .await?;
    Ok(Json(groups))
}

#[derive(Debug, Deserialize)]
pub struct LargeFilesQuery {
    pub min_size: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn large_files(
    State(state): State<AppState>,
    Query(query): Query<LargeFilesQuery>,
) -> ApiResult<impl IntoResponse> {
    let files = state
        .catalog
        .large_files(
            query.min_size.unwrap_or(20 * 1024 * 1024),
            query.limit.unwrap_or(100).clamp(1, 500),
        )
        .await?;
    Ok(Json(files))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub limit: Option<i64>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = PhotoFilter {
        search: Some(query.q.clone()),
        limit: query.limit,
        ..Default::default()
    };
    let photos = state.catalog.list_photos(&filter).await?;
    let total = state.catalog.count_photos(&filter).await?;
    Ok(Json(json!({ "query": query.q, "photos": photos, "total": total })))
}
