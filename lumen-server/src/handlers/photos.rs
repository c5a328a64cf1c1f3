use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lumen_core::{IndexError, PhotoFilter};
use lumen_model::FileId;
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::errors::{ApiError, ApiResult};
use crate::AppState;

pub async fn list_photos(
    State(state): State<AppState>,
    Query(filter): Query<PhotoFilter>,
) -> ApiResult<Json<serde_json::Value>> {
    let photos = state.catalog.list_photos(&filter).await?;
    let total = state.catalog.count_photos(&filter).await?;
    Ok(Json(json!({ "photos": photos, "total": total })))
}

pub async fn photo_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let detail = state
        .catalog
        .photo_detail(&FileId::from_hex(id))
        .await?
        .ok_or_else(|| ApiError(IndexError::NotFound("photo not found".into())))?;
    Ok(Json(detail))
}

pub async fn thumbnail(
    State(state): State<AppState>,
    Path((id, size)): Path<(String, i64)>,
) -> ApiResult<Response> {
    // Snap arbitrary requests onto the generated ladder.
    let size = match size {
        i64::MIN..=200 => 200,
        201..=600 => 600,
        _ => 1200,
    };
    let id = FileId::from_hex(id);
    let relative = state
        .catalog
        .thumbnail_path(&id, size)
        .await?
        .ok_or_else(|| ApiError(IndexError::NotFound("thumbnail not found".into())))?;
    let bytes = state.artifacts.read(&relative).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "image/jpeg".to_string()),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable".to_string()),
        ],
        bytes,
    )
        .into_response())
}

/// Original bytes, streamed straight off the photo root.
pub async fn original(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let file = state
        .catalog
        .get_file(&FileId::from_hex(id))
        .await?
        .ok_or_else(|| ApiError(IndexError::NotFound("photo not found".into())))?;
    let handle = tokio::fs::File::open(&file.path)
        .await
        .map_err(IndexError::from)?;
    let stream = ReaderStream::new(handle);
    Ok((
        [(header::CONTENT_TYPE, file.mime)],
        Body::from_stream(stream),
    )
        .into_response())
}

/// The live-photo companion clip: an extracted artifact or a sidecar path.
pub async fn motion_video(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let file = state
        .catalog
        .get_file(&FileId::from_hex(id))
        .await?
        .ok_or_else(|| ApiError(IndexError::NotFound("photo not found".into())))?;
    let source = file
        .motion_video
        .ok_or_else(|| ApiError(IndexError::NotFound("no motion video".into())))?;

    let absolute = if source.starts_with("motion_videos/") {
        state.artifacts.absolute_path(&source)
    } else {
        std::path::PathBuf::from(&source)
    };
    let handle = tokio::fs::File::open(&absolute)
        .await
        .map_err(IndexError::from)?;
    Ok((
        [(header::CONTENT_TYPE, "video/mp4".to_string())],
        Body::from_stream(ReaderStream::new(handle)),
    )
        .into_response())
}

pub async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let id = FileId::from_hex(id);
    let file = state
        .catalog
        .get_file(&id)
        .await?
        .ok_or_else(|| ApiError(IndexError::NotFound("photo not found".into())))?;
    state.catalog.set_favorite(&id, !file.favorite).await?;
    Ok(Json(json!({ "status": "success", "favorite": !file.favorite })))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.stats().await?))
}
