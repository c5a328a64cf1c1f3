use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use lumen_core::PhotoFilter;
use serde::Deserialize;
use serde_json::json;

use crate::errors::ApiResult;
use crate::AppState;

pub async fn countries(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let countries: Vec<_> = state
        .catalog
        .list_countries()
        .await?
        .into_iter()
        .map(|(country, count)| json!({ "country": country, "count": count }))
        .collect();
    Ok(Json(json!({ "countries": countries })))
}

#[derive(Debug, Deserialize)]
pub struct CitiesQuery {
    pub country: Option<String>,
}

pub async fn cities(
    State(state): State<AppState>,
    Query(query): Query<CitiesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let cities: Vec<_> = state
        .catalog
        .list_cities(query.country.as_deref())
        .await?
        .into_iter()
        .map(|(city, count)| json!({ "city": city, "count": count }))
        .collect();
    Ok(Json(json!({ "cities": cities })))
}

pub async fn map_points(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let points: Vec<_> = state
        .catalog
        .map_points()
        .await?
        .into_iter()
        .map(|(id, lat, lon)| json!({ "id": id, "lat": lat, "lon": lon }))
        .collect();
    Ok(Json(json!({ "points": points })))
}

/// Photos filtered by resolved place (country and/or city query params).
pub async fn place_photos(
    State(state): State<AppState>,
    Query(filter): Query<PhotoFilter>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.catalog.list_photos(&filter).await?))
}
