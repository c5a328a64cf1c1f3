//! The `/api` surface: a thin read API over the catalog plus scan and
//! pipeline control.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{browse, people, photos, places, scan, ws};
use crate::AppState;

pub fn create_api_router(state: AppState) -> Router {
    let api = Router::new()
        // Photos
        .route("/photos", get(photos::list_photos))
        .route("/photos/{id}", get(photos::photo_detail))
        .route("/photos/{id}/thumbnail/{size}", get(photos::thumbnail))
        .route("/photos/{id}/original", get(photos::original))
        .route("/photos/{id}/motion", get(photos::motion_video))
        .route("/photos/{id}/favorite", post(photos::toggle_favorite))
        .route("/stats", get(photos::stats))
        // Browsing
        .route("/directories", get(browse::directories))
        .route("/timeline", get(browse::timeline))
        .route("/years", get(browse::years))
        .route("/duplicates", get(browse::duplicates))
        .route("/large-files", get(browse::large_files))
        .route("/search", get(browse::search))
        // Persons
        .route("/persons", get(people::list_persons))
        .route("/persons/{id}", get(people::person_detail))
        .route("/persons/{id}/photos", get(people::person_photos))
        .route("/persons/{id}/rename", post(people::rename_person))
        .route("/persons/merge", post(people::merge_persons))
        // Events
        .route("/events", get(people::list_events))
        .route("/events/{id}/photos", get(people::event_photos))
        .route("/events/detect", post(people::detect_events))
        // Locations
        .route("/locations/countries", get(places::countries))
        .route("/locations/cities", get(places::cities))
        .route("/locations/map", get(places::map_points))
        .route("/locations/photos", get(places::place_photos))
        // Scan control
        .route("/scan/status", get(scan::scan_status))
        .route("/scan/start", post(scan::start_scan))
        .route("/scan/stop", post(scan::stop_scan))
        .route("/scan/clear-index", post(scan::clear_index))
        .route("/scan/ws", get(ws::progress_ws))
        // Pipeline introspection
        .route("/pipeline/status", get(scan::pipeline_status))
        .route("/pipeline/flow", get(scan::pipeline_flow))
        .route("/pipeline/failures/{stage}", get(scan::stage_failures))
        .route("/pipeline/ws", get(ws::progress_ws));

    Router::new().nest("/api", api).with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use lumen_core::catalog::CatalogStore;
    use lumen_core::{
        ArtifactStore, DisabledFaceDetector, PipelineConfig, PipelineSupervisor, StageContext,
        VisionClient,
    };
    use tempfile::TempDir;
    use tower::util::ServiceExt;

    use super::*;
    use crate::config::Config;

    async fn test_state(data: &TempDir, photos: &TempDir) -> AppState {
        let catalog = Arc::new(
            CatalogStore::open(&data.path().join("db/lumen.db"))
                .await
                .unwrap(),
        );
        let artifacts = ArtifactStore::new(data.path());
        artifacts.ensure_directories().await.unwrap();

        let cx = StageContext {
            catalog: Arc::clone(&catalog),
            artifacts: artifacts.clone(),
            dedup: Arc::new(lumen_core::dedup::DuplicateIndex::new()),
            persons: Arc::new(lumen_core::persons::PersonIndex::new()),
            vision: Arc::new(VisionClient::disabled()),
            face_detector: Arc::new(DisabledFaceDetector),
        };
        let supervisor = Arc::new(
            PipelineSupervisor::new(cx, photos.path().to_path_buf(), PipelineConfig::default())
                .await
                .unwrap(),
        );

        AppState {
            catalog,
            supervisor,
            artifacts,
            config: Arc::new(Config {
                photos_path: photos.path().to_path_buf(),
                data_dir: data.path().to_path_buf(),
                ..Default::default()
            }),
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn stats_endpoint_reports_an_empty_catalog() {
        let (data, photos) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let app = create_api_router(test_state(&data, &photos).await);

        let (status, body) = get_json(app, "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["files"], 0);
        assert_eq!(body["persons"], 0);
    }

    #[tokio::test]
    async fn pipeline_flow_exposes_the_static_graph() {
        let (data, photos) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let app = create_api_router(test_state(&data, &photos).await);

        let (status, body) = get_json(app, "/api/pipeline/flow").await;
        assert_eq!(status, StatusCode::OK);
        let nodes: Vec<&str> = body["nodes"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["id"].as_str().unwrap())
            .collect();
        assert!(nodes.contains(&"discovery"));
        assert!(nodes.contains(&"thumbnails"));
        assert!(nodes.contains(&"events"));
        // Geocoding hangs off EXIF, not discovery.
        let edges = body["edges"].as_array().unwrap();
        assert!(edges
            .iter()
            .any(|e| e["from"] == "exif" && e["to"] == "geocode"));
    }

    #[tokio::test]
    async fn unknown_photo_is_a_404() {
        let (data, photos) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let app = create_api_router(test_state(&data, &photos).await);

        let (status, body) = get_json(app, "/api/photos/deadbeef").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn stopping_without_a_scan_is_a_404() {
        let (data, photos) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let app = create_api_router(test_state(&data, &photos).await);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/scan/stop")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn search_returns_an_empty_result_set() {
        let (data, photos) = (TempDir::new().unwrap(), TempDir::new().unwrap());
        let app = create_api_router(test_state(&data, &photos).await);

        let (status, body) = get_json(app, "/api/search?q=sunset").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
    }
}
