//! # Lumen Server
//!
//! Self-hosted photo library indexer and explorer: a staged ingestion
//! pipeline over a read-only photo tree, a SQLite catalog with a durable
//! work ledger, and a JSON/WebSocket API for the web UI.
//!
//! ## Architecture
//!
//! The process entry point owns everything explicitly: it opens the catalog,
//! builds the stage context, hands both to the pipeline supervisor, and
//! keeps the filesystem watcher alive for the process lifetime. There are no
//! process-wide singletons. Startup never walks the photo tree — it only
//! demotes interrupted ledger rows and reconciles paths that disappeared;
//! full scans run on explicit trigger.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod routes;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use lumen_core::catalog::CatalogStore;
use lumen_core::discovery::watcher::{watch_root, FsWatcher};
use lumen_core::{
    ArtifactStore, DisabledFaceDetector, PipelineConfig, PipelineSupervisor, StageContext,
    VisionClient,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

/// Command line arguments; every flag falls back to its environment
/// variable so container and CLI deployments configure identically.
#[derive(Parser, Debug)]
#[command(name = "lumen-server")]
#[command(about = "Self-hosted photo library indexer and explorer")]
struct Args {
    /// Photo library root (read-only)
    #[arg(long, env = "PHOTOS_PATH")]
    photos: Option<PathBuf>,

    /// Data directory for the catalog and derived artifacts
    #[arg(long, env = "DATA_DIR")]
    data: Option<PathBuf>,

    /// HTTP listen port
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,
}

/// Server application state, cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<CatalogStore>,
    pub supervisor: Arc<PipelineSupervisor>,
    pub artifacts: ArtifactStore,
    pub config: Arc<Config>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut config = Config::from_env()?;
    if let Some(photos) = args.photos {
        config.photos_path = photos;
    }
    if let Some(data) = args.data {
        config.data_dir = data;
    }
    if let Some(port) = args.port {
        config.server_port = port;
    }
    let config = Arc::new(config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".into());
                format!("lumen_server={level},lumen_core={level},tower_http=warn").into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(photos = %config.photos_path.display(), data = %config.data_dir.display(), "configuration loaded");
    config.ensure_directories()?;

    let catalog = Arc::new(CatalogStore::open(&config.db_path()).await?);

    // Startup sweeps only: no filesystem walk happens here.
    catalog.demote_in_flight().await?;
    let missing = catalog.mark_missing_paths().await?;
    if missing > 0 {
        info!(missing, "reconciled paths that disappeared while offline");
    }

    let artifacts = ArtifactStore::new(config.data_dir.clone());
    artifacts.ensure_directories().await?;

    let vision = VisionClient::new(config.ollama_url.clone(), config.ollama_model.clone());
    match vision.is_enabled() {
        true => info!("captioning/tagging endpoint configured"),
        false => info!("captioning/tagging disabled (OLLAMA_URL empty)"),
    }

    let cx = StageContext {
        catalog: Arc::clone(&catalog),
        artifacts: artifacts.clone(),
        dedup: Arc::new(lumen_core::dedup::DuplicateIndex::new()),
        persons: Arc::new(lumen_core::persons::PersonIndex::new()),
        vision: Arc::new(vision),
        face_detector: Arc::new(DisabledFaceDetector),
    };

    let supervisor = Arc::new(
        PipelineSupervisor::new(
            cx,
            config.photos_path.clone(),
            PipelineConfig::default(),
        )
        .await?,
    );
    supervisor.start().await?;

    let shutdown = CancellationToken::new();
    let _watcher: Option<FsWatcher> = if tokio::fs::metadata(&config.photos_path).await.is_ok() {
        match watch_root(
            config.photos_path.clone(),
            Duration::from_secs(config.watch_interval_secs),
            Arc::clone(&supervisor),
            shutdown.clone(),
        ) {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                warn!(%err, "filesystem watcher unavailable, continuing without it");
                None
            }
        }
    } else {
        warn!(
            root = %config.photos_path.display(),
            "photos root missing; scans will fail until it is mounted"
        );
        None
    };

    let state = AppState {
        catalog,
        supervisor,
        artifacts,
        config: config.clone(),
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("starting Lumen server on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    shutdown.cancel();
    Ok(())
}

pub fn create_app(state: AppState) -> Router {
    routes::create_api_router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
