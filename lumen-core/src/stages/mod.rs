//! The eight per-file stage bodies behind one uniform contract. Event
//! detection is the batch barrier and lives in `events`, not here.
//!
//! A stage implements [`StageOp::run`] only; the runner in
//! `pipeline::worker` owns the ledger bookkeeping around it (precondition
//! fast path, in-flight marking, retry with backoff, terminal status, fan
//! out). A body signals success by committing through the catalog — every
//! committer persists results and marks the ledger `done` in the same
//! transaction — and failure by returning an error whose
//! [`FailureKind`](crate::error::FailureKind) drives the retry policy.

mod exif;
mod faces;
mod geocode;
mod motion;
mod phash;
mod thumbs;
mod vision_stages;

pub use exif::ExifStage;
pub use faces::{DisabledFaceDetector, FaceDetection, FaceDetector, FacesStage};
pub use geocode::GeocodeStage;
pub use motion::MotionPhotoStage;
pub use phash::PhashStage;
pub use thumbs::{ThumbnailStage, THUMBNAIL_SIZES};
pub use vision_stages::{CaptionStage, TaggingStage};

use std::sync::Arc;

use async_trait::async_trait;
use lumen_model::{PhotoFile, Stage};

use crate::artifacts::ArtifactStore;
use crate::catalog::CatalogStore;
use crate::dedup::DuplicateIndex;
use crate::error::Result;
use crate::persons::PersonIndex;
use crate::vision::VisionClient;

/// Everything a stage body may touch. Built once by the supervisor and
/// shared by all pools; the catalog is the only serialisation point.
pub struct StageContext {
    pub catalog: Arc<CatalogStore>,
    pub artifacts: ArtifactStore,
    pub dedup: Arc<DuplicateIndex>,
    pub persons: Arc<PersonIndex>,
    pub vision: Arc<VisionClient>,
    pub face_detector: Arc<dyn FaceDetector>,
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("artifacts_root", &self.artifacts.root())
            .field("vision_enabled", &self.vision.is_enabled())
            .field("face_detector_enabled", &self.face_detector.is_enabled())
            .finish()
    }
}

/// One node of the processing graph: a declared operation over a file.
#[async_trait]
pub trait StageOp: Send + Sync {
    fn stage(&self) -> Stage;

    /// Execute the stage body for `file`. `attempts` is the cumulative body
    /// attempt count and must be passed through to the committer so the
    /// ledger row records it.
    async fn run(&self, cx: &StageContext, file: &PhotoFile, attempts: i64) -> Result<()>;
}

/// The full stage set wired to their operations, in ledger order.
pub fn build_stage_ops() -> Vec<Arc<dyn StageOp>> {
    vec![
        Arc::new(ExifStage),
        Arc::new(GeocodeStage::new()),
        Arc::new(ThumbnailStage),
        Arc::new(MotionPhotoStage),
        Arc::new(PhashStage),
        Arc::new(FacesStage),
        Arc::new(CaptionStage),
        Arc::new(TaggingStage),
    ]
}
