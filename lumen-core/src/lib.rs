//! Core library for the Lumen photo indexer.
//!
//! The pieces, leaves first: the [`catalog`] store (SQLite, single-writer,
//! work ledger), the [`artifacts`] store (content-addressed derived blobs),
//! the per-file [`stages`], [`discovery`] (streaming walk + watcher), and
//! the [`pipeline`] supervisor that wires queues, worker pools, and
//! progress broadcasting together. [`dedup`], [`persons`] and [`events`]
//! hold the derived-data structures the stages share.

pub mod artifacts;
pub mod catalog;
pub mod dedup;
pub mod discovery;
pub mod error;
pub mod events;
pub mod persons;
pub mod pipeline;
pub mod stages;
pub mod vision;

pub use artifacts::{ArtifactKind, ArtifactStore};
pub use catalog::{CatalogStore, PhotoFilter};
pub use error::{FailureKind, IndexError, Result};
pub use pipeline::{PipelineConfig, PipelineSupervisor, ProgressBroadcaster};
pub use stages::{DisabledFaceDetector, FaceDetector, StageContext};
pub use vision::VisionClient;
