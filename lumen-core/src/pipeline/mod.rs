//! The ingestion pipeline: bounded queues, one worker pool per stage, a
//! cancel token per scan run, and coalesced progress snapshots.

pub mod progress;
pub mod supervisor;
mod worker;

pub use progress::ProgressBroadcaster;
pub use supervisor::{PipelineConfig, PipelineSupervisor};
