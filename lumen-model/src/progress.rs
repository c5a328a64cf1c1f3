use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::ScanRunId;
use crate::stage::Stage;

/// Live counters for one stage queue.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageCounters {
    /// Items sitting in the queue, waiting for a worker.
    pub pending: u64,
    /// Items currently inside a worker body.
    pub in_flight: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl StageCounters {
    pub fn settled(&self) -> u64 {
        self.completed + self.failed + self.skipped
    }
}

/// A file a worker is touching right now, for the UI's activity row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveWork {
    pub stage: Stage,
    pub path: String,
}

/// Snapshot of the whole pipeline, published over HTTP and WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub running: bool,
    pub scan: Option<ScanRunSummary>,
    pub discovered: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub uptime_secs: u64,
    /// Stage with the worst pending:throughput ratio, if any work is queued.
    pub bottleneck: Option<Stage>,
    pub stages: BTreeMap<String, StageCounters>,
    pub active: Vec<ActiveWork>,
}

/// Summary of one scan run, live or historical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRunSummary {
    pub id: ScanRunId,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub cancelled: bool,
    pub discovered: u64,
    /// Files whose bytes actually had to be hashed (triple-probe misses).
    pub hashed: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

/// Static description of the stage graph for the UI's flow view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineFlow {
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowNode {
    pub id: String,
    pub workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowEdge {
    pub from: String,
    pub to: String,
}
