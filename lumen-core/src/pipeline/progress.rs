//! Fan-out of pipeline snapshots to WebSocket consumers. Ledger writes mark
//! the pipeline dirty; a coalescing tick publishes at most one snapshot per
//! 250 ms so a fast scan cannot flood slow consumers.

use lumen_model::PipelineStats;
use tokio::sync::broadcast;

pub const COALESCE_INTERVAL_MS: u64 = 250;
/// Heartbeat cadence for connected consumers, so "idle" is distinguishable
/// from "disconnected".
pub const HEARTBEAT_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<PipelineStats>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Send a snapshot to every consumer. Consumers that lag simply miss
    /// intermediate snapshots; the next one supersedes them anyway.
    pub fn publish(&self, stats: PipelineStats) {
        let _ = self.tx.send(stats);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineStats> {
        self.tx.subscribe()
    }

    pub fn consumer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> PipelineStats {
        PipelineStats {
            running: false,
            scan: None,
            discovered: 0,
            completed: 0,
            failed: 0,
            skipped: 0,
            uptime_secs: 0,
            bottleneck: None,
            stages: Default::default(),
            active: Vec::new(),
        }
    }

    #[tokio::test]
    async fn subscribers_receive_snapshots() {
        let broadcaster = ProgressBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        broadcaster.publish(stats());
        let received = rx.recv().await.unwrap();
        assert!(!received.running);
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        ProgressBroadcaster::new().publish(stats());
    }
}
