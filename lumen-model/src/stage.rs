use serde::{Deserialize, Serialize};

use crate::ids::FileId;

/// A node in the per-file processing graph.
///
/// Discovery is a pseudo-stage (it produces identifiers rather than consuming
/// them) and event detection is a batch barrier, so neither appears here;
/// every variant below has a worker pool, an input queue, and a ledger row
/// per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Exif,
    Geocode,
    Thumbnails,
    MotionPhoto,
    Phash,
    Faces,
    Caption,
    Tagging,
}

/// Downstream edges out of Discovery. Every freshly upserted file fans out
/// onto these queues.
pub const DISCOVERY_DOWNSTREAM: &[Stage] = &[
    Stage::Exif,
    Stage::Thumbnails,
    Stage::Phash,
    Stage::MotionPhoto,
];

impl Stage {
    pub const ALL: [Stage; 8] = [
        Stage::Exif,
        Stage::Geocode,
        Stage::Thumbnails,
        Stage::MotionPhoto,
        Stage::Phash,
        Stage::Faces,
        Stage::Caption,
        Stage::Tagging,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Stage::Exif => "exif",
            Stage::Geocode => "geocode",
            Stage::Thumbnails => "thumbnails",
            Stage::MotionPhoto => "motion_photo",
            Stage::Phash => "phash",
            Stage::Faces => "faces",
            Stage::Caption => "caption",
            Stage::Tagging => "tagging",
        }
    }

    pub fn from_name(name: &str) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| s.name() == name)
    }

    /// The static flow graph, encoded as data. A stage emits the file id to
    /// every downstream queue after reaching a terminal ledger status.
    pub const fn downstream(self) -> &'static [Stage] {
        match self {
            Stage::Exif => &[Stage::Geocode],
            Stage::Thumbnails => &[Stage::Faces, Stage::Caption, Stage::Tagging],
            Stage::Geocode
            | Stage::MotionPhoto
            | Stage::Phash
            | Stage::Faces
            | Stage::Caption
            | Stage::Tagging => &[],
        }
    }

    /// Algorithm version recorded on ledger rows. Bumping a stage's version
    /// invalidates its completed rows and drives re-processing.
    pub const fn version(self) -> i32 {
        match self {
            Stage::Exif => 1,
            Stage::Geocode => 1,
            Stage::Thumbnails => 1,
            Stage::MotionPhoto => 1,
            Stage::Phash => 1,
            Stage::Faces => 1,
            Stage::Caption => 1,
            Stage::Tagging => 1,
        }
    }

    /// Retry budget for transient failures before the ledger row goes
    /// `failed`. External-service stages get a little more slack.
    pub const fn max_attempts(self) -> i64 {
        match self {
            Stage::Caption | Stage::Tagging => 4,
            _ => 3,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Ledger status for one (file, stage) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InFlight,
    Done,
    Failed,
    Skipped,
}

impl StageStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::InFlight => "in_flight",
            StageStatus::Done => "done",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(value: &str) -> Option<StageStatus> {
        match value {
            "pending" => Some(StageStatus::Pending),
            "in_flight" => Some(StageStatus::InFlight),
            "done" => Some(StageStatus::Done),
            "failed" => Some(StageStatus::Failed),
            "skipped" => Some(StageStatus::Skipped),
            _ => None,
        }
    }

    /// Terminal statuses never re-run at the same stage version.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            StageStatus::Done | StageStatus::Skipped | StageStatus::Failed
        )
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted work-ledger row.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LedgerRow {
    pub file_id: FileId,
    pub stage: String,
    pub status: String,
    pub attempts: i64,
    pub stage_version: i32,
    pub last_error: Option<String>,
    pub completed_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_graph_is_acyclic() {
        // Walk every path from the discovery roots; the graph is tiny, so a
        // depth bound well above the stage count is a sufficient cycle check.
        fn walk(stage: Stage, depth: usize) {
            assert!(depth < Stage::ALL.len(), "cycle through {stage}");
            for next in stage.downstream() {
                walk(*next, depth + 1);
            }
        }
        for root in DISCOVERY_DOWNSTREAM {
            walk(*root, 0);
        }
    }

    #[test]
    fn every_stage_is_reachable_from_discovery() {
        let mut seen = std::collections::HashSet::new();
        let mut frontier: Vec<Stage> = DISCOVERY_DOWNSTREAM.to_vec();
        while let Some(stage) = frontier.pop() {
            if seen.insert(stage) {
                frontier.extend_from_slice(stage.downstream());
            }
        }
        for stage in Stage::ALL {
            assert!(seen.contains(&stage), "{stage} unreachable");
        }
    }

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_name(stage.name()), Some(stage));
        }
        assert_eq!(Stage::from_name("discovery"), None);
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            StageStatus::Pending,
            StageStatus::InFlight,
            StageStatus::Done,
            StageStatus::Failed,
            StageStatus::Skipped,
        ] {
            assert_eq!(StageStatus::from_str(status.as_str()), Some(status));
        }
    }
}
