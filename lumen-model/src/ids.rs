use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Strongly typed identifier for a file: the lowercase hex SHA-256 digest of
/// its content bytes. Immutable once assigned; the join key everywhere else.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct FileId(pub String);

impl FileId {
    /// Wrap an already-computed digest string.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        FileId(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-character shard prefix used for artifact directory fan-out.
    pub fn shard(&self) -> &str {
        &self.0[..self.0.len().min(2)]
    }
}

impl AsRef<str> for FileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one pipeline invocation (user trigger or watcher batch).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Copy, Serialize, Deserialize)]
pub struct ScanRunId(pub Uuid);

impl Default for ScanRunId {
    fn default() -> Self {
        Self::new()
    }
}

impl ScanRunId {
    pub fn new() -> Self {
        ScanRunId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ScanRunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! rowid_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Serialize,
            Deserialize,
            sqlx::Type,
        )]
        #[sqlx(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

rowid_type!(
    /// Catalog rowid of a detected face.
    FaceId
);
rowid_type!(
    /// Catalog rowid of a person cluster.
    PersonId
);
rowid_type!(
    /// Catalog rowid of a detected event.
    EventId
);
rowid_type!(
    /// Catalog rowid of a tag label.
    TagId
);
