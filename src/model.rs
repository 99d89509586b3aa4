//! Core data model.
//!
//! A work item is one video in the library. Jobs built from work items end
//! in exactly one [`JobOutcome`]; a run rolls those up into a [`RunSummary`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// One media item eligible for preview generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    /// Display name used in log lines (the file stem).
    pub name: String,
    /// Absolute path of the source video.
    pub path: PathBuf,
}

impl WorkItem {
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            id: ItemId::for_path(&path),
            name,
            path,
        }
    }
}

/// Newtype for item IDs. Derived from the media path so it is stable
/// across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn for_path(path: &Path) -> Self {
        Self(Uuid::new_v5(
            &Uuid::NAMESPACE_URL,
            path.to_string_lossy().as_bytes(),
        ))
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Terminal state of a single job. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Artifact was generated.
    Completed,
    /// A fresh artifact already existed, or another job holds the claim.
    Skipped,
    Failed(String),
    Cancelled,
}

impl JobOutcome {
    /// Stable label for log fields and metric attributes.
    pub fn label(&self) -> &'static str {
        match self {
            JobOutcome::Completed => "completed",
            JobOutcome::Skipped => "skipped",
            JobOutcome::Failed(_) => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// An item paired with how its job ended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub item: WorkItem,
    pub outcome: JobOutcome,
}

// ---------------------------------------------------------------------------
// Run Summary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every dispatched job reached a terminal state.
    Completed,
    /// The cancellation token fired during the run.
    Cancelled,
}

/// What a batch run did. Returned to the caller; never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Items enumerated from the catalog.
    pub total: usize,
    /// Jobs that held a worker slot and reached a terminal state.
    pub finished: usize,
    /// One record per enumerated item, in catalog order.
    pub jobs: Vec<JobRecord>,
    /// Highest resource counter value observed during the run.
    pub peak_resource_use: usize,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn count(&self, label: &str) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.outcome.label() == label)
            .count()
    }

    pub fn completed(&self) -> usize {
        self.count("completed")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    pub fn cancelled(&self) -> usize {
        self.count("cancelled")
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
