//! Idempotence gate: decides whether an item still needs its artifact and
//! claims the target so no other job generates it concurrently.
//!
//! A claim is an in-process test-and-set on the target path plus a
//! `.partial` placeholder written beside the target. The placeholder is
//! removed when the job settles. A placeholder found without a live claim
//! was left behind by an interrupted process; its artifact is treated as
//! incomplete and regenerated.

use crate::model::WorkItem;
use crate::telemetry::metrics;
use async_trait::async_trait;
use opentelemetry::KeyValue;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Decides per item whether generation is required.
#[async_trait]
pub trait IdempotenceGate: Send + Sync {
    /// Where the artifact for `item` at `interval` lives.
    fn target_path(&self, item: &WorkItem, interval: Duration) -> PathBuf;

    /// `true` means the caller now owns the claim on the target and must
    /// call [`IdempotenceGate::settle`] once it is done with it.
    ///
    /// Never fails: inconclusive checks answer `true`.
    async fn should_generate(&self, item: &WorkItem, interval: Duration) -> bool;

    /// Release a claim taken by `should_generate`. When the job did not
    /// succeed, any partial output at the target is discarded.
    fn settle(&self, item: &WorkItem, interval: Duration, succeeded: bool);
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Maps items to artifact paths. The interval is part of the file name, so
/// an artifact built with another interval is never mistaken for fresh.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLayout {
    /// Central artifact directory. `None` saves next to the media under
    /// `trickplay/`.
    root: Option<PathBuf>,
}

impl ArtifactLayout {
    pub fn beside_media() -> Self {
        Self { root: None }
    }

    pub fn under(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    /// `<root>/<item id>/<ms>.bif` under a central root, otherwise
    /// `<media dir>/trickplay/<media file name>-<ms>.bif`. Both keep the
    /// source extension in play, so `movie.mkv` and `movie.mp4` in one
    /// folder get separate artifacts.
    pub fn target(&self, item: &WorkItem, interval: Duration) -> PathBuf {
        let ms = interval.as_millis();
        match &self.root {
            Some(root) => root.join(item.id.0.to_string()).join(format!("{ms}.bif")),
            None => {
                let dir = item.path.parent().unwrap_or_else(|| Path::new("."));
                let file_name = item
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| item.name.clone());
                dir.join("trickplay").join(format!("{file_name}-{ms}.bif"))
            }
        }
    }
}

/// Placeholder path marking a claimed or interrupted target.
pub fn placeholder_for(target: &Path) -> PathBuf {
    let mut name = target.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    target.with_file_name(name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Freshness {
    Fresh,
    Missing,
    /// Placeholder present, or the artifact is empty.
    Incomplete,
}

// ---------------------------------------------------------------------------
// Filesystem gate
// ---------------------------------------------------------------------------

/// Gate backed by artifact files on disk.
#[derive(Debug, Default)]
pub struct ArtifactGate {
    layout: ArtifactLayout,
    claims: Mutex<HashSet<PathBuf>>,
    fail_opens: AtomicU64,
}

impl ArtifactGate {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self {
            layout,
            claims: Mutex::new(HashSet::new()),
            fail_opens: AtomicU64::new(0),
        }
    }

    /// Number of checks that were inconclusive and answered "generate".
    pub fn fail_open_count(&self) -> u64 {
        self.fail_opens.load(Ordering::Relaxed)
    }

    /// Read-only freshness check. Takes no claim.
    pub async fn is_fresh(&self, item: &WorkItem, interval: Duration) -> bool {
        let target = self.layout.target(item, interval);
        matches!(inspect(&target).await, Ok(Freshness::Fresh))
    }

    fn try_claim(&self, target: &Path) -> bool {
        let mut claims = match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        claims.insert(target.to_path_buf())
    }

    fn release_claim(&self, target: &Path) {
        let mut claims = match self.claims.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        claims.remove(target);
    }

    fn record_fail_open(&self, item: &WorkItem, target: &Path, stage: &'static str, err: &io::Error) {
        self.fail_opens.fetch_add(1, Ordering::Relaxed);
        metrics::gate_fail_open().add(1, &[KeyValue::new("stage", stage)]);
        warn!(
            item_id = %item.id,
            item = %item.name,
            target = %target.display(),
            stage,
            error = %err,
            "idempotence check inconclusive, generating anyway"
        );
    }
}

#[async_trait]
impl IdempotenceGate for ArtifactGate {
    fn target_path(&self, item: &WorkItem, interval: Duration) -> PathBuf {
        self.layout.target(item, interval)
    }

    async fn should_generate(&self, item: &WorkItem, interval: Duration) -> bool {
        let target = self.layout.target(item, interval);

        // Claim before looking, so a job that settles between our check and
        // our claim is never repeated.
        if !self.try_claim(&target) {
            debug!(item_id = %item.id, target = %target.display(), "target already claimed");
            return false;
        }

        // With the claim held, a placeholder on disk can only be a leftover
        // from an interrupted process.
        let placeholder = placeholder_for(&target);
        match inspect(&target).await {
            Ok(Freshness::Fresh) => {
                debug!(item_id = %item.id, target = %target.display(), "artifact is fresh");
                self.release_claim(&target);
                return false;
            }
            Ok(Freshness::Missing) => {}
            Ok(Freshness::Incomplete) => {
                if tokio::fs::try_exists(&placeholder).await.unwrap_or(false) {
                    info!(
                        item_id = %item.id,
                        placeholder = %placeholder.display(),
                        "found placeholder from an interrupted run, regenerating"
                    );
                }
            }
            Err(e) => self.record_fail_open(item, &target, "inspect", &e),
        }

        if let Err(e) = write_placeholder(&placeholder).await {
            self.record_fail_open(item, &target, "claim", &e);
        }

        true
    }

    // Unlinks inline instead of on a blocking task. The placeholder has to
    // be gone before the claim is released, or the next claimant reads it as
    // a crash leftover.
    fn settle(&self, item: &WorkItem, interval: Duration, succeeded: bool) {
        let target = self.layout.target(item, interval);
        if !succeeded {
            remove_if_present(&target);
        }
        remove_if_present(&placeholder_for(&target));
        self.release_claim(&target);
    }
}

async fn inspect(target: &Path) -> io::Result<Freshness> {
    let artifact = match tokio::fs::metadata(target).await {
        Ok(meta) => Some(meta),
        Err(e) if e.kind() == io::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };
    let Some(artifact) = artifact else {
        return Ok(Freshness::Missing);
    };
    if artifact.len() == 0 || tokio::fs::try_exists(placeholder_for(target)).await? {
        return Ok(Freshness::Incomplete);
    }
    Ok(Freshness::Fresh)
}

async fn write_placeholder(placeholder: &Path) -> io::Result<()> {
    if let Some(parent) = placeholder.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let marker = format!(
        "pid={} claimed_at={}\n",
        std::process::id(),
        chrono::Utc::now().to_rfc3339()
    );
    tokio::fs::write(placeholder, marker).await
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
