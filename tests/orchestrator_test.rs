//! Integration tests for the batch orchestrator, driven by fake
//! collaborators.

use async_trait::async_trait;
use scrubgen::catalog::Catalog;
use scrubgen::engine::{
    ArtifactGate, ArtifactLayout, NoProgress, Orchestrator, ProgressSink, ResourceCounter,
    RunConfig,
};
use scrubgen::error::{Error, Result};
use scrubgen::generator::ArtifactGenerator;
use scrubgen::model::{JobOutcome, RunStatus, WorkItem};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FixedCatalog(Vec<WorkItem>);

#[async_trait]
impl Catalog for FixedCatalog {
    async fn list_eligible(&self) -> Result<Vec<WorkItem>> {
        Ok(self.0.clone())
    }
}

struct BrokenCatalog;

#[async_trait]
impl Catalog for BrokenCatalog {
    async fn list_eligible(&self) -> Result<Vec<WorkItem>> {
        Err(Error::Catalog("library offline".to_string()))
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Behavior {
    /// Sleep, then write the artifact.
    Work(Duration),
    /// Wait until cancelled.
    Block,
}

/// Generator that tracks how many calls are in flight at once.
struct FakeGenerator {
    behavior: Behavior,
    fail: HashSet<String>,
    panic: HashSet<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeGenerator {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            fail: HashSet::new(),
            panic: HashSet::new(),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(mut self, name: &str) -> Self {
        self.fail.insert(name.to_string());
        self
    }

    fn panicking(mut self, name: &str) -> Self {
        self.panic.insert(name.to_string());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactGenerator for FakeGenerator {
    async fn generate(
        &self,
        item: &WorkItem,
        target: &Path,
        _interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = async {
            match self.behavior {
                Behavior::Work(delay) => {
                    tokio::time::sleep(delay).await;
                }
                Behavior::Block => {
                    cancel.cancelled().await;
                    return Err(Error::Cancelled);
                }
            }
            if self.panic.contains(&item.name) {
                panic!("decoder blew up on {}", item.name);
            }
            if self.fail.contains(&item.name) {
                return Err(Error::Generation(format!("cannot decode {}", item.name)));
            }
            tokio::fs::create_dir_all(target.parent().unwrap()).await?;
            tokio::fs::write(target, b"BIF").await?;
            Ok(())
        }
        .await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Sink that panics on every report.
struct PanickingSink;

impl ProgressSink for PanickingSink {
    fn report(&self, percent: f64) {
        panic!("progress consumer went away at {percent}");
    }
}

#[derive(Default)]
struct RecordingSink(Mutex<Vec<f64>>);

impl RecordingSink {
    fn values(&self) -> Vec<f64> {
        self.0.lock().unwrap().clone()
    }
}

impl ProgressSink for RecordingSink {
    fn report(&self, percent: f64) {
        self.0.lock().unwrap().push(percent);
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn items(n: usize) -> Vec<WorkItem> {
    (1..=n)
        .map(|i| WorkItem::from_path(format!("/library/movies/item{i}.mkv")))
        .collect()
}

fn run_config(parallelism: usize) -> RunConfig {
    RunConfig {
        parallelism: NonZeroUsize::new(parallelism).unwrap(),
        interval: Duration::from_millis(10_000),
    }
}

fn orchestrator(
    dir: &TempDir,
    catalog: Vec<WorkItem>,
    generator: Arc<FakeGenerator>,
    parallelism: usize,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(FixedCatalog(catalog)),
        Arc::new(ArtifactGate::new(ArtifactLayout::under(dir.path()))),
        generator,
        run_config(parallelism),
    )
}

fn assert_strictly_increasing_to_100(values: &[f64]) {
    assert!(!values.is_empty(), "no progress reported");
    for window in values.windows(2) {
        assert!(window[1] > window[0], "progress went {} -> {}", window[0], window[1]);
    }
    assert_eq!(*values.last().unwrap(), 100.0);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn five_items_ceiling_two_with_one_failure() {
    let dir = TempDir::new().unwrap();
    let generator =
        Arc::new(FakeGenerator::new(Behavior::Work(Duration::from_millis(50))).failing("item5"));
    let orch = orchestrator(&dir, items(5), Arc::clone(&generator), 2);
    let sink = Arc::new(RecordingSink::default());

    let summary = orch
        .run(sink.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.total, 5);
    assert_eq!(summary.finished, 5);
    assert_eq!(summary.completed(), 4);
    assert_eq!(summary.failed(), 1);
    assert!(matches!(
        summary.jobs[4].outcome,
        JobOutcome::Failed(ref reason) if reason.contains("item5")
    ));

    // Jobs finishing together may share one report.
    let values = sink.values();
    assert!(values.len() <= 5);
    assert_strictly_increasing_to_100(&values);

    assert_eq!(generator.calls(), 5);
    assert_eq!(generator.peak(), 2);
    assert_eq!(summary.peak_resource_use, 2);
    assert_eq!(orch.resources().current(), 0);
}

#[tokio::test]
async fn empty_catalog_reports_complete() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)));
    let orch = orchestrator(&dir, Vec::new(), Arc::clone(&generator), 3);
    let sink = Arc::new(RecordingSink::default());

    let summary = orch
        .run(sink.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.total, 0);
    assert_eq!(summary.finished, 0);
    assert!(summary.jobs.is_empty());
    assert_eq!(sink.values(), vec![100.0]);
    assert_eq!(orch.resources().current(), 0);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ceiling_of_one_serializes_jobs() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::from_millis(20))));
    let orch = orchestrator(&dir, items(4), Arc::clone(&generator), 1);

    let summary = orch
        .run(Arc::new(NoProgress), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 4);
    assert_eq!(generator.peak(), 1);
    assert_eq!(summary.peak_resource_use, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ceiling_above_total_runs_everything_at_once() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::from_millis(200))));
    let orch = orchestrator(&dir, items(4), Arc::clone(&generator), 16);

    let summary = orch
        .run(Arc::new(NoProgress), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 4);
    assert_eq!(generator.peak(), 4);
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rerun_skips_items_with_fresh_artifacts() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)));
    let orch = orchestrator(&dir, items(3), Arc::clone(&generator), 2);

    let first = orch
        .run(Arc::new(NoProgress), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(first.completed(), 3);

    let sink = Arc::new(RecordingSink::default());
    let second = orch
        .run(sink.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.skipped(), 3);
    assert_eq!(second.finished, 3);
    assert_eq!(generator.calls(), 3, "second run must not invoke the generator");
    assert_strictly_increasing_to_100(&sink.values());
}

#[tokio::test]
async fn failed_item_is_retried_on_next_run() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)).failing("item2"));
    let orch = orchestrator(&dir, items(2), Arc::clone(&generator), 2);

    orch.run(Arc::new(NoProgress), CancellationToken::new())
        .await
        .unwrap();
    let second = orch
        .run(Arc::new(NoProgress), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second.skipped(), 1);
    assert_eq!(second.failed(), 1);
    assert_eq!(generator.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_items_in_one_run_generate_once() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::from_millis(100))));
    let item = WorkItem::from_path("/library/movies/twice.mkv");
    let orch = orchestrator(
        &dir,
        vec![item.clone(), item.clone(), item],
        Arc::clone(&generator),
        3,
    );

    let summary = orch
        .run(Arc::new(NoProgress), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(generator.calls(), 1);
    assert_eq!(summary.completed(), 1);
    assert_eq!(summary.skipped(), 2);
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn generator_panic_only_fails_that_item() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)).panicking("item2"));
    let orch = orchestrator(&dir, items(3), Arc::clone(&generator), 2);
    let sink = Arc::new(RecordingSink::default());

    let summary = orch
        .run(sink.clone(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed(), 2);
    assert!(matches!(
        summary.jobs[1].outcome,
        JobOutcome::Failed(ref reason) if reason.contains("panicked")
    ));
    assert_eq!(summary.finished, 3);
    assert_strictly_increasing_to_100(&sink.values());
    assert_eq!(orch.resources().current(), 0);
}

#[tokio::test]
async fn catalog_failure_is_fatal() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)));
    let orch = Orchestrator::new(
        Arc::new(BrokenCatalog),
        Arc::new(ArtifactGate::new(ArtifactLayout::under(dir.path()))),
        generator.clone(),
        run_config(2),
    );

    let result = orch
        .run(Arc::new(NoProgress), CancellationToken::new())
        .await;

    assert!(matches!(result, Err(Error::Catalog(_))));
    assert_eq!(generator.calls(), 0);
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancellation_before_dispatch_runs_nothing() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)));
    let orch = orchestrator(&dir, items(4), Arc::clone(&generator), 2);
    let sink = Arc::new(RecordingSink::default());

    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), orch.run(sink.clone(), cancel))
        .await
        .expect("run must not hang")
        .unwrap();

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(summary.total, 4);
    assert_eq!(summary.cancelled(), 4);
    assert_eq!(summary.finished, 0);
    assert_eq!(generator.calls(), 0);
    assert!(sink.values().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_mid_run_unwinds_in_flight_work() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Block));
    let catalog = items(3);
    let target = dir
        .path()
        .join(catalog[0].id.0.to_string())
        .join("10000.bif");
    let orch = orchestrator(&dir, catalog, Arc::clone(&generator), 1);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let watcher = Arc::clone(&generator);
    tokio::spawn(async move {
        while watcher.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        trigger.cancel();
    });

    let summary = tokio::time::timeout(
        Duration::from_secs(5),
        orch.run(Arc::new(NoProgress), cancel),
    )
    .await
    .expect("run must not hang")
    .unwrap();

    assert_eq!(summary.status, RunStatus::Cancelled);
    assert_eq!(summary.cancelled(), 3);
    assert_eq!(summary.finished, 1, "only the admitted job counts as finished");
    assert_eq!(generator.calls(), 1);
    assert_eq!(orch.resources().current(), 0);
    assert!(!target.exists());
    assert!(!scrubgen::engine::gate::placeholder_for(&target).exists());
}

// ---------------------------------------------------------------------------
// Resource counter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resource_counter_is_zeroed_at_run_start() {
    let dir = TempDir::new().unwrap();
    let counter = Arc::new(ResourceCounter::new());
    // Simulate drift left behind by an earlier, interrupted run.
    std::mem::forget(counter.begin());
    std::mem::forget(counter.begin());
    assert_eq!(counter.current(), 2);

    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)));
    let orch = orchestrator(&dir, items(2), generator, 2)
        .with_resource_counter(Arc::clone(&counter));

    orch.run(Arc::new(NoProgress), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(counter.current(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn overlapping_runs_are_serialized() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::from_millis(50))));
    let orch = Arc::new(orchestrator(&dir, items(3), Arc::clone(&generator), 3));

    let a = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move {
            orch.run(Arc::new(NoProgress), CancellationToken::new())
                .await
                .unwrap()
        })
    };
    let b = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move {
            orch.run(Arc::new(NoProgress), CancellationToken::new())
                .await
                .unwrap()
        })
    };

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    assert_eq!(a.completed() + b.completed(), 3);
    assert_eq!(a.skipped() + b.skipped(), 3);
    assert_eq!(generator.calls(), 3);
    assert_eq!(generator.peak(), 3);
}

#[tokio::test]
async fn panicking_progress_sink_does_not_fail_the_job() {
    let dir = TempDir::new().unwrap();
    let generator = Arc::new(FakeGenerator::new(Behavior::Work(Duration::ZERO)));
    let orch = orchestrator(&dir, items(2), Arc::clone(&generator), 1);

    let summary = orch
        .run(Arc::new(PanickingSink), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.status, RunStatus::Completed);
    assert_eq!(summary.completed(), 2);
    assert_eq!(summary.finished, 2);
    assert_eq!(generator.calls(), 2);
    assert_eq!(orch.resources().current(), 0);
}
