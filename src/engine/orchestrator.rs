//! Batch orchestrator: enumerate, gate, admit, generate, aggregate.

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::generator::ArtifactGenerator;
use crate::model::{JobOutcome, JobRecord, RunStatus, RunSummary, WorkItem};
use crate::telemetry::job::{record_outcome, start_job_span, start_run_span};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, warn};
use uuid::Uuid;

use super::gate::IdempotenceGate;
use super::pool::WorkerPool;
use super::progress::{ProgressAggregator, ProgressSink};
use super::resource::ResourceCounter;

/// Values read once per run and fixed for its duration.
#[derive(Debug, Clone, Copy)]
pub struct RunConfig {
    /// Maximum simultaneous jobs.
    pub parallelism: NonZeroUsize,
    /// Sampling interval the artifacts are built with.
    pub interval: Duration,
}

/// Long-lived batch runner. Owns the collaborators and the process-wide
/// resource counter; everything else is built fresh per run.
pub struct Orchestrator {
    catalog: Arc<dyn Catalog>,
    gate: Arc<dyn IdempotenceGate>,
    generator: Arc<dyn ArtifactGenerator>,
    resources: Arc<ResourceCounter>,
    config: RunConfig,
    /// Runs are exclusive: the resource counter is zeroed at run start.
    run_lock: Mutex<()>,
}

impl Orchestrator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        gate: Arc<dyn IdempotenceGate>,
        generator: Arc<dyn ArtifactGenerator>,
        config: RunConfig,
    ) -> Self {
        Self {
            catalog,
            gate,
            generator,
            resources: Arc::new(ResourceCounter::new()),
            config,
            run_lock: Mutex::new(()),
        }
    }

    /// Share an existing counter instead of owning a fresh one.
    pub fn with_resource_counter(mut self, resources: Arc<ResourceCounter>) -> Self {
        self.resources = resources;
        self
    }

    pub fn resources(&self) -> &Arc<ResourceCounter> {
        &self.resources
    }

    pub fn config(&self) -> RunConfig {
        self.config
    }

    /// Run one batch to completion.
    ///
    /// Only a catalog failure is returned as an error. Per-item failures end
    /// up in the summary. Cancellation stops new admissions; jobs already
    /// generating see the token and unwind on their own, and the run waits
    /// for them before returning a summary with [`RunStatus::Cancelled`].
    pub async fn run(
        &self,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let _exclusive = match self.run_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                info!("another run is active, waiting for it to finish");
                tokio::select! {
                    biased;
                    guard = self.run_lock.lock() => guard,
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                }
            }
        };

        let run_id = Uuid::new_v4();
        let span = start_run_span(&run_id);
        self.run_exclusive(run_id, progress, cancel)
            .instrument(span)
            .await
    }

    async fn run_exclusive(
        &self,
        run_id: Uuid,
        sink: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Result<RunSummary> {
        let start = Instant::now();
        self.resources.reset();

        let items = self.catalog.list_eligible().await.map_err(|e| {
            if matches!(e, Error::Catalog(_)) {
                e
            } else {
                Error::Catalog(e.to_string())
            }
        })?;
        let total = items.len();
        Span::current().record("batch.total", total);
        info!(
            total,
            parallelism = self.config.parallelism.get(),
            interval_ms = self.config.interval.as_millis() as u64,
            "batch run started"
        );

        let progress = Arc::new(ProgressAggregator::new(total, sink));
        progress.finish_empty();

        let pool = WorkerPool::new(self.config.parallelism);
        let mut jobs = JoinSet::new();
        for (index, item) in items.iter().enumerate() {
            let job = Job {
                gate: Arc::clone(&self.gate),
                generator: Arc::clone(&self.generator),
                resources: Arc::clone(&self.resources),
                progress: Arc::clone(&progress),
                pool: pool.clone(),
                interval: self.config.interval,
                cancel: cancel.clone(),
            };
            let span = start_job_span(&item.id, &item.name);
            let item = item.clone();
            jobs.spawn(
                async move {
                    let outcome = job.run(&item, index).await;
                    record_outcome(&Span::current(), &outcome);
                    (index, outcome)
                }
                .instrument(span),
            );
        }

        let mut outcomes: Vec<Option<JobOutcome>> = vec![None; total];
        while let Some(joined) = jobs.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!(error = %e, "job task ended abnormally"),
            }
        }

        let jobs: Vec<JobRecord> = items
            .into_iter()
            .zip(outcomes)
            .map(|(item, outcome)| JobRecord {
                item,
                outcome: outcome
                    .unwrap_or_else(|| JobOutcome::Failed("job task ended abnormally".into())),
            })
            .collect();

        let status = if cancel.is_cancelled() {
            RunStatus::Cancelled
        } else {
            RunStatus::Completed
        };

        let summary = RunSummary {
            run_id,
            status,
            total,
            finished: progress.finished(),
            jobs,
            peak_resource_use: self.resources.peak(),
            elapsed: start.elapsed(),
        };

        info!(
            status = ?summary.status,
            total,
            finished = summary.finished,
            completed = summary.completed(),
            skipped = summary.skipped(),
            failed = summary.failed(),
            cancelled = summary.cancelled(),
            duration_ms = summary.elapsed.as_millis() as u64,
            "batch run finished"
        );
        Ok(summary)
    }
}

/// Everything one job needs, cloned out of the orchestrator so the task
/// is `'static`.
struct Job {
    gate: Arc<dyn IdempotenceGate>,
    generator: Arc<dyn ArtifactGenerator>,
    resources: Arc<ResourceCounter>,
    progress: Arc<ProgressAggregator>,
    pool: WorkerPool,
    interval: Duration,
    cancel: CancellationToken,
}

impl Job {
    async fn run(self, item: &WorkItem, index: usize) -> JobOutcome {
        let outcome = {
            let Ok(_slot) = self.pool.acquire(&self.cancel).await else {
                debug!("cancelled before admission");
                return self.finish(JobOutcome::Cancelled, false);
            };
            self.execute(item, index).await
        };
        // Slot and gate claim are both released before progress is reported.
        self.finish(outcome, true)
    }

    fn finish(&self, outcome: JobOutcome, admitted: bool) -> JobOutcome {
        if admitted {
            self.progress.job_finished();
        }
        metrics::jobs_finished().add(1, &[KeyValue::new("outcome", outcome.label())]);
        outcome
    }

    async fn execute(&self, item: &WorkItem, index: usize) -> JobOutcome {
        if self.cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        if !self.gate.should_generate(item, self.interval).await {
            return JobOutcome::Skipped;
        }
        let mut claim = Claim {
            gate: self.gate.as_ref(),
            item,
            interval: self.interval,
            succeeded: false,
        };

        if self.cancel.is_cancelled() {
            return JobOutcome::Cancelled;
        }

        info!(index, item = %item.name, "generation started");
        let target = self.gate.target_path(item, self.interval);
        let started = Instant::now();
        let result = {
            let _lease = self.resources.begin();
            self.invoke_generator(item, target).await
        };
        metrics::generator_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("outcome", if result.is_ok() { "ok" } else { "error" })],
        );

        match result {
            Ok(()) => {
                claim.succeeded = true;
                info!(index, item = %item.name, "generation completed");
                JobOutcome::Completed
            }
            Err(e) if e.is_cancelled() => {
                info!(index, item = %item.name, "generation cancelled");
                JobOutcome::Cancelled
            }
            Err(e) => {
                error!(index, item = %item.name, path = %item.path.display(), error = %e, "generation failed");
                JobOutcome::Failed(e.to_string())
            }
        }
    }

    /// Runs the generator on its own task so a panic inside it is reported
    /// as this item's failure instead of tearing down the job.
    async fn invoke_generator(&self, item: &WorkItem, target: PathBuf) -> Result<()> {
        let generator = Arc::clone(&self.generator);
        let item = item.clone();
        let interval = self.interval;
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(
            async move { generator.generate(&item, &target, interval, &cancel).await }
                .instrument(Span::current()),
        );
        handle.await.unwrap_or_else(|e| Err(join_failure(e)))
    }
}

fn join_failure(e: JoinError) -> Error {
    if e.is_panic() {
        let payload = e.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Error::Generation(format!("generator panicked: {message}"))
    } else {
        warn!(error = %e, "generator task was aborted");
        Error::Generation(format!("generator task aborted: {e}"))
    }
}

/// Settles a gate claim on every exit path.
struct Claim<'a> {
    gate: &'a dyn IdempotenceGate,
    item: &'a WorkItem,
    interval: Duration,
    succeeded: bool,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.gate.settle(self.item, self.interval, self.succeeded);
    }
}
