//! Progress aggregation across concurrently finishing jobs.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, TryLockError};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch};
use tracing::warn;

/// Receives run progress as a percentage in `[0, 100]`.
///
/// Called from job tasks after their worker slot is released. A panic in
/// `report` is caught and logged; the job's outcome is unaffected.
/// Implementations should still return promptly.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: f64);
}

/// Latest value wins; readers never hold up the sender.
impl ProgressSink for watch::Sender<f64> {
    fn report(&self, percent: f64) {
        self.send_replace(percent);
    }
}

impl ProgressSink for mpsc::UnboundedSender<f64> {
    fn report(&self, percent: f64) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.send(percent);
    }
}

/// Writes progress to the log.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&self, percent: f64) {
        tracing::info!(percent = %format_args!("{percent:.1}"), "batch progress");
    }
}

/// Discards progress.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: f64) {}
}

/// Tracks finished jobs against a total fixed at construction and pushes
/// strictly increasing percentages to a sink.
pub struct ProgressAggregator {
    total: usize,
    finished: AtomicUsize,
    last_reported: Mutex<Option<usize>>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressAggregator {
    pub fn new(total: usize, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            total,
            finished: AtomicUsize::new(0),
            last_reported: Mutex::new(None),
            sink,
        }
    }

    /// Record one terminal job and report the new percentage.
    ///
    /// Returns the finished count after this job. Increments beyond `total`
    /// are dropped.
    pub fn job_finished(&self) -> usize {
        let done = match self
            .finished
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.total).then_some(n + 1)
            }) {
            Ok(prev) => prev + 1,
            Err(at_total) => return at_total,
        };
        self.publish();
        done
    }

    /// Report 100% for an empty work set.
    pub fn finish_empty(&self) {
        if self.total == 0 {
            self.publish();
        }
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn percent_of(&self, done: usize) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            100.0 * done as f64 / self.total as f64
        }
    }

    // One caller reports at a time, so values reach the sink in increasing
    // order. Callers that find the reporter busy return at once; the
    // reporter re-reads the count after unlocking and picks up their
    // increments.
    fn publish(&self) {
        loop {
            let mut last = match self.last_reported.try_lock() {
                Ok(guard) => guard,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return,
            };
            let done = self.finished.load(Ordering::SeqCst);
            if last.is_some_and(|prev| prev >= done) {
                return;
            }
            *last = Some(done);
            self.deliver(self.percent_of(done));
            drop(last);

            if self.finished.load(Ordering::SeqCst) <= done {
                return;
            }
        }
    }

    fn deliver(&self, percent: f64) {
        let reported = panic::catch_unwind(AssertUnwindSafe(|| self.sink.report(percent)));
        if reported.is_err() {
            warn!(percent, "progress sink panicked, report dropped");
        }
    }
}
