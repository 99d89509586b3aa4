//! Run and job span helpers.

use crate::model::{ItemId, JobOutcome};
use tracing::Span;
use uuid::Uuid;

/// Start the span covering one batch run.
///
/// `batch.total` is declared empty and recorded once enumeration is done.
pub fn start_run_span(run_id: &Uuid) -> Span {
    tracing::info_span!(
        "batch.run",
        "batch.run_id" = %run_id,
        "batch.total" = tracing::field::Empty,
    )
}

/// Start the span for a single item's job.
///
/// The `job.outcome` field is declared empty and filled via
/// [`record_outcome`].
pub fn start_job_span(item_id: &ItemId, item_name: &str) -> Span {
    tracing::info_span!(
        "batch.job",
        "job.item_id" = %item_id,
        "job.item" = item_name,
        "job.outcome" = tracing::field::Empty,
    )
}

/// Record how the job ended, on the span and as an event scoped to it.
pub fn record_outcome(span: &Span, outcome: &JobOutcome) {
    span.record("job.outcome", outcome.label());
    span.in_scope(|| {
        tracing::debug!(outcome = outcome.label(), "job finished");
    });
}
