//! Metric instrument factories for scrubgen.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an OTLP endpoint the global provider is a no-op, so recording is
//! always safe.

use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};

fn meter() -> Meter {
    opentelemetry::global::meter("scrubgen")
}

/// Counter: jobs that reached a terminal state.
/// Labels: `outcome` ("completed" | "skipped" | "failed" | "cancelled").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("scrubgen.jobs.finished")
        .with_description("Number of batch jobs that reached a terminal state")
        .build()
}

/// Counter: idempotence checks that were inconclusive and answered "generate".
/// Labels: `stage` ("inspect" | "claim").
pub fn gate_fail_open() -> Counter<u64> {
    meter()
        .u64_counter("scrubgen.gate.fail_open")
        .with_description("Idempotence checks that failed open")
        .build()
}

/// Histogram: generator call duration in milliseconds.
/// Labels: `outcome` ("ok" | "error").
pub fn generator_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("scrubgen.generator.duration_ms")
        .with_description("Artifact generator call duration")
        .with_unit("ms")
        .build()
}

/// Up/down counter: scarce resource units currently in use.
pub fn resources_in_use() -> UpDownCounter<i64> {
    meter()
        .i64_up_down_counter("scrubgen.resources.in_use")
        .with_description("Encode resource units currently held by jobs")
        .build()
}
