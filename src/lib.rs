//! # scrubgen
//!
//! Batch generation of scrubbing preview (BIF) files for a video library.
//!
//! The [`engine::Orchestrator`] enumerates the library through a
//! [`catalog::Catalog`], skips items whose artifact is already fresh, and
//! fans the rest out to an [`generator::ArtifactGenerator`] under a fixed
//! parallelism ceiling, with cooperative cancellation and per-item failure
//! isolation.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod generator;
pub mod model;
pub mod schedule;
pub mod telemetry;
