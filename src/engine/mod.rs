//! Batch engine: admission, idempotence, progress, resource accounting and
//! the orchestrator that ties them together.

pub mod gate;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod resource;

pub use gate::{ArtifactGate, ArtifactLayout, IdempotenceGate};
pub use orchestrator::{Orchestrator, RunConfig};
pub use pool::{Slot, WorkerPool};
pub use progress::{LogProgress, NoProgress, ProgressAggregator, ProgressSink};
pub use resource::{ResourceCounter, ResourceLease};
