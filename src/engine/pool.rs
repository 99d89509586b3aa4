//! Worker pool: counting admission gate bounding in-flight jobs.

use crate::error::{Error, Result};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Admission gate with a fixed number of slots.
///
/// Waiters are admitted as capacity frees; no FIFO ordering is promised.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity.get())),
            capacity: capacity.get(),
        }
    }

    /// Wait for a free slot, or fail with [`Error::Cancelled`] if `cancel`
    /// fires first. A token that is already cancelled never admits.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Slot> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_owned() => {
                let permit = permit.map_err(|_| Error::Other("worker pool closed".to_string()))?;
                Ok(Slot { _permit: permit })
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently held by jobs.
    pub fn in_use(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// A held worker slot. Released exactly once, when dropped.
#[derive(Debug)]
pub struct Slot {
    _permit: OwnedSemaphorePermit,
}
