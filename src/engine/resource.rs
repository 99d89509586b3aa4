//! Process-wide count of scarce resource units (encode slots) in use.

use crate::telemetry::metrics;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counter of resource units currently consumed by running jobs.
///
/// Outlives individual runs; the orchestrator zeroes it at run start.
/// Units are only taken through [`ResourceCounter::begin`], whose lease
/// gives the unit back when dropped.
#[derive(Debug, Default)]
pub struct ResourceCounter {
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl ResourceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take one unit. Held until the returned lease drops.
    pub fn begin(self: &Arc<Self>) -> ResourceLease {
        let now = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        metrics::resources_in_use().add(1, &[]);
        ResourceLease {
            counter: Arc::clone(self),
        }
    }

    /// Saturates at zero so a reset racing a live lease cannot underflow.
    /// Returns whether a unit was actually given back; the exported gauge
    /// only moves when it was.
    fn end(&self) -> bool {
        let returned = self
            .in_use
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if returned {
            metrics::resources_in_use().add(-1, &[]);
        }
        returned
    }

    pub fn current(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest value seen since the last reset.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.in_use.store(0, Ordering::SeqCst);
        self.peak.store(0, Ordering::SeqCst);
    }
}

/// Scoped hold on one resource unit.
#[derive(Debug)]
pub struct ResourceLease {
    counter: Arc<ResourceCounter>,
}

impl Drop for ResourceLease {
    fn drop(&mut self) {
        self.counter.end();
    }
}
