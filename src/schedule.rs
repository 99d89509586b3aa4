//! Trigger surface: the scheduled task and its daily trigger.

use crate::engine::{LogProgress, Orchestrator};
use crate::error::Result;
use chrono::{DateTime, Days, Local, NaiveTime, TimeZone};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Identity of the scheduled task, as shown to operators.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub key: &'static str,
    pub name: &'static str,
    pub description: &'static str,
}

pub const PREVIEW_TASK: TaskInfo = TaskInfo {
    key: "GenerateBIFFiles",
    name: "Generate BIF Files",
    description: "Generates BIF files used for scrubbing previews.",
};

/// Fires once a day at a fixed local time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyTrigger {
    pub at: NaiveTime,
}

impl Default for DailyTrigger {
    fn default() -> Self {
        Self {
            at: NaiveTime::from_hms_opt(3, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl DailyTrigger {
    pub fn new(at: NaiveTime) -> Self {
        Self { at }
    }

    /// First fire time strictly after `now`.
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> DateTime<Tz> {
        let tz = now.timezone();
        let mut day = now.date_naive();
        loop {
            // Local times skipped by a DST jump resolve to nothing; try the
            // next day.
            if let Some(candidate) = tz.from_local_datetime(&day.and_time(self.at)).earliest() {
                if candidate > *now {
                    return candidate;
                }
            }
            day = match day.checked_add_days(Days::new(1)) {
                Some(next) => next,
                None => return now.clone(),
            };
        }
    }

    /// How long to sleep from `now` until the next fire time.
    pub fn delay_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Duration {
        (self.next_after(now) - now.clone())
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// Run the batch every time `trigger` fires until `shutdown` is cancelled.
///
/// A failed run is logged and the loop keeps going. Cancelling `shutdown`
/// also cancels a run in progress; the loop returns once it has unwound.
pub async fn serve(
    orchestrator: Arc<Orchestrator>,
    trigger: DailyTrigger,
    shutdown: CancellationToken,
) -> Result<()> {
    info!(
        task = PREVIEW_TASK.key,
        at = %trigger.at,
        "scheduler started"
    );

    loop {
        let next = trigger.next_after(&Local::now());
        info!(task = PREVIEW_TASK.key, next = %next.to_rfc3339(), "next run scheduled");

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("scheduler shutting down");
                return Ok(());
            }
            _ = tokio::time::sleep(trigger.delay_from(&Local::now())) => {}
        }

        info!(task = PREVIEW_TASK.name, "scheduled run triggered");
        match orchestrator
            .run(Arc::new(LogProgress), shutdown.child_token())
            .await
        {
            Ok(summary) => info!(
                status = ?summary.status,
                completed = summary.completed(),
                failed = summary.failed(),
                "scheduled run finished"
            ),
            Err(e) if e.is_cancelled() => info!("scheduled run cancelled"),
            Err(e) => error!(error = %e, "scheduled run failed"),
        }
    }
}
