//! Artifact generation: the capability the orchestrator drives per item,
//! plus an implementation that shells out to an external program.

use crate::error::{Error, Result};
use crate::model::WorkItem;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Writes the preview artifact for one item.
///
/// Must be safe to call concurrently for different items. Long-running
/// implementations watch `cancel` and return [`Error::Cancelled`] when they
/// stop early; any other error counts as a failure of that item only.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    async fn generate(
        &self,
        item: &WorkItem,
        target: &Path,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<()>;
}

/// Runs an external program once per item.
///
/// The program receives its job through environment variables
/// (`SCRUBGEN_INPUT`, `SCRUBGEN_OUTPUT`, `SCRUBGEN_INTERVAL_MS`,
/// `SCRUBGEN_ITEM_ID`, `SCRUBGEN_ITEM_NAME`) and must write the artifact to
/// `SCRUBGEN_OUTPUT` before exiting 0.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: PathBuf,
    args: Vec<String>,
}

impl CommandGenerator {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
        }
    }

    /// Fixed arguments for every invocation.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    // Bare names go through PATH; relative paths with a directory part are
    // resolved against the process CWD.
    fn resolved_command(&self) -> Result<PathBuf> {
        if self.command.is_relative() && self.command.components().count() > 1 {
            Ok(std::env::current_dir()?.join(&self.command))
        } else {
            Ok(self.command.clone())
        }
    }
}

#[async_trait]
impl ArtifactGenerator for CommandGenerator {
    async fn generate(
        &self,
        item: &WorkItem,
        target: &Path,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let command = self.resolved_command()?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!(
            item_id = %item.id,
            command = %command.display(),
            target = %target.display(),
            "running generator"
        );
        let start = Instant::now();

        let child = Command::new(&command)
            .args(&self.args)
            .env("SCRUBGEN_INPUT", &item.path)
            .env("SCRUBGEN_OUTPUT", target)
            .env("SCRUBGEN_INTERVAL_MS", interval.as_millis().to_string())
            .env("SCRUBGEN_ITEM_ID", item.id.0.to_string())
            .env("SCRUBGEN_ITEM_NAME", &item.name)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Generation(format!("cannot start {}: {e}", command.display())))?;

        // Dropping the wait future drops the child, which kills it.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            output = child.wait_with_output() => output?,
        };

        debug!(
            item_id = %item.id,
            duration_ms = start.elapsed().as_millis() as u64,
            "generator exited"
        );

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("").trim();
            return Err(Error::Generation(format!(
                "generator exited with status {}{}{}",
                output.status.code().unwrap_or(-1),
                if detail.is_empty() { "" } else { ": " },
                detail
            )));
        }

        if !tokio::fs::try_exists(target).await? {
            return Err(Error::Generation(format!(
                "generator finished without writing {}",
                target.display()
            )));
        }

        Ok(())
    }
}
