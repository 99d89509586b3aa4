//! Typed configuration from environment variables or a TOML file.
//!
//! Loads once at startup, fails fast if required values are missing or
//! out of range.

use crate::engine::RunConfig;
use crate::error::{Error, Result};
use chrono::NaiveTime;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_GENERATOR_COMMAND: &str = "scrubgen-bif";
const DEFAULT_DAILY_AT: &str = "03:00";

#[derive(Debug, Clone)]
pub struct Config {
    /// Root of the media library that gets walked for videos.
    pub library_dir: PathBuf,
    /// Where artifacts go. `None` saves them next to the media.
    pub artifact_dir: Option<PathBuf>,
    /// Maximum simultaneous generator invocations.
    pub parallelism: usize,
    /// Sampling interval between preview frames, in milliseconds.
    pub interval_ms: u64,
    /// External program that writes one artifact.
    pub generator_command: PathBuf,
    /// Arguments passed to the generator command.
    pub generator_args: Vec<String>,
    /// Local time of day for the scheduled run.
    pub daily_at: NaiveTime,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

/// On-disk shape of the TOML config. Everything but the library is optional.
#[derive(Debug, Deserialize)]
struct FileConfig {
    library_dir: PathBuf,
    artifact_dir: Option<PathBuf>,
    parallelism: Option<usize>,
    interval_ms: Option<u64>,
    generator_command: Option<PathBuf>,
    #[serde(default)]
    generator_args: Vec<String>,
    daily_at: Option<String>,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

impl Config {
    /// Load configuration from `SCRUBGEN_*` environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            library_dir: PathBuf::from(required_var("SCRUBGEN_LIBRARY_DIR")?),
            artifact_dir: std::env::var("SCRUBGEN_ARTIFACT_DIR").ok().map(PathBuf::from),
            parallelism: parsed_var("SCRUBGEN_PARALLELISM")?.unwrap_or(1),
            interval_ms: parsed_var("SCRUBGEN_INTERVAL_MS")?.unwrap_or(DEFAULT_INTERVAL_MS),
            generator_command: std::env::var("SCRUBGEN_GENERATOR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_GENERATOR_COMMAND)),
            generator_args: std::env::var("SCRUBGEN_GENERATOR_ARGS")
                .map(|raw| raw.split_whitespace().map(String::from).collect())
                .unwrap_or_default(),
            daily_at: parse_time(
                &std::env::var("SCRUBGEN_DAILY_AT").unwrap_or_else(|_| DEFAULT_DAILY_AT.into()),
            )?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        let file: FileConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("bad config {}: {e}", path.display())))?;

        let config = Self {
            library_dir: file.library_dir,
            artifact_dir: file.artifact_dir,
            parallelism: file.parallelism.unwrap_or(1),
            interval_ms: file.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS),
            generator_command: file
                .generator_command
                .unwrap_or_else(|| PathBuf::from(DEFAULT_GENERATOR_COMMAND)),
            generator_args: file.generator_args,
            daily_at: parse_time(file.daily_at.as_deref().unwrap_or(DEFAULT_DAILY_AT))?,
            otel_endpoint: file.otel_endpoint,
            log_level: file.log_level.unwrap_or_else(|| "info".to_string()),
        };
        config.validate()?;
        Ok(config)
    }

    /// The values the orchestrator reads for the duration of a run.
    pub fn run_config(&self) -> Result<RunConfig> {
        let parallelism = NonZeroUsize::new(self.parallelism)
            .ok_or_else(|| Error::Config("parallelism must be at least 1".to_string()))?;
        Ok(RunConfig {
            parallelism,
            interval: Duration::from_millis(self.interval_ms),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.parallelism == 0 {
            return Err(Error::Config("parallelism must be at least 1".to_string()));
        }
        if self.interval_ms == 0 {
            return Err(Error::Config("interval_ms must be positive".to_string()));
        }
        Ok(())
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Accepts `HH:MM` or `HH:MM:SS`.
pub fn parse_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|e| Error::Config(format!("invalid time of day {raw:?}: {e}")))
}
