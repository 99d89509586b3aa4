//! Error types for scrubgen.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Enumerating the library failed. Fatal to the run.
    #[error("catalog enumeration failed: {0}")]
    Catalog(String),

    #[error("artifact generation failed: {0}")]
    Generation(String),

    /// Work stopped because the run's cancellation token fired.
    #[error("cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
