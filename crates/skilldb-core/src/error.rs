use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Fatal before any work starts: missing corpus directory, unusable store path.
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Embedding failed: {0}")]
    Embed(String),

    #[error("Collection was built with embedder '{stored}' but '{active}' is active; rebuild the index")]
    EmbedderMismatch { stored: String, active: String },

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("Index not found at {}; run skilldb-index first", .0.display())]
    StoreMissing(PathBuf),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),
}

impl Error {
    pub fn parse(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Parse { path: path.into(), reason: reason.to_string() }
    }

    pub fn store(err: impl std::fmt::Display) -> Self { Self::Store(err.to_string()) }

    pub fn embed(err: impl std::fmt::Display) -> Self { Self::Embed(err.to_string()) }

    /// Setup-class errors abort a run before partial work is attempted.
    pub fn is_setup(&self) -> bool {
        matches!(self, Self::Setup(_) | Self::InvalidConfig(_) | Self::StoreMissing(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
