//! Error types for each part of the core.

use std::path::PathBuf;

use thiserror::Error;

/// Metadata cache failures.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Reading or writing the cache file failed.
    #[error("IO error on cache {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The cache document could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Atomic replace of the cache file failed.
    #[error("Failed to persist cache {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// Catalog API failures.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// HTTP transport error.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed base URL or endpoint.
    #[error("Invalid catalog URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The API key was not accepted.
    #[error("Login rejected: {0}")]
    Login(String),

    /// A response did not have the expected shape.
    #[error("Unexpected response from {endpoint}: {message}")]
    Response { endpoint: String, message: String },
}

/// Rename and move failures.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Another file already has the target path.
    #[error("Destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),

    /// No library folder matches the show.
    #[error("No library folder found for show: {show}")]
    NoShowDirectory { show: String },

    /// The season folder could not be created or used.
    #[error("Destination folder {} is not usable: {source}", path.display())]
    ParentUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A cross-device copy came out short and was discarded.
    #[error(
        "Copy of {} is incomplete: expected {expected} bytes, found {actual}",
        destination.display()
    )]
    SizeMismatch {
        destination: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Any other filesystem error, tagged with the operation.
    #[error("Failed to {op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ExecutorError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors from processing one file.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Catalog lookup failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Cache access failed.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Rename or move failed.
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Filesystem error outside the executor.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Watch service startup failures.
#[derive(Error, Debug)]
pub enum WatchError {
    /// notify could not create a watcher.
    #[error("Failed to create watcher: {0}")]
    WatcherCreation(#[source] notify::Error),

    /// A root could not be watched.
    #[error("Failed to watch path {}: {source}", path.display())]
    WatchPath {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Result of processing one file.
pub type Result<T> = std::result::Result<T, PipelineError>;
