//! Error types and exit codes for golden-repos

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Main error type for golden repo lifecycle operations
#[derive(Error, Debug)]
pub enum GoldenRepoError {
    #[error("Repository not found: '{identifier}'")]
    NotFound { identifier: String },

    #[error("Alias already exists: {alias}")]
    AliasExists { alias: String },

    #[error("Repository already registered under alias: {alias}")]
    RepoExists { alias: String },

    #[error("Alias '{alias}' is reserved for system repositories")]
    ReservedName { alias: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Alias '{alias}' points at missing target {}", path.display())]
    AliasTargetMissing { alias: String, path: PathBuf },

    #[error("Timed out waiting for write lock on '{alias}'")]
    LockTimeout { alias: String },

    #[error("Snapshot of '{repo_name}' failed: {message}")]
    SnapshotFailure { repo_name: String, message: String },

    #[error("Index build ({index_type}) failed: {message}")]
    IndexBuildFailure { index_type: String, message: String },

    #[error("Reconciliation of '{alias}' failed: {message}")]
    ReconciliationFailure { alias: String, message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    #[error("Job queue error: {message}")]
    JobQueue { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GoldenRepoError {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is transient and the next tick should simply retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. } | Self::Upstream { .. })
    }

    /// Convert error to the CLI exit code:
    /// - 0: Success
    /// - 1: IO / serialization
    /// - 2: Unknown repository or alias
    /// - 3: Registration conflict or invalid name
    /// - 4: Refresh failure (lock, snapshot, index, upstream)
    /// - 5: Reconciliation failure
    /// - 6: Configuration or job queue error
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::NotFound { .. } | Self::AliasTargetMissing { .. } => ExitCode::from(2),
            Self::AliasExists { .. }
            | Self::RepoExists { .. }
            | Self::ReservedName { .. }
            | Self::InvalidName { .. } => ExitCode::from(3),
            Self::LockTimeout { .. }
            | Self::SnapshotFailure { .. }
            | Self::IndexBuildFailure { .. }
            | Self::Upstream { .. } => ExitCode::from(4),
            Self::ReconciliationFailure { .. } => ExitCode::from(5),
            Self::Config { .. } | Self::JobQueue { .. } => ExitCode::from(6),
            Self::Io { .. } | Self::Serialization(_) => ExitCode::from(1),
        }
    }
}

/// Result type alias for golden repo operations
pub type Result<T> = std::result::Result<T, GoldenRepoError>;
