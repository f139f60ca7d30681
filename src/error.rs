//! Error types for the fleet orchestrator.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a failure that is logged and swallowed instead of returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoredKind {
    /// Snapshot retention trimming.
    Retention,
    /// Best-effort restore of a target after a partial job.
    Rollback,
    /// Malformed or unusable cron expression on a job template.
    Schedule,
    /// Alert delivery.
    Alert,
}

impl std::fmt::Display for IgnoredKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IgnoredKind::Retention => "retention",
            IgnoredKind::Rollback => "rollback",
            IgnoredKind::Schedule => "schedule",
            IgnoredKind::Alert => "alert",
        };
        f.write_str(name)
    }
}

/// Main error type for the fleet orchestrator.
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    // State machine errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Device errors
    #[error("Device error: {0}")]
    Device(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    // Scheduling errors
    #[error("Invalid cron expression '{expr}': {reason}")]
    Cron { expr: String, reason: String },

    // Storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure that callers log and continue past. Never crosses the public API.
    #[error("{kind} failure ignored: {message}")]
    IgnoredFailure { kind: IgnoredKind, message: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // HTTP errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Archive errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Create a not-found error for a resource kind.
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Error::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Wrap any failure into the ignored class.
    pub fn ignored(kind: IgnoredKind, source: impl std::fmt::Display) -> Self {
        Error::IgnoredFailure {
            kind,
            message: source.to_string(),
        }
    }

    /// Emit the error as a warning. Ignored failures end up here.
    pub fn log_ignored(&self) {
        match self {
            Error::IgnoredFailure { kind, message } => {
                tracing::warn!(kind = %kind, "Ignored failure: {}", message);
            }
            other => tracing::warn!("Ignored failure: {}", other),
        }
    }
}

/// Log an ignored failure of the given kind, discarding it.
pub fn ignore<T>(kind: IgnoredKind, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            Error::ignored(kind, e).log_ignored();
            None
        }
    }
}
