//! Error types — per-domain error definitions.

/// Top-level auditlink error type.
#[derive(Debug, thiserror::Error)]
pub enum AuditlinkError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Pipeline processing error.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be found.
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// Configuration failed to parse.
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// Configuration value is out of range or inconsistent.
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Pipeline lifecycle and processing errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Channel send failed (receiver dropped).
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// Channel receive failed (all senders dropped).
    #[error("channel receive failed: {0}")]
    ChannelRecv(String),

    /// Pipeline initialization failed.
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// Pipeline is already running.
    #[error("pipeline already running")]
    AlreadyRunning,

    /// Pipeline is not running.
    #[error("pipeline not running")]
    NotRunning,

    /// Runtime failure inside a running pipeline.
    #[error("pipeline failed: {0}")]
    Runtime(String),

    /// The shared cancellation token was triggered.
    ///
    /// Reported distinctly so callers can tell graceful shutdown
    /// apart from a true failure.
    #[error("pipeline cancelled")]
    Cancelled,
}
