//! Correlation engine error types.
//!
//! [`CorrelationError`] covers every failure the pipeline loop can
//! exit with. `From<CorrelationError> for AuditlinkError` lets the
//! daemon propagate with `?` while keeping cancellation
//! distinguishable from real failures.

use auditlink_core::error::{AuditlinkError, PipelineError};

use crate::parser::ParseLineError;
use crate::reassembler::ReassemblyError;
use crate::tracker::TrackerError;

/// Terminal error of the correlation pipeline.
///
/// Every variant is a fatal condition for the loop; the first one
/// raised is the pipeline's exit reason.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CorrelationError {
    /// The builder was missing a required part.
    #[error("pipeline builder: missing {field}")]
    Builder {
        /// Name of the missing builder field.
        field: &'static str,
    },

    /// Invalid pipeline configuration.
    #[error("config error: {field}: {reason}")]
    Config {
        /// Offending configuration field.
        field: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// A non-empty raw line failed to parse. The reassembler cannot
    /// skip a bad record, so this ends the pipeline.
    #[error("line parse failed: {0}")]
    Parse(#[from] ParseLineError),

    /// The reassembler failed to push or coalesce.
    #[error("reassembly error: {0}")]
    Reassembly(#[from] ReassemblyError),

    /// The session tracker rejected an operation.
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// The raw-line source closed its channel.
    #[error("line source closed")]
    LineSourceClosed,

    /// The reassembly outcome channel closed.
    #[error("reassembly outcome channel closed")]
    OutcomeChannelClosed,

    /// The shared cancellation token fired.
    #[error("correlation cancelled")]
    Cancelled,

    /// The pipeline task could not be joined.
    #[error("pipeline task join failed: {0}")]
    Join(String),

    /// Lifecycle misuse.
    #[error("pipeline already running")]
    AlreadyRunning,

    /// Lifecycle misuse.
    #[error("pipeline not running")]
    NotRunning,
}

impl CorrelationError {
    /// Whether this error represents cooperative shutdown rather than
    /// a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<CorrelationError> for AuditlinkError {
    fn from(err: CorrelationError) -> Self {
        match err {
            CorrelationError::Cancelled => {
                AuditlinkError::Pipeline(PipelineError::Cancelled)
            }
            CorrelationError::AlreadyRunning => {
                AuditlinkError::Pipeline(PipelineError::AlreadyRunning)
            }
            CorrelationError::NotRunning => {
                AuditlinkError::Pipeline(PipelineError::NotRunning)
            }
            other => AuditlinkError::Pipeline(PipelineError::Runtime(other.to_string())),
        }
    }
}
