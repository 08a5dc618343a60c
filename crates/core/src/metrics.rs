//! Metric name constants.
//!
//! Central definition of every metric name the workspace records.
//! Modules call `metrics::counter!()` / `metrics::gauge!()` with these
//! constants; an exporter, when one is installed by the embedding
//! process, picks them up from the global recorder.
//!
//! # Naming convention
//!
//! - prefix: `auditlink_`
//! - module: `tailer_`, `correlation_`, `sink_`
//! - suffix: `_total` (counter), none (gauge)

// --- label keys ---

/// Result label key (success, failure).
pub const LABEL_RESULT: &str = "result";

/// Record kind label key (login, session-end, other).
pub const LABEL_KIND: &str = "kind";

// --- directory tailer ---

/// Tailer: lines emitted (counter).
pub const TAILER_LINES_TOTAL: &str = "auditlink_tailer_lines_total";

/// Tailer: historical files read during catch-up (counter).
pub const TAILER_CATCHUP_FILES_TOTAL: &str = "auditlink_tailer_catchup_files_total";

/// Tailer: rotations detected (counter).
pub const TAILER_ROTATIONS_TOTAL: &str = "auditlink_tailer_rotations_total";

/// Tailer: read retries performed (counter).
pub const TAILER_READ_RETRIES_TOTAL: &str = "auditlink_tailer_read_retries_total";

// --- correlation pipeline ---

/// Correlation: coalesced events received (counter).
pub const CORRELATION_EVENTS_TOTAL: &str = "auditlink_correlation_events_total";

/// Correlation: events dropped by the resume cutoff (counter).
pub const CORRELATION_EVENTS_FILTERED_TOTAL: &str =
    "auditlink_correlation_events_filtered_total";

/// Correlation: events the reassembler reported lost (counter).
pub const CORRELATION_EVENTS_LOST_TOTAL: &str = "auditlink_correlation_events_lost_total";

/// Correlation: login records received (counter).
pub const CORRELATION_LOGINS_TOTAL: &str = "auditlink_correlation_logins_total";

/// Correlation: live audit sessions being tracked (gauge).
pub const CORRELATION_TRACKED_SESSIONS: &str = "auditlink_correlation_tracked_sessions";

/// Correlation: logins waiting for a matching session (gauge).
pub const CORRELATION_PENDING_LOGINS: &str = "auditlink_correlation_pending_logins";

/// Correlation: entries removed by stale eviction (counter).
pub const CORRELATION_EVICTED_TOTAL: &str = "auditlink_correlation_evicted_total";

// --- event sink ---

/// Sink: attributed audit events written (counter).
pub const SINK_EVENTS_WRITTEN_TOTAL: &str = "auditlink_sink_events_written_total";
