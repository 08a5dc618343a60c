//! Configuration — `auditlink.toml` parsing and runtime settings.
//!
//! [`AuditlinkConfig`] is the top-level structure holding every
//! module's settings.
//!
//! # Load precedence
//! 1. CLI arguments (highest)
//! 2. Environment variables (`AUDITLINK_TAILER_DIRECTORY=/var/log/audit`)
//! 3. Configuration file (`auditlink.toml`)
//! 4. Defaults (`Default` impls)
//!
//! # Example
//! ```no_run
//! # async fn example() -> Result<(), auditlink_core::error::AuditlinkError> {
//! use auditlink_core::config::AuditlinkConfig;
//!
//! // Load from file + apply environment overrides
//! let config = AuditlinkConfig::load("auditlink.toml").await?;
//!
//! // Parse a TOML string directly
//! let config = AuditlinkConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AuditlinkError, ConfigError};

/// Top-level auditlink configuration.
///
/// Mirrors the structure of `auditlink.toml`; each module reads only
/// its own section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditlinkConfig {
    /// General daemon settings.
    #[serde(default)]
    pub general: GeneralConfig,
    /// Directory tailer settings.
    #[serde(default)]
    pub tailer: TailerConfig,
    /// Correlation pipeline settings.
    #[serde(default)]
    pub correlation: CorrelationConfig,
    /// Event sink settings.
    #[serde(default)]
    pub sink: SinkConfig,
}

impl AuditlinkConfig {
    /// Load configuration from a TOML file and apply environment
    /// overrides.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, AuditlinkError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file (no environment overrides).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, AuditlinkError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AuditlinkError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                AuditlinkError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, AuditlinkError> {
        toml::from_str(toml_str).map_err(|e| {
            AuditlinkError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Override settings from environment variables.
    ///
    /// Naming convention: `AUDITLINK_{SECTION}_{FIELD}`,
    /// e.g. `AUDITLINK_TAILER_DIRECTORY=/var/log/audit`.
    pub fn apply_env_overrides(&mut self) {
        // [general]
        override_string(&mut self.general.log_level, "AUDITLINK_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "AUDITLINK_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "AUDITLINK_GENERAL_PID_FILE");
        override_string(&mut self.general.data_dir, "AUDITLINK_GENERAL_DATA_DIR");

        // [tailer]
        override_string(&mut self.tailer.directory, "AUDITLINK_TAILER_DIRECTORY");
        override_string(&mut self.tailer.live_file, "AUDITLINK_TAILER_LIVE_FILE");
        override_usize(
            &mut self.tailer.channel_capacity,
            "AUDITLINK_TAILER_CHANNEL_CAPACITY",
        );
        override_u64(
            &mut self.tailer.retry_initial_ms,
            "AUDITLINK_TAILER_RETRY_INITIAL_MS",
        );
        override_u64(&mut self.tailer.retry_max_ms, "AUDITLINK_TAILER_RETRY_MAX_MS");
        override_u64(
            &mut self.tailer.retry_max_elapsed_secs,
            "AUDITLINK_TAILER_RETRY_MAX_ELAPSED_SECS",
        );

        // [correlation]
        override_u64(
            &mut self.correlation.maintenance_interval_secs,
            "AUDITLINK_CORRELATION_MAINTENANCE_INTERVAL_SECS",
        );
        override_u64(
            &mut self.correlation.eviction_interval_secs,
            "AUDITLINK_CORRELATION_EVICTION_INTERVAL_SECS",
        );
        override_bool(
            &mut self.correlation.resume_from_start,
            "AUDITLINK_CORRELATION_RESUME_FROM_START",
        );
        override_usize(
            &mut self.correlation.login_channel_capacity,
            "AUDITLINK_CORRELATION_LOGIN_CHANNEL_CAPACITY",
        );
        override_usize(
            &mut self.correlation.outcome_channel_capacity,
            "AUDITLINK_CORRELATION_OUTCOME_CHANNEL_CAPACITY",
        );

        // [sink]
        override_string(&mut self.sink.kind, "AUDITLINK_SINK_KIND");
        override_string(&mut self.sink.path, "AUDITLINK_SINK_PATH");
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.general.validate()?;
        self.tailer.validate()?;
        self.correlation.validate()?;
        self.sink.validate()?;
        Ok(())
    }
}

/// General daemon settings (`[general]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Log format (`"json"` or `"pretty"`).
    pub log_format: String,
    /// PID file path. Empty disables PID file handling.
    pub pid_file: String,
    /// Data directory for sink output and runtime state.
    pub data_dir: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
            data_dir: "/var/lib/auditlink".to_owned(),
        }
    }
}

impl GeneralConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.log_format.as_str() {
            "json" | "pretty" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "general.log_format".to_owned(),
                    reason: format!("must be \"json\" or \"pretty\", got \"{other}\""),
                });
            }
        }
        Ok(())
    }
}

/// Directory tailer settings (`[tailer]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TailerConfig {
    /// Directory containing the audit log and its rotated siblings.
    pub directory: String,
    /// Name of the live (unsuffixed) log file.
    pub live_file: String,
    /// Capacity of the emitted-lines channel.
    pub channel_capacity: usize,
    /// Initial backoff delay for transient read failures (ms).
    pub retry_initial_ms: u64,
    /// Backoff delay ceiling (ms).
    pub retry_max_ms: u64,
    /// Give up retrying after this much elapsed time (secs).
    pub retry_max_elapsed_secs: u64,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            directory: "/var/log/audit".to_owned(),
            live_file: "audit.log".to_owned(),
            channel_capacity: 1024,
            retry_initial_ms: 100,
            retry_max_ms: 10_000,
            retry_max_elapsed_secs: 60,
        }
    }
}

impl TailerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.directory.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tailer.directory".to_owned(),
                reason: "must not be empty".to_owned(),
            });
        }
        if self.live_file.is_empty() || self.live_file.contains('/') {
            return Err(ConfigError::InvalidValue {
                field: "tailer.live_file".to_owned(),
                reason: "must be a bare file name".to_owned(),
            });
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "tailer.channel_capacity".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.retry_initial_ms == 0 || self.retry_initial_ms > self.retry_max_ms {
            return Err(ConfigError::InvalidValue {
                field: "tailer.retry_initial_ms".to_owned(),
                reason: "must be positive and <= retry_max_ms".to_owned(),
            });
        }
        Ok(())
    }
}

/// Correlation pipeline settings (`[correlation]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Interval between reassembler maintenance calls (secs).
    pub maintenance_interval_secs: u64,
    /// Interval between stale-state eviction sweeps (secs).
    pub eviction_interval_secs: u64,
    /// Drop audit events older than daemon start. Allows restarting
    /// over an already-processed log directory without re-emitting
    /// history.
    pub resume_from_start: bool,
    /// Capacity of the login-record channel.
    pub login_channel_capacity: usize,
    /// Capacity of the reassembly-outcome channel.
    pub outcome_channel_capacity: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_secs: 2,
            eviction_interval_secs: 60,
            resume_from_start: false,
            login_channel_capacity: 256,
            outcome_channel_capacity: 1024,
        }
    }
}

impl CorrelationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.maintenance_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "correlation.maintenance_interval_secs".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.eviction_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "correlation.eviction_interval_secs".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.login_channel_capacity == 0 || self.outcome_channel_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "correlation.channel_capacity".to_owned(),
                reason: "channel capacities must be positive".to_owned(),
            });
        }
        Ok(())
    }
}

/// Event sink settings (`[sink]`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Sink kind (`"file"` or `"stdout"`).
    pub kind: String,
    /// Output path for the file sink.
    pub path: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: "file".to_owned(),
            path: "/var/lib/auditlink/events.json".to_owned(),
        }
    }
}

impl SinkConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.kind.as_str() {
            "file" => {
                if self.path.is_empty() {
                    return Err(ConfigError::InvalidValue {
                        field: "sink.path".to_owned(),
                        reason: "file sink requires a path".to_owned(),
                    });
                }
            }
            "stdout" => {}
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "sink.kind".to_owned(),
                    reason: format!("must be \"file\" or \"stdout\", got \"{other}\""),
                });
            }
        }
        Ok(())
    }
}

// --- environment override helpers ---

fn override_string(target: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        *target = value;
    }
}

fn override_bool(target: &mut bool, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(var, value, "ignoring unparsable boolean override"),
        }
    }
}

fn override_u64(target: &mut u64, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(var, value, "ignoring unparsable integer override"),
        }
    }
}

fn override_usize(target: &mut usize, var: &str) {
    if let Ok(value) = std::env::var(var) {
        match value.parse() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(var, value, "ignoring unparsable integer override"),
        }
    }
}
