//! Correlation pipeline settings.
//!
//! [`PipelineConfig`] derives from the core `[correlation]` section
//! and adds the resolved values the loop actually runs with
//! (durations, the optional resume cutoff).

use std::time::{Duration, SystemTime};

use crate::error::CorrelationError;

/// Resolved correlation pipeline settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Interval between reassembler maintenance calls.
    pub maintenance_interval: Duration,
    /// Interval between stale-state eviction sweeps. The eviction
    /// cutoff is "now minus this interval".
    pub eviction_interval: Duration,
    /// Drop audit events timestamped before this point (restart
    /// without re-emitting already-seen history). `None` disables the
    /// filter.
    pub event_cutoff: Option<SystemTime>,
    /// Capacity of the login-record channel created by the builder.
    pub login_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            maintenance_interval: Duration::from_secs(2),
            eviction_interval: Duration::from_secs(60),
            event_cutoff: None,
            login_channel_capacity: 256,
        }
    }
}

impl PipelineConfig {
    /// Build from the core `[correlation]` section.
    ///
    /// With `resume_from_start` set, events older than the moment of
    /// this call are filtered out.
    pub fn from_core(core: &auditlink_core::config::CorrelationConfig) -> Self {
        Self {
            maintenance_interval: Duration::from_secs(core.maintenance_interval_secs),
            eviction_interval: Duration::from_secs(core.eviction_interval_secs),
            event_cutoff: core.resume_from_start.then(SystemTime::now),
            login_channel_capacity: core.login_channel_capacity,
        }
    }

    /// Validate the settings.
    pub fn validate(&self) -> Result<(), CorrelationError> {
        if self.maintenance_interval.is_zero() {
            return Err(CorrelationError::Config {
                field: "maintenance_interval".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.eviction_interval.is_zero() {
            return Err(CorrelationError::Config {
                field: "eviction_interval".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        if self.login_channel_capacity == 0 {
            return Err(CorrelationError::Config {
                field: "login_channel_capacity".to_owned(),
                reason: "must be positive".to_owned(),
            });
        }
        Ok(())
    }
}
