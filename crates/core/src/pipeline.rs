//! Pipeline trait — the lifecycle contract every module implements.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::AuditlinkError;

/// Boxed future alias for dyn-compatible trait variants.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Health of a single module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Operating, but something needs attention.
    Degraded(String),
    /// Not operating.
    Unhealthy(String),
}

impl HealthStatus {
    /// Whether the status is [`HealthStatus::Healthy`].
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Whether the status is [`HealthStatus::Degraded`].
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded(_))
    }

    /// Whether the status is [`HealthStatus::Unhealthy`].
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

/// Lifecycle contract for long-running modules.
///
/// `start()` spawns the module's background work and returns;
/// `stop()` performs a graceful shutdown and surfaces the module's
/// terminal state. The daemon drives every module through this trait.
pub trait Pipeline: Send {
    /// Start the module's background tasks.
    ///
    /// Fails if the module is already running.
    fn start(&mut self) -> impl Future<Output = Result<(), AuditlinkError>> + Send;

    /// Stop the module and wait for its tasks to finish.
    ///
    /// Fails if the module was never started.
    fn stop(&mut self) -> impl Future<Output = Result<(), AuditlinkError>> + Send;

    /// Report the module's current health.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_predicates() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(HealthStatus::Degraded("buffer nearly full".to_owned()).is_degraded());
        assert!(HealthStatus::Unhealthy("stopped".to_owned()).is_unhealthy());
        assert!(!HealthStatus::Healthy.is_unhealthy());
    }

    #[test]
    fn health_status_serializes() {
        let json = serde_json::to_string(&HealthStatus::Healthy).expect("serializable");
        assert!(json.contains("Healthy"));
    }
}
