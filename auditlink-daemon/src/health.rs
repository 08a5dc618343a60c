//! Aggregated health reporting.
//!
//! Collects each module's [`HealthStatus`] into a unified
//! [`DaemonHealth`] report. The overall daemon status is the worst
//! status among all enabled modules.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)
//!
//! There is no HTTP endpoint here; the report is logged and available
//! in-process for an external health-check system to consume.

use serde::Serialize;

use auditlink_core::pipeline::HealthStatus;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all modules).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-module health reports.
    pub modules: Vec<ModuleHealth>,
}

/// Health status for a single module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// Module name (e.g., "dir-tailer", "correlation").
    pub name: String,
    /// Whether the module is enabled in configuration.
    pub enabled: bool,
    /// Current health status of the module.
    pub status: HealthStatus,
}

/// Aggregate multiple module health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Only considers enabled modules.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let enabled_modules = modules.iter().filter(|m| m.enabled);

    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for module in enabled_modules {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", module.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", module.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, status: HealthStatus) -> ModuleHealth {
        ModuleHealth {
            name: name.to_owned(),
            enabled: true,
            status,
        }
    }

    #[test]
    fn all_healthy_aggregates_healthy() {
        let modules = vec![
            module("dir-tailer", HealthStatus::Healthy),
            module("correlation", HealthStatus::Healthy),
        ];
        assert!(aggregate_status(&modules).is_healthy());
    }

    #[test]
    fn one_degraded_aggregates_degraded() {
        let modules = vec![
            module("dir-tailer", HealthStatus::Healthy),
            module(
                "correlation",
                HealthStatus::Degraded("catching up".to_owned()),
            ),
        ];
        let status = aggregate_status(&modules);
        assert!(status.is_degraded());
        if let HealthStatus::Degraded(reason) = status {
            assert!(reason.contains("correlation"));
            assert!(reason.contains("catching up"));
        }
    }

    #[test]
    fn unhealthy_wins_over_degraded() {
        let modules = vec![
            module("dir-tailer", HealthStatus::Unhealthy("stopped".to_owned())),
            module(
                "correlation",
                HealthStatus::Degraded("catching up".to_owned()),
            ),
        ];
        let status = aggregate_status(&modules);
        assert!(status.is_unhealthy());
        if let HealthStatus::Unhealthy(reason) = status {
            assert!(reason.contains("dir-tailer"));
        }
    }

    #[test]
    fn disabled_modules_are_ignored() {
        let modules = vec![
            module("dir-tailer", HealthStatus::Healthy),
            ModuleHealth {
                name: "correlation".to_owned(),
                enabled: false,
                status: HealthStatus::Unhealthy("off".to_owned()),
            },
        ];
        assert!(aggregate_status(&modules).is_healthy());
    }

    #[test]
    fn empty_module_list_is_healthy() {
        assert!(aggregate_status(&[]).is_healthy());
    }
}
