//! Health aggregation integration tests.

use auditlink_core::pipeline::HealthStatus;
use auditlink_daemon::health::{DaemonHealth, ModuleHealth, aggregate_status};

fn module(name: &str, enabled: bool, status: HealthStatus) -> ModuleHealth {
    ModuleHealth {
        name: name.to_owned(),
        enabled,
        status,
    }
}

#[test]
fn report_serializes_to_json() {
    let modules = vec![
        module("dir-tailer", true, HealthStatus::Healthy),
        module(
            "correlation",
            true,
            HealthStatus::Degraded("catching up".to_owned()),
        ),
    ];
    let report = DaemonHealth {
        status: aggregate_status(&modules),
        uptime_secs: 42,
        modules,
    };

    let json = serde_json::to_value(&report).expect("serializable");
    assert_eq!(json["uptime_secs"], 42);
    assert_eq!(json["modules"][0]["name"], "dir-tailer");
    assert!(json["status"]["Degraded"].is_string());
}

#[test]
fn aggregation_collects_every_failing_module() {
    let modules = vec![
        module("dir-tailer", true, HealthStatus::Unhealthy("dead".to_owned())),
        module(
            "correlation",
            true,
            HealthStatus::Unhealthy("stopped".to_owned()),
        ),
    ];
    let status = aggregate_status(&modules);
    let HealthStatus::Unhealthy(reason) = status else {
        panic!("expected unhealthy, got {status:?}");
    };
    assert!(reason.contains("dir-tailer"));
    assert!(reason.contains("correlation"));
}

#[test]
fn degraded_does_not_mask_later_unhealthy() {
    let modules = vec![
        module(
            "dir-tailer",
            true,
            HealthStatus::Degraded("slow".to_owned()),
        ),
        module(
            "correlation",
            true,
            HealthStatus::Unhealthy("stopped".to_owned()),
        ),
    ];
    assert!(aggregate_status(&modules).is_unhealthy());
}
