//! auditlink-daemon entry point.

use anyhow::Result;
use clap::Parser;

use auditlink_core::config::AuditlinkConfig;
use auditlink_daemon::cli::DaemonCli;
use auditlink_daemon::logging;
use auditlink_daemon::orchestrator::Daemon;

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonCli::parse();

    let mut config = AuditlinkConfig::load(&args.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", args.config.display(), e))?;

    // CLI overrides beat file and environment
    if let Some(log_level) = args.log_level {
        config.general.log_level = log_level;
    }
    if let Some(log_format) = args.log_format {
        config.general.log_format = log_format;
    }
    if let Some(pid_file) = args.pid_file {
        config.general.pid_file = pid_file;
    }
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if args.validate {
        println!("configuration OK: {}", args.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        config = %args.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "auditlink-daemon starting"
    );

    Daemon::new(config)?.run().await
}
