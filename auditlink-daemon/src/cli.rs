//! CLI argument definitions for auditlink-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Auditlink audit correlation daemon.
///
/// Tails the kernel audit log directory, reassembles audit records,
/// and correlates them with remote login events into a unified,
/// attributed audit trail.
#[derive(Parser, Debug)]
#[command(name = "auditlink-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to auditlink.toml configuration file.
    #[arg(short, long, default_value = "/etc/auditlink/auditlink.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}
