//! Module orchestration -- assembly, wiring, and lifecycle management.
//!
//! The [`Daemon`] loads configuration, builds the directory tailer,
//! the correlation pipeline, and the event sink, wires their channels,
//! and runs until a shutdown signal or the first fatal error.
//!
//! # Data flow
//!
//! ```text
//! DirectoryTailer --lines--> CorrelationPipeline --events--> sink
//! login sources  --logins------------^
//! ```
//!
//! Login-ingestion tasks are external: the daemon owns the login
//! channel's sender and hands clones to whatever ingestion is wired
//! into the process. Shutdown is cooperative through one shared
//! cancellation token; the exit path distinguishes a signal-triggered
//! stop from a pipeline failure.

use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use auditlink_core::config::AuditlinkConfig;
use auditlink_core::event::{MODULE_CORRELATION, MODULE_TAILER, RemoteUserLogin};
use auditlink_core::pipeline::{HealthStatus, Pipeline};
use auditlink_correlation::parser::KernelAuditParser;
use auditlink_correlation::pipeline::CorrelationPipelineBuilder;
use auditlink_correlation::reassembler::SequenceReassembler;
use auditlink_correlation::sink::JsonLinesSink;
use auditlink_correlation::tailer::{DirectoryTailer, TailerConfig, TailerError};
use auditlink_correlation::{CorrelationError, PipelineConfig};

use crate::health::{DaemonHealth, ModuleHealth, aggregate_status};

/// Stale-assembly timeout, as a multiple of the maintenance interval.
const GROUP_TIMEOUT_FACTOR: u32 = 2;

/// Why the main wait ended.
enum ExitReason {
    Signal(&'static str),
    Pipeline(Result<(), CorrelationError>),
    Tailer(TailerError),
}

/// The daemon: configuration plus the shared cancellation token.
pub struct Daemon {
    config: AuditlinkConfig,
    cancel: CancellationToken,
    start_time: Instant,
    /// Sender for login records, kept alive for external ingestion
    /// tasks to clone. Dropping it closes the pipeline's login input.
    login_tx: Option<mpsc::Sender<RemoteUserLogin>>,
}

impl Daemon {
    /// Validate the configuration and build the daemon.
    pub fn new(config: AuditlinkConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        Ok(Self {
            config,
            cancel: CancellationToken::new(),
            start_time: Instant::now(),
            login_tx: None,
        })
    }

    /// The shared cancellation token (for tests and embedders).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// A sender for login records, once the daemon is running.
    pub fn login_sender(&self) -> Option<mpsc::Sender<RemoteUserLogin>> {
        self.login_tx.clone()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &AuditlinkConfig {
        &self.config
    }

    /// Run until a shutdown signal or the first fatal error.
    pub async fn run(&mut self) -> Result<()> {
        if !self.config.general.pid_file.is_empty() {
            write_pid_file(Path::new(&self.config.general.pid_file))?;
        }

        let result = self.run_pipeline().await;

        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }
        result
    }

    async fn run_pipeline(&mut self) -> Result<()> {
        // sink first: a failure here should not leave a tailer running
        let sink = build_sink(&self.config)?;

        info!("starting directory tailer");
        let tailer_config = TailerConfig::from_core(&self.config.tailer);
        let mut tailer = DirectoryTailer::start(tailer_config, self.cancel.clone())
            .await
            .map_err(|e| anyhow::anyhow!("failed to start directory tailer: {}", e))?;
        let line_rx = tailer
            .lines()
            .ok_or_else(|| anyhow::anyhow!("tailer line receiver already taken"))?;

        info!("building correlation pipeline");
        let pipeline_config = PipelineConfig::from_core(&self.config.correlation);
        let (outcome_tx, outcome_rx) =
            mpsc::channel(self.config.correlation.outcome_channel_capacity);
        let reassembler = SequenceReassembler::new(
            outcome_tx,
            pipeline_config.maintenance_interval * GROUP_TIMEOUT_FACTOR,
        );

        let (mut pipeline, login_tx) = CorrelationPipelineBuilder::new()
            .config(pipeline_config)
            .parser(KernelAuditParser::new())
            .reassembler(reassembler)
            .sink(sink)
            .line_receiver(line_rx)
            .outcome_receiver(outcome_rx)
            .cancel_token(self.cancel.clone())
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build correlation pipeline: {}", e))?;
        self.login_tx = login_tx;

        pipeline
            .start()
            .await
            .map_err(|e| anyhow::anyhow!("failed to start correlation pipeline: {}", e))?;

        // readiness: report once catch-up finishes and the loop is
        // servicing events
        let mut catch_up = tailer.catch_up_done();
        let mut ready = pipeline.ready();
        let uptime_start = self.start_time;
        let readiness = tokio::spawn(async move {
            if catch_up.wait_for(|done| *done).await.is_ok()
                && ready.wait_for(|ready| *ready).await.is_ok()
            {
                let modules = vec![
                    ModuleHealth {
                        name: MODULE_TAILER.to_owned(),
                        enabled: true,
                        status: HealthStatus::Healthy,
                    },
                    ModuleHealth {
                        name: MODULE_CORRELATION.to_owned(),
                        enabled: true,
                        status: HealthStatus::Healthy,
                    },
                ];
                let health = DaemonHealth {
                    status: aggregate_status(&modules),
                    uptime_secs: uptime_start.elapsed().as_secs(),
                    modules,
                };
                info!(health = ?health, "all modules ready");
            }
        });

        info!("entering main event loop");
        let reason = tokio::select! {
            signal = wait_for_shutdown_signal() => ExitReason::Signal(signal?),
            result = pipeline.wait() => ExitReason::Pipeline(result),
            tailer_error = tailer.wait() => ExitReason::Tailer(tailer_error),
        };

        // wind everything down before judging the exit reason
        self.cancel.cancel();
        readiness.abort();
        let pipeline_result = pipeline.wait().await;
        let tailer_error = tailer.wait().await;

        match reason {
            ExitReason::Signal(signal) => {
                info!(signal, "shutdown signal received");
                if let Err(e) = &pipeline_result {
                    if !e.is_cancelled() {
                        warn!(error = %e, "pipeline exited with an error during shutdown");
                    }
                }
                if tailer_error != TailerError::Cancelled {
                    warn!(error = %tailer_error, "tailer exited with an error during shutdown");
                }
                info!("shutdown complete");
                Ok(())
            }
            ExitReason::Pipeline(result) => match result {
                Ok(()) => {
                    info!("correlation pipeline finished");
                    Ok(())
                }
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => {
                    error!(error = %e, "correlation pipeline failed");
                    Err(anyhow::anyhow!("correlation pipeline failed: {}", e))
                }
            },
            ExitReason::Tailer(e) => {
                if e == TailerError::Cancelled {
                    Ok(())
                } else {
                    error!(error = %e, "directory tailer failed");
                    Err(anyhow::anyhow!("directory tailer failed: {}", e))
                }
            }
        }
    }
}

/// Build the configured event sink.
fn build_sink(config: &AuditlinkConfig) -> Result<JsonLinesSink> {
    match config.sink.kind.as_str() {
        "stdout" => Ok(JsonLinesSink::stdout()),
        // config validation restricts the kind to file|stdout
        _ => JsonLinesSink::from_path(&config.sink.path)
            .map_err(|e| anyhow::anyhow!("failed to open event sink: {}", e)),
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// Used to prevent duplicate daemon instances. The file is created
/// atomically (`create_new`), verified to be a regular file, and
/// restricted to 0600.
fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            let mut builder = fs::DirBuilder::new();
            builder.mode(0o700).recursive(true);
            builder.create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    // a symlink or device node here means someone is playing games
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    info!(pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file on daemon shutdown.
///
/// Logs a warning but does not fail if the file cannot be removed.
fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        info!(path = %path.display(), "PID file removed");
    }
}
