//! Pipeline orchestration — one loop multiplexing every event source.
//!
//! [`CorrelationPipeline`] owns the reassembler and the session
//! tracker and drives them from a single `tokio::select!` loop:
//!
//! ```text
//! raw lines ----parse----> reassembler --outcomes--> tracker --> sink
//! login records ---------------------------------------^
//! maintenance tick -> reassembler.maintain()
//! eviction tick    -> tracker.delete_*_before(now - interval)
//! ```
//!
//! The first fatal error from any source is the pipeline's exit
//! reason; cancellation exits with a distinct error so the daemon can
//! tell shutdown from failure.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use auditlink_core::error::AuditlinkError;
use auditlink_core::event::RemoteUserLogin;
use auditlink_core::metrics as metric_names;
use auditlink_core::pipeline::{HealthStatus, Pipeline};
use metrics::counter;

use crate::config::PipelineConfig;
use crate::error::CorrelationError;
use crate::parser::LineParser;
use crate::reassembler::{Reassembler, ReassemblyError, ReassemblyOutcome};
use crate::sink::EventSink;
use crate::tracker::SessionTracker;

/// Pipeline lifecycle state.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PipelineState {
    Initialized,
    Running,
    Stopped,
}

/// Everything the loop task consumes.
struct LoopParts<P, R> {
    parser: P,
    reassembler: R,
    line_rx: mpsc::Receiver<String>,
    outcome_rx: mpsc::Receiver<ReassemblyOutcome>,
    login_rx: mpsc::Receiver<RemoteUserLogin>,
}

/// The correlation pipeline.
///
/// Built by [`CorrelationPipelineBuilder`]; started and stopped
/// through the core [`Pipeline`] trait. [`CorrelationPipeline::wait`]
/// surfaces the loop's terminal result.
pub struct CorrelationPipeline<P, R, S> {
    config: PipelineConfig,
    state: PipelineState,
    tracker: Arc<SessionTracker<S>>,
    parts: Option<LoopParts<P, R>>,
    cancel: CancellationToken,
    ready_rx: watch::Receiver<bool>,
    ready_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<Result<(), CorrelationError>>>,
    terminal: Option<Result<(), CorrelationError>>,
}

impl<P, R, S> CorrelationPipeline<P, R, S>
where
    P: LineParser + Send + 'static,
    R: Reassembler + Send + 'static,
    S: EventSink + Send + 'static,
{
    /// The shared cancellation token; cancel it to stop the loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Signal flipped to `true` once the loop is servicing events.
    pub fn ready(&self) -> watch::Receiver<bool> {
        self.ready_rx.clone()
    }

    /// The session tracker (shared; useful for health and tests).
    pub fn tracker(&self) -> Arc<SessionTracker<S>> {
        Arc::clone(&self.tracker)
    }

    /// Wait for the loop to end and return its terminal result.
    ///
    /// Idempotent: repeated calls return the same value. Cancel-safe:
    /// dropping the future mid-wait loses nothing.
    pub async fn wait(&mut self) -> Result<(), CorrelationError> {
        if let Some(result) = &self.terminal {
            return result.clone();
        }
        let result = match self.task.as_mut() {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(CorrelationError::Join(e.to_string())),
            },
            None => Err(CorrelationError::NotRunning),
        };
        self.task = None;
        self.state = PipelineState::Stopped;
        self.terminal = Some(result.clone());
        result
    }
}

impl<P, R, S> Pipeline for CorrelationPipeline<P, R, S>
where
    P: LineParser + Send + 'static,
    // Sync so the `&self` health-check future can cross task bounds
    R: Reassembler + Send + Sync + 'static,
    S: EventSink + Send + 'static,
{
    async fn start(&mut self) -> Result<(), AuditlinkError> {
        if self.state == PipelineState::Running {
            return Err(CorrelationError::AlreadyRunning.into());
        }
        let parts = self
            .parts
            .take()
            .ok_or(CorrelationError::NotRunning)
            .map_err(AuditlinkError::from)?;
        let ready_tx = self
            .ready_tx
            .take()
            .ok_or(CorrelationError::NotRunning)
            .map_err(AuditlinkError::from)?;

        info!("starting correlation pipeline");
        let task = tokio::spawn(run_loop(
            parts,
            Arc::clone(&self.tracker),
            self.config.clone(),
            self.cancel.clone(),
            ready_tx,
        ));
        self.task = Some(task);
        self.state = PipelineState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), AuditlinkError> {
        if self.state != PipelineState::Running {
            return Err(CorrelationError::NotRunning.into());
        }
        info!("stopping correlation pipeline");
        self.cancel.cancel();
        match self.wait().await {
            Ok(()) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            PipelineState::Running => {
                if *self.ready_rx.borrow() {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Degraded("not yet servicing events".to_owned())
                }
            }
            PipelineState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            PipelineState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// Correlation pipeline builder.
///
/// Wires the channels and collaborator seams together. If no login
/// channel is supplied, the builder creates one and returns its
/// sender for the daemon to hand to login-ingestion tasks.
pub struct CorrelationPipelineBuilder<P, R, S> {
    config: PipelineConfig,
    parser: Option<P>,
    reassembler: Option<R>,
    sink: Option<S>,
    line_rx: Option<mpsc::Receiver<String>>,
    outcome_rx: Option<mpsc::Receiver<ReassemblyOutcome>>,
    login_rx: Option<mpsc::Receiver<RemoteUserLogin>>,
    cancel: Option<CancellationToken>,
}

impl<P, R, S> CorrelationPipelineBuilder<P, R, S>
where
    P: LineParser + Send + 'static,
    R: Reassembler + Send + 'static,
    S: EventSink + Send + 'static,
{
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            parser: None,
            reassembler: None,
            sink: None,
            line_rx: None,
            outcome_rx: None,
            login_rx: None,
            cancel: None,
        }
    }

    /// Set the pipeline configuration.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the raw-line parser.
    pub fn parser(mut self, parser: P) -> Self {
        self.parser = Some(parser);
        self
    }

    /// Set the reassembler. Its outcome channel receiver goes to
    /// [`Self::outcome_receiver`].
    pub fn reassembler(mut self, reassembler: R) -> Self {
        self.reassembler = Some(reassembler);
        self
    }

    /// Set the event sink.
    pub fn sink(mut self, sink: S) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Set the raw-line receiver (usually the tailer's).
    pub fn line_receiver(mut self, rx: mpsc::Receiver<String>) -> Self {
        self.line_rx = Some(rx);
        self
    }

    /// Set the reassembly outcome receiver.
    pub fn outcome_receiver(mut self, rx: mpsc::Receiver<ReassemblyOutcome>) -> Self {
        self.outcome_rx = Some(rx);
        self
    }

    /// Set an external login-record receiver.
    ///
    /// Without one, the builder creates a channel and returns the
    /// sender from [`Self::build`].
    pub fn login_receiver(mut self, rx: mpsc::Receiver<RemoteUserLogin>) -> Self {
        self.login_rx = Some(rx);
        self
    }

    /// Share a cancellation token. Without one, the pipeline creates
    /// its own (accessible via `cancel_token()`).
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Build the pipeline.
    ///
    /// # Returns
    /// - the pipeline
    /// - `Some(sender)` for login records if no external login
    ///   receiver was supplied, `None` otherwise
    #[allow(clippy::type_complexity)]
    pub fn build(
        self,
    ) -> Result<
        (
            CorrelationPipeline<P, R, S>,
            Option<mpsc::Sender<RemoteUserLogin>>,
        ),
        CorrelationError,
    > {
        self.config.validate()?;

        let parser = self.parser.ok_or(CorrelationError::Builder { field: "parser" })?;
        let reassembler = self
            .reassembler
            .ok_or(CorrelationError::Builder {
                field: "reassembler",
            })?;
        let sink = self.sink.ok_or(CorrelationError::Builder { field: "sink" })?;
        let line_rx = self
            .line_rx
            .ok_or(CorrelationError::Builder {
                field: "line_receiver",
            })?;
        let outcome_rx = self
            .outcome_rx
            .ok_or(CorrelationError::Builder {
                field: "outcome_receiver",
            })?;

        let (login_rx, login_tx) = match self.login_rx {
            Some(rx) => (rx, None),
            None => {
                let (tx, rx) = mpsc::channel(self.config.login_channel_capacity);
                (rx, Some(tx))
            }
        };

        let (ready_tx, ready_rx) = watch::channel(false);

        let pipeline = CorrelationPipeline {
            config: self.config,
            state: PipelineState::Initialized,
            tracker: Arc::new(SessionTracker::new(sink)),
            parts: Some(LoopParts {
                parser,
                reassembler,
                line_rx,
                outcome_rx,
                login_rx,
            }),
            cancel: self.cancel.unwrap_or_default(),
            ready_rx,
            ready_tx: Some(ready_tx),
            task: None,
            terminal: None,
        };

        Ok((pipeline, login_tx))
    }
}

impl<P, R, S> Default for CorrelationPipelineBuilder<P, R, S>
where
    P: LineParser + Send + 'static,
    R: Reassembler + Send + 'static,
    S: EventSink + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// The coordinating loop.
async fn run_loop<P, R, S>(
    mut parts: LoopParts<P, R>,
    tracker: Arc<SessionTracker<S>>,
    config: PipelineConfig,
    cancel: CancellationToken,
    ready_tx: watch::Sender<bool>,
) -> Result<(), CorrelationError>
where
    P: LineParser + Send + 'static,
    R: Reassembler + Send + 'static,
    S: EventSink + Send + 'static,
{
    let start = tokio::time::Instant::now();
    let mut maintenance = tokio::time::interval_at(
        start + config.maintenance_interval,
        config.maintenance_interval,
    );
    maintenance.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut eviction =
        tokio::time::interval_at(start + config.eviction_interval, config.eviction_interval);
    eviction.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut login_channel_open = true;

    let _ = ready_tx.send(true);
    info!("correlation pipeline servicing events");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("correlation pipeline cancelled");
                return Err(CorrelationError::Cancelled);
            }

            line = parts.line_rx.recv() => {
                let Some(line) = line else {
                    return Err(CorrelationError::LineSourceClosed);
                };
                // benign-empty lines are skipped before parsing; any
                // other parse failure is fatal because the
                // reassembler cannot gracefully skip a record
                if line.trim().is_empty() {
                    continue;
                }
                let record = match parts.parser.parse_line(&line) {
                    Ok(record) => record,
                    Err(e) if e.is_empty_line() => continue,
                    Err(e) => return Err(e.into()),
                };
                parts.reassembler.push(record)?;
            }

            outcome = parts.outcome_rx.recv() => {
                let Some(outcome) = outcome else {
                    return Err(CorrelationError::OutcomeChannelClosed);
                };
                match outcome {
                    ReassemblyOutcome::Event(event) => {
                        if let Some(cutoff) = config.event_cutoff {
                            if event.occurred_at < cutoff {
                                counter!(metric_names::CORRELATION_EVENTS_FILTERED_TOTAL)
                                    .increment(1);
                                continue;
                            }
                        }
                        tracker.audit_event(event)?;
                    }
                    ReassemblyOutcome::Failed(reason) => {
                        return Err(ReassemblyError::Coalesce { sequence: 0, reason }.into());
                    }
                    ReassemblyOutcome::Lost(count) => {
                        warn!(count, "reassembler reported lost events");
                        counter!(metric_names::CORRELATION_EVENTS_LOST_TOTAL).increment(count);
                    }
                }
            }

            _ = maintenance.tick() => {
                match parts.reassembler.maintain() {
                    Ok(()) => {}
                    Err(e) if e.is_closed() => {
                        info!("reassembler closed, stopping pipeline");
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }

            _ = eviction.tick() => {
                let cutoff = std::time::SystemTime::now() - config.eviction_interval;
                let sessions = tracker.delete_users_without_logins_before(cutoff);
                let logins = tracker.delete_remote_user_logins_before(cutoff);
                if sessions > 0 || logins > 0 {
                    debug!(sessions, logins, "evicted stale correlation state");
                }
            }

            login = parts.login_rx.recv(), if login_channel_open => {
                match login {
                    Some(login) => tracker.remote_login(login)?,
                    None => {
                        debug!("login channel closed, continuing without logins");
                        login_channel_open = false;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::time::{Duration, SystemTime};

    use auditlink_core::event::{
        AuditEvent, CoalescedEvent, EventSource, EventTemplate, RecordKind,
    };

    use crate::parser::KernelAuditParser;
    use crate::reassembler::SequenceReassembler;
    use crate::sink::SinkError;

    #[derive(Clone, Default)]
    struct MemorySink {
        events: Arc<Mutex<Vec<AuditEvent>>>,
    }

    impl MemorySink {
        fn written(&self) -> Vec<AuditEvent> {
            self.events.lock().expect("lock").clone()
        }
    }

    impl EventSink for MemorySink {
        fn write(&mut self, event: &AuditEvent) -> Result<(), SinkError> {
            self.events.lock().expect("lock").push(event.clone());
            Ok(())
        }
    }

    fn login(pid: i64) -> RemoteUserLogin {
        RemoteUserLogin {
            source: Some(EventTemplate {
                subjects: BTreeMap::from([("loggedAs".to_owned(), "alice".to_owned())]),
                source: EventSource {
                    kind: "ip-address".to_owned(),
                    value: "203.0.113.7".to_owned(),
                    extra: BTreeMap::new(),
                },
                target: None,
            }),
            process_id: pid,
            credential_user_id: "alice".to_owned(),
            occurred_at: SystemTime::now(),
        }
    }

    type TestPipeline =
        CorrelationPipeline<KernelAuditParser, SequenceReassembler, MemorySink>;

    fn build_pipeline(
        config: PipelineConfig,
    ) -> (
        TestPipeline,
        mpsc::Sender<String>,
        mpsc::Sender<RemoteUserLogin>,
        MemorySink,
    ) {
        let sink = MemorySink::default();
        let (line_tx, line_rx) = mpsc::channel(64);
        let (outcome_tx, outcome_rx) = mpsc::channel(64);
        let reassembler = SequenceReassembler::new(outcome_tx, Duration::from_millis(50));

        let (pipeline, login_tx) = CorrelationPipelineBuilder::new()
            .config(config)
            .parser(KernelAuditParser::new())
            .reassembler(reassembler)
            .sink(sink.clone())
            .line_receiver(line_rx)
            .outcome_receiver(outcome_rx)
            .build()
            .expect("build");

        (pipeline, line_tx, login_tx.expect("login sender"), sink)
    }

    fn fast_config() -> PipelineConfig {
        PipelineConfig {
            maintenance_interval: Duration::from_millis(20),
            eviction_interval: Duration::from_secs(60),
            event_cutoff: None,
            login_channel_capacity: 16,
        }
    }

    #[test]
    fn builder_requires_all_parts() {
        let result = CorrelationPipelineBuilder::<
            KernelAuditParser,
            SequenceReassembler,
            MemorySink,
        >::new()
        .build();
        assert!(matches!(
            result.err(),
            Some(CorrelationError::Builder { field: "parser" })
        ));
    }

    #[tokio::test]
    async fn lines_flow_end_to_end() {
        let (mut pipeline, line_tx, login_tx, sink) = build_pipeline(fast_config());
        pipeline.start().await.expect("start");

        login_tx.send(login(802)).await.expect("send login");

        line_tx
            .send(
                "type=LOGIN msg=audit(1603703597.625:428): pid=802 uid=0 auid=1000 ses=123 res=1"
                    .to_owned(),
            )
            .await
            .expect("send line");
        line_tx
            .send("type=EOE msg=audit(1603703597.625:428): ".to_owned())
            .await
            .expect("send eoe");
        // empty lines are skipped, not fatal
        line_tx.send(String::new()).await.expect("send empty");

        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if !sink.written().is_empty() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("event written in time");

        let written = sink.written();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].subjects["loggedAs"], "alice");

        pipeline.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn garbage_line_is_fatal() {
        let (mut pipeline, line_tx, _login_tx, _sink) = build_pipeline(fast_config());
        pipeline.start().await.expect("start");

        line_tx
            .send("complete garbage".to_owned())
            .await
            .expect("send line");

        let result = tokio::time::timeout(Duration::from_secs(2), pipeline.wait())
            .await
            .expect("exits in time");
        assert!(matches!(result, Err(CorrelationError::Parse(_))));
    }

    #[tokio::test]
    async fn cancellation_exits_with_distinct_error() {
        let (mut pipeline, _line_tx, _login_tx, _sink) = build_pipeline(fast_config());
        let cancel = pipeline.cancel_token();
        pipeline.start().await.expect("start");

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), pipeline.wait())
            .await
            .expect("exits in time");
        assert!(matches!(result, Err(CorrelationError::Cancelled)));

        // wait() is idempotent
        let again = pipeline.wait().await;
        assert!(matches!(again, Err(CorrelationError::Cancelled)));
    }

    #[tokio::test]
    async fn invalid_login_is_fatal() {
        let (mut pipeline, _line_tx, login_tx, _sink) = build_pipeline(fast_config());
        pipeline.start().await.expect("start");

        let mut bad = login(0);
        bad.process_id = 0;
        login_tx.send(bad).await.expect("send login");

        let result = tokio::time::timeout(Duration::from_secs(2), pipeline.wait())
            .await
            .expect("exits in time");
        assert!(matches!(result, Err(CorrelationError::Tracker(_))));
    }

    #[tokio::test]
    async fn event_cutoff_filters_old_events() {
        let mut config = fast_config();
        config.event_cutoff = Some(SystemTime::now());
        let sink = MemorySink::default();
        let (_line_tx, line_rx) = mpsc::channel(8);
        let (outcome_tx, outcome_rx) = mpsc::channel(8);

        let (mut pipeline, _login_tx) = CorrelationPipelineBuilder::new()
            .config(config)
            .parser(KernelAuditParser::new())
            .reassembler(SequenceReassembler::new(
                outcome_tx.clone(),
                Duration::from_millis(50),
            ))
            .sink(sink.clone())
            .line_receiver(line_rx)
            .outcome_receiver(outcome_rx)
            .build()
            .expect("build");
        let tracker = pipeline.tracker();
        pipeline.start().await.expect("start");

        // an event from well before the cutoff: silently dropped
        outcome_tx
            .send(ReassemblyOutcome::Event(CoalescedEvent {
                session: "123".to_owned(),
                kind: RecordKind::Login,
                sequence: 1,
                occurred_at: SystemTime::UNIX_EPOCH,
                process_id: "802".to_owned(),
                result: "success".to_owned(),
                action: "login".to_owned(),
                how: String::new(),
                object: None,
                process_args: Vec::new(),
            }))
            .await
            .expect("send outcome");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(tracker.session_count(), 0);
        assert!(sink.written().is_empty());

        pipeline.stop().await.expect("stop");
    }

    #[tokio::test]
    async fn health_reflects_lifecycle() {
        let (mut pipeline, _line_tx, _login_tx, _sink) = build_pipeline(fast_config());
        assert!(pipeline.health_check().await.is_unhealthy());

        pipeline.start().await.expect("start");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(pipeline.health_check().await.is_healthy());

        pipeline.stop().await.expect("stop");
        assert!(pipeline.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn double_start_fails() {
        let (mut pipeline, _line_tx, _login_tx, _sink) = build_pipeline(fast_config());
        pipeline.start().await.expect("start");
        assert!(pipeline.start().await.is_err());
        pipeline.stop().await.expect("stop");
    }
}
