//! Session tracking — correlating remote logins with audit sessions.
//!
//! Login records and kernel audit events arrive from independent
//! subsystems with no shared ordering. The tracker caches whichever
//! side arrives first, keyed by the only correlation key both sides
//! carry: the process id of the session leader.
//!
//! Per-session states:
//!
//! ```text
//! Unknown --login event--> Pending --remote login--> Correlated --session end--> removed
//!                          (events cached)           (events pass through)
//! ```
//!
//! Both registries sit behind one mutex: logins may arrive on a
//! different task than audit events, and eviction sweeps must not
//! race per-key updates. No await point is reached while the lock is
//! held.
//!
//! Correlation keys on process id equality alone. Process ids are
//! recycled by the OS, so a sufficiently fast reuse could attribute a
//! new session to a stale pending login or vice versa; the window is
//! accepted and intentionally not mitigated here.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use tracing::{debug, warn};

use auditlink_core::event::{
    AuditEvent, AuditEventMetadata, CoalescedEvent, EventTemplate, LoginValidationError,
    Outcome, RecordKind, RemoteUserLogin,
};
use auditlink_core::metrics as metric_names;

use crate::sink::{EventSink, SinkError};

/// Tracker operation failures.
///
/// Variants are distinct per sub-condition so callers decide policy
/// on the enum, never on message text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrackerError {
    /// The login record failed validation. Neither registry was
    /// touched.
    #[error("remote-login validation failed: {0}")]
    LoginValidation(#[from] LoginValidationError),

    /// The sink rejected an attributed event.
    #[error("audit-event write failed: {0}")]
    EventWrite(#[from] SinkError),

    /// A session-start event carried a non-numeric process id.
    #[error("session-start process id is not numeric: {value:?}")]
    PidParse {
        /// The offending process id string.
        value: String,
    },

    /// The registry mutex was poisoned by a panicking thread.
    #[error("tracker state poisoned")]
    Poisoned,
}

/// One audit session's correlation state.
struct SessionUser {
    created_at: SystemTime,
    source_process_id: i64,
    login: Option<RemoteUserLogin>,
    cached: Vec<CoalescedEvent>,
}

struct TrackerState<S> {
    /// Session id -> session state.
    sessions: HashMap<String, SessionUser>,
    /// Process id -> login that arrived before its session.
    pending_logins: HashMap<i64, RemoteUserLogin>,
    sink: S,
}

/// The correlation state machine.
pub struct SessionTracker<S> {
    state: Mutex<TrackerState<S>>,
}

impl<S: EventSink> SessionTracker<S> {
    /// Create a tracker writing attributed events to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                sessions: HashMap::new(),
                pending_logins: HashMap::new(),
                sink,
            }),
        }
    }

    /// Ingest a remote login record.
    ///
    /// If an audit session for the login's process id already exists,
    /// the session becomes correlated and its cached events flush to
    /// the sink in arrival order. Otherwise the login waits in the
    /// pending registry until the session's start event arrives.
    pub fn remote_login(&self, login: RemoteUserLogin) -> Result<(), TrackerError> {
        login.validate()?;

        let mut state = self.state.lock().map_err(|_| TrackerError::Poisoned)?;
        let TrackerState {
            sessions,
            pending_logins,
            sink,
        } = &mut *state;

        counter!(metric_names::CORRELATION_LOGINS_TOTAL).increment(1);

        let matched = sessions
            .iter_mut()
            .find(|(_, user)| user.source_process_id == login.process_id);

        match matched {
            Some((session_id, user)) => {
                debug!(session = %session_id, pid = login.process_id, "correlated login with live session");
                if user.login.is_some() {
                    warn!(
                        session = %session_id,
                        pid = login.process_id,
                        "session already had a login, replacing it"
                    );
                }
                user.login = Some(login);
                let template = user
                    .login
                    .as_ref()
                    .and_then(|l| l.source.clone())
                    .unwrap_or_default();
                for event in std::mem::take(&mut user.cached) {
                    sink.write(&to_audit_event(&template, &event))?;
                }
            }
            None => {
                if let Some(previous) = pending_logins.insert(login.process_id, login) {
                    // Possibly a recycled pid; the old login can no
                    // longer be correlated either way.
                    warn!(
                        pid = previous.process_id,
                        credential = %previous.credential_user_id,
                        "overwriting pending login for the same pid"
                    );
                }
            }
        }

        gauge!(metric_names::CORRELATION_PENDING_LOGINS)
            .set(state.pending_logins.len() as f64);
        Ok(())
    }

    /// Ingest a coalesced audit event.
    ///
    /// Events without a session are ignored (cron, system activity).
    /// For an unknown session id, only a session-start (LOGIN) event
    /// creates tracker state; other kinds are dropped, because a
    /// session is only born on its start event.
    pub fn audit_event(&self, event: CoalescedEvent) -> Result<(), TrackerError> {
        if !event.has_session() {
            return Ok(());
        }

        let mut state = self.state.lock().map_err(|_| TrackerError::Poisoned)?;
        let TrackerState {
            sessions,
            pending_logins,
            sink,
        } = &mut *state;

        counter!(metric_names::CORRELATION_EVENTS_TOTAL).increment(1);

        if sessions.contains_key(&event.session) {
            let correlated = sessions
                .get(&event.session)
                .is_some_and(|user| user.login.is_some());

            if !correlated {
                // no login yet: cache in arrival order
                if let Some(user) = sessions.get_mut(&event.session) {
                    user.cached.push(event);
                }
            } else {
                // drain whatever is cached (usually nothing), write
                // this event, and drop the entry on a session end
                // only after the write succeeded
                let flush = match sessions.get_mut(&event.session) {
                    Some(user) => Some((
                        user.login
                            .as_ref()
                            .and_then(|login| login.source.clone())
                            .unwrap_or_default(),
                        std::mem::take(&mut user.cached),
                    )),
                    None => None,
                };

                if let Some((template, cached)) = flush {
                    for buffered in &cached {
                        sink.write(&to_audit_event(&template, buffered))?;
                    }
                    sink.write(&to_audit_event(&template, &event))?;
                    if event.kind == RecordKind::SessionEnd {
                        debug!(session = %event.session, "audit session ended");
                        sessions.remove(&event.session);
                    }
                }
            }
        } else {
            if event.kind != RecordKind::Login {
                debug!(
                    session = %event.session,
                    kind = %event.kind,
                    "dropping event for unknown session"
                );
                return Ok(());
            }

            let pid: i64 =
                event
                    .process_id
                    .trim()
                    .parse()
                    .map_err(|_| TrackerError::PidParse {
                        value: event.process_id.clone(),
                    })?;

            match pending_logins.remove(&pid) {
                Some(login) => {
                    debug!(session = %event.session, pid, "new session matched a pending login");
                    let template = login.source.clone().unwrap_or_default();
                    sessions.insert(
                        event.session.clone(),
                        SessionUser {
                            created_at: SystemTime::now(),
                            source_process_id: pid,
                            login: Some(login),
                            cached: Vec::new(),
                        },
                    );
                    sink.write(&to_audit_event(&template, &event))?;
                }
                None => {
                    debug!(session = %event.session, pid, "new session, caching until its login arrives");
                    sessions.insert(
                        event.session.clone(),
                        SessionUser {
                            created_at: SystemTime::now(),
                            source_process_id: pid,
                            login: None,
                            cached: vec![event],
                        },
                    );
                }
            }
        }

        gauge!(metric_names::CORRELATION_TRACKED_SESSIONS).set(state.sessions.len() as f64);
        gauge!(metric_names::CORRELATION_PENDING_LOGINS)
            .set(state.pending_logins.len() as f64);
        Ok(())
    }

    /// Evict sessions created strictly before `cutoff` that never
    /// acquired a login. Bounds memory from sessions whose login will
    /// never arrive (console logins, non-SSH activity).
    ///
    /// Returns the number of sessions removed.
    pub fn delete_users_without_logins_before(&self, cutoff: SystemTime) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let before = state.sessions.len();
        state
            .sessions
            .retain(|_, user| user.login.is_some() || user.created_at >= cutoff);
        let removed = before - state.sessions.len();
        if removed > 0 {
            debug!(removed, "evicted login-less sessions");
            counter!(metric_names::CORRELATION_EVICTED_TOTAL).increment(removed as u64);
        }
        gauge!(metric_names::CORRELATION_TRACKED_SESSIONS).set(state.sessions.len() as f64);
        removed
    }

    /// Evict pending logins that happened strictly before `cutoff`.
    /// Bounds memory from logins whose session never materialized.
    ///
    /// Returns the number of logins removed.
    pub fn delete_remote_user_logins_before(&self, cutoff: SystemTime) -> usize {
        let Ok(mut state) = self.state.lock() else {
            return 0;
        };
        let before = state.pending_logins.len();
        state
            .pending_logins
            .retain(|_, login| login.occurred_at >= cutoff);
        let removed = before - state.pending_logins.len();
        if removed > 0 {
            debug!(removed, "evicted stale pending logins");
            counter!(metric_names::CORRELATION_EVICTED_TOTAL).increment(removed as u64);
        }
        gauge!(metric_names::CORRELATION_PENDING_LOGINS)
            .set(state.pending_logins.len() as f64);
        removed
    }

    /// Number of live session entries.
    pub fn session_count(&self) -> usize {
        self.state.lock().map(|s| s.sessions.len()).unwrap_or(0)
    }

    /// Number of pending logins.
    pub fn pending_login_count(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.pending_logins.len())
            .unwrap_or(0)
    }

    /// Whether a session id is currently tracked.
    pub fn has_session(&self, session: &str) -> bool {
        self.state
            .lock()
            .map(|s| s.sessions.contains_key(session))
            .unwrap_or(false)
    }
}

/// Build the attributed event: outcome from the audit result,
/// identity fields copied from the login's template, detail fields
/// carried verbatim from the coalesced event.
fn to_audit_event(template: &EventTemplate, event: &CoalescedEvent) -> AuditEvent {
    let outcome = if event.result == "success" {
        Outcome::Succeeded
    } else {
        Outcome::Failed
    };

    AuditEvent {
        id: AuditEvent::new_id(),
        occurred_at: DateTime::<Utc>::from(event.occurred_at),
        outcome,
        // deep copies, never aliases into the template
        subjects: template.subjects.clone(),
        source: template.source.clone(),
        target: template.target.clone(),
        metadata: AuditEventMetadata {
            action: event.action.clone(),
            how: event.how.clone(),
            object: event.object.clone(),
            process_args: event.process_args.clone(),
        },
    }
}
