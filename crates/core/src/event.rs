//! Audit event model — the data exchanged between modules.
//!
//! Three shapes flow through the system:
//! [`RemoteUserLogin`] records produced by login-ingestion sources,
//! [`CoalescedEvent`]s produced by the audit-record reassembler, and the
//! fully-attributed [`AuditEvent`]s the correlation engine emits once a
//! login and an audit session have been matched.

use std::collections::BTreeMap;
use std::fmt;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- module name constants ---

/// Directory tailer module name.
pub const MODULE_TAILER: &str = "dir-tailer";
/// Correlation pipeline module name.
pub const MODULE_CORRELATION: &str = "correlation";
/// Event sink module name.
pub const MODULE_SINK: &str = "sink";

/// Session identifier the kernel uses for records that belong to no
/// audit session (cron jobs, kernel threads). Events carrying it are
/// ignored by the tracker, as are events with an empty session.
pub const SESSION_UNSET: &str = "unset";

// --- event template ---

/// Identity and provenance fields captured at login time.
///
/// Opaque to the tracker: it is carried on a [`RemoteUserLogin`] and
/// copied verbatim onto every [`AuditEvent`] emitted for that login's
/// audit session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTemplate {
    /// Subject attributes (e.g. `loggedAs`, `userID`, `pid`).
    pub subjects: BTreeMap<String, String>,
    /// Where the login came from.
    pub source: EventSource,
    /// What the login targeted, when known.
    pub target: Option<EventTarget>,
}

/// Origin of a login event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Source kind (e.g. `"ip-address"`, `"hostname"`).
    pub kind: String,
    /// Source value (e.g. `"203.0.113.7"`).
    pub value: String,
    /// Additional source attributes (port, SSH key fingerprint, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Target of a login event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTarget {
    /// Target host (usually the local node name).
    pub host: String,
    /// Target user the credential mapped to.
    pub user: String,
}

/// Object a coalesced audit event acted on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventObject {
    /// Object kind (e.g. `"file"`, `"socket"`).
    #[serde(rename = "type")]
    pub object_type: String,
    /// Primary identifier (path, address, ...).
    pub primary: String,
    /// Secondary identifier, when the record carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

// --- remote user login ---

/// A remote (SSH) login observed by a login-ingestion source.
///
/// Arrives independently of the kernel audit stream; the correlation
/// key shared by both sides is the process id of the session leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUserLogin {
    /// Identity/source/target fields for later event construction.
    pub source: Option<EventTemplate>,
    /// Process id of the daemon child that handled the login.
    pub process_id: i64,
    /// The credential the user authenticated with (user id or key id).
    pub credential_user_id: String,
    /// When the login happened.
    pub occurred_at: SystemTime,
}

impl RemoteUserLogin {
    /// Check the record's invariants.
    ///
    /// A login is usable for correlation only if it carries an event
    /// template, a positive process id, and a non-empty credential id.
    pub fn validate(&self) -> Result<(), LoginValidationError> {
        if self.source.is_none() {
            return Err(LoginValidationError::MissingTemplate);
        }
        if self.process_id <= 0 {
            return Err(LoginValidationError::InvalidProcessId(self.process_id));
        }
        if self.credential_user_id.is_empty() {
            return Err(LoginValidationError::EmptyCredentialUserId);
        }
        Ok(())
    }
}

impl fmt::Display for RemoteUserLogin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "login pid={} credential={}",
            self.process_id, self.credential_user_id,
        )
    }
}

/// Which [`RemoteUserLogin`] invariant failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginValidationError {
    /// The source event template was absent.
    #[error("login has no source event template")]
    MissingTemplate,

    /// The process id was zero or negative.
    #[error("login process id must be positive, got {0}")]
    InvalidProcessId(i64),

    /// The credential user id was empty.
    #[error("login credential user id is empty")]
    EmptyCredentialUserId,
}

// --- coalesced audit-session event ---

/// Classification of a coalesced event's leading record type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    /// Canonical session start (`type=LOGIN`). The only kind that
    /// creates a session entry in the tracker.
    Login,
    /// Canonical session end (`CRED_DISP` / `USER_END`).
    SessionEnd,
    /// Anything else (syscalls, path records, user messages, ...).
    Other(String),
}

impl RecordKind {
    /// Classify a raw kernel audit record type name.
    ///
    /// Matching is case-insensitive; unknown types map to
    /// [`RecordKind::Other`] with the name preserved.
    pub fn from_type(record_type: &str) -> Self {
        match record_type.to_ascii_uppercase().as_str() {
            "LOGIN" => Self::Login,
            "CRED_DISP" | "USER_END" => Self::SessionEnd,
            _ => Self::Other(record_type.to_owned()),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Login => write!(f, "login"),
            Self::SessionEnd => write!(f, "session-end"),
            Self::Other(name) => write!(f, "{name}"),
        }
    }
}

/// A kernel audit session's raw records merged into one logical event
/// by the reassembler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoalescedEvent {
    /// Audit session identifier (`ses=` field). Empty or
    /// [`SESSION_UNSET`] means the event belongs to no session.
    pub session: String,
    /// Classification of the event's leading record type.
    pub kind: RecordKind,
    /// Audit sequence number of the first record in the event.
    pub sequence: u64,
    /// Kernel timestamp of the event.
    pub occurred_at: SystemTime,
    /// Originating process id, as the kernel printed it.
    pub process_id: String,
    /// Raw result field (`"success"` or a failure reason).
    pub result: String,
    /// What the event did (record type or `op=` field).
    pub action: String,
    /// How it was done (`exe=`/`comm=` field).
    pub how: String,
    /// Object acted upon, when the record set names one.
    pub object: Option<EventObject>,
    /// Arguments of the originating process (`EXECVE` records).
    pub process_args: Vec<String>,
}

impl CoalescedEvent {
    /// Whether this event carries a usable session identifier.
    pub fn has_session(&self) -> bool {
        !self.session.is_empty() && self.session != SESSION_UNSET
    }
}

// --- emitted audit event ---

/// Result of the action an [`AuditEvent`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The underlying audit result was `"success"`.
    Succeeded,
    /// Any other audit result.
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Detail fields copied verbatim from the coalesced event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEventMetadata {
    /// What was done.
    pub action: String,
    /// How it was done.
    pub how: String,
    /// Object acted upon, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<EventObject>,
    /// Arguments of the originating process.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub process_args: Vec<String>,
}

/// A fully-attributed audit event: kernel-level activity tied back to
/// the remote login that initiated the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event id (UUID v4).
    pub id: String,
    /// When the underlying kernel activity happened.
    pub occurred_at: DateTime<Utc>,
    /// Whether the activity succeeded.
    pub outcome: Outcome,
    /// Subject attributes copied from the login's event template.
    pub subjects: BTreeMap<String, String>,
    /// Where the session came from.
    pub source: EventSource,
    /// What the session targeted, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventTarget>,
    /// Verbatim detail fields from the coalesced event.
    pub metadata: AuditEventMetadata,
}

impl AuditEvent {
    /// Generate a fresh event id.
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Implemented by every event shape that crosses a module boundary.
///
/// The `Send + Sync + 'static` bound allows safe transfer through
/// `tokio::mpsc` channels.
pub trait Event: Send + Sync + 'static {
    /// Unique event id.
    fn event_id(&self) -> &str;

    /// When the event happened.
    fn occurred_at(&self) -> SystemTime;

    /// Event type name, for logging and routing.
    fn event_type(&self) -> &str;
}

impl Event for AuditEvent {
    fn event_id(&self) -> &str {
        &self.id
    }

    fn occurred_at(&self) -> SystemTime {
        self.occurred_at.into()
    }

    fn event_type(&self) -> &str {
        "audit"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_template() -> EventTemplate {
        let mut subjects = BTreeMap::new();
        subjects.insert("loggedAs".to_owned(), "root".to_owned());
        subjects.insert("userID".to_owned(), "alice".to_owned());
        EventTemplate {
            subjects,
            source: EventSource {
                kind: "ip-address".to_owned(),
                value: "203.0.113.7".to_owned(),
                extra: BTreeMap::new(),
            },
            target: Some(EventTarget {
                host: "web-01".to_owned(),
                user: "root".to_owned(),
            }),
        }
    }

    fn sample_login() -> RemoteUserLogin {
        RemoteUserLogin {
            source: Some(sample_template()),
            process_id: 999,
            credential_user_id: "alice".to_owned(),
            occurred_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        }
    }

    #[test]
    fn valid_login_passes_validation() {
        assert!(sample_login().validate().is_ok());
    }

    #[test]
    fn login_without_template_fails_validation() {
        let mut login = sample_login();
        login.source = None;
        assert_eq!(
            login.validate(),
            Err(LoginValidationError::MissingTemplate)
        );
    }

    #[test]
    fn login_with_nonpositive_pid_fails_validation() {
        let mut login = sample_login();
        login.process_id = 0;
        assert_eq!(
            login.validate(),
            Err(LoginValidationError::InvalidProcessId(0))
        );

        login.process_id = -4;
        assert_eq!(
            login.validate(),
            Err(LoginValidationError::InvalidProcessId(-4))
        );
    }

    #[test]
    fn login_with_empty_credential_fails_validation() {
        let mut login = sample_login();
        login.credential_user_id = String::new();
        assert_eq!(
            login.validate(),
            Err(LoginValidationError::EmptyCredentialUserId)
        );
    }

    #[test]
    fn record_kind_classification() {
        assert_eq!(RecordKind::from_type("LOGIN"), RecordKind::Login);
        assert_eq!(RecordKind::from_type("login"), RecordKind::Login);
        assert_eq!(RecordKind::from_type("CRED_DISP"), RecordKind::SessionEnd);
        assert_eq!(RecordKind::from_type("USER_END"), RecordKind::SessionEnd);
        assert_eq!(
            RecordKind::from_type("SYSCALL"),
            RecordKind::Other("SYSCALL".to_owned())
        );
    }

    #[test]
    fn session_sentinels_are_not_usable_sessions() {
        let mut event = CoalescedEvent {
            session: "123".to_owned(),
            kind: RecordKind::Login,
            sequence: 1,
            occurred_at: SystemTime::UNIX_EPOCH,
            process_id: "999".to_owned(),
            result: "success".to_owned(),
            action: "login".to_owned(),
            how: "/usr/sbin/sshd".to_owned(),
            object: None,
            process_args: Vec::new(),
        };
        assert!(event.has_session());

        event.session = String::new();
        assert!(!event.has_session());

        event.session = SESSION_UNSET.to_owned();
        assert!(!event.has_session());
    }

    #[test]
    fn audit_event_serializes_to_json() {
        let event = AuditEvent {
            id: AuditEvent::new_id(),
            occurred_at: DateTime::<Utc>::from(SystemTime::UNIX_EPOCH),
            outcome: Outcome::Succeeded,
            subjects: sample_template().subjects,
            source: sample_template().source,
            target: sample_template().target,
            metadata: AuditEventMetadata {
                action: "opened-file".to_owned(),
                how: "/usr/bin/cat".to_owned(),
                object: Some(EventObject {
                    object_type: "file".to_owned(),
                    primary: "/etc/shadow".to_owned(),
                    secondary: None,
                }),
                process_args: vec!["cat".to_owned(), "/etc/shadow".to_owned()],
            },
        };

        let json = serde_json::to_value(&event).expect("serializable");
        assert_eq!(json["outcome"], "succeeded");
        assert_eq!(json["subjects"]["loggedAs"], "root");
        assert_eq!(json["metadata"]["object"]["type"], "file");
    }
}
