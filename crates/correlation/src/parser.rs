//! Kernel audit line parsing.
//!
//! Raw lines from the audit log look like:
//!
//! ```text
//! type=LOGIN msg=audit(1603703597.625:428): pid=802 uid=0 auid=1000 ses=123 res=1
//! ```
//!
//! [`KernelAuditParser`] splits the `type=` / `msg=audit(...)` header
//! and the trailing key=value fields into an [`AuditRecord`], one
//! partial record per line. Records are grouped back into whole events
//! by the reassembler.
//!
//! The [`LineParser`] trait is the seam the pipeline consumes; any
//! other audit front-end (auditd, journald translation) can implement
//! it.

use std::time::{Duration, SystemTime};

/// Parses one raw audit-log line into a partial record.
pub trait LineParser: Send + Sync {
    /// Parse a single line.
    ///
    /// An empty line returns [`ParseLineError::Empty`]; callers that
    /// want skip-and-continue semantics check for it before treating
    /// the error as fatal.
    fn parse_line(&self, raw: &str) -> Result<AuditRecord, ParseLineError>;
}

/// One kernel audit record — a single line, not yet coalesced into a
/// whole event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    /// Record type name (`LOGIN`, `SYSCALL`, `EOE`, ...).
    pub record_type: String,
    /// Kernel timestamp from the `audit(SECS.MS:SEQ)` header.
    pub occurred_at: SystemTime,
    /// Audit sequence number from the header. Records of one event
    /// share it.
    pub sequence: u64,
    /// Body fields in line order.
    pub fields: Vec<(String, String)>,
}

impl AuditRecord {
    /// Look up the first field with the given key.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Why a line failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseLineError {
    /// The line was empty or whitespace-only.
    #[error("empty line")]
    Empty,

    /// The `type=... msg=audit(...):` header was missing or malformed.
    #[error("malformed audit header: {0}")]
    Header(String),

    /// The header timestamp was not `SECS.MILLIS`.
    #[error("invalid timestamp in audit header: {0}")]
    Timestamp(String),

    /// The header sequence number was not numeric.
    #[error("invalid sequence in audit header: {0}")]
    Sequence(String),
}

impl ParseLineError {
    /// Whether the failure is the benign empty-line case.
    pub fn is_empty_line(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

/// Parser for the kernel audit daemon's on-disk line format.
#[derive(Debug, Clone, Default)]
pub struct KernelAuditParser {
    _private: (),
}

impl KernelAuditParser {
    /// Create a parser.
    pub fn new() -> Self {
        Self::default()
    }
}

impl LineParser for KernelAuditParser {
    fn parse_line(&self, raw: &str) -> Result<AuditRecord, ParseLineError> {
        let line = raw.trim();
        if line.is_empty() {
            return Err(ParseLineError::Empty);
        }

        let rest = line
            .strip_prefix("type=")
            .ok_or_else(|| ParseLineError::Header(truncate(line)))?;
        let (record_type, rest) = rest
            .split_once(' ')
            .ok_or_else(|| ParseLineError::Header(truncate(line)))?;

        let rest = rest
            .trim_start()
            .strip_prefix("msg=audit(")
            .ok_or_else(|| ParseLineError::Header(truncate(line)))?;
        let (header, body) = rest
            .split_once("):")
            .ok_or_else(|| ParseLineError::Header(truncate(line)))?;

        let (stamp, sequence) = header
            .split_once(':')
            .ok_or_else(|| ParseLineError::Header(truncate(line)))?;
        let occurred_at = parse_timestamp(stamp)?;
        let sequence = sequence
            .parse::<u64>()
            .map_err(|_| ParseLineError::Sequence(sequence.to_owned()))?;

        Ok(AuditRecord {
            record_type: record_type.to_owned(),
            occurred_at,
            sequence,
            fields: parse_fields(body),
        })
    }
}

/// Parse the `SECS.MILLIS` kernel timestamp.
fn parse_timestamp(stamp: &str) -> Result<SystemTime, ParseLineError> {
    let (secs, millis) = stamp
        .split_once('.')
        .ok_or_else(|| ParseLineError::Timestamp(stamp.to_owned()))?;
    let secs = secs
        .parse::<u64>()
        .map_err(|_| ParseLineError::Timestamp(stamp.to_owned()))?;
    let millis = millis
        .parse::<u64>()
        .map_err(|_| ParseLineError::Timestamp(stamp.to_owned()))?;
    Ok(SystemTime::UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_millis(millis))
}

/// Split an audit record body into key=value fields.
///
/// Values may be bare tokens, double-quoted strings, or single-quoted
/// user-message blocks (`msg='op=... acct="root" res=success'`); the
/// contents of a single-quoted block are themselves key=value fields
/// and are flattened into the result after the block's own key.
pub fn parse_fields(body: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    collect_fields(body, &mut fields, 0);
    fields
}

/// Quoted user-message blocks nest at most once in practice; the
/// depth cap keeps hostile input from recursing unboundedly.
const MAX_FIELD_NESTING: usize = 4;

fn collect_fields(body: &str, out: &mut Vec<(String, String)>, depth: usize) {
    let mut rest = body.trim_start();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().to_owned();
        rest = &rest[eq + 1..];

        let value;
        if let Some(inner) = rest.strip_prefix('\'') {
            let end = inner.find('\'').unwrap_or(inner.len());
            value = inner[..end].to_owned();
            rest = inner.get(end + 1..).unwrap_or("");
            if !key.is_empty() {
                out.push((key, value.clone()));
            }
            // user-message blocks nest key=value fields
            if depth < MAX_FIELD_NESTING {
                collect_fields(&value, out, depth + 1);
            }
            rest = rest.trim_start();
            continue;
        } else if let Some(inner) = rest.strip_prefix('"') {
            let end = inner.find('"').unwrap_or(inner.len());
            value = inner[..end].to_owned();
            rest = inner.get(end + 1..).unwrap_or("");
        } else {
            let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            value = rest[..end].to_owned();
            rest = &rest[end..];
        }

        if !key.is_empty() {
            out.push((key, value));
        }
        rest = rest.trim_start();
    }
}

fn truncate(line: &str) -> String {
    const MAX: usize = 96;
    if line.len() <= MAX {
        line.to_owned()
    } else {
        let mut end = MAX;
        while !line.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &line[..end])
    }
}
