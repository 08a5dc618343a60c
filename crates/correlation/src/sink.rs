//! Event sinks.
//!
//! The tracker hands every attributed [`AuditEvent`] to an
//! [`EventSink`]. Writes are synchronous and blocking by design: if
//! the sink cannot drain, the whole pipeline stalls instead of
//! buffering events it might lose.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::Path;

use metrics::counter;

use auditlink_core::event::AuditEvent;
use auditlink_core::metrics as metric_names;

/// Durable destination for attributed audit events.
pub trait EventSink: Send {
    /// Write one event. Any error is fatal to the pipeline.
    fn write(&mut self, event: &AuditEvent) -> Result<(), SinkError>;
}

/// Sink failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The event could not be serialized.
    #[error("event serialization failed: {0}")]
    Serialize(String),

    /// The underlying writer failed.
    #[error("write to {target} failed: {reason}")]
    Write {
        /// Sink destination (path or "stdout").
        target: String,
        /// The I/O failure.
        reason: String,
    },
}

/// Writes events as JSON lines, one object per line, flushed per
/// event.
pub struct JsonLinesSink {
    writer: BufWriter<Box<dyn Write + Send>>,
    target: String,
    written: u64,
}

impl JsonLinesSink {
    /// Append to (or create) a file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| SinkError::Write {
                target: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::from_writer(
            Box::new(file),
            path.display().to_string(),
        ))
    }

    /// Write to standard output.
    pub fn stdout() -> Self {
        Self::from_writer(Box::new(std::io::stdout()), "stdout".to_owned())
    }

    /// Write to an arbitrary writer (tests, pipes).
    pub fn from_writer(writer: Box<dyn Write + Send>, target: String) -> Self {
        Self {
            writer: BufWriter::new(writer),
            target,
            written: 0,
        }
    }

    /// Number of events written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl EventSink for JsonLinesSink {
    fn write(&mut self, event: &AuditEvent) -> Result<(), SinkError> {
        let line = serde_json::to_vec(event).map_err(|e| SinkError::Serialize(e.to_string()))?;

        let io_err = |e: std::io::Error| SinkError::Write {
            target: self.target.clone(),
            reason: e.to_string(),
        };
        self.writer.write_all(&line).map_err(io_err)?;
        self.writer.write_all(b"\n").map_err(io_err)?;
        self.writer.flush().map_err(io_err)?;

        self.written += 1;
        counter!(metric_names::SINK_EVENTS_WRITTEN_TOTAL).increment(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    use auditlink_core::event::{AuditEventMetadata, EventSource, Outcome};
    use chrono::{DateTime, Utc};

    /// Writer that shares its buffer with the test.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn sample_event() -> AuditEvent {
        AuditEvent {
            id: AuditEvent::new_id(),
            occurred_at: DateTime::<Utc>::from(std::time::SystemTime::UNIX_EPOCH),
            outcome: Outcome::Succeeded,
            subjects: BTreeMap::from([("loggedAs".to_owned(), "root".to_owned())]),
            source: EventSource {
                kind: "ip-address".to_owned(),
                value: "203.0.113.7".to_owned(),
                extra: BTreeMap::new(),
            },
            target: None,
            metadata: AuditEventMetadata {
                action: "logged-in".to_owned(),
                how: "/usr/sbin/sshd".to_owned(),
                object: None,
                process_args: Vec::new(),
            },
        }
    }

    #[test]
    fn writes_one_json_object_per_line() {
        let buf = SharedBuf::default();
        let mut sink = JsonLinesSink::from_writer(Box::new(buf.clone()), "test".to_owned());

        sink.write(&sample_event()).expect("write");
        sink.write(&sample_event()).expect("write");
        assert_eq!(sink.written(), 2);

        let bytes = buf.0.lock().expect("lock").clone();
        let text = String::from_utf8(bytes).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).expect("json");
            assert_eq!(value["outcome"], "succeeded");
            assert_eq!(value["subjects"]["loggedAs"], "root");
        }
    }

    #[test]
    fn file_sink_appends() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.json");

        {
            let mut sink = JsonLinesSink::from_path(&path).expect("open");
            sink.write(&sample_event()).expect("write");
        }
        {
            let mut sink = JsonLinesSink::from_path(&path).expect("reopen");
            sink.write(&sample_event()).expect("write");
        }

        let text = std::fs::read_to_string(&path).expect("read");
        assert_eq!(text.lines().count(), 2);
    }
}
