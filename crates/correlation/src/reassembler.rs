//! Audit record reassembly.
//!
//! The kernel emits one event as several records sharing a sequence
//! number. A [`Reassembler`] accepts records one at a time and emits
//! whole [`CoalescedEvent`]s as [`ReassemblyOutcome`]s on a bounded
//! channel consumed by the pipeline loop — completions are a queue,
//! not re-entrant callbacks, so the control flow stays single-threaded.
//!
//! [`SequenceReassembler`] is the in-tree implementation: it groups
//! records by sequence number, promotes a group when its end-of-event
//! marker arrives, flushes stale groups from `maintain()`, and reports
//! sequence gaps as lost events.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use auditlink_core::event::{CoalescedEvent, EventObject, RecordKind, SESSION_UNSET};

use crate::parser::AuditRecord;

/// Record type that terminates an in-flight event group.
const RECORD_TYPE_EOE: &str = "EOE";

/// Session id value the kernel prints for "no session".
const SESSION_UNSET_NUMERIC: &str = "4294967295";

/// Accumulates partial audit records into whole events.
pub trait Reassembler: Send {
    /// Feed one parsed record.
    fn push(&mut self, record: AuditRecord) -> Result<(), ReassemblyError>;

    /// Periodic maintenance: flush assemblies that will never
    /// complete. Returns [`ReassemblyError::Closed`] once the
    /// reassembler has shut down.
    fn maintain(&mut self) -> Result<(), ReassemblyError>;
}

/// Reassembly failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    /// The reassembler has been closed; no further processing happens.
    #[error("reassembler closed")]
    Closed,

    /// A record group could not be coalesced into an event.
    #[error("coalesce failed for sequence {sequence}: {reason}")]
    Coalesce {
        /// Sequence number of the failed group.
        sequence: u64,
        /// Why coalescing failed.
        reason: String,
    },
}

impl ReassemblyError {
    /// Whether this is the terminal closed signal.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// What the reassembler hands to the pipeline loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ReassemblyOutcome {
    /// A whole event, ready for correlation.
    Event(CoalescedEvent),
    /// A group failed to coalesce. Fatal to the pipeline.
    Failed(String),
    /// This many events were lost (sequence gaps). Logged, non-fatal.
    Lost(u64),
}

/// Groups records by audit sequence number.
pub struct SequenceReassembler {
    outcome_tx: mpsc::Sender<ReassemblyOutcome>,
    groups: HashMap<u64, RecordGroup>,
    /// Groups older than this are flushed by `maintain()`.
    group_timeout: Duration,
    /// Highest sequence number seen, for gap detection.
    last_sequence: Option<u64>,
    closed: bool,
    /// Outcomes dropped because the queue was full.
    overflowed: u64,
}

struct RecordGroup {
    first_seen: Instant,
    records: Vec<AuditRecord>,
}

impl SequenceReassembler {
    /// Create a reassembler emitting on `outcome_tx`.
    pub fn new(outcome_tx: mpsc::Sender<ReassemblyOutcome>, group_timeout: Duration) -> Self {
        Self {
            outcome_tx,
            groups: HashMap::new(),
            group_timeout,
            last_sequence: None,
            closed: false,
            overflowed: 0,
        }
    }

    /// Shut the reassembler down; subsequent calls return
    /// [`ReassemblyError::Closed`].
    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Number of in-flight record groups.
    pub fn pending_groups(&self) -> usize {
        self.groups.len()
    }

    fn emit(&mut self, outcome: ReassemblyOutcome) {
        match self.outcome_tx.try_send(outcome) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(outcome)) => {
                // The loop drains this queue; overflow means it is
                // stalled. Count and drop rather than deadlock.
                self.overflowed += 1;
                warn!(
                    overflowed = self.overflowed,
                    ?outcome,
                    "outcome queue full, dropping"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.closed = true;
            }
        }
    }

    fn complete(&mut self, sequence: u64) -> Result<(), ReassemblyError> {
        let Some(group) = self.groups.remove(&sequence) else {
            // EOE for a sequence we never saw a body record for.
            debug!(sequence, "end-of-event for unknown group");
            return Ok(());
        };
        match coalesce(sequence, group.records) {
            Ok(event) => {
                self.emit(ReassemblyOutcome::Event(event));
                Ok(())
            }
            Err(reason) => {
                self.emit(ReassemblyOutcome::Failed(reason.clone()));
                Err(ReassemblyError::Coalesce { sequence, reason })
            }
        }
    }
}

impl Reassembler for SequenceReassembler {
    fn push(&mut self, record: AuditRecord) -> Result<(), ReassemblyError> {
        if self.closed {
            return Err(ReassemblyError::Closed);
        }

        // Gap detection: skipped sequence numbers are lost events.
        if let Some(last) = self.last_sequence {
            if record.sequence > last + 1 {
                let lost = record.sequence - last - 1;
                self.emit(ReassemblyOutcome::Lost(lost));
            }
        }
        if self.last_sequence.is_none_or(|last| record.sequence > last) {
            self.last_sequence = Some(record.sequence);
        }

        if record.record_type == RECORD_TYPE_EOE {
            return self.complete(record.sequence);
        }

        self.groups
            .entry(record.sequence)
            .or_insert_with(|| RecordGroup {
                first_seen: Instant::now(),
                records: Vec::new(),
            })
            .records
            .push(record);
        Ok(())
    }

    fn maintain(&mut self) -> Result<(), ReassemblyError> {
        if self.closed {
            return Err(ReassemblyError::Closed);
        }

        let Some(cutoff) = Instant::now().checked_sub(self.group_timeout) else {
            return Ok(());
        };
        let stale: Vec<u64> = self
            .groups
            .iter()
            .filter(|(_, group)| group.first_seen < cutoff)
            .map(|(seq, _)| *seq)
            .collect();

        for sequence in stale {
            debug!(sequence, "flushing stale record group");
            self.complete(sequence)?;
        }
        Ok(())
    }
}

/// Merge a group of records into one event.
fn coalesce(sequence: u64, records: Vec<AuditRecord>) -> Result<CoalescedEvent, String> {
    let Some(first) = records.first() else {
        return Err(format!("sequence {sequence} has no records"));
    };

    let kind = RecordKind::from_type(&first.record_type);
    let occurred_at = first.occurred_at;

    let mut session = String::new();
    let mut process_id = String::new();
    let mut result = String::new();
    let mut action = String::new();
    let mut how = String::new();
    let mut object = None;
    let mut args: Vec<(u32, String)> = Vec::new();

    for record in &records {
        if session.is_empty() {
            if let Some(ses) = record.field("ses") {
                session = normalize_session(ses);
            }
        }
        if process_id.is_empty() {
            if let Some(pid) = record.field("pid") {
                process_id = pid.to_owned();
            }
        }
        if result.is_empty() {
            if let Some(res) = record.field("res") {
                result = normalize_result(res);
            }
        }
        if action.is_empty() {
            if let Some(op) = record.field("op") {
                action = op.to_owned();
            }
        }
        if how.is_empty() {
            if let Some(exe) = record.field("exe").or_else(|| record.field("comm")) {
                how = exe.to_owned();
            }
        }
        if object.is_none() {
            if let Some(path) = record.field("name").or_else(|| record.field("path")) {
                object = Some(EventObject {
                    object_type: "file".to_owned(),
                    primary: path.to_owned(),
                    secondary: None,
                });
            }
        }
        if record.record_type == "EXECVE" {
            for (key, value) in &record.fields {
                if let Some(index) = key.strip_prefix('a') {
                    if let Ok(index) = index.parse::<u32>() {
                        args.push((index, value.clone()));
                    }
                }
            }
        }
    }

    if action.is_empty() {
        action = first.record_type.to_ascii_lowercase();
    }

    args.sort_by_key(|(index, _)| *index);
    let process_args = args.into_iter().map(|(_, value)| value).collect();

    Ok(CoalescedEvent {
        session,
        kind,
        sequence,
        occurred_at,
        process_id,
        result,
        action,
        how,
        object,
        process_args,
    })
}

/// Map the kernel's "no session" sentinel to the canonical form.
fn normalize_session(ses: &str) -> String {
    if ses == SESSION_UNSET_NUMERIC {
        SESSION_UNSET.to_owned()
    } else {
        ses.to_owned()
    }
}

/// Map numeric result codes to the canonical success/failed words.
fn normalize_result(res: &str) -> String {
    match res {
        "1" | "yes" => "success".to_owned(),
        "0" | "no" => "failed".to_owned(),
        other => other.to_ascii_lowercase(),
    }
}
