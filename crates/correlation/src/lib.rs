#![doc = include_str!("../README.md")]
//!
//! # Modules
//!
//! - [`tailer`]: rotation-safe directory tailer for the audit log
//! - [`parser`]: kernel audit line parsing ([`LineParser`] seam)
//! - [`reassembler`]: record-to-event reassembly ([`Reassembler`] seam)
//! - [`tracker`]: the login/session correlation state machine
//! - [`sink`]: attributed-event output ([`EventSink`] seam)
//! - [`pipeline`]: the coordinating loop tying it all together
//! - [`retry`]: exponential-backoff retry for transient I/O
//! - [`config`]: resolved pipeline settings
//! - [`error`]: domain error types
//!
//! # Architecture
//!
//! ```text
//! DirectoryTailer -> parser -> Reassembler -> SessionTracker -> EventSink
//!                                 |                ^
//!                          maintenance tick   login records
//! ```

pub mod config;
pub mod error;
pub mod parser;
pub mod pipeline;
pub mod reassembler;
pub mod retry;
pub mod sink;
pub mod tailer;
pub mod tracker;

// --- primary re-exports ---

// pipeline
pub use pipeline::{CorrelationPipeline, CorrelationPipelineBuilder};

// configuration
pub use config::PipelineConfig;

// errors
pub use error::CorrelationError;

// tailer
pub use tailer::{DirectoryTailer, TailerConfig, TailerError};

// parser
pub use parser::{AuditRecord, KernelAuditParser, LineParser, ParseLineError};

// reassembler
pub use reassembler::{
    Reassembler, ReassemblyError, ReassemblyOutcome, SequenceReassembler,
};

// tracker
pub use tracker::{SessionTracker, TrackerError};

// sink
pub use sink::{EventSink, JsonLinesSink, SinkError};

// retry
pub use retry::{RetryError, RetryPolicy};
