#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;

// --- primary re-exports ---
// Core types usable straight from the crate root.

// errors
pub use error::{AuditlinkError, ConfigError, PipelineError};

// configuration
pub use config::AuditlinkConfig;

// events
pub use event::{
    AuditEvent, AuditEventMetadata, CoalescedEvent, Event, EventObject, EventSource,
    EventTarget, EventTemplate, LoginValidationError, Outcome, RecordKind, RemoteUserLogin,
};

// pipeline trait
pub use pipeline::{BoxFuture, HealthStatus, Pipeline};
