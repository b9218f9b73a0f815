//! Audit trail subsystem.
//!
//! # Data Flow
//! ```text
//! guard / collaborators
//!     → logger.rs (build event, metrics, queue)
//!     → writer task (ordered, timed writes)
//!     → sink.rs (FileAuditSink JSON lines | MemoryAuditSink)
//! ```
//!
//! # Design Decisions
//! - Events are immutable once written; retention is the only deletion path
//! - Sink failures follow an explicit policy instead of being swallowed
//! - Event types and severities are closed enums

pub mod event;
pub mod logger;
pub mod sink;

pub use event::{details, AuditContext, AuditEvent, AuditEventType, Severity};
pub use logger::AuditLogger;
pub use sink::{AuditSink, FileAuditSink, MemoryAuditSink, SinkError};
