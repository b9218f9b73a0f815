//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging/metrics → Build guard → Maintenance → Listener
//!
//! Running (maintenance.rs):
//!     rate-window purge | audit retention sweep | key rotation check
//!
//! Shutdown (signals.rs → shutdown.rs):
//!     SIGTERM/SIGINT → broadcast → loops exit → server drains → audit flush
//! ```
//!
//! # Design Decisions
//! - Every background loop selects on the shutdown broadcast
//! - Maintenance failures are logged and retried next tick, never fatal

pub mod maintenance;
pub mod shutdown;
pub mod signals;

pub use maintenance::{spawn_maintenance, MaintenanceHandles};
pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
