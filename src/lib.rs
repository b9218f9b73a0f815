//! Request-security subsystem.
//!
//! Inspects every inbound request before business logic runs and produces an
//! allow/deny [`guard::Decision`] plus a durable audit trail.
//!
//! ```text
//!                     ┌──────────────────────── SecurityGuard ───────────────────────┐
//!  RequestMetadata    │  ┌───────────┐   ┌────────────┐   ┌───────────┐   ┌────────┐ │
//!  + Identity ────────┼─▶│ validator │──▶│ rate_limit │──▶│ validator │──▶│ threat │─┼──▶ Decision
//!                     │  │ (IP)      │   │ (window)   │   │ (fields)  │   │ score  │ │
//!                     │  └───────────┘   └────────────┘   └───────────┘   └────────┘ │
//!                     │        └───────────────┴──── audit ─────┴──────────────┘      │
//!                     └──────────────────────────────────────────────────────────────┘
//!
//!  crypto::EncryptionManager is used out-of-band to protect secrets at rest.
//! ```

pub mod audit;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod guard;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::GuardConfig;
pub use error::{GuardError, GuardResult};
pub use guard::{Decision, GuardDeps, Identity, SecurityGuard};
pub use http::GuardServer;
pub use lifecycle::Shutdown;
pub use security::RequestMetadata;
