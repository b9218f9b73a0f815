//! Security middleware: one decision per inbound request.
//!
//! # Data Flow
//! ```text
//! RequestMetadata + Identity
//!     → IP allow/block lists        → deny + ip_blocked (warning)
//!     → rate limit (user id or IP)  → deny + rate_limit_exceeded (warning)
//!     → extracted field validation  → deny + input_rejected (high)
//!     → threat score                → deny + high_risk_request (high)
//!     → request_processed (info)    → allow with sanitized fields
//! ```
//!
//! # Design Decisions
//! - Explicit composition; each stage short-circuits
//! - Every denial is audited before the decision is returned
//! - The HTTP adapter lives in `crate::http`; this module knows nothing of HTTP

mod decision;
mod pipeline;

pub use decision::{Decision, Denial, Identity, HIGH_RISK_REASON};
pub use pipeline::{GuardDeps, SecurityGuard};
