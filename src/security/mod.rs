//! Security subsystem: the inspection engines the guard composes.
//!
//! # Data Flow
//! ```text
//! Incoming request metadata:
//!     → validator.rs (IP lists, then extracted fields)
//!     → rate_limit.rs (identity:endpoint window via store.rs)
//!     → threat.rs (additive risk score)
//!
//! patterns.rs is compiled once and shared by validator.rs and threat.rs.
//! ```
//!
//! # Design Decisions
//! - Engines are synchronous and pure where possible; only the window store is async
//! - Fail closed by default when the window store is unreachable
//! - No trust in client input

pub mod patterns;
pub mod rate_limit;
pub mod store;
pub mod threat;
pub mod validator;

pub use patterns::{PatternMatcher, ThreatCategory};
pub use rate_limit::{RateLimitDecision, RateLimiter};
pub use store::{MemoryWindowStore, StoreError, WindowStore};
pub use threat::{Recommendation, RequestMetadata, ThreatAssessment, ThreatMonitor, ThreatSignal};
pub use validator::{InputValidator, IpList, ValidationResult};
