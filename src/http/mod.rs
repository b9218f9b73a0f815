//! HTTP adapter subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (request ID, trace, timeout layers)
//!     → middleware.rs (RequestMetadata + Identity → SecurityGuard::evaluate)
//!     → response.rs (GuardError → status + JSON, rate-limit headers)
//!     → handler (Decision available as an extension)
//! ```

pub mod middleware;
pub mod response;
pub mod server;

pub use middleware::{guard_middleware, request_metadata, AuthenticatedUser, X_REQUEST_ID};
pub use server::{AppState, GuardServer};
