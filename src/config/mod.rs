//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (GUARD_* environment overrides)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; overrides apply at process start only
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuditConfig, AuditFailurePolicy, EncryptionConfig, GuardConfig, ListenerConfig, TlsConfig,
    NetworkConfig, ObservabilityConfig, RateLimitConfig, StoreFailurePolicy, ThreatConfig,
    ValidationConfig,
};
