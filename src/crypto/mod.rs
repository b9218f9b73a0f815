//! Encryption manager: secrets at rest, integrity tags, RSA envelopes.
//!
//! # Data Flow
//! ```text
//! encrypt(plaintext)
//!     → load KeyRing snapshot (arc-swap, lock-free)
//!     → ChaCha20-Poly1305 under the current key, random 96-bit nonce
//!     → token = base64url([0x01][key version BE u32][nonce][ciphertext+tag])
//!
//! decrypt(token)
//!     → parse header → pick current or retired key by version → open
//!
//! rotate()
//!     → build a new ring (old current moves to retired) → publish
//! ```
//!
//! # Design Decisions
//! - Only vetted AEAD / RSA-OAEP / HMAC implementations, no custom primitives
//! - In-flight calls keep the snapshot they loaded; rotation never blocks readers
//! - Plaintext and key bytes never reach logs; decoded key bytes are zeroized

mod asymmetric;
mod keyring;
mod manager;

pub use asymmetric::KeyPair;
pub use keyring::{KeyRing, TOKEN_FORMAT_V1};
pub use manager::EncryptionManager;

use thiserror::Error;

/// Why a token could not be opened. None of these are worth retrying.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecryptionError {
    #[error("token is malformed")]
    Malformed,

    #[error("no key with version {0}")]
    UnknownKey(u32),

    #[error("authentication failed")]
    Authentication,

    #[error("plaintext is not valid UTF-8")]
    InvalidUtf8,
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("encryption failed")]
    Encryption,

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("RSA operation failed: {0}")]
    Rsa(String),
}
