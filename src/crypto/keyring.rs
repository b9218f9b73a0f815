//! Versioned symmetric keys and the token wire format.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{CryptoError, DecryptionError};

pub const TOKEN_FORMAT_V1: u8 = 0x01;

const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = 1 + 4 + NONCE_LEN;
const TAG_LEN: usize = 16;

pub(crate) struct KeyMaterial {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    cipher: ChaCha20Poly1305,
}

impl KeyMaterial {
    pub fn generate(version: u32, created_at: DateTime<Utc>) -> Self {
        let key = ChaCha20Poly1305::generate_key(&mut OsRng);
        Self {
            version,
            created_at,
            cipher: ChaCha20Poly1305::new(&key),
        }
    }

    pub fn from_bytes(
        version: u32,
        bytes: &[u8],
        created_at: DateTime<Utc>,
    ) -> Result<Self, CryptoError> {
        let cipher = ChaCha20Poly1305::new_from_slice(bytes)
            .map_err(|_| CryptoError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
        Ok(Self {
            version,
            created_at,
            cipher,
        })
    }
}

/// Immutable snapshot of the current key plus retired keys, newest first.
pub struct KeyRing {
    pub(crate) current: Arc<KeyMaterial>,
    pub(crate) retired: Vec<Arc<KeyMaterial>>,
}

impl KeyRing {
    pub(crate) fn new(current: KeyMaterial) -> Self {
        Self {
            current: Arc::new(current),
            retired: Vec::new(),
        }
    }

    /// Ring after rotating to `next`, keeping at most `max_retired` old keys.
    pub(crate) fn rotated(&self, next: KeyMaterial, max_retired: usize) -> Self {
        let mut retired = Vec::with_capacity(max_retired);
        retired.push(self.current.clone());
        retired.extend(self.retired.iter().cloned());
        retired.truncate(max_retired);
        Self {
            current: Arc::new(next),
            retired,
        }
    }

    pub fn current_version(&self) -> u32 {
        self.current.version
    }

    pub fn current_created_at(&self) -> DateTime<Utc> {
        self.current.created_at
    }

    pub fn retired_versions(&self) -> Vec<u32> {
        self.retired.iter().map(|k| k.version).collect()
    }

    fn find(&self, version: u32) -> Option<&KeyMaterial> {
        if self.current.version == version {
            return Some(&self.current);
        }
        self.retired
            .iter()
            .find(|k| k.version == version)
            .map(|k| k.as_ref())
    }

    pub(crate) fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoError> {
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .current
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| CryptoError::Encryption)?;

        let mut token = Vec::with_capacity(HEADER_LEN + ciphertext.len());
        token.push(TOKEN_FORMAT_V1);
        token.extend_from_slice(&self.current.version.to_be_bytes());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    pub(crate) fn open(&self, token: &str) -> Result<Vec<u8>, DecryptionError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| DecryptionError::Malformed)?;
        if raw.len() < HEADER_LEN + TAG_LEN || raw[0] != TOKEN_FORMAT_V1 {
            return Err(DecryptionError::Malformed);
        }

        let version = u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]);
        let key = self.find(version).ok_or(DecryptionError::UnknownKey(version))?;
        let nonce = Nonce::from_slice(&raw[5..HEADER_LEN]);

        key.cipher
            .decrypt(nonce, &raw[HEADER_LEN..])
            .map_err(|_| DecryptionError::Authentication)
    }
}

/// Version stamped in a token, without decrypting it.
pub(crate) fn token_version(token: &str) -> Option<u32> {
    let raw = URL_SAFE_NO_PAD.decode(token.trim()).ok()?;
    if raw.len() < HEADER_LEN || raw[0] != TOKEN_FORMAT_V1 {
        return None;
    }
    Some(u32::from_be_bytes([raw[1], raw[2], raw[3], raw[4]]))
}
