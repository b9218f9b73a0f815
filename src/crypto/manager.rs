use arc_swap::ArcSwap;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

use super::asymmetric::{self, KeyPair};
use super::keyring::{token_version, KeyMaterial, KeyRing};
use super::{CryptoError, DecryptionError};
use crate::clock::Clock;
use crate::config::EncryptionConfig;
use crate::error::GuardResult;
use crate::observability::metrics::{MetricsSink, ENCRYPTION_OPERATIONS};

type HmacSha256 = Hmac<Sha256>;

/// Symmetric encryption with versioned keys, plus HMAC integrity tags.
pub struct EncryptionManager {
    ring: ArcSwap<KeyRing>,
    rotation: Mutex<()>,
    mac_key: Zeroizing<Vec<u8>>,
    rotation_interval: chrono::Duration,
    max_retired_keys: usize,
    clock: Arc<dyn Clock>,
    metrics: Arc<dyn MetricsSink>,
}

impl EncryptionManager {
    /// Build from configuration. Missing keys are generated per process, so
    /// tokens sealed by an ephemeral key do not survive a restart.
    pub fn from_config(
        config: &EncryptionConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, CryptoError> {
        let now = clock.now();
        let current = match &config.key {
            Some(encoded) => {
                let bytes = decode_key("encryption.key", encoded)?;
                KeyMaterial::from_bytes(1, &bytes, now)?
            }
            None => {
                tracing::warn!("No encryption key configured, generating an ephemeral key");
                KeyMaterial::generate(1, now)
            }
        };

        let mac_key = match &config.mac_key {
            Some(encoded) => decode_key("encryption.mac_key", encoded)?,
            None => {
                let mut bytes = Zeroizing::new(vec![0u8; 32]);
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };

        Ok(Self {
            ring: ArcSwap::from_pointee(KeyRing::new(current)),
            rotation: Mutex::new(()),
            mac_key,
            rotation_interval: config.rotation_interval(),
            max_retired_keys: config.max_retired_keys,
            clock,
            metrics,
        })
    }

    fn count(&self, operation: &str) {
        self.metrics
            .increment(ENCRYPTION_OPERATIONS, &[("operation", operation)]);
    }

    pub fn current_key_version(&self) -> u32 {
        self.ring.load().current_version()
    }

    pub fn encrypt(&self, plaintext: impl AsRef<[u8]>) -> Result<String, CryptoError> {
        self.count("encrypt");
        self.ring.load().seal(plaintext.as_ref())
    }

    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, DecryptionError> {
        self.count("decrypt");
        let result = self.ring.load().open(token);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Token decryption failed");
        }
        result
    }

    pub fn decrypt_string(&self, token: &str) -> Result<String, DecryptionError> {
        String::from_utf8(self.decrypt(token)?).map_err(|_| DecryptionError::InvalidUtf8)
    }

    /// Publish a fresh key; the previous one is kept for decryption only.
    /// Returns the new version.
    pub fn rotate(&self) -> u32 {
        let _guard = self.rotation.lock().expect("key rotation mutex poisoned");
        let ring = self.ring.load();
        let previous = ring.current_version();
        let next = KeyMaterial::generate(previous.wrapping_add(1), self.clock.now());
        let rotated = ring.rotated(next, self.max_retired_keys);
        let version = rotated.current_version();
        self.ring.store(Arc::new(rotated));

        self.count("rotate");
        tracing::info!(from = previous, to = version, "Rotated encryption key");
        version
    }

    pub fn should_rotate(&self) -> bool {
        let created = self.ring.load().current_created_at();
        self.clock.now() - created >= self.rotation_interval
    }

    /// Rotate when the current key has reached the rotation interval.
    pub fn rotate_if_due(&self) -> Option<u32> {
        self.should_rotate().then(|| self.rotate())
    }

    /// Re-seal a token under the current key. Tokens already on the current
    /// key are returned unchanged.
    pub fn reencrypt(&self, token: &str) -> GuardResult<String> {
        let current = self.current_key_version();
        if token_version(token) == Some(current) {
            // still authenticate it so a forged token is not blessed
            self.decrypt(token)?;
            return Ok(token.to_string());
        }
        let plaintext = Zeroizing::new(self.decrypt(token)?);
        Ok(self.encrypt(plaintext.as_slice())?)
    }

    /// Fresh RSA-2048 pair. CPU heavy; run it under `spawn_blocking` on a
    /// request path.
    pub fn generate_key_pair(&self) -> Result<KeyPair, CryptoError> {
        self.count("rsa_keygen");
        asymmetric::generate_key_pair()
    }

    /// RSA-OAEP-SHA256 envelope for `public_pem`, base64 encoded.
    pub fn encrypt_with_public_key(
        &self,
        plaintext: impl AsRef<[u8]>,
        public_pem: &str,
    ) -> Result<String, CryptoError> {
        self.count("rsa_encrypt");
        asymmetric::encrypt_with_public_key(plaintext, public_pem)
    }

    pub fn decrypt_with_private_key(&self, token: &str, private_pem: &str) -> GuardResult<Vec<u8>> {
        self.count("rsa_decrypt");
        let result = asymmetric::decrypt_with_private_key(token, private_pem);
        if let Err(e) = &result {
            tracing::warn!(error = %e, "RSA envelope decryption failed");
        }
        result
    }

    /// HMAC-SHA256 tag, base64url encoded.
    pub fn sign(&self, data: impl AsRef<[u8]>) -> Result<String, CryptoError> {
        self.count("sign");
        let mut mac = HmacSha256::new_from_slice(&self.mac_key)
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        mac.update(data.as_ref());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Constant-time tag check.
    pub fn verify(&self, data: impl AsRef<[u8]>, tag: &str) -> bool {
        self.count("verify");
        let Ok(expected) = URL_SAFE_NO_PAD.decode(tag.trim()) else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(&self.mac_key) else {
            return false;
        };
        mac.update(data.as_ref());
        mac.verify_slice(&expected).is_ok()
    }
}

fn decode_key(field: &str, encoded: &str) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let bytes = Zeroizing::new(
        STANDARD
            .decode(encoded.trim())
            .map_err(|_| CryptoError::InvalidKey(format!("{} is not valid base64", field)))?,
    );
    if bytes.len() != 32 {
        return Err(CryptoError::InvalidKey(format!(
            "{} must decode to 32 bytes, got {}",
            field,
            bytes.len()
        )));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::GuardError;
    use crate::observability::metrics::SecurityMetrics;

    fn manager_with(config: EncryptionConfig) -> (EncryptionManager, Arc<ManualClock>, Arc<SecurityMetrics>) {
        let clock = Arc::new(ManualClock::starting_now());
        let metrics = Arc::new(SecurityMetrics::new());
        let m = EncryptionManager::from_config(&config, clock.clone(), metrics.clone()).unwrap();
        (m, clock, metrics)
    }

    fn manager() -> EncryptionManager {
        manager_with(EncryptionConfig::default()).0
    }

    #[test]
    fn test_round_trip_and_nonce_freshness() {
        let m = manager();
        let a = m.encrypt("api-key-123").unwrap();
        let b = m.encrypt("api-key-123").unwrap();
        assert_ne!(a, b);
        assert_eq!(m.decrypt_string(&a).unwrap(), "api-key-123");
        assert_eq!(m.decrypt(&b).unwrap(), b"api-key-123");
    }

    #[test]
    fn test_every_single_byte_tamper_fails() {
        let m = manager();
        let token = m.encrypt("secret").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();
        for i in 0..raw.len() {
            raw[i] ^= 0x01;
            let forged = URL_SAFE_NO_PAD.encode(&raw);
            assert!(m.decrypt(&forged).is_err(), "byte {} flip accepted", i);
            raw[i] ^= 0x01;
        }
    }

    #[test]
    fn test_tamper_error_kinds() {
        let m = manager();
        let token = m.encrypt("secret").unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(&token).unwrap();

        let last = raw.len() - 1;
        raw[last] ^= 0xff;
        assert_eq!(m.decrypt(&URL_SAFE_NO_PAD.encode(&raw)), Err(DecryptionError::Authentication));
        raw[last] ^= 0xff;

        raw[4] = 9;
        assert_eq!(m.decrypt(&URL_SAFE_NO_PAD.encode(&raw)), Err(DecryptionError::UnknownKey(9)));

        assert_eq!(m.decrypt("not base64!"), Err(DecryptionError::Malformed));
    }

    #[test]
    fn test_invalid_utf8_plaintext() {
        let m = manager();
        let token = m.encrypt([0xffu8, 0xfe]).unwrap();
        assert_eq!(m.decrypt_string(&token), Err(DecryptionError::InvalidUtf8));
    }

    #[test]
    fn test_configured_key_is_stable() {
        let key = STANDARD.encode([7u8; 32]);
        let config = EncryptionConfig {
            key: Some(key),
            ..Default::default()
        };
        let token = manager_with(config.clone()).0.encrypt("persisted").unwrap();
        let reopened = manager_with(config).0;
        assert_eq!(reopened.decrypt_string(&token).unwrap(), "persisted");
    }

    #[test]
    fn test_bad_key_rejected() {
        let config = EncryptionConfig {
            key: Some(STANDARD.encode([1u8; 16])),
            ..Default::default()
        };
        let result = EncryptionManager::from_config(
            &config,
            Arc::new(ManualClock::starting_now()),
            Arc::new(SecurityMetrics::new()),
        );
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_rotation_keeps_old_tokens_readable() {
        let (m, _, metrics) = manager_with(EncryptionConfig {
            max_retired_keys: 1,
            ..Default::default()
        });
        let v1 = m.encrypt("one").unwrap();
        assert_eq!(m.rotate(), 2);
        let v2 = m.encrypt("two").unwrap();

        assert_eq!(m.decrypt_string(&v1).unwrap(), "one");
        assert_eq!(m.decrypt_string(&v2).unwrap(), "two");

        // a second rotation evicts version 1
        m.rotate();
        assert_eq!(m.decrypt(&v1), Err(DecryptionError::UnknownKey(1)));
        assert_eq!(m.decrypt_string(&v2).unwrap(), "two");
        assert_eq!(metrics.counter(ENCRYPTION_OPERATIONS, &[("operation", "rotate")]), 2);
    }

    #[test]
    fn test_reencrypt_moves_to_current_key() {
        let m = manager();
        let old = m.encrypt("migrate me").unwrap();
        m.rotate();
        let fresh = m.reencrypt(&old).unwrap();
        assert_eq!(token_version(&fresh), Some(2));
        assert_eq!(m.decrypt_string(&fresh).unwrap(), "migrate me");
        assert_eq!(m.reencrypt(&fresh).unwrap(), fresh);

        let err = m.reencrypt("garbage").unwrap_err();
        assert!(matches!(err, GuardError::Decryption(DecryptionError::Malformed)));
    }

    #[test]
    fn test_rotation_due_after_interval() {
        let (m, clock, _) = manager_with(EncryptionConfig {
            key_rotation_days: 90,
            ..Default::default()
        });
        assert!(!m.should_rotate());
        assert_eq!(m.rotate_if_due(), None);

        clock.advance(chrono::Duration::days(90));
        assert!(m.should_rotate());
        assert_eq!(m.rotate_if_due(), Some(2));
        assert!(!m.should_rotate());
    }

    #[test]
    fn test_sign_and_verify() {
        let m = manager();
        let tag = m.sign("payload").unwrap();
        assert!(m.verify("payload", &tag));
        assert!(!m.verify("payload!", &tag));
        assert!(!m.verify("payload", "AAAA"));
        assert!(!m.verify("payload", "%%%"));
    }

    #[test]
    fn test_operations_counted() {
        let (m, _, metrics) = manager_with(EncryptionConfig::default());
        let token = m.encrypt("x").unwrap();
        let _ = m.decrypt(&token);
        assert_eq!(metrics.counter(ENCRYPTION_OPERATIONS, &[("operation", "encrypt")]), 1);
        assert_eq!(metrics.counter(ENCRYPTION_OPERATIONS, &[("operation", "decrypt")]), 1);
    }

    #[test]
    fn test_rsa_operations_counted() {
        let (m, _, metrics) = manager_with(EncryptionConfig::default());
        let pair = m.generate_key_pair().unwrap();
        let envelope = m.encrypt_with_public_key("handoff", &pair.public_pem).unwrap();
        assert_eq!(
            m.decrypt_with_private_key(&envelope, &pair.private_pem).unwrap(),
            b"handoff"
        );
        assert!(m.decrypt_with_private_key("%%%", &pair.private_pem).is_err());

        let count = |op: &str| metrics.counter(ENCRYPTION_OPERATIONS, &[("operation", op)]);
        assert_eq!(count("rsa_keygen"), 1);
        assert_eq!(count("rsa_encrypt"), 1);
        assert_eq!(count("rsa_decrypt"), 2);
        assert_eq!(metrics.total(ENCRYPTION_OPERATIONS), 4);
    }
}
