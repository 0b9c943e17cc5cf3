//! AES-256-GCM encryption for checkpoint payloads at rest.
//!
//! `VaultCrypto` wraps a single 256-bit key. `VaultCipher` is the
//! `PayloadCipher` handed to the checkpoint pipeline: it resolves key ids to
//! keys through a list of [`KeyProvider`]s and caches the resulting ciphers,
//! so rotated-out keys stay usable for reading old checkpoints.
//!
//! Encrypted format: `nonce (12 bytes) || ciphertext`
//!
//! SECURITY: Error types never contain plaintext or key material.

use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use dashmap::DashMap;
use linkflow_core::state::{CipherError, PayloadCipher};
use thiserror::Error;

use crate::keys::{KeyProvider, StaticKeyProvider};

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Errors from vault encryption and key handling.
///
/// IMPORTANT: These errors never include plaintext, key material, or
/// ciphertext in their Display/Debug output.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("encryption failed")]
    EncryptionFailed,

    #[error("decryption failed")]
    DecryptionFailed,

    #[error("invalid ciphertext: too short")]
    CiphertextTooShort,

    #[error("key derivation failed")]
    KeyDerivationFailed,

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("keychain unavailable: {0}")]
    KeychainUnavailable(String),

    #[error("keychain error: {0}")]
    KeychainError(String),
}

// ---------------------------------------------------------------------------
// VaultCrypto
// ---------------------------------------------------------------------------

/// AES-256-GCM with a fresh random nonce per call.
///
/// Encrypting the same plaintext twice produces different output.
pub struct VaultCrypto {
    cipher: Aes256Gcm,
}

impl VaultCrypto {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(key.into()),
        }
    }

    /// Cipher keyed by Argon2id over `password` and `salt`.
    pub fn from_password(password: &str, salt: &[u8]) -> Result<Self, VaultError> {
        Ok(Self::new(&derive_key(password, salt)?))
    }

    /// Returns `nonce (12 bytes) || ciphertext`.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, VaultError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| VaultError::EncryptionFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    /// Decrypt data produced by `encrypt()`.
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, VaultError> {
        if data.len() < NONCE_SIZE {
            return Err(VaultError::CiphertextTooShort);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::DecryptionFailed)
    }
}

/// Derive a 32-byte key from a password using Argon2id.
///
/// OWASP parameters: 19 MiB memory, 2 iterations, 1 lane. The salt must be
/// at least 8 bytes.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32], VaultError> {
    use argon2::{Algorithm, Argon2, Params, Version};

    let params = Params::new(19456, 2, 1, Some(32)).map_err(|_| VaultError::KeyDerivationFailed)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|_| VaultError::KeyDerivationFailed)?;
    Ok(key)
}

// ---------------------------------------------------------------------------
// VaultCipher
// ---------------------------------------------------------------------------

/// Key-ring backed `PayloadCipher`.
///
/// Keys are looked up lazily, first in the cache, then through each provider
/// in order. On encrypt, a key that no provider has is created by the first
/// provider able to create one; on decrypt a missing key is an error.
pub struct VaultCipher {
    providers: Vec<Box<dyn KeyProvider>>,
    cache: DashMap<String, Arc<VaultCrypto>>,
}

impl VaultCipher {
    pub fn new(providers: Vec<Box<dyn KeyProvider>>) -> Self {
        Self {
            providers,
            cache: DashMap::new(),
        }
    }

    /// A cipher that knows exactly one key.
    pub fn with_key(key_id: impl Into<String>, key: [u8; 32]) -> Self {
        Self::new(vec![Box::new(StaticKeyProvider::new().with_key(key_id, key))])
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    /// Forget cached ciphers, e.g. after a key was rotated in a provider.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn resolve(&self, key_id: &str, create: bool) -> Result<Arc<VaultCrypto>, CipherError> {
        if let Some(crypto) = self.cache.get(key_id) {
            return Ok(Arc::clone(crypto.value()));
        }

        let key = match self.lookup(key_id) {
            Some(key) => key,
            None if create => self
                .create(key_id)
                .ok_or_else(|| CipherError::MissingKey(key_id.to_string()))?,
            None => return Err(CipherError::MissingKey(key_id.to_string())),
        };

        let crypto = Arc::new(VaultCrypto::new(&key));
        self.cache.insert(key_id.to_string(), Arc::clone(&crypto));
        Ok(crypto)
    }

    fn lookup(&self, key_id: &str) -> Option<[u8; 32]> {
        for provider in &self.providers {
            match provider.load_key(key_id) {
                Ok(Some(key)) => {
                    tracing::debug!(key_id, provider = provider.name(), "encryption key resolved");
                    return Some(key);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key_id, provider = provider.name(), error = %e, "key provider failed");
                }
            }
        }
        None
    }

    fn create(&self, key_id: &str) -> Option<[u8; 32]> {
        for provider in &self.providers {
            match provider.create_key(key_id) {
                Ok(Some(key)) => {
                    tracing::info!(key_id, provider = provider.name(), "encryption key created");
                    return Some(key);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key_id, provider = provider.name(), error = %e, "key creation failed");
                }
            }
        }
        None
    }
}

impl PayloadCipher for VaultCipher {
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.resolve(key_id, true)?
            .encrypt(plaintext)
            .map_err(|e| CipherError::Encrypt(e.to_string()))
    }

    fn decrypt(&self, key_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        self.resolve(key_id, false)?
            .decrypt(ciphertext)
            .map_err(|e| CipherError::Decrypt(format!("key '{key_id}': {e}")))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// 32 random bytes from the OS CSPRNG.
pub(crate) fn rand_bytes() -> [u8; 32] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

pub(crate) fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd length hex string".to_string());
    }
    if !s.is_ascii() {
        return Err("non-ASCII hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| format!("invalid hex at position {i}: {e}"))
        })
        .collect()
}

/// Parse a 64-character hex string into a 32-byte key.
pub(crate) fn parse_hex_key(s: &str) -> Result<[u8; 32], VaultError> {
    let bytes = hex_decode(s.trim()).map_err(VaultError::InvalidKey)?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| VaultError::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let crypto = VaultCrypto::new(&test_key());
        let plaintext = b"{\"amount\":1250}";

        let encrypted = crypto.encrypt(plaintext).unwrap();
        assert_eq!(encrypted.len(), NONCE_SIZE + plaintext.len() + 16);
        assert_eq!(crypto.decrypt(&encrypted).unwrap(), plaintext);
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let crypto1 = VaultCrypto::new(&test_key());
        let mut wrong_key = test_key();
        wrong_key[0] = 0xFF;
        let crypto2 = VaultCrypto::new(&wrong_key);

        let encrypted = crypto1.encrypt(b"state").unwrap();
        assert!(matches!(crypto2.decrypt(&encrypted), Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn test_random_nonce_produces_different_ciphertexts() {
        let crypto = VaultCrypto::new(&test_key());
        let encrypted1 = crypto.encrypt(b"same").unwrap();
        let encrypted2 = crypto.encrypt(b"same").unwrap();
        assert_ne!(encrypted1, encrypted2);
        assert_eq!(crypto.decrypt(&encrypted1).unwrap(), b"same");
        assert_eq!(crypto.decrypt(&encrypted2).unwrap(), b"same");
    }

    #[test]
    fn test_ciphertext_too_short() {
        let crypto = VaultCrypto::new(&test_key());
        assert!(matches!(crypto.decrypt(&[0u8; 5]), Err(VaultError::CiphertextTooShort)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let crypto = VaultCrypto::new(&test_key());
        let mut encrypted = crypto.encrypt(b"state").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;
        assert!(matches!(crypto.decrypt(&encrypted), Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn test_password_derivation_depends_on_salt() {
        let a = derive_key("correct horse", b"linkflow-salt-a").unwrap();
        let b = derive_key("correct horse", b"linkflow-salt-a").unwrap();
        let c = derive_key("correct horse", b"linkflow-salt-b").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);

        let crypto = VaultCrypto::from_password("correct horse", b"linkflow-salt-a").unwrap();
        let encrypted = crypto.encrypt(b"state").unwrap();
        assert_eq!(VaultCrypto::new(&a).decrypt(&encrypted).unwrap(), b"state");
    }

    #[test]
    fn test_short_salt_is_rejected() {
        assert!(matches!(derive_key("pw", b"short"), Err(VaultError::KeyDerivationFailed)));
    }

    #[test]
    fn test_hex_helpers() {
        let key = test_key();
        let hex = hex_encode(&key);
        assert_eq!(hex.len(), 64);
        assert_eq!(parse_hex_key(&hex).unwrap(), key);
        assert!(parse_hex_key("abc").is_err());
        assert!(parse_hex_key("zz").is_err());
        assert!(matches!(parse_hex_key("00ff"), Err(VaultError::InvalidKey(_))));
    }

    #[test]
    fn test_error_display_has_no_secrets() {
        let msg = VaultError::DecryptionFailed.to_string();
        assert_eq!(msg, "decryption failed");
    }

    #[test]
    fn test_cipher_roundtrip_with_static_key() {
        let cipher = VaultCipher::with_key("primary", test_key());
        let encrypted = cipher.encrypt("primary", b"payload").unwrap();
        assert_eq!(cipher.decrypt("primary", &encrypted).unwrap(), b"payload");
    }

    #[test]
    fn test_cipher_missing_key() {
        let cipher = VaultCipher::with_key("primary", test_key());
        assert!(matches!(
            cipher.encrypt("other", b"payload"),
            Err(CipherError::MissingKey(id)) if id == "other"
        ));
        assert!(matches!(
            cipher.decrypt("other", b"whatever"),
            Err(CipherError::MissingKey(_))
        ));
    }

    #[test]
    fn test_cipher_wrong_key_is_decrypt_error() {
        let writer = VaultCipher::with_key("primary", test_key());
        let reader = VaultCipher::with_key("primary", [7u8; 32]);
        let encrypted = writer.encrypt("primary", b"payload").unwrap();
        assert!(matches!(
            reader.decrypt("primary", &encrypted),
            Err(CipherError::Decrypt(_))
        ));
    }

    struct CountingProvider {
        loads: Arc<AtomicUsize>,
    }

    impl KeyProvider for CountingProvider {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn load_key(&self, _key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Some([3u8; 32]))
        }
    }

    #[test]
    fn test_cipher_caches_resolved_keys() {
        let loads = Arc::new(AtomicUsize::new(0));
        let cipher = VaultCipher::new(vec![Box::new(CountingProvider {
            loads: Arc::clone(&loads),
        })]);

        let encrypted = cipher.encrypt("k1", b"a").unwrap();
        cipher.decrypt("k1", &encrypted).unwrap();
        cipher.encrypt("k1", b"b").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        cipher.clear_cache();
        cipher.encrypt("k1", b"c").unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(cipher.provider_names(), vec!["counting"]);
    }

    struct FailingProvider;

    impl KeyProvider for FailingProvider {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn load_key(&self, _key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
            Err(VaultError::KeychainUnavailable("no session bus".into()))
        }
    }

    #[test]
    fn test_cipher_skips_failing_provider() {
        let cipher = VaultCipher::new(vec![
            Box::new(FailingProvider),
            Box::new(StaticKeyProvider::new().with_key("k1", test_key())),
        ]);
        let encrypted = cipher.encrypt("k1", b"payload").unwrap();
        assert_eq!(cipher.decrypt("k1", &encrypted).unwrap(), b"payload");
    }

    struct CreatingProvider;

    impl KeyProvider for CreatingProvider {
        fn name(&self) -> &'static str {
            "creating"
        }

        fn load_key(&self, _key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
            Ok(None)
        }

        fn create_key(&self, _key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
            Ok(Some([9u8; 32]))
        }
    }

    #[test]
    fn test_cipher_creates_keys_only_for_encryption() {
        let reader = VaultCipher::new(vec![Box::new(CreatingProvider)]);
        assert!(matches!(reader.decrypt("fresh", b"x"), Err(CipherError::MissingKey(_))));

        let writer = VaultCipher::new(vec![Box::new(CreatingProvider)]);
        let encrypted = writer.encrypt("fresh", b"payload").unwrap();
        assert_eq!(writer.decrypt("fresh", &encrypted).unwrap(), b"payload");
    }

    mod pipeline_roundtrip {
        use super::*;
        use linkflow_core::state::PayloadPipeline;
        use linkflow_types::config::CheckpointConfig;
        use proptest::prelude::*;

        fn pipeline(compress: bool, encrypt: bool) -> PayloadPipeline {
            let mut config = CheckpointConfig::default();
            config.compression.enabled = compress;
            config.compression.threshold_bytes = 16;
            config.encryption.enabled = encrypt;
            config.encryption.key_id = "primary".to_string();
            let cipher: Arc<dyn PayloadCipher> = Arc::new(VaultCipher::with_key("primary", [1u8; 32]));
            PayloadPipeline::from_config(&config, Some(cipher))
        }

        proptest! {
            #[test]
            fn roundtrip_under_every_stage_combination(
                payload in proptest::collection::vec(any::<u8>(), 0..2048),
                compress in any::<bool>(),
                encrypt in any::<bool>(),
            ) {
                let pipeline = pipeline(compress, encrypt);
                let encoded = pipeline.encode(payload.clone()).unwrap();
                prop_assert_eq!(pipeline.decode(encoded).unwrap(), payload);
            }
        }
    }
}
