//! Key material for checkpoint encryption.
//!
//! A [`KeyProvider`] maps a key id (as recorded in encrypted payloads) to a
//! 256-bit key. `VaultCipher` asks its providers in order, so the chain
//! returned by [`default_key_providers`] decides precedence:
//!
//! 1. Environment (`LINKFLOW_KEY_<ID>`, 64 hex chars)
//! 2. Password (`LINKFLOW_VAULT_PASSWORD`, Argon2id per key id)
//! 3. OS keychain (loads, or creates on first encryption)

pub mod env;
pub mod keychain;
pub mod password;

use std::collections::HashMap;

use crate::crypto::vault::VaultError;

pub use env::EnvKeyProvider;
pub use keychain::KeychainKeyProvider;
pub use password::PasswordKeyProvider;

/// Source of encryption keys, looked up by key id.
///
/// Lookups are synchronous: they run inside the payload pipeline, which is
/// itself synchronous. Results are cached by the cipher.
pub trait KeyProvider: Send + Sync {
    /// Provider name for logs.
    fn name(&self) -> &'static str;

    /// The key for `key_id`, or `None` if this provider does not have it.
    fn load_key(&self, key_id: &str) -> Result<Option<[u8; 32]>, VaultError>;

    /// Create and persist a new key for `key_id`.
    ///
    /// Only called when encrypting with a key id no provider knows. The
    /// default implementation cannot create keys.
    fn create_key(&self, _key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Static keys
// ---------------------------------------------------------------------------

/// Fixed in-memory keys, for tests and embedding applications that manage
/// their own key material.
#[derive(Default)]
pub struct StaticKeyProvider {
    keys: HashMap<String, [u8; 32]>,
}

impl StaticKeyProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key_id: impl Into<String>, key: [u8; 32]) -> Self {
        self.keys.insert(key_id.into(), key);
        self
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl KeyProvider for StaticKeyProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    fn load_key(&self, key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
        Ok(self.keys.get(key_id).copied())
    }
}

// ---------------------------------------------------------------------------
// Default chain
// ---------------------------------------------------------------------------

/// Environment, then password (when `LINKFLOW_VAULT_PASSWORD` is set), then
/// the OS keychain.
pub fn default_key_providers() -> Vec<Box<dyn KeyProvider>> {
    let mut providers: Vec<Box<dyn KeyProvider>> = vec![Box::new(EnvKeyProvider::new())];
    if let Some(password) = PasswordKeyProvider::from_env() {
        providers.push(Box::new(password));
    }
    providers.push(Box::new(KeychainKeyProvider::new()));
    providers
}
