//! Password-derived keys.
//!
//! Every key id gets its own key: Argon2id over the password with the salt
//! `linkflow-checkpoint-v1:{key_id}`. The same password always yields the
//! same key for a key id, so nothing has to be stored.

use super::KeyProvider;
use crate::crypto::vault::{VaultError, derive_key};

const PASSWORD_ENV: &str = "LINKFLOW_VAULT_PASSWORD";
const SALT_PREFIX: &str = "linkflow-checkpoint-v1:";

pub struct PasswordKeyProvider {
    password: String,
}

impl PasswordKeyProvider {
    pub fn new(password: impl Into<String>) -> Self {
        Self {
            password: password.into(),
        }
    }

    /// Provider for `LINKFLOW_VAULT_PASSWORD`, if set and non-empty.
    pub fn from_env() -> Option<Self> {
        std::env::var(PASSWORD_ENV)
            .ok()
            .filter(|p| !p.is_empty())
            .map(Self::new)
    }

    fn salt(key_id: &str) -> Vec<u8> {
        format!("{SALT_PREFIX}{key_id}").into_bytes()
    }
}

impl std::fmt::Debug for PasswordKeyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordKeyProvider")
            .field("password", &"<redacted>")
            .finish()
    }
}

impl KeyProvider for PasswordKeyProvider {
    fn name(&self) -> &'static str {
        "password"
    }

    fn load_key(&self, key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
        derive_key(&self.password, &Self::salt(key_id)).map(Some)
    }
}
