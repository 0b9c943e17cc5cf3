//! OS keychain key provider.
//!
//! Keys live under service `linkflow`, account `checkpoint-key-{key_id}`, as
//! 64 hex chars. A missing key is generated and stored the first time it is
//! needed for encryption.

use super::KeyProvider;
use crate::crypto::vault::{VaultError, hex_encode, parse_hex_key, rand_bytes};

const DEFAULT_SERVICE: &str = "linkflow";
const ACCOUNT_PREFIX: &str = "checkpoint-key-";

pub struct KeychainKeyProvider {
    service: String,
}

impl KeychainKeyProvider {
    pub fn new() -> Self {
        Self::with_service(DEFAULT_SERVICE)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn account(key_id: &str) -> String {
        format!("{ACCOUNT_PREFIX}{key_id}")
    }

    fn entry(&self, key_id: &str) -> Result<keyring::Entry, VaultError> {
        keyring::Entry::new(&self.service, &Self::account(key_id))
            .map_err(|e| VaultError::KeychainUnavailable(e.to_string()))
    }
}

impl Default for KeychainKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for KeychainKeyProvider {
    fn name(&self) -> &'static str {
        "keychain"
    }

    fn load_key(&self, key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
        match self.entry(key_id)?.get_password() {
            Ok(hex_key) => parse_hex_key(&hex_key)
                .map(Some)
                .map_err(|_| VaultError::KeychainError(format!("corrupted key '{key_id}' in keychain"))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::KeychainUnavailable(e.to_string())),
        }
    }

    fn create_key(&self, key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
        let key = rand_bytes();
        self.entry(key_id)?
            .set_password(&hex_encode(&key))
            .map_err(|e| VaultError::KeychainError(e.to_string()))?;
        tracing::info!(key_id, service = %self.service, "generated checkpoint key in keychain");
        Ok(Some(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_name() {
        assert_eq!(KeychainKeyProvider::account("default"), "checkpoint-key-default");
    }

    #[test]
    fn test_provider_name() {
        assert_eq!(KeychainKeyProvider::new().name(), "keychain");
    }
}
