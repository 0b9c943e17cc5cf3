//! Environment variable key provider.
//!
//! Read-only. A key id maps to `{prefix}{ID}`, where `ID` is the key id
//! upper-cased with every non-alphanumeric character replaced by `_`
//! (`primary-2025` -> `LINKFLOW_KEY_PRIMARY_2025`). Values are 64 hex chars.

use super::KeyProvider;
use crate::crypto::vault::{VaultError, parse_hex_key};

const DEFAULT_PREFIX: &str = "LINKFLOW_KEY_";

pub struct EnvKeyProvider {
    prefix: String,
}

impl EnvKeyProvider {
    pub fn new() -> Self {
        Self::with_prefix(DEFAULT_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable holding the key for `key_id`.
    pub fn var_name(&self, key_id: &str) -> String {
        let id: String = key_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}{id}", self.prefix)
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for EnvKeyProvider {
    fn name(&self) -> &'static str {
        "env"
    }

    fn load_key(&self, key_id: &str) -> Result<Option<[u8; 32]>, VaultError> {
        let var = self.var_name(key_id);
        match std::env::var(&var) {
            Ok(value) => parse_hex_key(&value).map(Some).map_err(|e| match e {
                VaultError::InvalidKey(reason) => VaultError::InvalidKey(format!("{var}: {reason}")),
                other => other,
            }),
            // A non-Unicode value cannot be hex; treat as absent.
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::vault::hex_encode;

    #[test]
    fn test_var_name_normalizes_key_id() {
        let provider = EnvKeyProvider::new();
        assert_eq!(provider.var_name("primary-2025"), "LINKFLOW_KEY_PRIMARY_2025");
        assert_eq!(provider.var_name("default"), "LINKFLOW_KEY_DEFAULT");
        assert_eq!(provider.var_name("a.b"), "LINKFLOW_KEY_A_B");
    }

    #[test]
    fn test_load_key_from_env() {
        let provider = EnvKeyProvider::with_prefix("LINKFLOW_TEST_ENVKEY_");
        let key = [0x5au8; 32];
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("LINKFLOW_TEST_ENVKEY_ROTATED", hex_encode(&key)) };

        assert_eq!(provider.load_key("rotated").unwrap(), Some(key));

        // SAFETY: the var was just set above by this test.
        unsafe { std::env::remove_var("LINKFLOW_TEST_ENVKEY_ROTATED") };
    }

    #[test]
    fn test_missing_env_var_is_none() {
        let provider = EnvKeyProvider::with_prefix("LINKFLOW_TEST_ABSENT_");
        assert_eq!(provider.load_key("nothing").unwrap(), None);
    }

    #[test]
    fn test_invalid_env_value_is_error() {
        let provider = EnvKeyProvider::with_prefix("LINKFLOW_TEST_BADKEY_");
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("LINKFLOW_TEST_BADKEY_X", "not-hex") };

        let err = provider.load_key("x").unwrap_err();
        assert!(matches!(err, VaultError::InvalidKey(_)));
        assert!(!err.to_string().contains("not-hex"));

        // SAFETY: the var was just set above by this test.
        unsafe { std::env::remove_var("LINKFLOW_TEST_BADKEY_X") };
    }
}
