//! Cryptographic operations: AES-256-GCM payload encryption and SHA-256
//! payload digests.

pub mod hash;
pub mod vault;

pub use hash::{sha256_hex, verify_sha256};
pub use vault::{VaultCipher, VaultCrypto, VaultError};
