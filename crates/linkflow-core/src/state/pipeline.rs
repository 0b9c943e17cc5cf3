//! Payload transformation stages applied between serialization and storage.
//!
//! Stages run in order on save and in reverse order on load. Each stage
//! prefixes its output with a one-byte tag saying whether it transformed the
//! bytes, so a payload written with a stage disabled still loads after the
//! stage is enabled (and the other way round).
//!
//! Wire layout per stage:
//! - compression: `0x00 || raw` or `0x01 || gzip(raw)`
//! - encryption:  `0x00 || raw` or `0x01 || len(key_id) || key_id || ciphertext`

use std::io::{Read, Write};
use std::sync::Arc;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use linkflow_types::config::CheckpointConfig;
use thiserror::Error;

use super::StateError;

const TAG_PLAIN: u8 = 0x00;
const TAG_TRANSFORMED: u8 = 0x01;

/// One reversible transformation of payload bytes.
pub trait PayloadStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError>;

    fn decode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError>;
}

fn split_tag(stage: &str, payload: &[u8]) -> Result<(u8, usize), StateError> {
    match payload.first() {
        Some(&tag) if tag == TAG_PLAIN || tag == TAG_TRANSFORMED => Ok((tag, 1)),
        Some(&tag) => Err(StateError::Deserialization(format!(
            "{stage}: unknown header byte {tag:#04x}"
        ))),
        None => Err(StateError::Deserialization(format!("{stage}: empty payload"))),
    }
}

fn tagged(tag: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 1);
    out.push(tag);
    out.extend_from_slice(body);
    out
}

// ---------------------------------------------------------------------------
// Compression
// ---------------------------------------------------------------------------

/// Gzip compression for payloads at or above a size threshold.
#[derive(Debug, Clone)]
pub struct CompressionStage {
    enabled: bool,
    threshold_bytes: usize,
    level: u32,
}

impl CompressionStage {
    pub fn new(enabled: bool, threshold_bytes: usize, level: u32) -> Self {
        Self {
            enabled,
            threshold_bytes,
            level: level.min(9),
        }
    }
}

impl PayloadStage for CompressionStage {
    fn name(&self) -> &'static str {
        "compression"
    }

    fn encode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError> {
        if !self.enabled || payload.len() < self.threshold_bytes {
            return Ok(tagged(TAG_PLAIN, &payload));
        }
        let mut encoder = GzEncoder::new(vec![TAG_TRANSFORMED], Compression::new(self.level));
        encoder
            .write_all(&payload)
            .map_err(|e| StateError::Serialization(format!("gzip: {e}")))?;
        encoder
            .finish()
            .map_err(|e| StateError::Serialization(format!("gzip: {e}")))
    }

    fn decode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError> {
        let (tag, offset) = split_tag(self.name(), &payload)?;
        if tag == TAG_PLAIN {
            return Ok(payload[offset..].to_vec());
        }
        let mut decoder = GzDecoder::new(&payload[offset..]);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| StateError::Deserialization(format!("corrupt compressed payload: {e}")))?;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Encryption
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("no key material for key id '{0}'")]
    MissingKey(String),

    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// Authentication failure or malformed ciphertext.
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

/// Authenticated symmetric cipher keyed by key id.
pub trait PayloadCipher: Send + Sync {
    fn encrypt(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;

    fn decrypt(&self, key_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError>;
}

impl From<CipherError> for StateError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::MissingKey(_) => StateError::Configuration(err.to_string()),
            CipherError::Encrypt(reason) => StateError::Serialization(reason),
            CipherError::Decrypt(reason) => StateError::Decryption(reason),
        }
    }
}

/// Encrypts payloads with the active key and records the key id so older
/// checkpoints stay readable after rotation.
#[derive(Clone)]
pub struct EncryptionStage {
    enabled: bool,
    key_id: String,
    cipher: Option<Arc<dyn PayloadCipher>>,
}

impl EncryptionStage {
    pub fn new(enabled: bool, key_id: impl Into<String>, cipher: Option<Arc<dyn PayloadCipher>>) -> Self {
        Self {
            enabled,
            key_id: key_id.into(),
            cipher,
        }
    }

    fn cipher(&self, key_id: &str) -> Result<&Arc<dyn PayloadCipher>, StateError> {
        self.cipher.as_ref().ok_or_else(|| {
            StateError::Configuration(format!(
                "encryption key '{key_id}' required but no cipher is configured"
            ))
        })
    }
}

impl PayloadStage for EncryptionStage {
    fn name(&self) -> &'static str {
        "encryption"
    }

    fn encode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError> {
        if !self.enabled {
            return Ok(tagged(TAG_PLAIN, &payload));
        }
        let key_len = u8::try_from(self.key_id.len()).map_err(|_| {
            StateError::Configuration(format!("key id '{}' is longer than 255 bytes", self.key_id))
        })?;
        let ciphertext = self.cipher(&self.key_id)?.encrypt(&self.key_id, &payload)?;

        let mut out = Vec::with_capacity(2 + self.key_id.len() + ciphertext.len());
        out.push(TAG_TRANSFORMED);
        out.push(key_len);
        out.extend_from_slice(self.key_id.as_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError> {
        let (tag, offset) = split_tag(self.name(), &payload)?;
        if tag == TAG_PLAIN {
            return Ok(payload[offset..].to_vec());
        }
        let truncated = || StateError::Deserialization("encryption: truncated header".to_string());
        let key_len = usize::from(*payload.get(offset).ok_or_else(truncated)?);
        let key_start = offset + 1;
        let key_bytes = payload
            .get(key_start..key_start + key_len)
            .ok_or_else(truncated)?;
        let key_id = std::str::from_utf8(key_bytes)
            .map_err(|_| StateError::Deserialization("encryption: key id is not UTF-8".to_string()))?;
        let ciphertext = &payload[key_start + key_len..];
        Ok(self.cipher(key_id)?.decrypt(key_id, ciphertext)?)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered list of stages.
#[derive(Clone, Default)]
pub struct PayloadPipeline {
    stages: Vec<Arc<dyn PayloadStage>>,
}

impl PayloadPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stage(mut self, stage: impl PayloadStage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Compression then encryption, as configured.
    ///
    /// Stages are always present so that payloads written under a different
    /// configuration still decode; disabled stages only write their tag.
    pub fn from_config(config: &CheckpointConfig, cipher: Option<Arc<dyn PayloadCipher>>) -> Self {
        Self::new()
            .with_stage(CompressionStage::new(
                config.compression.enabled,
                config.compression.threshold_bytes,
                config.compression.level,
            ))
            .with_stage(EncryptionStage::new(
                config.encryption.enabled,
                config.encryption.key_id.clone(),
                cipher,
            ))
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn encode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError> {
        self.stages
            .iter()
            .try_fold(payload, |bytes, stage| stage.encode(bytes))
    }

    pub fn decode(&self, payload: Vec<u8>) -> Result<Vec<u8>, StateError> {
        self.stages
            .iter()
            .rev()
            .try_fold(payload, |bytes, stage| stage.decode(bytes))
    }
}

impl std::fmt::Debug for PayloadPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
