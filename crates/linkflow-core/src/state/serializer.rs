//! State dictionary <-> bytes.

use std::collections::HashMap;

use linkflow_types::value::StateValue;
use serde::{Deserialize, Serialize};

use super::StateError;

/// Current payload format.
pub const STATE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: u32,
    state: &'a HashMap<String, StateValue>,
}

#[derive(Deserialize)]
struct Envelope {
    format: u32,
    state: HashMap<String, StateValue>,
}

/// Serializes the state map as a versioned JSON envelope.
///
/// `StateValue` is internally tagged, so timestamps, UUIDs and byte strings
/// survive the round trip with their types intact.
#[derive(Debug, Clone, Copy, Default)]
pub struct StateSerializer;

impl StateSerializer {
    /// Fails on NaN or infinite floats, which JSON cannot carry.
    pub fn serialize(&self, state: &HashMap<String, StateValue>) -> Result<Vec<u8>, StateError> {
        for (key, value) in state {
            check_finite(key, value)?;
        }
        serde_json::to_vec(&EnvelopeRef {
            format: STATE_FORMAT_VERSION,
            state,
        })
        .map_err(|e| StateError::Serialization(e.to_string()))
    }

    pub fn deserialize(&self, bytes: &[u8]) -> Result<HashMap<String, StateValue>, StateError> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| StateError::Deserialization(e.to_string()))?;
        if envelope.format != STATE_FORMAT_VERSION {
            return Err(StateError::Deserialization(format!(
                "unsupported state format {}",
                envelope.format
            )));
        }
        Ok(envelope.state)
    }
}

fn check_finite(path: &str, value: &StateValue) -> Result<(), StateError> {
    match value {
        StateValue::Float(f) if !f.is_finite() => Err(StateError::Serialization(format!(
            "state value '{path}' is a non-finite float ({f})"
        ))),
        StateValue::List(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_finite(&format!("{path}[{i}]"), item)),
        StateValue::Map(entries) => entries
            .iter()
            .try_for_each(|(k, v)| check_finite(&format!("{path}.{k}"), v)),
        _ => Ok(()),
    }
}
