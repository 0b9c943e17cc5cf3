//! Typed values stored in an execution context's state dictionary.
//!
//! `StateValue` keeps timestamps and unique identifiers as first-class
//! variants instead of collapsing them into strings, so a checkpointed state
//! map loads back exactly as it was saved.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

/// A single value in the execution state dictionary.
///
/// Adjacently tagged on the wire:
/// ```json
/// { "type": "timestamp", "value": "2025-01-01T09:00:00Z" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StateValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Bytes(Vec<u8>),
    List(Vec<StateValue>),
    Map(BTreeMap<String, StateValue>),
}

impl StateValue {
    /// Short lowercase name of the variant, used in guard diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            StateValue::Null => "null",
            StateValue::Bool(_) => "bool",
            StateValue::Int(_) => "int",
            StateValue::Float(_) => "float",
            StateValue::String(_) => "string",
            StateValue::Timestamp(_) => "timestamp",
            StateValue::Uuid(_) => "uuid",
            StateValue::Bytes(_) => "bytes",
            StateValue::List(_) => "list",
            StateValue::Map(_) => "map",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            StateValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            StateValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of the value. Integers widen to `f64` and numeric
    /// strings are parsed; everything else is `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            StateValue::Int(i) => Some(*i as f64),
            StateValue::Float(f) => Some(*f),
            StateValue::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[StateValue]> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            StateValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Whether the value counts as "present" for field validation.
    ///
    /// Null, empty strings (after trimming), empty lists and empty maps are
    /// treated as absent.
    pub fn is_present(&self) -> bool {
        match self {
            StateValue::Null => false,
            StateValue::String(s) => !s.trim().is_empty(),
            StateValue::List(items) => !items.is_empty(),
            StateValue::Map(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// Resolve a dotted path (`customer.address.city`) through nested maps.
    ///
    /// Numeric segments index into lists. An empty path returns `self`.
    pub fn get_path(&self, path: &str) -> Option<&StateValue> {
        if path.is_empty() {
            return Some(self);
        }
        let mut current = self;
        for segment in path.split('.') {
            current = match current {
                StateValue::Map(map) => map.get(segment)?,
                StateValue::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Render the value as text for pattern matching and messages.
    pub fn to_display_string(&self) -> String {
        match self {
            StateValue::Null => "null".to_string(),
            StateValue::Bool(b) => b.to_string(),
            StateValue::Int(i) => i.to_string(),
            StateValue::Float(f) => f.to_string(),
            StateValue::String(s) => s.clone(),
            StateValue::Timestamp(ts) => ts.to_rfc3339(),
            StateValue::Uuid(id) => id.to_string(),
            _ => self.to_json().to_string(),
        }
    }

    /// Lossy conversion to plain JSON (timestamps and UUIDs become strings,
    /// bytes become an array of numbers).
    pub fn to_json(&self) -> Value {
        match self {
            StateValue::Null => Value::Null,
            StateValue::Bool(b) => json!(b),
            StateValue::Int(i) => json!(i),
            StateValue::Float(f) => json!(f),
            StateValue::String(s) => json!(s),
            StateValue::Timestamp(ts) => json!(ts.to_rfc3339()),
            StateValue::Uuid(id) => json!(id.to_string()),
            StateValue::Bytes(bytes) => json!(bytes),
            StateValue::List(items) => Value::Array(items.iter().map(StateValue::to_json).collect()),
            StateValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<Value> for StateValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => StateValue::Int(i),
                None => StateValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => StateValue::String(s),
            Value::Array(items) => StateValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                StateValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        StateValue::Bool(b)
    }
}

impl From<i64> for StateValue {
    fn from(i: i64) -> Self {
        StateValue::Int(i)
    }
}

impl From<i32> for StateValue {
    fn from(i: i32) -> Self {
        StateValue::Int(i64::from(i))
    }
}

impl From<u32> for StateValue {
    fn from(i: u32) -> Self {
        StateValue::Int(i64::from(i))
    }
}

impl From<f64> for StateValue {
    fn from(f: f64) -> Self {
        StateValue::Float(f)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::String(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::String(s)
    }
}

impl From<DateTime<Utc>> for StateValue {
    fn from(ts: DateTime<Utc>) -> Self {
        StateValue::Timestamp(ts)
    }
}

impl From<Uuid> for StateValue {
    fn from(id: Uuid) -> Self {
        StateValue::Uuid(id)
    }
}

impl<T: Into<StateValue>> From<Vec<T>> for StateValue {
    fn from(items: Vec<T>) -> Self {
        StateValue::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, StateValue>> for StateValue {
    fn from(map: BTreeMap<String, StateValue>) -> Self {
        StateValue::Map(map)
    }
}

impl<T: Into<StateValue>> From<Option<T>> for StateValue {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(StateValue::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn nested() -> StateValue {
        StateValue::from(json!({
            "customer": {
                "name": "Ada",
                "tags": ["vip", "eu"],
                "limits": { "daily": 500 }
            }
        }))
    }

    #[test]
    fn test_get_path_through_maps_and_lists() {
        let value = nested();
        assert_eq!(
            value.get_path("customer.name"),
            Some(&StateValue::String("Ada".to_string()))
        );
        assert_eq!(
            value.get_path("customer.tags.1"),
            Some(&StateValue::String("eu".to_string()))
        );
        assert_eq!(
            value.get_path("customer.limits.daily"),
            Some(&StateValue::Int(500))
        );
        assert_eq!(value.get_path("customer.missing"), None);
        assert_eq!(value.get_path("customer.name.deeper"), None);
    }

    #[test]
    fn test_is_present() {
        assert!(!StateValue::Null.is_present());
        assert!(!StateValue::from("   ").is_present());
        assert!(!StateValue::List(vec![]).is_present());
        assert!(StateValue::from(0i64).is_present());
        assert!(StateValue::from(false).is_present());
    }

    #[test]
    fn test_as_f64_widens_and_parses() {
        assert_eq!(StateValue::Int(3).as_f64(), Some(3.0));
        assert_eq!(StateValue::from(" 12.5 ").as_f64(), Some(12.5));
        assert_eq!(StateValue::from("abc").as_f64(), None);
        assert_eq!(StateValue::Bool(true).as_f64(), None);
    }

    #[test]
    fn test_rich_values_roundtrip_through_json() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 14, 15, 9, 26).unwrap();
        let id = Uuid::now_v7();
        let mut map = BTreeMap::new();
        map.insert("at".to_string(), StateValue::Timestamp(ts));
        map.insert("id".to_string(), StateValue::Uuid(id));
        map.insert("blob".to_string(), StateValue::Bytes(vec![0, 1, 254, 255]));
        map.insert("none".to_string(), StateValue::Null);
        map.insert("ratio".to_string(), StateValue::Float(0.1));
        let value = StateValue::Map(map);

        let encoded = serde_json::to_string(&value).unwrap();
        let decoded: StateValue = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_lossy_json_conversion() {
        let id = Uuid::nil();
        let value = StateValue::List(vec![StateValue::Uuid(id), StateValue::Int(1)]);
        assert_eq!(value.to_json(), json!([id.to_string(), 1]));
    }

    #[test]
    fn test_from_option() {
        let none: Option<i64> = None;
        assert_eq!(StateValue::from(none), StateValue::Null);
        assert_eq!(StateValue::from(Some(4i64)), StateValue::Int(4));
    }
}
