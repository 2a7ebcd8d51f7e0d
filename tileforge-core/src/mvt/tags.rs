//! Per-layer key/value dictionary interning.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::mvt::tile;

/// A typed attribute value as it appears in a layer's values dictionary.
#[derive(Debug, Clone)]
pub enum TileValue {
    Str(String),
    Float(f32),
    Double(f64),
    Int(i64),
    Uint(u64),
    Sint(i64),
    Bool(bool),
}

impl PartialEq for TileValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => a == b,
            // bitwise so interning treats identical NaNs as one entry
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Double(a), Self::Double(b)) => a.to_bits() == b.to_bits(),
            (Self::Int(a), Self::Int(b)) | (Self::Sint(a), Self::Sint(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for TileValue {}

impl Hash for TileValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Str(v) => v.hash(state),
            Self::Float(v) => v.to_bits().hash(state),
            Self::Double(v) => v.to_bits().hash(state),
            Self::Int(v) | Self::Sint(v) => v.hash(state),
            Self::Uint(v) => v.hash(state),
            Self::Bool(v) => v.hash(state),
        }
    }
}

impl From<TileValue> for tile::Value {
    fn from(value: TileValue) -> Self {
        let mut out = Self::default();
        match value {
            TileValue::Str(v) => out.string_value = Some(v),
            TileValue::Float(v) => out.float_value = Some(v),
            TileValue::Double(v) => out.double_value = Some(v),
            TileValue::Int(v) => out.int_value = Some(v),
            TileValue::Uint(v) => out.uint_value = Some(v),
            TileValue::Sint(v) => out.sint_value = Some(v),
            TileValue::Bool(v) => out.bool_value = Some(v),
        }
        out
    }
}

impl TileValue {
    /// Reads the populated member of a values-dictionary entry; `None` when
    /// the entry carries no value at all.
    #[must_use]
    pub fn from_message(value: &tile::Value) -> Option<Self> {
        if let Some(ref v) = value.string_value {
            Some(Self::Str(v.clone()))
        } else if let Some(v) = value.float_value {
            Some(Self::Float(v))
        } else if let Some(v) = value.double_value {
            Some(Self::Double(v))
        } else if let Some(v) = value.int_value {
            Some(Self::Int(v))
        } else if let Some(v) = value.uint_value {
            Some(Self::Uint(v))
        } else if let Some(v) = value.sint_value {
            Some(Self::Sint(v))
        } else {
            value.bool_value.map(Self::Bool)
        }
    }

    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(v) => serde_json::Value::String(v.clone()),
            Self::Float(v) => serde_json::json!(*v),
            Self::Double(v) => serde_json::json!(*v),
            Self::Int(v) | Self::Sint(v) => serde_json::Value::from(*v),
            Self::Uint(v) => serde_json::Value::from(*v),
            Self::Bool(v) => serde_json::Value::Bool(*v),
        }
    }

    /// Maps a JSON property to the closest tile value type.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Number(n) => {
                if let Some(v) = n.as_i64() {
                    Self::Int(v)
                } else if let Some(v) = n.as_u64() {
                    Self::Uint(v)
                } else {
                    Self::Double(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::Bool(b) => Self::Bool(*b),
            other => Self::Str(other.to_string()),
        }
    }
}

/// Builds the deduplicated keys and values dictionaries of a layer.
#[derive(Debug, Default)]
pub struct TagsBuilder {
    key_index: HashMap<String, u32>,
    keys: Vec<String>,
    value_index: HashMap<TileValue, u32>,
    values: Vec<TileValue>,
}

impl TagsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a key/value pair, returning the dictionary indexes to store
    /// in the feature's tag stream.
    pub fn insert(&mut self, key: &str, value: TileValue) -> (u32, u32) {
        let key_idx = match self.key_index.get(key) {
            Some(idx) => *idx,
            None => {
                let idx = self.keys.len() as u32;
                self.keys.push(key.to_string());
                self.key_index.insert(key.to_string(), idx);
                idx
            }
        };
        let value_idx = match self.value_index.get(&value) {
            Some(idx) => *idx,
            None => {
                let idx = self.values.len() as u32;
                self.values.push(value.clone());
                self.value_index.insert(value, idx);
                idx
            }
        };
        (key_idx, value_idx)
    }

    #[must_use]
    pub fn into_tags(self) -> (Vec<String>, Vec<tile::Value>) {
        (
            self.keys,
            self.values.into_iter().map(Into::into).collect(),
        )
    }
}
