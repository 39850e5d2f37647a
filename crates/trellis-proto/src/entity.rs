//! Entity identity.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The identity of an entity within its type.
///
/// Identities double as source keys: every traversal output is paired with
/// the identity of the input entity that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    /// Identity of a virtual entity whose value could not be coerced.
    Null,
    /// Integer primary key.
    Int(i64),
    /// Textual primary key.
    Text(String),
}

/// A source key names the input entity that produced a traversal output.
pub type SourceKey = EntityId;

impl EntityId {
    /// Derive an identity from a field value.
    ///
    /// Foreign-key columns hold integers or strings; any other value (including
    /// null) does not reference an entity.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(i) => Some(EntityId::Int(*i)),
            Value::String(s) => Some(EntityId::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert back to a field value.
    pub fn to_value(&self) -> Value {
        match self {
            EntityId::Null => Value::Null,
            EntityId::Int(i) => Value::Int(*i),
            EntityId::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Null => write!(f, "null"),
            EntityId::Int(i) => write!(f, "{}", i),
            EntityId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<i64> for EntityId {
    fn from(v: i64) -> Self {
        EntityId::Int(v)
    }
}

impl From<i32> for EntityId {
    fn from(v: i32) -> Self {
        EntityId::Int(v as i64)
    }
}

impl From<&str> for EntityId {
    fn from(v: &str) -> Self {
        EntityId::Text(v.to_string())
    }
}

impl From<String> for EntityId {
    fn from(v: String) -> Self {
        EntityId::Text(v)
    }
}
