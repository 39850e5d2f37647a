//! Filter specifications attached to traversal steps.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// One refinement of a traversal step's output.
///
/// The shape is deliberately loose: `method` is free text and the argument
/// slots are optional, so a malformed specification can be represented and
/// rejected by the filter compiler before any fetch happens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Method name: `filter`, `exclude`, `count`, `sum`, `avg`, `min` or `max`.
    pub method: String,
    /// Keyword predicate arguments (for `filter`/`exclude`).
    pub kwargs: Option<Vec<(String, Value)>>,
    /// Target field name (for aggregations).
    pub field: Option<String>,
}

impl FilterSpec {
    /// Create a `filter` refinement.
    pub fn filter<K: Into<String>>(kwargs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            method: "filter".to_string(),
            kwargs: Some(kwargs.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            field: None,
        }
    }

    /// Create an `exclude` refinement.
    pub fn exclude<K: Into<String>>(kwargs: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self {
            method: "exclude".to_string(),
            kwargs: Some(kwargs.into_iter().map(|(k, v)| (k.into(), v)).collect()),
            field: None,
        }
    }

    /// Create an aggregation refinement (`count`, `sum`, `avg`, `min`, `max`).
    pub fn aggregate(method: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kwargs: None,
            field: Some(field.into()),
        }
    }

    /// Create a specification with only a method name and no arguments.
    pub fn bare(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            kwargs: None,
            field: None,
        }
    }
}
