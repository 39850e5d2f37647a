//! Virtual aggregate entities and the count relationship wrapper.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use trellis_proto::{EntityId, SourceKey, Value};

use super::engine::{Edge, StepContext};
use crate::catalog::{CustomRelation, RelationKind, Relationship, AGGREGATE_TYPE};
use crate::entity::{Entity, EntityKey};
use crate::error::Error;

/// A computed stand-in entity holding a single value.
///
/// Aggregate entities are never stored or fetched. They expose the fields
/// `id` and `value`, both returning the held value, and their identity is
/// derived from that value alone.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateEntity {
    value: Value,
}

impl AggregateEntity {
    /// Wrap an already computed value.
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    /// Build from an arbitrary value, coercing it to an integer.
    ///
    /// Integers stay, floats truncate toward zero, booleans become 0/1 and
    /// strings holding an integer parse. Anything else becomes null.
    pub fn from_raw(raw: &Value) -> Self {
        let value = match raw {
            Value::Int(i) => Value::Int(*i),
            Value::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
            Value::Bool(b) => Value::Int(i64::from(*b)),
            Value::String(s) => s.trim().parse::<i64>().map_or(Value::Null, Value::Int),
            _ => Value::Null,
        };
        Self { value }
    }

    /// The held value.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Identity derived from the value.
    pub fn id(&self) -> EntityId {
        match &self.value {
            Value::Int(i) => EntityId::Int(*i),
            Value::Bool(b) => EntityId::Int(i64::from(*b)),
            Value::String(s) => EntityId::Text(s.clone()),
            Value::Null => EntityId::Null,
            other => EntityId::Text(other.to_string()),
        }
    }

    /// `id`, `pk` and `value` all return the held value.
    pub fn get(&self, field: &str) -> Option<Value> {
        match field {
            "id" | "pk" | "value" => Some(self.value.clone()),
            _ => None,
        }
    }

    /// Exposed field names.
    pub fn fields() -> [&'static str; 2] {
        ["id", "value"]
    }
}

struct CountRelation {
    inner: Relationship,
}

impl CustomRelation for CountRelation {
    fn traverse(&self, inputs: &[Entity], ctx: &StepContext<'_>) -> Result<Vec<Edge>, Error> {
        let edges = ctx.traverse(inputs, &self.inner)?;

        let mut order: Vec<SourceKey> = Vec::new();
        let mut distinct: HashMap<SourceKey, HashSet<EntityKey>> = HashMap::new();
        for edge in edges {
            distinct
                .entry(edge.source.clone())
                .or_insert_with(|| {
                    order.push(edge.source.clone());
                    HashSet::new()
                })
                .insert(edge.target.key());
        }

        Ok(order
            .into_iter()
            .map(|source| {
                let count = distinct.get(&source).map_or(0, HashSet::len);
                let entity = AggregateEntity::from_raw(&Value::Int(count as i64));
                Edge::new(entity.into(), source)
            })
            .collect())
    }

    fn validate(&self, has_type: &dyn Fn(&str) -> bool) -> Result<(), String> {
        if has_type(&self.inner.target) {
            Ok(())
        } else {
            Err(format!(
                "counted relationship '{}' targets unknown type '{}'",
                self.inner.name, self.inner.target
            ))
        }
    }
}

/// Wrap a relationship so it yields one count entity per source.
///
/// The wrapped relationship keeps its name and runs the inner traversal with
/// the step's filters, then emits, for every source that produced at least one
/// target, an aggregate entity holding the number of distinct targets. Like
/// every custom relationship it must be allow-listed to be traversable.
pub fn count_wrapper(relationship: Relationship) -> Relationship {
    Relationship {
        name: relationship.name.clone(),
        source: relationship.source.clone(),
        target: AGGREGATE_TYPE.to_string(),
        kind: RelationKind::Custom(Arc::new(CountRelation {
            inner: relationship,
        })),
    }
}
