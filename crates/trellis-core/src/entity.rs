//! Entities flowing through traversal steps.
//!
//! A traversal step consumes and produces [`Entity`] values. Most are rows
//! fetched from a [`Store`](crate::store::Store); aggregate steps produce
//! virtual entities computed from a number instead.

use trellis_proto::{EntityId, Value};

use crate::catalog::AGGREGATE_TYPE;
use crate::query::AggregateEntity;

/// Identity of an entity across all types: qualified type name plus id.
pub type EntityKey = (String, EntityId);

/// A row handed out by a store.
///
/// Intermediate rows only need their identity and the columns a step reads
/// (foreign keys, filtered fields); full rows are re-loaded at assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityRow {
    /// Qualified entity type name (`namespace__Name`).
    pub entity_type: String,
    /// Identity within the type.
    pub id: EntityId,
    /// Column values.
    pub fields: Vec<(String, Value)>,
}

impl EntityRow {
    /// Create a row without fields.
    pub fn new(entity_type: impl Into<String>, id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    /// Get a column value. `id` and `pk` fall back to the row identity.
    pub fn get(&self, field: &str) -> Option<Value> {
        if let Some((_, v)) = self.fields.iter().find(|(name, _)| name == field) {
            return Some(v.clone());
        }
        match field {
            "id" | "pk" => Some(self.id.to_value()),
            _ => None,
        }
    }
}

/// An entity in a traversal step's input or output.
#[derive(Debug, Clone, PartialEq)]
pub enum Entity {
    /// A stored row.
    Row(EntityRow),
    /// A virtual aggregate entity.
    Aggregate(AggregateEntity),
}

impl Entity {
    /// Qualified entity type name.
    pub fn entity_type(&self) -> &str {
        match self {
            Entity::Row(row) => &row.entity_type,
            Entity::Aggregate(_) => AGGREGATE_TYPE,
        }
    }

    /// Identity within the type.
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Row(row) => row.id.clone(),
            Entity::Aggregate(agg) => agg.id(),
        }
    }

    /// Identity across all types.
    pub fn key(&self) -> EntityKey {
        (self.entity_type().to_string(), self.id())
    }

    /// Get a field value.
    pub fn get(&self, field: &str) -> Option<Value> {
        match self {
            Entity::Row(row) => row.get(field),
            Entity::Aggregate(agg) => agg.get(field),
        }
    }

    /// Get the underlying row, if this is not a virtual entity.
    pub fn as_row(&self) -> Option<&EntityRow> {
        match self {
            Entity::Row(row) => Some(row),
            Entity::Aggregate(_) => None,
        }
    }
}

impl From<EntityRow> for Entity {
    fn from(row: EntityRow) -> Self {
        Entity::Row(row)
    }
}

impl From<AggregateEntity> for Entity {
    fn from(agg: AggregateEntity) -> Self {
        Entity::Aggregate(agg)
    }
}
