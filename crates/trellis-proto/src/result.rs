//! Result tree types for traversal queries.

use crate::entity::EntityId;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A projected field on a result node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: Value,
}

impl FieldValue {
    /// Create a new field value.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// One entity in the result tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultNode {
    /// Display name of the entity type.
    pub entity_type: String,
    /// Entity identity.
    pub id: EntityId,
    /// Optional URL produced by the type's URL hook.
    pub url: Option<String>,
    /// Projected field values.
    pub fields: Vec<FieldValue>,
    /// Label of the step that produced this node (`None` for roots).
    pub via: Option<String>,
    /// Nodes produced from this node by later steps.
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    /// Create a node without fields or children.
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            url: None,
            fields: Vec::new(),
            via: None,
            children: Vec::new(),
        }
    }

    /// Get a projected field by name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    /// Children produced by the step with the given label.
    pub fn children_via<'a>(&'a self, via: &'a str) -> impl Iterator<Item = &'a ResultNode> {
        self.children
            .iter()
            .filter(move |c| c.via.as_deref() == Some(via))
    }

    /// Count this node and all of its descendants.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(ResultNode::subtree_len).sum::<usize>()
    }
}

/// The assembled result of a query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultTree {
    /// Seed entities that survived every gate, in seed order.
    pub roots: Vec<ResultNode>,
}

impl ResultTree {
    /// Create a tree from root nodes.
    pub fn new(roots: Vec<ResultNode>) -> Self {
        Self { roots }
    }

    /// Check if the tree has no roots.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Total number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        self.roots.iter().map(ResultNode::subtree_len).sum()
    }

    /// Root identities, in order.
    pub fn root_ids(&self) -> Vec<EntityId> {
        self.roots.iter().map(|n| n.id.clone()).collect()
    }
}
