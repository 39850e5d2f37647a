//! Entity/relationship catalog for Trellis.
//!
//! The catalog resolves type and relationship names, holds the allow-list of
//! traversable custom relationships, and projects entity fields and URLs for
//! result assembly.

mod catalog;
mod entity_type;
mod relationship;

pub use catalog::{Catalog, AGGREGATE_TYPE};
pub use entity_type::{is_valid_name, EntityType, NAMESPACE_SEPARATOR};
pub use relationship::{Association, CustomRelation, RelationKind, Relationship};
