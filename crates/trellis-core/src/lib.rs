//! Trellis Core - catalog, plan compiler and batched traversal engine.
//!
//! This crate executes traversal queries written in the Trellis query
//! language against a [`Store`]. Each traversal step issues a single batched
//! fetch however many entities it starts from, and every output is paired
//! with the input that produced it so the result can be assembled as a tree.
//!
//! # Example
//!
//! ```rust
//! use trellis_core::{Catalog, EntityRow, EntityType, MemoryStore, QueryExecutor, Relationship};
//!
//! let catalog = Catalog::new();
//! catalog.register(EntityType::new("blog", "Blog").with_field("name")).unwrap();
//! catalog.register(EntityType::new("blog", "Entry").with_field("headline")).unwrap();
//! catalog
//!     .add_relationship("Blog", Relationship::reverse_multi("entry_set", "Entry", "blog_id"))
//!     .unwrap();
//! catalog.freeze().unwrap();
//!
//! let store = MemoryStore::new();
//! store.insert(EntityRow::new("blog__Blog", 1).with_field("name", "Databases"));
//! store.insert(EntityRow::new("blog__Entry", 10).with_field("blog_id", 1).with_field("headline", "B-trees"));
//!
//! let tree = QueryExecutor::new(&catalog, &store)
//!     .run_query("Blog(1) Blog.entry_set")
//!     .unwrap();
//! assert_eq!(tree.node_count(), 2);
//! ```

pub mod catalog;
pub mod config;
pub mod entity;
pub mod error;
pub mod query;
pub mod store;

pub use catalog::{
    Association, Catalog, CustomRelation, EntityType, RelationKind, Relationship, AGGREGATE_TYPE,
};
pub use config::{EngineConfig, FanoutBudget};
pub use entity::{Entity, EntityKey, EntityRow};
pub use error::{CatalogError, Error, StoreError};
pub use query::{
    count_wrapper, AggregateEntity, Edge, Plan, QueryExecutor, Refinements, StepContext,
    TraversalEngine,
};
pub use store::{MemoryStore, MeteredStore, Store};

/// Re-export shared types.
pub use trellis_proto as proto;
