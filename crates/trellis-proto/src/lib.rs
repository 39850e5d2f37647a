//! Trellis shared types.
//!
//! This crate defines the data contract shared between the query language,
//! the traversal engine and whatever renders results:
//!
//! - [`value`] - Runtime values for filter arguments and entity fields
//! - [`entity`] - Entity identities and source keys
//! - [`filter`] - Per-step filter specifications
//! - [`result`] - The assembled result tree
//!
//! Every type derives serde's `Serialize`/`Deserialize`, so hosts can render a
//! [`ResultTree`] with any serde format.

pub mod entity;
pub mod filter;
pub mod result;
pub mod value;

// Re-export commonly used types at crate root
pub use entity::{EntityId, SourceKey};
pub use filter::FilterSpec;
pub use result::{FieldValue, ResultNode, ResultTree};
pub use value::Value;
