//! Backing-store capability consumed by the traversal engine.
//!
//! Every traversal step issues exactly one call to one of the four [`Store`]
//! methods, however many entities it traverses from.

mod memory;
mod metered;

pub use memory::MemoryStore;
pub use metered::MeteredStore;

use trellis_proto::EntityId;

use crate::catalog::Association;
use crate::entity::EntityRow;
use crate::error::StoreError;

/// Batched read access to entity rows.
///
/// Entity type arguments are qualified names. Implementations must return
/// rows of the requested type only; order is preserved into the result tree.
pub trait Store: Send + Sync {
    /// All rows of a type.
    fn scan(&self, entity_type: &str) -> Result<Vec<EntityRow>, StoreError>;

    /// Rows of a type whose identity is in `ids`. Missing ids are skipped.
    fn load(&self, entity_type: &str, ids: &[EntityId]) -> Result<Vec<EntityRow>, StoreError>;

    /// Rows of a type whose `column` holds one of `keys`.
    fn fetch_by_column(
        &self,
        entity_type: &str,
        column: &str,
        keys: &[EntityId],
    ) -> Result<Vec<EntityRow>, StoreError>;

    /// Rows of a type linked through an association to one of `own_ids`.
    ///
    /// Each row is paired with the own-side id of the association row that
    /// linked it, so a row linked to several own ids appears once per link.
    fn fetch_through(
        &self,
        entity_type: &str,
        association: &Association,
        own_ids: &[EntityId],
    ) -> Result<Vec<(EntityRow, EntityId)>, StoreError>;
}

impl<S: Store + ?Sized> Store for &S {
    fn scan(&self, entity_type: &str) -> Result<Vec<EntityRow>, StoreError> {
        (**self).scan(entity_type)
    }

    fn load(&self, entity_type: &str, ids: &[EntityId]) -> Result<Vec<EntityRow>, StoreError> {
        (**self).load(entity_type, ids)
    }

    fn fetch_by_column(
        &self,
        entity_type: &str,
        column: &str,
        keys: &[EntityId],
    ) -> Result<Vec<EntityRow>, StoreError> {
        (**self).fetch_by_column(entity_type, column, keys)
    }

    fn fetch_through(
        &self,
        entity_type: &str,
        association: &Association,
        own_ids: &[EntityId],
    ) -> Result<Vec<(EntityRow, EntityId)>, StoreError> {
        (**self).fetch_through(entity_type, association, own_ids)
    }
}
