//! Call-counting store wrapper.

use std::sync::atomic::{AtomicUsize, Ordering};

use trellis_proto::EntityId;

use super::Store;
use crate::catalog::Association;
use crate::entity::EntityRow;
use crate::error::StoreError;

/// Wraps a [`Store`] and counts calls per method.
///
/// Used to check that each traversal step issues a single batched fetch.
pub struct MeteredStore<S> {
    inner: S,
    scans: AtomicUsize,
    loads: AtomicUsize,
    column_fetches: AtomicUsize,
    through_fetches: AtomicUsize,
}

impl<S: Store> MeteredStore<S> {
    /// Wrap a store.
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            scans: AtomicUsize::new(0),
            loads: AtomicUsize::new(0),
            column_fetches: AtomicUsize::new(0),
            through_fetches: AtomicUsize::new(0),
        }
    }

    /// Get the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Total calls across all methods.
    pub fn calls(&self) -> usize {
        self.scan_calls() + self.load_calls() + self.column_calls() + self.through_calls()
    }

    /// Calls to [`Store::scan`].
    pub fn scan_calls(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// Calls to [`Store::load`].
    pub fn load_calls(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }

    /// Calls to [`Store::fetch_by_column`].
    pub fn column_calls(&self) -> usize {
        self.column_fetches.load(Ordering::Relaxed)
    }

    /// Calls to [`Store::fetch_through`].
    pub fn through_calls(&self) -> usize {
        self.through_fetches.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.scans.store(0, Ordering::Relaxed);
        self.loads.store(0, Ordering::Relaxed);
        self.column_fetches.store(0, Ordering::Relaxed);
        self.through_fetches.store(0, Ordering::Relaxed);
    }
}

impl<S: Store> Store for MeteredStore<S> {
    fn scan(&self, entity_type: &str) -> Result<Vec<EntityRow>, StoreError> {
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.inner.scan(entity_type)
    }

    fn load(&self, entity_type: &str, ids: &[EntityId]) -> Result<Vec<EntityRow>, StoreError> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.inner.load(entity_type, ids)
    }

    fn fetch_by_column(
        &self,
        entity_type: &str,
        column: &str,
        keys: &[EntityId],
    ) -> Result<Vec<EntityRow>, StoreError> {
        self.column_fetches.fetch_add(1, Ordering::Relaxed);
        self.inner.fetch_by_column(entity_type, column, keys)
    }

    fn fetch_through(
        &self,
        entity_type: &str,
        association: &Association,
        own_ids: &[EntityId],
    ) -> Result<Vec<(EntityRow, EntityId)>, StoreError> {
        self.through_fetches.fetch_add(1, Ordering::Relaxed);
        self.inner.fetch_through(entity_type, association, own_ids)
    }
}
