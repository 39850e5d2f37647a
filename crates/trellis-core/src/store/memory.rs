//! In-memory reference store.

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use trellis_proto::EntityId;

use super::Store;
use crate::catalog::Association;
use crate::entity::EntityRow;
use crate::error::StoreError;

/// One association row: column name to id.
type LinkRow = Vec<(String, EntityId)>;

#[derive(Default)]
struct Tables {
    /// Rows per qualified type, in insertion order.
    rows: HashMap<String, Vec<EntityRow>>,
    /// Position of each id within its type's rows.
    index: HashMap<String, HashMap<EntityId, usize>>,
    /// Association rows per association name.
    links: HashMap<String, Vec<LinkRow>>,
}

/// A [`Store`] over in-memory tables.
///
/// Rows are kept in insertion order and returned in that order by every
/// fetch. Inserting a row whose id already exists replaces it in place.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row.
    pub fn insert(&self, row: EntityRow) {
        let mut tables = self.tables.write();
        let Tables { rows, index, .. } = &mut *tables;
        let table = rows.entry(row.entity_type.clone()).or_default();
        let positions = index.entry(row.entity_type.clone()).or_default();
        match positions.get(&row.id) {
            Some(&pos) => table[pos] = row,
            None => {
                positions.insert(row.id.clone(), table.len());
                table.push(row);
            }
        }
    }

    /// Insert an association row linking two ids.
    pub fn insert_link(
        &self,
        association: &str,
        left: (&str, impl Into<EntityId>),
        right: (&str, impl Into<EntityId>),
    ) {
        let link = vec![
            (left.0.to_string(), left.1.into()),
            (right.0.to_string(), right.1.into()),
        ];
        self.tables
            .write()
            .links
            .entry(association.to_string())
            .or_default()
            .push(link);
    }

    /// Number of rows of a type.
    pub fn len(&self, entity_type: &str) -> usize {
        self.tables
            .read()
            .rows
            .get(entity_type)
            .map_or(0, Vec::len)
    }

    /// Check if the store holds no rows at all.
    pub fn is_empty(&self) -> bool {
        self.tables.read().rows.values().all(Vec::is_empty)
    }
}

fn link_value<'a>(link: &'a LinkRow, column: &str) -> Option<&'a EntityId> {
    link.iter().find(|(c, _)| c == column).map(|(_, id)| id)
}

impl Store for MemoryStore {
    fn scan(&self, entity_type: &str) -> Result<Vec<EntityRow>, StoreError> {
        Ok(self
            .tables
            .read()
            .rows
            .get(entity_type)
            .cloned()
            .unwrap_or_default())
    }

    fn load(&self, entity_type: &str, ids: &[EntityId]) -> Result<Vec<EntityRow>, StoreError> {
        let tables = self.tables.read();
        let (Some(rows), Some(positions)) =
            (tables.rows.get(entity_type), tables.index.get(entity_type))
        else {
            return Ok(Vec::new());
        };
        let mut found: Vec<usize> = ids
            .iter()
            .filter_map(|id| positions.get(id).copied())
            .collect();
        found.sort_unstable();
        found.dedup();
        Ok(found.into_iter().map(|pos| rows[pos].clone()).collect())
    }

    fn fetch_by_column(
        &self,
        entity_type: &str,
        column: &str,
        keys: &[EntityId],
    ) -> Result<Vec<EntityRow>, StoreError> {
        let wanted: HashSet<&EntityId> = keys.iter().collect();
        let tables = self.tables.read();
        Ok(tables
            .rows
            .get(entity_type)
            .map(|rows| {
                rows.iter()
                    .filter(|r| {
                        r.get(column)
                            .and_then(|v| EntityId::from_value(&v))
                            .is_some_and(|k| wanted.contains(&k))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn fetch_through(
        &self,
        entity_type: &str,
        association: &Association,
        own_ids: &[EntityId],
    ) -> Result<Vec<(EntityRow, EntityId)>, StoreError> {
        let wanted: HashSet<&EntityId> = own_ids.iter().collect();
        let tables = self.tables.read();
        let links = tables
            .links
            .get(&association.table)
            .ok_or_else(|| StoreError::UnknownAssociation(association.table.clone()))?;
        let rows: HashMap<&EntityId, &EntityRow> = tables
            .rows
            .get(entity_type)
            .map(|rows| rows.iter().map(|r| (&r.id, r)).collect())
            .unwrap_or_default();

        let mut out = Vec::new();
        for link in links {
            let (Some(own), Some(other)) = (
                link_value(link, &association.own_column),
                link_value(link, &association.other_column),
            ) else {
                continue;
            };
            if !wanted.contains(own) {
                continue;
            }
            if let Some(row) = rows.get(other) {
                out.push(((*row).clone(), own.clone()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> MemoryStore {
        let store = MemoryStore::new();
        store.insert(EntityRow::new("blog__Entry", 1).with_field("blog_id", 10));
        store.insert(EntityRow::new("blog__Entry", 2).with_field("blog_id", 20));
        store.insert(EntityRow::new("blog__Entry", 3).with_field("blog_id", 10));
        store.insert(EntityRow::new("blog__Author", 7));
        store.insert_link("blog__Entry_authors", ("entry_id", 1), ("author_id", 7));
        store.insert_link("blog__Entry_authors", ("entry_id", 3), ("author_id", 7));
        store
    }

    fn ids(rows: &[EntityRow]) -> Vec<EntityId> {
        rows.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn test_load_and_scan() {
        let store = store();
        assert_eq!(store.scan("blog__Entry").unwrap().len(), 3);
        assert!(store.scan("blog__Blog").unwrap().is_empty());
        let rows = store
            .load("blog__Entry", &[EntityId::Int(3), EntityId::Int(99), EntityId::Int(1)])
            .unwrap();
        // Insertion order, not request order.
        assert_eq!(ids(&rows), vec![EntityId::Int(1), EntityId::Int(3)]);
    }

    #[test]
    fn test_insert_replaces() {
        let store = store();
        store.insert(EntityRow::new("blog__Entry", 2).with_field("blog_id", 30));
        assert_eq!(store.len("blog__Entry"), 3);
        let rows = store.load("blog__Entry", &[EntityId::Int(2)]).unwrap();
        assert_eq!(rows[0].get("blog_id"), Some(30.into()));
    }

    #[test]
    fn test_bulk_insert_keeps_order_and_replaces_by_id() {
        let store = MemoryStore::new();
        for i in 0..10_000i64 {
            store.insert(EntityRow::new("blog__Entry", i).with_field("rating", 0));
        }
        for i in (0..10_000i64).step_by(2) {
            store.insert(EntityRow::new("blog__Entry", i).with_field("rating", 1));
        }
        assert_eq!(store.len("blog__Entry"), 10_000);

        let rows = store.scan("blog__Entry").unwrap();
        assert_eq!(rows[4].id, EntityId::Int(4));
        assert_eq!(rows[4].get("rating"), Some(1.into()));
        assert_eq!(rows[5].get("rating"), Some(0.into()));

        let loaded = store
            .load("blog__Entry", &[EntityId::Int(9_999), EntityId::Int(2), EntityId::Int(2)])
            .unwrap();
        assert_eq!(ids(&loaded), vec![EntityId::Int(2), EntityId::Int(9_999)]);
    }

    #[test]
    fn test_fetch_by_column() {
        let store = store();
        let rows = store
            .fetch_by_column("blog__Entry", "blog_id", &[EntityId::Int(10)])
            .unwrap();
        assert_eq!(ids(&rows), vec![EntityId::Int(1), EntityId::Int(3)]);
    }

    #[test]
    fn test_fetch_through_both_directions() {
        let store = store();
        let assoc = Association::new("blog__Entry_authors", "entry_id", "author_id");

        let pairs = store
            .fetch_through("blog__Author", &assoc, &[EntityId::Int(1), EntityId::Int(3)])
            .unwrap();
        let sources: Vec<_> = pairs.iter().map(|(_, s)| s.clone()).collect();
        assert_eq!(sources, vec![EntityId::Int(1), EntityId::Int(3)]);
        assert!(pairs.iter().all(|(r, _)| r.id == EntityId::Int(7)));

        let back = store
            .fetch_through("blog__Entry", &assoc.reversed(), &[EntityId::Int(7)])
            .unwrap();
        assert_eq!(back.len(), 2);

        let missing = Association::new("nope", "a", "b");
        assert_eq!(
            store.fetch_through("blog__Entry", &missing, &[]),
            Err(StoreError::UnknownAssociation("nope".into()))
        );
    }
}
