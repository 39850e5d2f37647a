//! The entity/relationship catalog and name resolver.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;
use trellis_proto::Value;

use super::entity_type::{is_valid_name, EntityType};
use super::relationship::{RelationKind, Relationship};
use crate::entity::Entity;
use crate::error::{CatalogError, Error};

/// Qualified name of the built-in virtual aggregate type.
pub const AGGREGATE_TYPE: &str = "trellis__Aggregate";

type UrlHook = Arc<dyn Fn(&Entity) -> String + Send + Sync>;

struct TypeEntry {
    def: EntityType,
    relationships: BTreeMap<String, Relationship>,
    allowed: HashSet<String>,
    url: Option<UrlHook>,
}

impl TypeEntry {
    fn new(def: EntityType) -> Self {
        Self {
            def,
            relationships: BTreeMap::new(),
            allowed: HashSet::new(),
            url: None,
        }
    }
}

#[derive(Default)]
struct CatalogState {
    /// Keyed by qualified name.
    types: BTreeMap<String, TypeEntry>,
    /// Bare name to qualified names.
    shortcuts: HashMap<String, Vec<String>>,
    frozen: bool,
}

impl CatalogState {
    fn qualify(&self, name: &str) -> Result<&str, Error> {
        if let Some((qualified, _)) = self.types.get_key_value(name) {
            return Ok(qualified);
        }
        match self.shortcuts.get(name).map(Vec::as_slice) {
            Some([only]) => Ok(only),
            Some(candidates) if candidates.len() > 1 => {
                let mut candidates = candidates.to_vec();
                candidates.sort();
                Err(Error::AmbiguousType {
                    name: name.to_string(),
                    candidates,
                })
            }
            _ => Err(Error::UnknownType {
                name: name.to_string(),
            }),
        }
    }

    fn entry(&self, name: &str) -> Result<&TypeEntry, Error> {
        let qualified = self.qualify(name)?;
        self.types.get(qualified).ok_or_else(|| Error::UnknownType {
            name: name.to_string(),
        })
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut TypeEntry, CatalogError> {
        let qualified = self
            .qualify(name)
            .map_err(|_| CatalogError::UnknownType(name.to_string()))?
            .to_string();
        self.types
            .get_mut(&qualified)
            .ok_or(CatalogError::UnknownType(qualified))
    }

    fn ensure_mutable(&self) -> Result<(), CatalogError> {
        if self.frozen {
            Err(CatalogError::Frozen)
        } else {
            Ok(())
        }
    }

    fn insert(&mut self, def: EntityType) {
        let qualified = def.qualified_name();
        self.shortcuts
            .entry(def.name.clone())
            .or_default()
            .push(qualified.clone());
        self.types.insert(qualified, TypeEntry::new(def));
    }

    fn rebuild_shortcuts(&mut self) {
        self.shortcuts.clear();
        for (qualified, entry) in &self.types {
            self.shortcuts
                .entry(entry.def.name.clone())
                .or_default()
                .push(qualified.clone());
        }
    }

    /// Check every relationship before the catalog is frozen.
    fn validate(&self) -> Result<(), Error> {
        let has_type = |name: &str| self.qualify(name).is_ok();
        for (qualified, entry) in &self.types {
            for rel in entry.relationships.values() {
                let fail = |reason: String| Error::UnresolvedRelationshipKind {
                    entity_type: qualified.clone(),
                    relationship: rel.name.clone(),
                    reason,
                };
                if let Err(e) = self.qualify(&rel.target) {
                    return Err(fail(format!("target type: {}", e)));
                }
                match &rel.kind {
                    RelationKind::ForwardSingle { foreign_key }
                    | RelationKind::ReverseSingle { foreign_key }
                    | RelationKind::ReverseMulti { foreign_key } => {
                        if foreign_key.is_empty() {
                            return Err(fail("empty foreign key column".to_string()));
                        }
                    }
                    RelationKind::ForwardMulti { association } => {
                        if association.table.is_empty()
                            || association.own_column.is_empty()
                            || association.other_column.is_empty()
                        {
                            return Err(fail("incomplete association".to_string()));
                        }
                    }
                    RelationKind::Custom(custom) => custom.validate(&has_type).map_err(fail)?,
                }
            }
        }
        Ok(())
    }
}

/// Process-wide registry of entity types and their relationships.
///
/// The catalog follows a build-then-freeze lifecycle: types, relationships,
/// allow-list entries and URL hooks are registered while the catalog is open,
/// then [`freeze`](Catalog::freeze) validates everything and makes it
/// read-only. Queries may only be compiled against a frozen catalog.
pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    /// Create an open catalog holding only the built-in aggregate type.
    pub fn new() -> Self {
        let mut state = CatalogState::default();
        state.insert(aggregate_type());
        Self {
            state: RwLock::new(state),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Register an entity type. Abstract types are skipped.
    pub fn register(&self, def: EntityType) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        state.ensure_mutable()?;
        if def.is_abstract {
            debug!(entity_type = %def.qualified_name(), "skipping abstract type");
            return Ok(());
        }
        if !def.namespace.is_empty() && !is_valid_name(&def.namespace) {
            return Err(CatalogError::InvalidName(def.namespace));
        }
        if !is_valid_name(&def.name) {
            return Err(CatalogError::InvalidName(def.name));
        }
        let qualified = def.qualified_name();
        if state.types.contains_key(&qualified) {
            return Err(CatalogError::DuplicateType(qualified));
        }
        state.insert(def);
        Ok(())
    }

    /// Remove a type with its relationships, allow-list and URL hook.
    pub fn unregister(&self, name: &str) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        state.ensure_mutable()?;
        let qualified = state
            .qualify(name)
            .map_err(|_| CatalogError::UnknownType(name.to_string()))?
            .to_string();
        state.types.remove(&qualified);
        state.rebuild_shortcuts();
        Ok(())
    }

    /// Declare a relationship on a registered type.
    pub fn add_relationship(
        &self,
        entity_type: &str,
        mut relationship: Relationship,
    ) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        state.ensure_mutable()?;
        if !is_valid_name(&relationship.name) {
            return Err(CatalogError::InvalidName(relationship.name));
        }
        let entry = state.entry_mut(entity_type)?;
        let qualified = entry.def.qualified_name();
        if entry.relationships.contains_key(&relationship.name) {
            return Err(CatalogError::DuplicateRelationship {
                entity_type: qualified,
                relationship: relationship.name,
            });
        }
        relationship.source = qualified;
        entry
            .relationships
            .insert(relationship.name.clone(), relationship);
        Ok(())
    }

    /// Put a relationship on the type's allow-list.
    ///
    /// Built-in relationship kinds are always traversable; custom ones only
    /// once allowed.
    pub fn allow(&self, entity_type: &str, relationship: &str) -> Result<(), CatalogError> {
        let mut state = self.state.write();
        state.ensure_mutable()?;
        state
            .entry_mut(entity_type)?
            .allowed
            .insert(relationship.to_string());
        Ok(())
    }

    /// Register the URL hook of a type.
    pub fn set_url<F>(&self, entity_type: &str, hook: F) -> Result<(), CatalogError>
    where
        F: Fn(&Entity) -> String + Send + Sync + 'static,
    {
        let mut state = self.state.write();
        state.ensure_mutable()?;
        state.entry_mut(entity_type)?.url = Some(Arc::new(hook));
        Ok(())
    }

    /// Validate every relationship and make the catalog read-only.
    pub fn freeze(&self) -> Result<(), Error> {
        let mut state = self.state.write();
        if state.frozen {
            return Ok(());
        }
        state.validate()?;
        state.frozen = true;
        debug!(types = state.types.len(), "catalog frozen");
        Ok(())
    }

    /// Check if the catalog is frozen.
    pub fn is_frozen(&self) -> bool {
        self.state.read().frozen
    }

    /// Drop registered types and reopen the catalog.
    ///
    /// Pinned types survive unless `force` is set. The built-in aggregate type
    /// is always present afterwards.
    pub fn reset(&self, force: bool) {
        let mut state = self.state.write();
        if force {
            state.types.clear();
        } else {
            state.types.retain(|_, entry| entry.def.pinned);
        }
        if !state.types.contains_key(AGGREGATE_TYPE) {
            state.types.insert(
                AGGREGATE_TYPE.to_string(),
                TypeEntry::new(aggregate_type()),
            );
        }
        state.rebuild_shortcuts();
        state.frozen = false;
        debug!(force, remaining = state.types.len(), "catalog reset");
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve a qualified name or unique shortcut to its type.
    pub fn resolve_type(&self, name: &str) -> Result<EntityType, Error> {
        Ok(self.state.read().entry(name)?.def.clone())
    }

    /// Resolve a qualified name or unique shortcut to the qualified name.
    pub fn qualify(&self, name: &str) -> Result<String, Error> {
        Ok(self.state.read().qualify(name)?.to_string())
    }

    /// Resolve a relationship declared on a type.
    pub fn resolve_relationship(&self, entity_type: &str, name: &str) -> Result<Relationship, Error> {
        let state = self.state.read();
        let entry = state.entry(entity_type)?;
        entry
            .relationships
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownRelationship {
                entity_type: entry.def.qualified_name(),
                relationship: name.to_string(),
            })
    }

    /// Check if a relationship may be traversed.
    pub fn is_allowed(&self, entity_type: &str, relationship: &str) -> bool {
        let state = self.state.read();
        let Ok(entry) = state.entry(entity_type) else {
            return false;
        };
        match entry.relationships.get(relationship) {
            Some(rel) if rel.kind.is_custom() => entry.allowed.contains(relationship),
            Some(_) => true,
            None => false,
        }
    }

    // =========================================================================
    // Projection
    // =========================================================================

    /// Exposed field names of a type; empty for unknown types.
    pub fn field_names(&self, entity_type: &str) -> Vec<String> {
        self.state
            .read()
            .entry(entity_type)
            .map(|entry| entry.def.fields.clone())
            .unwrap_or_default()
    }

    /// Field value of an entity, `Value::Null` when absent.
    pub fn get_value(&self, entity: &Entity, field: &str) -> Value {
        entity.get(field).unwrap_or(Value::Null)
    }

    /// URL of an entity, if its type has a URL hook.
    pub fn get_url(&self, entity_type: &str, entity: &Entity) -> Option<String> {
        let hook = self.state.read().entry(entity_type).ok()?.url.clone()?;
        Some(hook(entity))
    }

    /// Bare name when it resolves unambiguously, else the qualified name.
    pub fn display_name(&self, qualified: &str) -> String {
        let state = self.state.read();
        match state.types.get(qualified) {
            Some(entry) if state.qualify(&entry.def.name).is_ok() => entry.def.name.clone(),
            _ => qualified.to_string(),
        }
    }

    /// Qualified names of all registered types, sorted.
    pub fn type_names(&self) -> Vec<String> {
        self.state.read().types.keys().cloned().collect()
    }
}

fn aggregate_type() -> EntityType {
    EntityType::new("trellis", "Aggregate")
        .with_fields(["id", "value"])
        .pinned()
}
