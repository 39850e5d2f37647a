//! Traversal engine: executes one step as a single batched fetch.
//!
//! Every call to [`TraversalEngine::execute_step`] issues at most one
//! [`Store`] call, whatever the number of inputs, and pairs each output with
//! the id of the input that produced it. Empty inputs cost no fetch at all.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use tracing::{debug, warn};
use trellis_proto::{EntityId, FilterSpec, SourceKey};

use super::plan::{HopPlan, RepeatMode};
use super::refine::Refinements;
use crate::catalog::{Catalog, RelationKind, Relationship};
use crate::config::EngineConfig;
use crate::entity::{Entity, EntityKey, EntityRow};
use crate::error::Error;
use crate::store::Store;

/// One traversal output paired with its source key.
#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    /// The produced entity.
    pub target: Entity,
    /// Id of the input entity that produced it.
    pub source: SourceKey,
}

impl Edge {
    /// Create an edge.
    pub fn new(target: Entity, source: SourceKey) -> Self {
        Self { target, source }
    }
}

/// What a custom relationship sees while it traverses.
pub struct StepContext<'a> {
    engine: &'a TraversalEngine<'a>,
    refinements: &'a Refinements,
    relationship: &'a Relationship,
}

impl<'a> StepContext<'a> {
    /// The backing store.
    pub fn store(&self) -> &'a dyn Store {
        self.engine.store
    }

    /// The catalog.
    pub fn catalog(&self) -> &'a Catalog {
        self.engine.catalog
    }

    /// The relationship being traversed.
    pub fn relationship(&self) -> &'a Relationship {
        self.relationship
    }

    /// Qualified name of a type.
    pub fn qualify(&self, name: &str) -> Result<String, Error> {
        self.engine.catalog.qualify(name)
    }

    /// Apply the step's filters to paired outputs.
    pub fn apply_filters(&self, edges: Vec<Edge>) -> Result<Vec<Edge>, Error> {
        Ok(self.refinements.apply(edges))
    }

    /// Traverse another relationship from the same inputs with this step's
    /// filters, as one batched fetch.
    pub fn traverse(&self, inputs: &[Entity], relationship: &Relationship) -> Result<Vec<Edge>, Error> {
        self.engine
            .execute_refined(inputs, relationship, self.refinements)
    }
}

/// Executes traversal steps against a store.
pub struct TraversalEngine<'a> {
    catalog: &'a Catalog,
    store: &'a dyn Store,
    config: EngineConfig,
}

impl<'a> TraversalEngine<'a> {
    /// Create an engine.
    pub fn new(catalog: &'a Catalog, store: &'a dyn Store, config: EngineConfig) -> Self {
        Self {
            catalog,
            store,
            config,
        }
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Traverse `relationship` from every input at once.
    ///
    /// Filters are compiled before anything is fetched, so a malformed filter
    /// fails without touching the store.
    pub fn execute_step(
        &self,
        inputs: &[Entity],
        relationship: &Relationship,
        filters: &[FilterSpec],
    ) -> Result<Vec<Edge>, Error> {
        let refinements = Refinements::compile(filters)?;
        self.execute_refined(inputs, relationship, &refinements)
    }

    /// Traverse with already compiled refinements.
    pub fn execute_refined(
        &self,
        inputs: &[Entity],
        relationship: &Relationship,
        refinements: &Refinements,
    ) -> Result<Vec<Edge>, Error> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let started = Instant::now();

        let edges = match &relationship.kind {
            RelationKind::ForwardSingle { foreign_key } => {
                let target = self.catalog.qualify(&relationship.target)?;
                let pointers: Vec<(EntityId, EntityId)> = inputs
                    .iter()
                    .filter_map(|input| {
                        let fk = input.get(foreign_key)?;
                        Some((input.id(), EntityId::from_value(&fk)?))
                    })
                    .collect();
                let ids = distinct(pointers.iter().map(|(_, fk)| fk.clone()));
                if ids.is_empty() {
                    Vec::new()
                } else {
                    let rows: HashMap<EntityId, Entity> = self
                        .store
                        .load(&target, &ids)?
                        .into_iter()
                        .map(Entity::Row)
                        .filter(|e| refinements.keeps(e))
                        .map(|e| (e.id(), e))
                        .collect();
                    let edges = pointers
                        .into_iter()
                        .filter_map(|(source, fk)| {
                            rows.get(&fk).map(|row| Edge::new(row.clone(), source))
                        })
                        .collect();
                    refinements.finish(edges)
                }
            }
            RelationKind::ReverseSingle { foreign_key }
            | RelationKind::ReverseMulti { foreign_key } => {
                let target = self.catalog.qualify(&relationship.target)?;
                let ids = distinct(inputs.iter().map(Entity::id));
                let rows = self.store.fetch_by_column(&target, foreign_key, &ids)?;
                let mut edges = Vec::with_capacity(rows.len());
                for row in rows {
                    let source = row
                        .get(foreign_key)
                        .and_then(|v| EntityId::from_value(&v))
                        .ok_or_else(|| unresolved(relationship, &row))?;
                    let entity = Entity::Row(row);
                    if refinements.keeps(&entity) {
                        edges.push(Edge::new(entity, source));
                    }
                }
                refinements.finish(edges)
            }
            RelationKind::ForwardMulti { association } => {
                let target = self.catalog.qualify(&relationship.target)?;
                let ids = distinct(inputs.iter().map(Entity::id));
                let edges = self
                    .store
                    .fetch_through(&target, association, &ids)?
                    .into_iter()
                    .map(|(row, own)| Edge::new(Entity::Row(row), own))
                    .filter(|edge| refinements.keeps(&edge.target))
                    .collect();
                refinements.finish(edges)
            }
            RelationKind::Custom(custom) => {
                let ctx = StepContext {
                    engine: self,
                    refinements,
                    relationship,
                };
                custom.traverse(inputs, &ctx)?
            }
        };

        let known: HashSet<EntityId> = inputs.iter().map(Entity::id).collect();
        if let Some(stray) = edges.iter().find(|e| !known.contains(&e.source)) {
            return Err(Error::UnresolvedSource {
                relationship: relationship.label(),
                entity: format!("{}({})", stray.target.entity_type(), stray.target.id()),
            });
        }

        let budget = self.config.budget.max_edges_per_step;
        if edges.len() > budget {
            return Err(Error::BudgetExceeded(format!(
                "'{}' produced {} edges, limit is {}",
                relationship.label(),
                edges.len(),
                budget
            )));
        }

        let elapsed = started.elapsed();
        debug!(
            relationship = %relationship.label(),
            kind = relationship.kind.name(),
            inputs = inputs.len(),
            outputs = edges.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "executed step"
        );
        if elapsed > self.config.slow_step_threshold {
            warn!(
                relationship = %relationship.label(),
                inputs = inputs.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow traversal step"
            );
        }
        Ok(edges)
    }

    /// Execute a hop, honoring its recursion mode.
    ///
    /// Output source keys always name the input the hop started from.
    pub fn execute_hop(&self, inputs: &[Entity], hop: &HopPlan) -> Result<Vec<Edge>, Error> {
        match hop.repeat {
            RepeatMode::Once => self.execute_refined(inputs, &hop.relationship, &hop.refinements),
            RepeatMode::ZeroOrOne => {
                let mut seen: HashSet<(SourceKey, EntityKey)> = HashSet::new();
                let mut out = Vec::new();
                for input in inputs {
                    if seen.insert((input.id(), input.key())) {
                        out.push(Edge::new(input.clone(), input.id()));
                    }
                }
                for edge in self.execute_refined(inputs, &hop.relationship, &hop.refinements)? {
                    if seen.insert((edge.source.clone(), edge.target.key())) {
                        out.push(edge);
                    }
                }
                Ok(out)
            }
            RepeatMode::Fixpoint => self.execute_fixpoint(inputs, hop),
        }
    }

    /// Repeat a hop until a round yields nothing new for any root.
    ///
    /// Each round is one batched fetch over the distinct frontier entities.
    /// The visited set is scoped to this call and keyed by (root, entity), so
    /// cycles terminate and each root reaches an entity at most once.
    fn execute_fixpoint(&self, inputs: &[Entity], hop: &HopPlan) -> Result<Vec<Edge>, Error> {
        let max_rounds = self.config.budget.max_recursion_rounds;
        let mut visited: HashSet<(SourceKey, EntityKey)> = HashSet::new();
        let mut frontier: Vec<(SourceKey, Entity)> =
            inputs.iter().map(|e| (e.id(), e.clone())).collect();
        let mut out = Vec::new();
        let mut rounds = 0;

        while !frontier.is_empty() {
            rounds += 1;
            if rounds > max_rounds {
                return Err(Error::BudgetExceeded(format!(
                    "'{}' did not reach a fixpoint within {} rounds",
                    hop.label, max_rounds
                )));
            }

            let (step_inputs, roots) = group_frontier(frontier);
            let edges = self.execute_refined(&step_inputs, &hop.relationship, &hop.refinements)?;

            let mut next = Vec::new();
            for edge in edges {
                let Some(edge_roots) = roots.get(&edge.source) else {
                    continue;
                };
                for root in edge_roots {
                    if visited.insert((root.clone(), edge.target.key())) {
                        out.push(Edge::new(edge.target.clone(), root.clone()));
                        next.push((root.clone(), edge.target.clone()));
                    }
                }
            }
            frontier = next;
        }

        debug!(hop = %hop.label, rounds, outputs = out.len(), "recursive hop reached fixpoint");
        Ok(out)
    }

    /// Execute a chain of hops, composing source keys back to the chain's
    /// inputs. Each (input, output) pair appears once.
    pub fn execute_chain(&self, inputs: &[Entity], hops: &[HopPlan]) -> Result<Vec<Edge>, Error> {
        let mut frontier: Vec<(SourceKey, Entity)> =
            inputs.iter().map(|e| (e.id(), e.clone())).collect();
        for hop in hops {
            let (step_inputs, roots) = group_frontier(frontier);
            let edges = self.execute_hop(&step_inputs, hop)?;

            let mut seen: HashSet<(SourceKey, EntityKey)> = HashSet::new();
            let mut next = Vec::new();
            for edge in edges {
                let Some(edge_roots) = roots.get(&edge.source) else {
                    continue;
                };
                for root in edge_roots {
                    if seen.insert((root.clone(), edge.target.key())) {
                        next.push((root.clone(), edge.target.clone()));
                    }
                }
            }
            frontier = next;
        }
        Ok(frontier
            .into_iter()
            .map(|(root, target)| Edge::new(target, root))
            .collect())
    }
}

/// Split a (root, entity) frontier into distinct step inputs and, per input
/// id, the roots that reached it.
fn group_frontier(frontier: Vec<(SourceKey, Entity)>) -> (Vec<Entity>, HashMap<EntityId, Vec<SourceKey>>) {
    let mut inputs = Vec::new();
    let mut roots: HashMap<EntityId, Vec<SourceKey>> = HashMap::new();
    let mut seen: HashSet<(EntityId, SourceKey)> = HashSet::new();
    for (root, entity) in frontier {
        let id = entity.id();
        if !seen.insert((id.clone(), root.clone())) {
            continue;
        }
        roots
            .entry(id)
            .or_insert_with(|| {
                inputs.push(entity);
                Vec::new()
            })
            .push(root);
    }
    (inputs, roots)
}

fn distinct(ids: impl Iterator<Item = EntityId>) -> Vec<EntityId> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(id.clone())).collect()
}

fn unresolved(relationship: &Relationship, row: &EntityRow) -> Error {
    Error::UnresolvedSource {
        relationship: relationship.label(),
        entity: format!("{}({})", row.entity_type, row.id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Association, EntityType};
    use crate::config::FanoutBudget;
    use crate::store::{MemoryStore, MeteredStore};
    use pretty_assertions::assert_eq;
    use trellis_proto::Value;

    fn catalog() -> Catalog {
        let catalog = Catalog::new();
        catalog.register(EntityType::new("t", "Blog")).unwrap();
        catalog.register(EntityType::new("t", "Entry")).unwrap();
        catalog.register(EntityType::new("t", "Author")).unwrap();
        catalog.freeze().unwrap();
        catalog
    }

    fn store() -> MeteredStore<MemoryStore> {
        let store = MemoryStore::new();
        for b in 1..=2 {
            store.insert(EntityRow::new("t__Blog", b));
        }
        for (e, b, rating) in [(10, 1, 5), (11, 1, 2), (12, 2, 4)] {
            store.insert(
                EntityRow::new("t__Entry", e)
                    .with_field("blog_id", b)
                    .with_field("rating", rating),
            );
        }
        store.insert(EntityRow::new("t__Author", 100));
        store.insert_link("t__Entry_authors", ("entry_id", 10), ("author_id", 100));
        store.insert_link("t__Entry_authors", ("entry_id", 12), ("author_id", 100));
        MeteredStore::new(store)
    }

    fn rows(ty: &str, ids: &[i64]) -> Vec<Entity> {
        ids.iter().map(|i| EntityRow::new(ty, *i).into()).collect()
    }

    fn pairs(edges: &[Edge]) -> Vec<(EntityId, EntityId)> {
        edges
            .iter()
            .map(|e| (e.source.clone(), e.target.id()))
            .collect()
    }

    #[test]
    fn test_empty_input_skips_fetch() {
        let catalog = catalog();
        let store = store();
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let rel = Relationship::reverse_multi("entry_set", "Entry", "blog_id");
        assert!(engine.execute_step(&[], &rel, &[]).unwrap().is_empty());
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn test_reverse_multi_pairs_by_foreign_key() {
        let catalog = catalog();
        let store = store();
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let rel = Relationship::reverse_multi("entry_set", "Entry", "blog_id");
        let edges = engine.execute_step(&rows("t__Blog", &[1, 2]), &rel, &[]).unwrap();
        assert_eq!(
            pairs(&edges),
            vec![
                (EntityId::Int(1), EntityId::Int(10)),
                (EntityId::Int(1), EntityId::Int(11)),
                (EntityId::Int(2), EntityId::Int(12)),
            ]
        );
        assert_eq!(store.column_calls(), 1);
    }

    #[test]
    fn test_forward_single_shares_targets() {
        let catalog = catalog();
        let store = store();
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let rel = Relationship::forward_single("blog", "Blog", "blog_id");
        let inputs = vec![
            EntityRow::new("t__Entry", 10).with_field("blog_id", 1).into(),
            EntityRow::new("t__Entry", 11).with_field("blog_id", 1).into(),
            EntityRow::new("t__Entry", 13).with_field("blog_id", Value::Null).into(),
        ];
        let edges = engine.execute_step(&inputs, &rel, &[]).unwrap();
        assert_eq!(
            pairs(&edges),
            vec![
                (EntityId::Int(10), EntityId::Int(1)),
                (EntityId::Int(11), EntityId::Int(1)),
            ]
        );
        assert_eq!(store.load_calls(), 1);
    }

    #[test]
    fn test_forward_single_without_keys_skips_fetch() {
        let catalog = catalog();
        let store = store();
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let rel = Relationship::forward_single("blog", "Blog", "blog_id");
        let edges = engine.execute_step(&rows("t__Entry", &[10]), &rel, &[]).unwrap();
        assert!(edges.is_empty());
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn test_through_association_with_filter() {
        let catalog = catalog();
        let store = store();
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let rel = Relationship::many_to_many(
            "entry_set",
            "Entry",
            Association::new("t__Entry_authors", "author_id", "entry_id"),
        );
        let filters = [FilterSpec::filter([("rating__gte", Value::Int(5))])];
        let edges = engine
            .execute_step(&rows("t__Author", &[100]), &rel, &filters)
            .unwrap();
        assert_eq!(pairs(&edges), vec![(EntityId::Int(100), EntityId::Int(10))]);
        assert_eq!(store.through_calls(), 1);
    }

    #[test]
    fn test_malformed_filter_fails_before_fetch() {
        let catalog = catalog();
        let store = store();
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let rel = Relationship::reverse_multi("entry_set", "Entry", "blog_id");
        let err = engine
            .execute_step(&rows("t__Blog", &[1]), &rel, &[FilterSpec::bare("median")])
            .unwrap_err();
        assert!(matches!(err, Error::MalformedFilter(_)));
        assert_eq!(store.calls(), 0);
    }

    #[test]
    fn test_custom_output_must_pair_with_an_input() {
        let catalog = catalog();
        let store = store();
        let engine = TraversalEngine::new(&catalog, &store, EngineConfig::default());
        let rel = Relationship::custom("stray", "Entry", |_, _| {
            Ok(vec![Edge::new(
                EntityRow::new("t__Entry", 10).into(),
                EntityId::Int(999),
            )])
        });
        let err = engine
            .execute_step(&rows("t__Blog", &[1]), &rel, &[])
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedSource { .. }));
    }

    #[test]
    fn test_edge_budget() {
        let catalog = catalog();
        let store = store();
        let config = EngineConfig::default().with_budget(FanoutBudget::new(1, 100, 10));
        let engine = TraversalEngine::new(&catalog, &store, config);
        let rel = Relationship::reverse_multi("entry_set", "Entry", "blog_id");
        let err = engine
            .execute_step(&rows("t__Blog", &[1]), &rel, &[])
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExceeded(_)));
    }

    #[test]
    fn test_group_frontier() {
        let a: Entity = EntityRow::new("t__Blog", 1).into();
        let b: Entity = EntityRow::new("t__Blog", 2).into();
        let (inputs, roots) = group_frontier(vec![
            (EntityId::Int(7), a.clone()),
            (EntityId::Int(8), a.clone()),
            (EntityId::Int(7), a),
            (EntityId::Int(7), b),
        ]);
        assert_eq!(inputs.len(), 2);
        assert_eq!(roots[&EntityId::Int(1)], vec![EntityId::Int(7), EntityId::Int(8)]);
        assert_eq!(roots[&EntityId::Int(2)], vec![EntityId::Int(7)]);
    }

    #[test]
    fn test_group_frontier_with_many_converging_roots() {
        let shared: Entity = EntityRow::new("t__Author", 100).into();
        let frontier: Vec<(SourceKey, Entity)> = (0..5_000i64)
            .flat_map(|root| {
                [
                    (EntityId::Int(root), shared.clone()),
                    (EntityId::Int(root), shared.clone()),
                ]
            })
            .collect();
        let (inputs, roots) = group_frontier(frontier);
        assert_eq!(inputs.len(), 1);
        let reached = &roots[&EntityId::Int(100)];
        assert_eq!(reached.len(), 5_000);
        assert_eq!(reached[..3].to_vec(), vec![EntityId::Int(0), EntityId::Int(1), EntityId::Int(2)]);
    }
}
