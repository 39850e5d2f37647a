//! Query executor: runs a compiled plan step by step.
//!
//! The executor keeps every produced node in an arena, grouped into result
//! levels. A descending step reads the current level and pushes a new one; a
//! join step re-reads the input of the previous descending step and appends to
//! the current level; a sub-query gates the current level in place.

use std::collections::{HashMap, HashSet};

use tracing::debug;
use trellis_lang::Modifier;
use trellis_proto::{EntityId, ResultTree};

use super::assemble::assemble;
use super::engine::{Edge, TraversalEngine};
use super::plan::{BranchPlan, HopPlan, Plan, PlanCompiler, PlanStepKind, SeedSelector};
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::entity::{Entity, EntityKey};
use crate::error::{CatalogError, Error};
use crate::store::Store;

/// A node of the result arena.
#[derive(Debug)]
pub(crate) struct Node {
    pub entity: Entity,
    pub via: Option<String>,
    pub alive: bool,
    pub children: Vec<usize>,
}

/// Result nodes under construction.
pub(crate) struct Arena {
    pub nodes: Vec<Node>,
    levels: Vec<Vec<usize>>,
    cursor: usize,
    prev_input: usize,
    max_nodes: usize,
}

impl Arena {
    fn new(roots: Vec<Entity>, max_nodes: usize) -> Result<Self, Error> {
        let mut arena = Self {
            nodes: Vec::with_capacity(roots.len()),
            levels: vec![Vec::new()],
            cursor: 0,
            prev_input: 0,
            max_nodes,
        };
        for entity in roots {
            let idx = arena.push(entity, None)?;
            arena.levels[0].push(idx);
        }
        Ok(arena)
    }

    /// Indices of the root nodes that survived every gate.
    pub fn live_roots(&self) -> impl Iterator<Item = usize> + '_ {
        self.levels[0]
            .iter()
            .copied()
            .filter(|&i| self.nodes[i].alive)
    }

    fn push(&mut self, entity: Entity, via: Option<String>) -> Result<usize, Error> {
        if self.nodes.len() >= self.max_nodes {
            return Err(Error::BudgetExceeded(format!(
                "result exceeds {} nodes",
                self.max_nodes
            )));
        }
        self.nodes.push(Node {
            entity,
            via,
            alive: true,
            children: Vec::new(),
        });
        Ok(self.nodes.len() - 1)
    }

    /// Distinct live entities of `entity_type` at a level, plus the nodes
    /// holding each of them.
    fn inputs(&self, level: usize, entity_type: &str) -> (Vec<Entity>, HashMap<EntityId, Vec<usize>>) {
        let mut entities = Vec::new();
        let mut holders: HashMap<EntityId, Vec<usize>> = HashMap::new();
        for &idx in &self.levels[level] {
            let node = &self.nodes[idx];
            if !node.alive || node.entity.entity_type() != entity_type {
                continue;
            }
            holders
                .entry(node.entity.id())
                .or_insert_with(|| {
                    entities.push(node.entity.clone());
                    Vec::new()
                })
                .push(idx);
        }
        (entities, holders)
    }

    /// Attach each edge's target under every node holding its source, once
    /// per (parent, target). Returns the new node indices.
    fn attach(
        &mut self,
        edges: Vec<Edge>,
        holders: &HashMap<EntityId, Vec<usize>>,
        via: &str,
    ) -> Result<Vec<usize>, Error> {
        let mut seen: HashSet<(usize, EntityKey)> = HashSet::new();
        let mut created = Vec::new();
        for edge in edges {
            let Some(parents) = holders.get(&edge.source) else {
                continue;
            };
            for &parent in parents {
                if !seen.insert((parent, edge.target.key())) {
                    continue;
                }
                let idx = self.push(edge.target.clone(), Some(via.to_string()))?;
                self.nodes[parent].children.push(idx);
                created.push(idx);
            }
        }
        Ok(created)
    }

    /// Record a descending or join step's output nodes.
    fn land(&mut self, join: bool, created: Vec<usize>) {
        if join {
            self.levels[self.cursor].extend(created);
        } else {
            self.prev_input = self.cursor;
            self.levels.push(created);
            self.cursor = self.levels.len() - 1;
        }
    }

    fn input_level(&self, join: bool) -> usize {
        if join {
            self.prev_input
        } else {
            self.cursor
        }
    }
}

/// Query executor that runs traversal queries against a store.
pub struct QueryExecutor<'a> {
    catalog: &'a Catalog,
    store: &'a dyn Store,
    config: EngineConfig,
}

impl<'a> QueryExecutor<'a> {
    /// Create a new executor with catalog and store references.
    pub fn new(catalog: &'a Catalog, store: &'a dyn Store) -> Self {
        Self {
            catalog,
            store,
            config: EngineConfig::default(),
        }
    }

    /// Use a custom configuration.
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Parse and compile a query without running it.
    pub fn compile(&self, text: &str) -> Result<Plan, Error> {
        if !self.catalog.is_frozen() {
            return Err(CatalogError::NotFrozen.into());
        }
        let query = trellis_lang::parse(text)?;
        PlanCompiler::new(self.catalog).compile(&query)
    }

    /// Run a query, seeding from its object query.
    pub fn run_query(&self, text: &str) -> Result<ResultTree, Error> {
        let plan = self.compile(text)?;
        self.execute_plan(&plan, None)
    }

    /// Run a query over caller-provided seed entities.
    ///
    /// Seeds are narrowed to the object query's type and selector instead of
    /// being fetched.
    pub fn run_query_with_seed(&self, text: &str, seed: &[Entity]) -> Result<ResultTree, Error> {
        let plan = self.compile(text)?;
        self.execute_plan(&plan, Some(seed))
    }

    /// Execute a compiled plan.
    pub fn execute_plan(&self, plan: &Plan, seed: Option<&[Entity]>) -> Result<ResultTree, Error> {
        let engine = TraversalEngine::new(self.catalog, self.store, self.config.clone());
        let roots = self.seed(plan, seed)?;
        debug!(
            entity_type = %plan.seed.entity_type,
            roots = roots.len(),
            steps = plan.steps.len(),
            "running query"
        );
        if roots.is_empty() {
            return Ok(ResultTree::default());
        }

        let mut arena = Arena::new(roots, self.config.budget.max_nodes)?;
        for step in &plan.steps {
            match &step.kind {
                PlanStepKind::Hop(hop) => {
                    let created = run_hop(&engine, &mut arena, step.join, hop)?;
                    arena.land(step.join, created);
                }
                PlanStepKind::Or(branches) => {
                    let mut created = Vec::new();
                    for branch in branches {
                        created.extend(run_branch(&engine, &mut arena, step.join, branch)?);
                    }
                    arena.land(step.join, created);
                }
                PlanStepKind::Sub { modifier, branch } => {
                    run_sub_query(&engine, &mut arena, *modifier, branch)?;
                }
            }
        }

        assemble(self.catalog, self.store, &self.config, &arena)
    }

    fn seed(&self, plan: &Plan, provided: Option<&[Entity]>) -> Result<Vec<Entity>, Error> {
        let entity_type = plan.seed.entity_type.as_str();
        let candidates: Vec<Entity> = match provided {
            Some(entities) => entities
                .iter()
                .filter(|e| e.entity_type() == entity_type)
                .cloned()
                .collect(),
            None => match &plan.seed.selector {
                SeedSelector::Id(id) => self
                    .store
                    .load(entity_type, std::slice::from_ref(id))?
                    .into_iter()
                    .map(Entity::Row)
                    .collect(),
                SeedSelector::Filtered(_) => self
                    .store
                    .scan(entity_type)?
                    .into_iter()
                    .map(Entity::Row)
                    .collect(),
            },
        };

        let mut seen = HashSet::new();
        Ok(candidates
            .into_iter()
            .filter(|e| match &plan.seed.selector {
                SeedSelector::Id(id) => &e.id() == id,
                SeedSelector::Filtered(refinements) => refinements.keeps(e),
            })
            .filter(|e| seen.insert(e.key()))
            .collect())
    }
}

fn run_hop(
    engine: &TraversalEngine<'_>,
    arena: &mut Arena,
    join: bool,
    hop: &HopPlan,
) -> Result<Vec<usize>, Error> {
    let (inputs, holders) = arena.inputs(arena.input_level(join), &hop.source_type);
    let edges = engine.execute_hop(&inputs, hop)?;
    arena.attach(edges, &holders, &hop.label)
}

fn run_branch(
    engine: &TraversalEngine<'_>,
    arena: &mut Arena,
    join: bool,
    branch: &BranchPlan,
) -> Result<Vec<usize>, Error> {
    let (inputs, holders) = arena.inputs(arena.input_level(join), branch.source_type());
    let edges = engine.execute_chain(&inputs, &branch.hops)?;
    arena.attach(edges, &holders, &branch.label)
}

/// Gate the current level by the branch's emptiness per parent, then attach
/// the branch results under the parents that remain.
fn run_sub_query(
    engine: &TraversalEngine<'_>,
    arena: &mut Arena,
    modifier: Modifier,
    branch: &BranchPlan,
) -> Result<(), Error> {
    let (inputs, mut holders) = arena.inputs(arena.cursor, branch.source_type());
    let edges = engine.execute_chain(&inputs, &branch.hops)?;
    let reached: HashSet<&EntityId> = edges.iter().map(|e| &e.source).collect();

    let mut dropped = 0;
    for (id, nodes) in holders.iter_mut() {
        let keep = match modifier {
            Modifier::Required => reached.contains(id),
            Modifier::Excluded => !reached.contains(id),
            Modifier::Optional => true,
        };
        if !keep {
            for &idx in nodes.iter() {
                arena.nodes[idx].alive = false;
            }
            dropped += nodes.len();
            nodes.clear();
        }
    }
    debug!(branch = %branch.label, ?modifier, dropped, "gated sub-query");

    arena.attach(edges, &holders, &branch.label)?;
    Ok(())
}
