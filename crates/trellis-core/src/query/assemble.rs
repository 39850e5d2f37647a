//! Result assembly.

use std::collections::{HashMap, HashSet};

use trellis_proto::{EntityId, FieldValue, ResultNode, ResultTree};

use super::executor::Arena;
use crate::catalog::Catalog;
use crate::config::EngineConfig;
use crate::entity::{Entity, EntityKey};
use crate::error::Error;
use crate::store::Store;

/// Fold the arena into a result tree.
///
/// With materialization on, full rows for every live stored entity are
/// re-loaded first, one batched `load` per entity type. Virtual entities are
/// projected as they are.
pub(crate) fn assemble(
    catalog: &Catalog,
    store: &dyn Store,
    config: &EngineConfig,
    arena: &Arena,
) -> Result<ResultTree, Error> {
    let mut live = Vec::new();
    for root in arena.live_roots() {
        collect_live(arena, root, &mut live);
    }

    let mut full: HashMap<EntityKey, Entity> = HashMap::new();
    if config.materialize {
        // Types in first-appearance order, ids in first-appearance order per type.
        let mut order: Vec<&str> = Vec::new();
        let mut wanted: HashMap<&str, (Vec<EntityId>, HashSet<&EntityId>)> = HashMap::new();
        for &idx in &live {
            let Some(row) = arena.nodes[idx].entity.as_row() else {
                continue;
            };
            let (ids, seen) = wanted.entry(row.entity_type.as_str()).or_insert_with(|| {
                order.push(row.entity_type.as_str());
                (Vec::new(), HashSet::new())
            });
            if seen.insert(&row.id) {
                ids.push(row.id.clone());
            }
        }
        for entity_type in order {
            let Some((ids, _)) = wanted.remove(entity_type) else {
                continue;
            };
            for row in store.load(entity_type, &ids)? {
                let entity = Entity::Row(row);
                full.insert(entity.key(), entity);
            }
        }
    }

    let roots = arena
        .live_roots()
        .map(|idx| build_node(catalog, arena, &full, idx))
        .collect();
    Ok(ResultTree::new(roots))
}

fn collect_live(arena: &Arena, idx: usize, out: &mut Vec<usize>) {
    out.push(idx);
    for &child in &arena.nodes[idx].children {
        if arena.nodes[child].alive {
            collect_live(arena, child, out);
        }
    }
}

fn build_node(
    catalog: &Catalog,
    arena: &Arena,
    full: &HashMap<EntityKey, Entity>,
    idx: usize,
) -> ResultNode {
    let node = &arena.nodes[idx];
    let entity = full.get(&node.entity.key()).unwrap_or(&node.entity);
    let entity_type = entity.entity_type();

    let mut out = ResultNode::new(catalog.display_name(entity_type), entity.id());
    out.url = catalog.get_url(entity_type, entity);
    out.fields = catalog
        .field_names(entity_type)
        .into_iter()
        .map(|name| {
            let value = catalog.get_value(entity, &name);
            FieldValue::new(name, value)
        })
        .collect();
    out.via = node.via.clone();
    out.children = node
        .children
        .iter()
        .filter(|&&child| arena.nodes[child].alive)
        .map(|&child| build_node(catalog, arena, full, child))
        .collect();
    out
}
