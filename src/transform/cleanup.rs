//! Dead attribute and dead node removal.
//!
//! Passes accumulate private working attributes under `_`-prefixed keys;
//! the exporter and emitters must never see them. This pass strips those
//! and drops nodes unreachable from the terminals, compacting the arena.
//! Planned `ref_count` attrs are not underscore-keyed and survive.

use std::collections::{BTreeMap, BTreeSet};

use super::{PassConfig, Transform};
use crate::error::CompileResult;
use crate::ir::{Graph, NodeId};

pub struct Cleanup;

impl Transform for Cleanup {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    fn describe(&self) -> &'static str {
        "strip private working attributes and drop unreachable nodes"
    }

    fn apply(&self, graph: Graph, _cfg: &PassConfig) -> CompileResult<Graph> {
        let graph = graph.map_nodes(|_, node| {
            node.attrs.retain(|k, _| !k.starts_with('_'));
            for tensor in &mut node.outputs {
                tensor.attrs.retain(|k, _| !k.starts_with('_'));
            }
        });

        let live: BTreeSet<NodeId> = graph.topo_order().iter().copied().collect();
        if live.len() == graph.len() {
            return Ok(graph);
        }
        log::info!(
            "cleanup: dropping {} unreachable node(s)",
            graph.len() - live.len()
        );
        graph.retain_nodes(&live, &BTreeMap::new())
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
