//! Reference-count memory planning.
//!
//! The target runtime has no allocator to trust, so buffers are released
//! deterministically: each tensor carries the number of consuming edges
//! it has, and the runtime decrements on every read, freeing at zero.
//! One input slot is one edge; a node reading the same tensor in two
//! slots contributes two. Terminal outputs with no consumers get zero
//! and outlive the graph. Graph inputs are planned like any producer.

use std::collections::{BTreeMap, BTreeSet};

use super::{PassConfig, Transform};
use crate::error::CompileResult;
use crate::ir::{AttrValue, Graph, NodeId, TensorRef, REF_COUNT_ATTR};

pub struct RefCount;

impl Transform for RefCount {
    fn name(&self) -> &'static str {
        "refcount"
    }

    fn describe(&self) -> &'static str {
        "plan per-tensor reference counts for deterministic buffer release"
    }

    fn apply(&self, graph: Graph, _cfg: &PassConfig) -> CompileResult<Graph> {
        let live: BTreeSet<NodeId> = graph.topo_order().iter().copied().collect();
        let mut counts: BTreeMap<TensorRef, i64> = BTreeMap::new();
        for &id in graph.topo_order() {
            for input in &graph.node(id).inputs {
                *counts.entry(*input).or_insert(0) += 1;
            }
        }

        Ok(graph.map_nodes(|id, node| {
            if !live.contains(&id) {
                return;
            }
            for (slot, tensor) in node.outputs.iter_mut().enumerate() {
                let count = counts
                    .get(&TensorRef::new(id, slot as u16))
                    .copied()
                    .unwrap_or(0);
                tensor
                    .attrs
                    .insert(REF_COUNT_ATTR.to_string(), AttrValue::Int(count));
            }
        }))
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
