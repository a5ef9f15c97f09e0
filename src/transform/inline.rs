//! Constant inlining.
//!
//! Retags `Const` nodes as `Inline`, which moves their payloads from
//! runtime tensor construction into the generated weight section.

use super::{PassConfig, Transform};
use crate::error::{CompileError, CompileResult};
use crate::ir::Graph;

pub struct Inline;

impl Transform for Inline {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn describe(&self) -> &'static str {
        "place constant payloads in the generated weight section"
    }

    fn apply(&self, graph: Graph, _cfg: &PassConfig) -> CompileResult<Graph> {
        for (_, node) in graph.nodes() {
            if node.op_type == "Const" && node.const_payload().is_none() {
                return Err(CompileError::MissingConstantData {
                    node: node.name.clone(),
                });
            }
        }
        Ok(graph.map_nodes(|_, node| {
            if node.op_type == "Const" {
                node.op_type = "Inline".to_string();
            }
        }))
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
