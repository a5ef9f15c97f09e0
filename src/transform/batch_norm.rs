//! Batch-norm fusion placeholder.
//!
//! Folding batch normalization into the preceding convolution or matmul
//! needs verified fused-kernel semantics on the runtime side, which do
//! not exist yet. Until they do, this pass is a registered no-op: it
//! warns and returns the graph unchanged, so pass lists naming it keep
//! working without silently altering numerics.

use super::{PassConfig, Transform};
use crate::error::CompileResult;
use crate::ir::Graph;

pub struct BatchNorm;

impl Transform for BatchNorm {
    fn name(&self) -> &'static str {
        "batch_norm"
    }

    fn describe(&self) -> &'static str {
        "fuse batch normalization (not implemented; leaves the graph unchanged)"
    }

    fn apply(&self, graph: Graph, _cfg: &PassConfig) -> CompileResult<Graph> {
        log::warn!("batch_norm: fusion not implemented, graph unchanged");
        Ok(graph)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
