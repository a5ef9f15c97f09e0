//! Deterministic execution ordering.
//!
//! Three-color depth-first traversal seeded from the declared terminals,
//! in declaration order. Nodes land in post-order, so every producer
//! precedes its consumers; within a node, inputs are expanded in slot
//! order. Ties are therefore broken by terminal declaration first and
//! input position second, making the order a pure function of graph
//! construction. Nodes unreachable from any terminal are left out.

use super::{Graph, NodeId};
use crate::error::{CompileError, CompileResult};

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    White,
    Gray,
    Black,
}

/// Compute the execution order for a graph.
pub fn order(graph: &Graph) -> CompileResult<Vec<NodeId>> {
    let mut marks = vec![Mark::White; graph.len()];
    let mut out = Vec::with_capacity(graph.len());

    for &terminal in graph.terminals() {
        visit(graph, terminal, &mut marks, &mut out)?;
    }
    Ok(out)
}

/// Depth-first walk with an explicit stack. Each frame is a node plus the
/// next input edge to expand; a node is finished (Black, appended) once
/// all its inputs are. Re-entering a Gray node is a back edge.
fn visit(
    graph: &Graph,
    root: NodeId,
    marks: &mut [Mark],
    out: &mut Vec<NodeId>,
) -> CompileResult<()> {
    if marks[root.index()] == Mark::Black {
        return Ok(());
    }
    marks[root.index()] = Mark::Gray;
    let mut stack: Vec<(NodeId, usize)> = vec![(root, 0)];

    while let Some((id, edge)) = stack.pop() {
        let node = graph.node(id);
        if edge < node.inputs.len() {
            stack.push((id, edge + 1));
            let input = node.inputs[edge];
            let dep = input.producer;
            if dep.index() >= graph.len() {
                return Err(CompileError::DanglingReference {
                    node: node.name.clone(),
                    reference: format!("{}:{}", dep, input.slot),
                });
            }
            match marks[dep.index()] {
                Mark::White => {
                    marks[dep.index()] = Mark::Gray;
                    stack.push((dep, 0));
                }
                Mark::Gray => {
                    return Err(CompileError::Cycle {
                        node: graph.node(dep).name.clone(),
                    })
                }
                Mark::Black => {}
            }
        } else {
            marks[id.index()] = Mark::Black;
            out.push(id);
        }
    }
    Ok(())
}

// ─── Tests ─────────────────────────────────────────────────────────
