//! Operator emitters.
//!
//! Each supported operator contributes a `Snippet`: the runtime headers
//! it needs, the statements it adds to the model function body, and an
//! optional weight array. The composer stitches snippets into complete
//! files. Emitters are looked up polymorphically by op type, so adding
//! an operator means registering an emitter, not editing a switch.

pub mod composer;
pub mod ops;

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CompileError, CompileResult};
use crate::ir::{ElementType, Graph, NodeId, OpNode, TensorInfo};

pub use composer::{Artifacts, Composer};

// ─── Snippets ──────────────────────────────────────────────────────

/// What one node contributes to the generated source.
#[derive(Debug, Clone, Default)]
pub struct Snippet {
    /// Runtime includes this operator needs.
    pub headers: Vec<String>,
    /// Statements for the model function body, one per line, unindented.
    pub exec: String,
    /// A weight array definition, placed per the composer's policy.
    pub weight: Option<String>,
}

impl Snippet {
    pub fn statement(exec: String) -> Self {
        Self {
            headers: Vec::new(),
            exec,
            weight: None,
        }
    }

    pub fn with_header(mut self, header: &str) -> Self {
        self.headers.push(header.to_string());
        self
    }

    pub fn with_weight(mut self, weight: String) -> Self {
        self.weight = Some(weight);
        self
    }
}

// ─── Emit Context ──────────────────────────────────────────────────

/// Read-only view an emitter gets of its node and the graph around it.
pub struct EmitContext<'g> {
    graph: &'g Graph,
    id: NodeId,
}

impl<'g> EmitContext<'g> {
    pub(crate) fn new(graph: &'g Graph, id: NodeId) -> Self {
        Self { graph, id }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn node(&self) -> &'g OpNode {
        self.graph.node(self.id)
    }

    /// The tensor feeding input `position`.
    pub fn input(&self, position: usize) -> CompileResult<&'g TensorInfo> {
        let node = self.node();
        let r = node.inputs.get(position).ok_or_else(|| {
            CompileError::InvariantViolation {
                detail: format!(
                    "`{}` ({}) has {} input(s), emitter expected at least {}",
                    node.name,
                    node.op_type,
                    node.inputs.len(),
                    position + 1
                ),
            }
        })?;
        Ok(self.graph.tensor(*r))
    }

    pub fn inputs(&self) -> Vec<&'g TensorInfo> {
        self.node()
            .inputs
            .iter()
            .map(|r| self.graph.tensor(*r))
            .collect()
    }

    pub fn output(&self, slot: usize) -> CompileResult<&'g TensorInfo> {
        let node = self.node();
        node.outputs
            .get(slot)
            .ok_or_else(|| CompileError::InvariantViolation {
                detail: format!(
                    "`{}` ({}) has {} output(s), emitter expected at least {}",
                    node.name,
                    node.op_type,
                    node.outputs.len(),
                    slot + 1
                ),
            })
    }

    /// The static shape of output `slot`, for emitters that require one.
    pub fn require_shape(&self, slot: usize) -> CompileResult<&'g [usize]> {
        let tensor = self.output(slot)?;
        tensor
            .shape
            .as_deref()
            .ok_or_else(|| CompileError::MissingTensorShape {
                tensor: tensor.name.clone(),
            })
    }

    /// Render the registration of output `slot`: a runtime-allocated
    /// tensor under its canonical name, with the planned reference count
    /// when the planner has run. Quantized (u8) tensors register as
    /// range-tracking tensors.
    pub fn register_output(&self, slot: usize) -> CompileResult<String> {
        let tensor = self.output(slot)?;
        let shape = match &tensor.shape {
            Some(dims) => format!("({{ {} }})", join_dims(dims)),
            None => "()".to_string(),
        };
        let ctor = match tensor.dtype {
            ElementType::U8 => format!("new QuantizedRamTensor<uint8_t>{shape}"),
            other => format!("new RamTensor<{}>{shape}", other.c_name()),
        };
        Ok(add_statement(&ctor, &tensor.name, tensor.ref_count()))
    }

    /// Render the `ctx.push` of this node: the operator expression plus
    /// its input and output tensor name lists.
    pub fn push_statement(&self, op_expr: &str) -> String {
        let node = self.node();
        let ins = quoted_names(node.inputs.iter().map(|r| self.graph.tensor(*r).name.as_str()));
        let outs = quoted_names(node.outputs.iter().map(|t| t.name.as_str()));
        format!("ctx.push({op_expr}, {ins}, {outs});")
    }
}

/// `ctx.add(<expr>, "<name>"[, <count>]);`
pub(crate) fn add_statement(expr: &str, name: &str, ref_count: Option<i64>) -> String {
    match ref_count {
        Some(rc) => format!("ctx.add({expr}, \"{name}\", {rc});"),
        None => format!("ctx.add({expr}, \"{name}\");"),
    }
}

fn quoted_names<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let quoted: Vec<String> = names.map(|n| format!("\"{n}\"")).collect();
    format!("{{ {} }}", quoted.join(", "))
}

pub(crate) fn join_dims(dims: &[usize]) -> String {
    dims.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Turn a tensor or node name into a C identifier. Non-alphanumeric
/// characters collapse to `_`; a leading digit gets a `t_` prefix.
pub fn sanitize_identifier(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out.insert_str(0, "t_");
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

// ─── Emitter Trait + Registry ──────────────────────────────────────

/// One operator's source emitter.
pub trait OpEmitter: Send + Sync {
    fn op_type(&self) -> &'static str;
    fn emit(&self, cx: &EmitContext) -> CompileResult<Snippet>;
}

impl fmt::Debug for dyn OpEmitter + '_ {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpEmitter")
            .field("op_type", &self.op_type())
            .finish()
    }
}

/// Op type to emitter table. Built-ins are pre-registered; registering
/// under an existing op type replaces the built-in.
pub struct EmitterRegistry {
    emitters: BTreeMap<String, Box<dyn OpEmitter>>,
}

impl EmitterRegistry {
    pub fn empty() -> Self {
        Self {
            emitters: BTreeMap::new(),
        }
    }

    /// Registry with every built-in operator emitter.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        for emitter in ops::builtins() {
            registry.register(emitter);
        }
        registry
    }

    pub fn register(&mut self, emitter: Box<dyn OpEmitter>) {
        self.emitters.insert(emitter.op_type().to_string(), emitter);
    }

    pub fn lookup(&self, op_type: &str) -> Option<&dyn OpEmitter> {
        self.emitters.get(op_type).map(|e| e.as_ref())
    }

    /// Lookup for a concrete node, reporting a miss as the unsupported
    /// operator it is.
    pub(crate) fn require(&self, graph: &Graph, id: NodeId) -> CompileResult<&dyn OpEmitter> {
        let node = graph.node(id);
        self.lookup(&node.op_type)
            .ok_or_else(|| CompileError::UnsupportedOperator {
                op_type: node.op_type.clone(),
                node: node.name.clone(),
            })
    }

    pub fn op_types(&self) -> Vec<&str> {
        self.emitters.keys().map(|k| k.as_str()).collect()
    }
}

impl Default for EmitterRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
