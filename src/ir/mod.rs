//! Graph intermediate representation for inference models.
//!
//! A model is a flat arena of operation nodes. Every tensor is identified
//! by its producing node and output slot (`TensorRef`); names exist only
//! for display and manifests, and nothing downstream parses them. Graphs
//! are built mutably through `GraphBuilder`, then frozen: construction
//! resolves name references, computes the execution order and validates
//! the result, so passes and emitters can index the arena directly.

pub mod order;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{CompileError, CompileResult};

// ─── Element Types ─────────────────────────────────────────────────

/// Tensor element types understood by the target runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    I32,
    I8,
    U8,
}

impl ElementType {
    /// The runtime's name for this type, as spelled in generated source.
    pub fn c_name(&self) -> &'static str {
        match self {
            ElementType::F32 => "float",
            ElementType::I32 => "int32_t",
            ElementType::I8 => "int8_t",
            ElementType::U8 => "uint8_t",
        }
    }

    pub fn byte_width(&self) -> usize {
        match self {
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::I8 | ElementType::U8 => 1,
        }
    }

    /// Stable wire code used by the binary model format.
    pub fn code(&self) -> u8 {
        match self {
            ElementType::F32 => 0,
            ElementType::I32 => 1,
            ElementType::I8 => 2,
            ElementType::U8 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ElementType::F32),
            1 => Some(ElementType::I32),
            2 => Some(ElementType::I8),
            3 => Some(ElementType::U8),
            _ => None,
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.c_name())
    }
}

// ─── Payloads ──────────────────────────────────────────────────────

/// Typed constant storage carried by `Const`/`Inline` nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I8(Vec<i8>),
    U8(Vec<u8>),
}

impl Payload {
    pub fn element_type(&self) -> ElementType {
        match self {
            Payload::F32(_) => ElementType::F32,
            Payload::I32(_) => ElementType::I32,
            Payload::I8(_) => ElementType::I8,
            Payload::U8(_) => ElementType::U8,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::F32(v) => v.len(),
            Payload::I32(v) => v.len(),
            Payload::I8(v) => v.len(),
            Payload::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw byte view of the values. Multi-byte types are viewed in host
    /// order; all supported targets are little-endian.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Payload::F32(v) => bytemuck::cast_slice(v),
            Payload::I32(v) => bytemuck::cast_slice(v),
            Payload::I8(v) => bytemuck::cast_slice(v),
            Payload::U8(v) => v.as_slice(),
        }
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Payload::F32(v) => Some(v),
            _ => None,
        }
    }
}

// ─── Attributes ────────────────────────────────────────────────────

/// Attribute key under which constant nodes carry their payload.
pub const VALUE_ATTR: &str = "value";

/// Tensor attribute key written by the reference-count planner.
pub const REF_COUNT_ATTR: &str = "ref_count";

/// Op type of graph-input nodes.
pub const INPUT_OP: &str = "Input";

/// An attribute on a node or tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Data(Payload),
}

pub type AttrMap = BTreeMap<String, AttrValue>;

// ─── Tensors ───────────────────────────────────────────────────────

/// One tensor produced by a node. The canonical name is `<node>:<slot>`
/// and is assigned when the graph is built.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorInfo {
    pub name: String,
    pub dtype: ElementType,
    /// `None` when the shape is not known at compile time.
    pub shape: Option<Vec<usize>>,
    pub attrs: AttrMap,
}

impl TensorInfo {
    pub fn new(dtype: ElementType, shape: Option<Vec<usize>>) -> Self {
        Self {
            name: String::new(),
            dtype,
            shape,
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: AttrValue) -> Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    /// Total element count, when the shape is known.
    pub fn element_count(&self) -> Option<usize> {
        self.shape.as_ref().map(|dims| dims.iter().product())
    }

    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_float(&self, key: &str) -> Option<f64> {
        match self.attrs.get(key) {
            Some(AttrValue::Float(v)) => Some(*v),
            _ => None,
        }
    }

    /// The planned reference count, once the planner has run.
    pub fn ref_count(&self) -> Option<i64> {
        self.attr_int(REF_COUNT_ATTR)
    }
}

// ─── Nodes ─────────────────────────────────────────────────────────

/// Index of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A tensor, identified by its producing node and output slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TensorRef {
    pub producer: NodeId,
    pub slot: u16,
}

impl TensorRef {
    pub fn new(producer: NodeId, slot: u16) -> Self {
        Self { producer, slot }
    }
}

/// One operation in the graph.
#[derive(Debug, Clone, PartialEq)]
pub struct OpNode {
    pub name: String,
    /// Open set; the emitter registry decides what is supported.
    pub op_type: String,
    pub inputs: Vec<TensorRef>,
    pub outputs: Vec<TensorInfo>,
    pub attrs: AttrMap,
    pub device_hint: Option<String>,
}

impl OpNode {
    pub fn attr_int(&self, key: &str) -> Option<i64> {
        match self.attrs.get(key) {
            Some(AttrValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn attr_str(&self, key: &str) -> Option<&str> {
        match self.attrs.get(key) {
            Some(AttrValue::Str(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_ints(&self, key: &str) -> Option<&[i64]> {
        match self.attrs.get(key) {
            Some(AttrValue::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn attr_data(&self, key: &str) -> Option<&Payload> {
        match self.attrs.get(key) {
            Some(AttrValue::Data(v)) => Some(v),
            _ => None,
        }
    }

    /// The constant payload, for `Const`/`Inline` nodes.
    pub fn const_payload(&self) -> Option<&Payload> {
        self.attr_data(VALUE_ATTR)
    }

    pub fn is_input(&self) -> bool {
        self.op_type == INPUT_OP
    }
}

// ─── Graph ─────────────────────────────────────────────────────────

/// A frozen inference graph: node arena, name index, declared terminals
/// and the execution order. Graph-level inputs are nodes of op type
/// `Input`, so every tensor has a producer in the arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    name: String,
    nodes: Vec<OpNode>,
    index: BTreeMap<String, NodeId>,
    terminals: Vec<NodeId>,
    topo_order: Vec<NodeId>,
}

impl Graph {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &OpNode {
        &self.nodes[id.index()]
    }

    pub fn node_by_name(&self, name: &str) -> Option<(NodeId, &OpNode)> {
        let id = *self.index.get(name)?;
        Some((id, &self.nodes[id.index()]))
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &OpNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    /// Execution order: every live node exactly once, producers first.
    pub fn topo_order(&self) -> &[NodeId] {
        &self.topo_order
    }

    /// Declared terminal nodes, in declaration order.
    pub fn terminals(&self) -> &[NodeId] {
        &self.terminals
    }

    /// The tensor a reference points at. References inside a frozen graph
    /// are always in bounds.
    pub fn tensor(&self, r: TensorRef) -> &TensorInfo {
        &self.nodes[r.producer.index()].outputs[r.slot as usize]
    }

    fn try_tensor(&self, r: TensorRef) -> Option<&TensorInfo> {
        self.nodes
            .get(r.producer.index())?
            .outputs
            .get(r.slot as usize)
    }

    /// Every `(consumer, input position)` that reads a tensor, in arena
    /// order. A node reading the same tensor in two slots appears twice.
    pub fn consumers(&self, r: TensorRef) -> Vec<(NodeId, usize)> {
        let mut out = Vec::new();
        for (id, node) in self.nodes() {
            for (pos, input) in node.inputs.iter().enumerate() {
                if *input == r {
                    out.push((id, pos));
                }
            }
        }
        out
    }

    /// Structural audit. Checks reference bounds, name index consistency,
    /// canonical tensor names, terminal presence and that the execution
    /// order is a producers-first arrangement of live nodes.
    pub fn validate(&self) -> CompileResult<()> {
        let fail = |detail: String| Err(CompileError::InvariantViolation { detail });

        if self.index.len() != self.nodes.len() {
            return fail(format!(
                "name index has {} entries for {} nodes",
                self.index.len(),
                self.nodes.len()
            ));
        }
        for (name, id) in &self.index {
            match self.nodes.get(id.index()) {
                Some(node) if node.name == *name => {}
                _ => return fail(format!("name index entry `{name}` is stale")),
            }
        }

        for (_, node) in self.nodes() {
            for input in &node.inputs {
                if self.try_tensor(*input).is_none() {
                    return Err(CompileError::DanglingReference {
                        node: node.name.clone(),
                        reference: format!("{}:{}", input.producer, input.slot),
                    });
                }
            }
            for (slot, tensor) in node.outputs.iter().enumerate() {
                let canonical = format!("{}:{}", node.name, slot);
                if tensor.name != canonical {
                    return fail(format!(
                        "tensor of `{}` named `{}`, expected `{canonical}`",
                        node.name, tensor.name
                    ));
                }
            }
        }

        for t in &self.terminals {
            if self.nodes.get(t.index()).is_none() {
                return fail(format!("terminal {t} is out of bounds"));
            }
        }

        let mut position = BTreeMap::new();
        for (pos, id) in self.topo_order.iter().enumerate() {
            if self.nodes.get(id.index()).is_none() {
                return fail(format!("execution order contains dead id {id}"));
            }
            if position.insert(*id, pos).is_some() {
                return fail(format!("node {id} appears twice in the execution order"));
            }
        }
        for t in &self.terminals {
            if !position.contains_key(t) {
                return fail(format!(
                    "terminal `{}` is missing from the execution order",
                    self.node(*t).name
                ));
            }
        }
        for id in &self.topo_order {
            let node = self.node(*id);
            for input in &node.inputs {
                match position.get(&input.producer) {
                    Some(p) if *p < position[id] => {}
                    _ => {
                        return fail(format!(
                            "`{}` executes before its input from `{}`",
                            node.name,
                            self.node(input.producer).name
                        ))
                    }
                }
            }
        }

        Ok(())
    }

    /// Apply an attribute-level edit to every node. The structure (names,
    /// edges, arity) must not change; the pipeline revalidates after each
    /// pass to enforce this.
    pub(crate) fn map_nodes(mut self, mut f: impl FnMut(NodeId, &mut OpNode)) -> Graph {
        for (i, node) in self.nodes.iter_mut().enumerate() {
            f(NodeId(i as u32), node);
        }
        self
    }

    /// Rebuild the graph keeping only `keep`, remapping every reference.
    /// `rewire` redirects references to dropped tensors (old ref to old
    /// ref, applied transitively). Terminals must all be kept.
    pub(crate) fn retain_nodes(
        self,
        keep: &BTreeSet<NodeId>,
        rewire: &BTreeMap<TensorRef, TensorRef>,
    ) -> CompileResult<Graph> {
        let mut remap: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        for (new_index, old) in keep.iter().enumerate() {
            remap.insert(*old, NodeId(new_index as u32));
        }

        let resolve = |mut r: TensorRef| -> CompileResult<TensorRef> {
            let mut steps = 0usize;
            while !keep.contains(&r.producer) {
                match rewire.get(&r) {
                    Some(next) => r = *next,
                    None => {
                        return Err(CompileError::DanglingReference {
                            node: self.node(r.producer).name.clone(),
                            reference: format!("{}:{}", r.producer, r.slot),
                        })
                    }
                }
                steps += 1;
                if steps > self.nodes.len() {
                    return Err(CompileError::InvariantViolation {
                        detail: "rewire map contains a cycle".to_string(),
                    });
                }
            }
            Ok(r)
        };

        let terminal_names: Vec<String> = self
            .terminals
            .iter()
            .map(|t| self.node(*t).name.clone())
            .collect();

        let mut nodes = Vec::with_capacity(keep.len());
        for (id, node) in self.nodes.iter().enumerate() {
            let id = NodeId(id as u32);
            if !keep.contains(&id) {
                continue;
            }
            let mut node = node.clone();
            for input in &mut node.inputs {
                let target = resolve(*input)?;
                *input = TensorRef::new(remap[&target.producer], target.slot);
            }
            nodes.push(node);
        }

        Graph::assemble(self.name, nodes, &terminal_names)
    }

    /// Freeze a node arena into a graph: index names, assign canonical
    /// tensor names, resolve terminals, compute the execution order and
    /// validate.
    pub(crate) fn assemble(
        name: String,
        mut nodes: Vec<OpNode>,
        terminal_names: &[String],
    ) -> CompileResult<Graph> {
        let mut index = BTreeMap::new();
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.name.clone(), NodeId(i as u32)).is_some() {
                return Err(CompileError::InvariantViolation {
                    detail: format!("duplicate node name `{}`", node.name),
                });
            }
        }

        for node in &mut nodes {
            for (slot, tensor) in node.outputs.iter_mut().enumerate() {
                tensor.name = format!("{}:{}", node.name, slot);
            }
        }

        let mut terminals = Vec::with_capacity(terminal_names.len());
        for t in terminal_names {
            match index.get(t) {
                Some(id) => terminals.push(*id),
                None => {
                    return Err(CompileError::InvariantViolation {
                        detail: format!("terminal `{t}` does not name a node"),
                    })
                }
            }
        }
        if terminals.is_empty() && !nodes.is_empty() {
            return Err(CompileError::InvariantViolation {
                detail: format!("graph `{name}` has nodes but no terminals"),
            });
        }

        let mut graph = Graph {
            name,
            nodes,
            index,
            terminals,
            topo_order: Vec::new(),
        };
        graph.topo_order = order::order(&graph)?;
        graph.validate()?;
        Ok(graph)
    }
}

// ─── Builder ───────────────────────────────────────────────────────

/// A node under construction. Inputs are name references (`"producer"`
/// for slot 0, `"producer:2"` for a later slot), resolved on `build`.
#[derive(Debug)]
pub struct NodeDraft {
    name: String,
    op_type: String,
    inputs: Vec<String>,
    outputs: Vec<TensorInfo>,
    attrs: AttrMap,
    device_hint: Option<String>,
}

impl NodeDraft {
    pub fn attr(&mut self, key: &str, value: AttrValue) -> &mut Self {
        self.attrs.insert(key.to_string(), value);
        self
    }

    pub fn device(&mut self, hint: &str) -> &mut Self {
        self.device_hint = Some(hint.to_string());
        self
    }
}

/// Mutable graph construction. Collects drafts, then `build` resolves
/// every reference and freezes the result.
#[derive(Debug)]
pub struct GraphBuilder {
    name: String,
    drafts: Vec<NodeDraft>,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            drafts: Vec::new(),
        }
    }

    /// Add an operation node. Outputs may be unnamed; canonical names are
    /// assigned on build.
    pub fn node(
        &mut self,
        name: &str,
        op_type: &str,
        inputs: &[&str],
        outputs: Vec<TensorInfo>,
    ) -> &mut NodeDraft {
        self.drafts.push(NodeDraft {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs,
            attrs: BTreeMap::new(),
            device_hint: None,
        });
        self.drafts.last_mut().unwrap()
    }

    /// Add a graph input: a source node the caller binds at runtime.
    pub fn input(&mut self, name: &str, dtype: ElementType, shape: &[usize]) -> &mut NodeDraft {
        self.node(
            name,
            INPUT_OP,
            &[],
            vec![TensorInfo::new(dtype, Some(shape.to_vec()))],
        )
    }

    /// Add a constant node carrying a payload.
    pub fn constant(&mut self, name: &str, payload: Payload, shape: &[usize]) -> &mut NodeDraft {
        let dtype = payload.element_type();
        let draft = self.node(
            name,
            "Const",
            &[],
            vec![TensorInfo::new(dtype, Some(shape.to_vec()))],
        );
        draft.attr(VALUE_ATTR, AttrValue::Data(payload));
        draft
    }

    /// Resolve references and freeze. `terminals` are the graph outputs,
    /// in declaration order.
    pub fn build(self, terminals: &[&str]) -> CompileResult<Graph> {
        let mut positions = BTreeMap::new();
        for (i, draft) in self.drafts.iter().enumerate() {
            positions.insert(draft.name.clone(), i);
        }

        let mut nodes = Vec::with_capacity(self.drafts.len());
        for draft in &self.drafts {
            let mut inputs = Vec::with_capacity(draft.inputs.len());
            for reference in &draft.inputs {
                let (producer_name, slot) = split_reference(reference);
                let producer = match positions.get(producer_name) {
                    Some(i) => *i,
                    None => {
                        return Err(CompileError::DanglingReference {
                            node: draft.name.clone(),
                            reference: reference.clone(),
                        })
                    }
                };
                if slot as usize >= self.drafts[producer].outputs.len() {
                    return Err(CompileError::DanglingReference {
                        node: draft.name.clone(),
                        reference: reference.clone(),
                    });
                }
                inputs.push(TensorRef::new(NodeId(producer as u32), slot));
            }
            nodes.push(OpNode {
                name: draft.name.clone(),
                op_type: draft.op_type.clone(),
                inputs,
                outputs: draft.outputs.clone(),
                attrs: draft.attrs.clone(),
                device_hint: draft.device_hint.clone(),
            });
        }

        let terminal_names: Vec<String> = terminals.iter().map(|s| s.to_string()).collect();
        Graph::assemble(self.name, nodes, &terminal_names)
    }
}

/// Split `"node:slot"` into name and slot; a bare name means slot 0.
fn split_reference(reference: &str) -> (&str, u16) {
    if let Some((head, tail)) = reference.rsplit_once(':') {
        if !head.is_empty() {
            if let Ok(slot) = tail.parse::<u16>() {
                return (head, slot);
            }
        }
    }
    (reference, 0)
}

// ─── Tests ─────────────────────────────────────────────────────────
