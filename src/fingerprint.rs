//! Content addressing for graphs: canonical serialization + BLAKE3.
//!
//! Every graph gets a cryptographic identity based on its canonical
//! encoding. Node and tensor names are replaced with execution-order
//! positions before hashing, and the result is deterministically
//! serialized.
//!
//! Properties:
//! - Two graphs with identical structure but different node names
//!   produce the same fingerprint.
//! - Changing any edge, attribute, payload, shape or terminal changes
//!   the fingerprint.
//! - The fingerprint is embedded in composed source banners and in
//!   exported model files, so artifacts can be traced back to the
//!   exact graph that produced them.

use std::collections::BTreeMap;

use crate::ir::{AttrMap, AttrValue, Graph, NodeId, OpNode, Payload, TensorInfo};

// ─── Serialization Format Tags ─────────────────────────────────────

const TAG_NODE: u8 = 0x01;
const TAG_REF: u8 = 0x02;
const TAG_TENSOR: u8 = 0x03;
const TAG_TERMINALS: u8 = 0x04;

// Attribute value tags.
const TAG_ATTR_INT: u8 = 0x10;
const TAG_ATTR_FLOAT: u8 = 0x11;
const TAG_ATTR_STR: u8 = 0x12;
const TAG_ATTR_BOOL: u8 = 0x13;
const TAG_ATTR_INTS: u8 = 0x14;
const TAG_ATTR_FLOATS: u8 = 0x15;
const TAG_ATTR_DATA: u8 = 0x16;

// Version byte for fingerprint stability.
const FINGERPRINT_VERSION: u8 = 1;

// ─── Fingerprint ───────────────────────────────────────────────────

/// A 256-bit BLAKE3 fingerprint of a graph's canonical encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub [u8; 32]);

impl Fingerprint {
    /// Fingerprint a graph. Only live nodes (those in the execution
    /// order) contribute.
    pub fn of(graph: &Graph) -> Self {
        let bytes = Encoder::new(graph).encode();
        Self(*blake3::hash(&bytes).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Display as full hex.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Display as short hex (12 characters, 48 bits).
    pub fn to_short(&self) -> String {
        self.0[..6].iter().map(|b| format!("{:02x}", b)).collect()
    }
}

impl std::fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.to_short())
    }
}

// ─── Canonical Encoder ─────────────────────────────────────────────

/// Serializes a graph to canonical bytes: nodes in execution order,
/// references as (position, slot) pairs, names omitted.
struct Encoder<'g> {
    graph: &'g Graph,
    buf: Vec<u8>,
    /// Node id → position in the execution order.
    positions: BTreeMap<NodeId, u32>,
}

impl<'g> Encoder<'g> {
    fn new(graph: &'g Graph) -> Self {
        let positions = graph
            .topo_order()
            .iter()
            .enumerate()
            .map(|(pos, &id)| (id, pos as u32))
            .collect();
        Self {
            graph,
            buf: Vec::new(),
            positions,
        }
    }

    fn encode(mut self) -> Vec<u8> {
        self.buf.push(FINGERPRINT_VERSION);
        for &id in self.graph.topo_order() {
            self.encode_node(self.graph.node(id));
        }
        self.write_u8(TAG_TERMINALS);
        self.write_u16(self.graph.terminals().len() as u16);
        for &id in self.graph.terminals() {
            self.write_u32(self.position(id));
        }
        self.buf
    }

    /// Execution-order position of a node; dangling ids get a marker.
    fn position(&self, id: NodeId) -> u32 {
        self.positions.get(&id).copied().unwrap_or(u32::MAX)
    }

    fn encode_node(&mut self, node: &OpNode) {
        self.write_u8(TAG_NODE);
        self.write_str(&node.op_type);
        match &node.device_hint {
            Some(device) => {
                self.write_u8(1);
                self.write_str(device);
            }
            None => self.write_u8(0),
        }
        self.write_u16(node.inputs.len() as u16);
        for r in &node.inputs {
            self.write_u8(TAG_REF);
            self.write_u32(self.position(r.producer));
            self.write_u16(r.slot);
        }
        self.write_u16(node.outputs.len() as u16);
        for tensor in &node.outputs {
            self.encode_tensor(tensor);
        }
        self.encode_attrs(&node.attrs);
    }

    fn encode_tensor(&mut self, tensor: &TensorInfo) {
        self.write_u8(TAG_TENSOR);
        self.write_u8(tensor.dtype.code());
        match &tensor.shape {
            Some(dims) => {
                self.write_u8(1);
                self.write_u16(dims.len() as u16);
                for &dim in dims {
                    self.write_u64(dim as u64);
                }
            }
            None => self.write_u8(0),
        }
        self.encode_attrs(&tensor.attrs);
    }

    fn encode_attrs(&mut self, attrs: &AttrMap) {
        self.write_u16(attrs.len() as u16);
        for (key, value) in attrs {
            self.write_str(key);
            self.encode_attr_value(value);
        }
    }

    fn encode_attr_value(&mut self, value: &AttrValue) {
        match value {
            AttrValue::Int(v) => {
                self.write_u8(TAG_ATTR_INT);
                self.write_u64(*v as u64);
            }
            AttrValue::Float(v) => {
                self.write_u8(TAG_ATTR_FLOAT);
                self.write_u64(v.to_bits());
            }
            AttrValue::Str(v) => {
                self.write_u8(TAG_ATTR_STR);
                self.write_str(v);
            }
            AttrValue::Bool(v) => {
                self.write_u8(TAG_ATTR_BOOL);
                self.write_u8(u8::from(*v));
            }
            AttrValue::Ints(v) => {
                self.write_u8(TAG_ATTR_INTS);
                self.write_u16(v.len() as u16);
                for &x in v {
                    self.write_u64(x as u64);
                }
            }
            AttrValue::Floats(v) => {
                self.write_u8(TAG_ATTR_FLOATS);
                self.write_u16(v.len() as u16);
                for &x in v {
                    self.write_u64(x.to_bits());
                }
            }
            AttrValue::Data(payload) => {
                self.write_u8(TAG_ATTR_DATA);
                self.encode_payload(payload);
            }
        }
    }

    fn encode_payload(&mut self, payload: &Payload) {
        self.write_u8(payload.element_type().code());
        self.write_u32(payload.len() as u32);
        match payload {
            Payload::F32(v) => {
                for &x in v {
                    self.write_u32(x.to_bits());
                }
            }
            Payload::I32(v) => {
                for &x in v {
                    self.write_u32(x as u32);
                }
            }
            Payload::I8(v) => {
                for &x in v {
                    self.write_u8(x as u8);
                }
            }
            Payload::U8(v) => self.buf.extend_from_slice(v),
        }
    }

    // ─── Serialization Helpers ─────────────────────────────────

    fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }
}
