//! Binary model serialization.
//!
//! `LGM1` is a compact little-endian encoding of a compiled graph for
//! targets that interpret a model blob instead of compiling generated
//! source. Layout (format version 1): magic, version, graph name, graph
//! fingerprint, op-code table, tensor table, buffer table, operator
//! table, then graph input/output tensor indices. Strings are
//! u32-length-prefixed UTF-8; every table and vector is u32-count
//! prefixed.
//!
//! `decode` parses a blob back into its tables and checks every index
//! against the table it points into; it does not rebuild a `Graph`.

use std::collections::BTreeMap;

use crate::error::{CompileError, CompileResult};
use crate::fingerprint::Fingerprint;
use crate::ir::{ElementType, Graph, Payload, TensorRef};
use crate::transform::quantize::{QUANT_MAX_ATTR, QUANT_MIN_ATTR};

pub const MAGIC: [u8; 4] = *b"LGM1";
pub const FORMAT_VERSION: u16 = 1;

/// Sentinel for tensors without a payload buffer.
const NO_BUFFER: u32 = u32::MAX;

// ─── Export ────────────────────────────────────────────────────────

/// Serialize a graph. Only live nodes are written, in execution order.
/// Every payload-backed tensor must have a known shape; activation
/// tensors may leave theirs unknown.
pub fn export(graph: &Graph) -> CompileResult<Vec<u8>> {
    let order = graph.topo_order();
    let mut w = Writer::new();
    w.put_bytes(&MAGIC);
    w.put_u16(FORMAT_VERSION);
    w.put_str(graph.name());
    w.put_bytes(Fingerprint::of(graph).as_bytes());

    // Op-code table, deduplicated in first-use order.
    let mut op_codes: Vec<&str> = Vec::new();
    let mut code_of: BTreeMap<&str, u32> = BTreeMap::new();
    for &id in order {
        let op = graph.node(id).op_type.as_str();
        if !code_of.contains_key(op) {
            code_of.insert(op, op_codes.len() as u32);
            op_codes.push(op);
        }
    }
    w.put_u32(op_codes.len() as u32);
    for op in &op_codes {
        w.put_str(op);
    }

    // Tensor table: every produced tensor in topo/slot order. Payload
    // buffers are collected here and written as their own table.
    let tensor_count: usize = order.iter().map(|&id| graph.node(id).outputs.len()).sum();
    let mut tensor_index: BTreeMap<TensorRef, u32> = BTreeMap::new();
    let mut buffers: Vec<&Payload> = Vec::new();
    w.put_u32(tensor_count as u32);
    for &id in order {
        let node = graph.node(id);
        let payload = node.const_payload();
        for (slot, tensor) in node.outputs.iter().enumerate() {
            let index = tensor_index.len() as u32;
            tensor_index.insert(TensorRef::new(id, slot as u16), index);

            w.put_str(&tensor.name);
            w.put_u8(tensor.dtype.code());
            match &tensor.shape {
                Some(dims) => {
                    w.put_u8(1);
                    w.put_u32(dims.len() as u32);
                    for &dim in dims {
                        w.put_u32(dim as u32);
                    }
                }
                None => {
                    if slot == 0 && payload.is_some() {
                        return Err(CompileError::MissingTensorShape {
                            tensor: tensor.name.clone(),
                        });
                    }
                    w.put_u8(0);
                }
            }
            let quant = (
                tensor.attr_float(QUANT_MIN_ATTR),
                tensor.attr_float(QUANT_MAX_ATTR),
            );
            match quant {
                (Some(min), Some(max)) => {
                    w.put_u8(1);
                    w.put_f64(min);
                    w.put_f64(max);
                }
                _ => w.put_u8(0),
            }
            match payload {
                Some(p) if slot == 0 => {
                    w.put_u32(buffers.len() as u32);
                    buffers.push(p);
                }
                _ => w.put_u32(NO_BUFFER),
            }
        }
    }

    // Buffer table.
    w.put_u32(buffers.len() as u32);
    for payload in &buffers {
        let bytes = payload.as_bytes();
        w.put_u32(bytes.len() as u32);
        w.put_bytes(bytes);
    }

    // Operator table, in execution order.
    w.put_u32(order.len() as u32);
    for &id in order {
        let node = graph.node(id);
        w.put_u32(code_of[node.op_type.as_str()]);
        w.put_u32(node.inputs.len() as u32);
        for r in &node.inputs {
            w.put_u32(lookup_tensor(&tensor_index, *r)?);
        }
        w.put_u32(node.outputs.len() as u32);
        for slot in 0..node.outputs.len() {
            w.put_u32(lookup_tensor(&tensor_index, TensorRef::new(id, slot as u16))?);
        }
    }

    // Graph inputs and outputs as tensor indices.
    let mut inputs = Vec::new();
    for &id in order {
        let node = graph.node(id);
        if node.is_input() {
            for slot in 0..node.outputs.len() {
                inputs.push(lookup_tensor(&tensor_index, TensorRef::new(id, slot as u16))?);
            }
        }
    }
    w.put_u32(inputs.len() as u32);
    for index in inputs {
        w.put_u32(index);
    }
    let mut outputs = Vec::new();
    for &id in graph.terminals() {
        let node = graph.node(id);
        for slot in 0..node.outputs.len() {
            outputs.push(lookup_tensor(&tensor_index, TensorRef::new(id, slot as u16))?);
        }
    }
    w.put_u32(outputs.len() as u32);
    for index in outputs {
        w.put_u32(index);
    }

    Ok(w.finish())
}

fn lookup_tensor(index: &BTreeMap<TensorRef, u32>, r: TensorRef) -> CompileResult<u32> {
    index
        .get(&r)
        .copied()
        .ok_or_else(|| CompileError::InvariantViolation {
            detail: format!("tensor {}:{} is not in the export table", r.producer, r.slot),
        })
}

// ─── Decoded Model ─────────────────────────────────────────────────

/// A decoded model file: tables, not a rebuilt graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFile {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub op_codes: Vec<String>,
    pub tensors: Vec<TensorEntry>,
    pub buffers: Vec<Vec<u8>>,
    pub operators: Vec<OperatorEntry>,
    /// Tensor-table indices of the graph inputs.
    pub inputs: Vec<u32>,
    /// Tensor-table indices of the graph outputs.
    pub outputs: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TensorEntry {
    pub name: String,
    pub dtype: ElementType,
    pub shape: Option<Vec<u32>>,
    /// Affine quantization range, when the tensor carries one.
    pub quant: Option<(f64, f64)>,
    /// Buffer-table index for payload-backed tensors.
    pub buffer: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorEntry {
    pub op_code: u32,
    pub inputs: Vec<u32>,
    pub outputs: Vec<u32>,
}

/// Parse and validate an `LGM1` blob.
pub fn decode(bytes: &[u8]) -> CompileResult<ModelFile> {
    let mut r = Reader::new(bytes);

    if r.take(4)? != MAGIC {
        return Err(malformed("bad magic, not a model file"));
    }
    let version = r.u16()?;
    if version != FORMAT_VERSION {
        return Err(malformed(&format!("unsupported format version {version}")));
    }
    let name = r.str()?;
    let mut fingerprint = [0u8; 32];
    fingerprint.copy_from_slice(r.take(32)?);

    let op_code_count = r.u32()? as usize;
    let mut op_codes = Vec::with_capacity(op_code_count);
    for _ in 0..op_code_count {
        op_codes.push(r.str()?);
    }

    let tensor_count = r.u32()? as usize;
    let mut tensors = Vec::with_capacity(tensor_count);
    for _ in 0..tensor_count {
        let name = r.str()?;
        let code = r.u8()?;
        let dtype = ElementType::from_code(code)
            .ok_or_else(|| malformed(&format!("invalid dtype code {code}")))?;
        let shape = match r.u8()? {
            0 => None,
            _ => {
                let rank = r.u32()? as usize;
                let mut dims = Vec::with_capacity(rank);
                for _ in 0..rank {
                    dims.push(r.u32()?);
                }
                Some(dims)
            }
        };
        let quant = match r.u8()? {
            0 => None,
            _ => Some((r.f64()?, r.f64()?)),
        };
        let buffer = match r.u32()? {
            NO_BUFFER => None,
            index => Some(index),
        };
        tensors.push(TensorEntry {
            name,
            dtype,
            shape,
            quant,
            buffer,
        });
    }

    let buffer_count = r.u32()? as usize;
    let mut buffers = Vec::with_capacity(buffer_count);
    for _ in 0..buffer_count {
        let len = r.u32()? as usize;
        buffers.push(r.take(len)?.to_vec());
    }

    let operator_count = r.u32()? as usize;
    let mut operators = Vec::with_capacity(operator_count);
    for _ in 0..operator_count {
        let op_code = r.u32()?;
        let inputs = r.u32_vec()?;
        let outputs = r.u32_vec()?;
        operators.push(OperatorEntry {
            op_code,
            inputs,
            outputs,
        });
    }

    let inputs = r.u32_vec()?;
    let outputs = r.u32_vec()?;

    if r.remaining() != 0 {
        return Err(malformed(&format!(
            "{} trailing byte(s) after the model",
            r.remaining()
        )));
    }

    // Cross-table index checks: nothing may point past its table.
    for tensor in &tensors {
        if let Some(index) = tensor.buffer {
            check_index(index, buffers.len(), "buffer")?;
        }
    }
    for op in &operators {
        check_index(op.op_code, op_codes.len(), "op-code")?;
        for &index in op.inputs.iter().chain(&op.outputs) {
            check_index(index, tensors.len(), "tensor")?;
        }
    }
    for &index in inputs.iter().chain(&outputs) {
        check_index(index, tensors.len(), "tensor")?;
    }

    Ok(ModelFile {
        name,
        fingerprint: Fingerprint(fingerprint),
        op_codes,
        tensors,
        buffers,
        operators,
        inputs,
        outputs,
    })
}

fn malformed(detail: &str) -> CompileError {
    CompileError::MalformedModel {
        detail: detail.to_string(),
    }
}

fn check_index(index: u32, table_len: usize, table: &str) -> CompileResult<()> {
    if (index as usize) < table_len {
        Ok(())
    } else {
        Err(malformed(&format!(
            "{table} index {index} out of range (table has {table_len} entries)"
        )))
    }
}

// ─── Wire Helpers ──────────────────────────────────────────────────

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn put_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn put_str(&mut self, s: &str) {
        self.put_u32(s.len() as u32);
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> CompileResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(malformed(&format!(
                "unexpected end of file at byte {} (wanted {n} more)",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> CompileResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> CompileResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> CompileResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64(&mut self) -> CompileResult<f64> {
        let b = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(f64::from_bits(u64::from_le_bytes(raw)))
    }

    fn str(&mut self) -> CompileResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_string)
            .map_err(|_| malformed("string is not valid UTF-8"))
    }

    fn u32_vec(&mut self) -> CompileResult<Vec<u32>> {
        let count = self.u32()? as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            values.push(self.u32()?);
        }
        Ok(values)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
