//! JSON graph manifests.
//!
//! The manifest is the compiler's interchange form: it mirrors what
//! `GraphBuilder` accepts (nodes with name references, typed payloads,
//! attributes), so a model can be described by hand or by an external
//! converter. A built graph can also be re-serialized, letting a
//! pipeline run be checkpointed after transformation and reloaded.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CompileError, CompileResult};
use crate::ir::{AttrValue, ElementType, Graph, GraphBuilder, Payload, TensorInfo};

// ─── Manifest Model ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphManifest {
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<NodeManifest>,
    /// Terminal node names, in output order.
    #[serde(default)]
    pub outputs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeManifest {
    pub name: String,
    pub op: String,
    /// Upstream tensors as `name` or `name:slot` references.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<String>,
    pub outputs: Vec<TensorManifest>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrManifest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorManifest {
    pub dtype: DtypeTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<usize>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attrs: BTreeMap<String, AttrManifest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DtypeTag {
    F32,
    I32,
    I8,
    U8,
}

impl From<DtypeTag> for ElementType {
    fn from(tag: DtypeTag) -> Self {
        match tag {
            DtypeTag::F32 => ElementType::F32,
            DtypeTag::I32 => ElementType::I32,
            DtypeTag::I8 => ElementType::I8,
            DtypeTag::U8 => ElementType::U8,
        }
    }
}

impl From<ElementType> for DtypeTag {
    fn from(dtype: ElementType) -> Self {
        match dtype {
            ElementType::F32 => DtypeTag::F32,
            ElementType::I32 => DtypeTag::I32,
            ElementType::I8 => DtypeTag::I8,
            ElementType::U8 => DtypeTag::U8,
        }
    }
}

/// Attribute values as plain JSON. Variant order matters for the
/// untagged match: integers before floats, int lists before float
/// lists, objects last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrManifest {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Data(PayloadManifest),
}

/// Typed payload arrays: `{ "dtype": "f32", "data": [0.5, 1.0] }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "dtype", content = "data", rename_all = "lowercase")]
pub enum PayloadManifest {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I8(Vec<i8>),
    U8(Vec<u8>),
}

impl PayloadManifest {
    fn to_payload(&self) -> Payload {
        match self {
            PayloadManifest::F32(v) => Payload::F32(v.clone()),
            PayloadManifest::I32(v) => Payload::I32(v.clone()),
            PayloadManifest::I8(v) => Payload::I8(v.clone()),
            PayloadManifest::U8(v) => Payload::U8(v.clone()),
        }
    }

    fn from_payload(payload: &Payload) -> Self {
        match payload {
            Payload::F32(v) => PayloadManifest::F32(v.clone()),
            Payload::I32(v) => PayloadManifest::I32(v.clone()),
            Payload::I8(v) => PayloadManifest::I8(v.clone()),
            Payload::U8(v) => PayloadManifest::U8(v.clone()),
        }
    }
}

impl AttrManifest {
    fn to_attr(&self) -> AttrValue {
        match self {
            AttrManifest::Bool(v) => AttrValue::Bool(*v),
            AttrManifest::Int(v) => AttrValue::Int(*v),
            AttrManifest::Float(v) => AttrValue::Float(*v),
            AttrManifest::Str(v) => AttrValue::Str(v.clone()),
            AttrManifest::Ints(v) => AttrValue::Ints(v.clone()),
            AttrManifest::Floats(v) => AttrValue::Floats(v.clone()),
            AttrManifest::Data(p) => AttrValue::Data(p.to_payload()),
        }
    }

    fn from_attr(value: &AttrValue) -> Self {
        match value {
            AttrValue::Bool(v) => AttrManifest::Bool(*v),
            AttrValue::Int(v) => AttrManifest::Int(*v),
            AttrValue::Float(v) => AttrManifest::Float(*v),
            AttrValue::Str(v) => AttrManifest::Str(v.clone()),
            AttrValue::Ints(v) => AttrManifest::Ints(v.clone()),
            AttrValue::Floats(v) => AttrManifest::Floats(v.clone()),
            AttrValue::Data(p) => AttrManifest::Data(PayloadManifest::from_payload(p)),
        }
    }
}

impl TensorManifest {
    fn to_info(&self) -> TensorInfo {
        let mut info = TensorInfo::new(self.dtype.into(), self.shape.clone());
        for (key, value) in &self.attrs {
            info = info.with_attr(key, value.to_attr());
        }
        info
    }

    fn from_info(info: &TensorInfo) -> Self {
        Self {
            dtype: info.dtype.into(),
            shape: info.shape.clone(),
            attrs: info
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), AttrManifest::from_attr(v)))
                .collect(),
        }
    }
}

// ─── Graph Conversion ──────────────────────────────────────────────

/// Build a graph from a manifest. Reference resolution, ordering and
/// validation all happen in `GraphBuilder::build`.
pub fn from_manifest(manifest: &GraphManifest) -> CompileResult<Graph> {
    let mut builder = GraphBuilder::new(&manifest.name);
    for node in &manifest.nodes {
        let inputs: Vec<&str> = node.inputs.iter().map(String::as_str).collect();
        let outputs: Vec<TensorInfo> =
            node.outputs.iter().map(TensorManifest::to_info).collect();
        let draft = builder.node(&node.name, &node.op, &inputs, outputs);
        for (key, value) in &node.attrs {
            draft.attr(key, value.to_attr());
        }
        if let Some(device) = &node.device {
            draft.device(device);
        }
    }
    let terminals: Vec<&str> = manifest.outputs.iter().map(String::as_str).collect();
    builder.build(&terminals)
}

/// Serialize a graph back to manifest form. Input references use the
/// full `name:slot` spelling, so the result reloads losslessly, dead
/// nodes included.
pub fn to_manifest(graph: &Graph) -> GraphManifest {
    let nodes = graph
        .nodes()
        .map(|(_, node)| NodeManifest {
            name: node.name.clone(),
            op: node.op_type.clone(),
            inputs: node
                .inputs
                .iter()
                .map(|&r| graph.tensor(r).name.clone())
                .collect(),
            outputs: node.outputs.iter().map(TensorManifest::from_info).collect(),
            attrs: node
                .attrs
                .iter()
                .map(|(k, v)| (k.clone(), AttrManifest::from_attr(v)))
                .collect(),
            device: node.device_hint.clone(),
        })
        .collect();
    let outputs = graph
        .terminals()
        .iter()
        .map(|&id| graph.node(id).name.clone())
        .collect();
    GraphManifest {
        name: graph.name().to_string(),
        nodes,
        outputs,
    }
}

// ─── Disk IO ───────────────────────────────────────────────────────

pub fn load_manifest(path: &Path) -> CompileResult<Graph> {
    let text = std::fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: GraphManifest =
        serde_json::from_str(&text).map_err(|source| CompileError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
    log::info!(
        "loaded `{}` from {}: {} node(s)",
        manifest.name,
        path.display(),
        manifest.nodes.len()
    );
    from_manifest(&manifest)
}

pub fn save_manifest(graph: &Graph, path: &Path) -> CompileResult<()> {
    let manifest = to_manifest(graph);
    let mut text =
        serde_json::to_string_pretty(&manifest).map_err(|source| CompileError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
    text.push('\n');
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| CompileError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    std::fs::write(path, text).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn t(shape: &[usize]) -> TensorInfo {
        TensorInfo::new(ElementType::F32, Some(shape.to_vec()))
    }

    #[test]
    fn test_parse_minimal_manifest() {
        let json = r#"{
          "name": "tiny",
          "nodes": [
            { "name": "x", "op": "Input",
              "outputs": [ { "dtype": "f32", "shape": [1, 2] } ] },
            { "name": "w", "op": "Const",
              "outputs": [ { "dtype": "f32", "shape": [2, 1] } ],
              "attrs": { "value": { "dtype": "f32", "data": [0.5, -0.5] } } },
            { "name": "y", "op": "MatMul", "inputs": ["x", "w"],
              "outputs": [ { "dtype": "f32", "shape": [1, 1] } ] }
          ],
          "outputs": ["y"]
        }"#;

        let manifest: GraphManifest = serde_json::from_str(json).unwrap();
        let g = from_manifest(&manifest).unwrap();

        assert_eq!(g.len(), 3);
        let (_, w) = g.node_by_name("w").unwrap();
        assert_eq!(w.const_payload(), Some(&Payload::F32(vec![0.5, -0.5])));
        let order: Vec<&str> = g
            .topo_order()
            .iter()
            .map(|&id| g.node(id).name.as_str())
            .collect();
        assert_eq!(order, vec!["x", "w", "y"]);
    }

    #[test]
    fn test_attr_values_parse_by_shape() {
        let json = r#"{
          "name": "m",
          "nodes": [
            { "name": "x", "op": "Input",
              "outputs": [ { "dtype": "f32", "shape": [4] } ] },
            { "name": "pool", "op": "MaxPool", "inputs": ["x"],
              "outputs": [ { "dtype": "f32", "shape": [2] } ],
              "attrs": {
                "axis": 1,
                "alpha": 0.5,
                "padding": "same",
                "fused": false,
                "ksize": [2, 2],
                "scales": [0.1, 0.9]
              } }
          ],
          "outputs": ["pool"]
        }"#;

        let g = load_str(json);
        let (_, pool) = g.node_by_name("pool").unwrap();
        assert_eq!(pool.attr_int("axis"), Some(1));
        assert_eq!(pool.attrs.get("alpha"), Some(&AttrValue::Float(0.5)));
        assert_eq!(pool.attr_str("padding"), Some("same"));
        assert_eq!(pool.attrs.get("fused"), Some(&AttrValue::Bool(false)));
        assert_eq!(pool.attr_ints("ksize"), Some(&[2, 2][..]));
        assert_eq!(
            pool.attrs.get("scales"),
            Some(&AttrValue::Floats(vec![0.1, 0.9]))
        );
    }

    fn load_str(json: &str) -> Graph {
        let manifest: GraphManifest = serde_json::from_str(json).unwrap();
        from_manifest(&manifest).unwrap()
    }

    #[test]
    fn test_manifest_round_trip_is_lossless() {
        let mut b = GraphBuilder::new("rt");
        b.input("x", ElementType::F32, &[1, 4]);
        b.constant("w", Payload::F32(vec![1.0, -2.0]), &[2]);
        let split = b.node("split", "Split", &["x"], vec![t(&[1, 2]), t(&[1, 2])]);
        split.attr("axis", AttrValue::Int(1));
        split.device("dsp");
        b.node(
            "y",
            "Add",
            &["split:1", "w"],
            vec![t(&[1, 2]).with_attr("quant_min", AttrValue::Float(-1.0))],
        );
        let g1 = b.build(&["y"]).unwrap();

        let text = serde_json::to_string_pretty(&to_manifest(&g1)).unwrap();
        let manifest: GraphManifest = serde_json::from_str(&text).unwrap();
        let g2 = from_manifest(&manifest).unwrap();
        assert_eq!(g1, g2);
    }

    #[test]
    fn test_round_trip_keeps_dead_nodes() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[4]);
        b.node("live", "Relu", &["x"], vec![t(&[4])]);
        b.node("orphan", "Softmax", &["x"], vec![t(&[4])]);
        let g1 = b.build(&["live"]).unwrap();

        let g2 = from_manifest(&to_manifest(&g1)).unwrap();
        assert_eq!(g1, g2);
        assert!(g2.node_by_name("orphan").is_some());
    }

    #[test]
    fn test_unknown_reference_is_dangling() {
        let json = r#"{
          "name": "m",
          "nodes": [
            { "name": "y", "op": "Relu", "inputs": ["ghost"],
              "outputs": [ { "dtype": "f32", "shape": [1] } ] }
          ],
          "outputs": ["y"]
        }"#;

        let manifest: GraphManifest = serde_json::from_str(json).unwrap();
        match from_manifest(&manifest).unwrap_err() {
            CompileError::DanglingReference { node, reference } => {
                assert_eq!(node, "y");
                assert_eq!(reference, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_save_and_load_from_disk() {
        let mut b = GraphBuilder::new("disk");
        b.input("x", ElementType::F32, &[2]);
        b.node("y", "Relu", &["x"], vec![t(&[2])]);
        let g1 = b.build(&["y"]).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("model.json");
        save_manifest(&g1, &path).unwrap();
        let g2 = load_manifest(&path).unwrap();
        assert_eq!(g1, g2);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let err = load_manifest(Path::new("/no/such/model.json")).unwrap_err();
        match err {
            CompileError::Io { path, .. } => {
                assert!(path.ends_with("model.json"))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_json_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_manifest(&path).unwrap_err();
        assert!(matches!(err, CompileError::Manifest { .. }));
    }
}
