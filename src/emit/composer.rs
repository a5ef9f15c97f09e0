//! Artifact composition.
//!
//! The composer walks the execution order, asks the registry for each
//! node's emitter, and stitches the resulting snippets into three
//! artifacts: a declaration header, the model source, and optionally a
//! weight header. Emission runs in parallel across nodes; assembly is
//! strictly sequential in execution order, so the output is stable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use crate::error::{CompileError, CompileResult};
use crate::fingerprint::Fingerprint;
use crate::ir::Graph;

use super::{sanitize_identifier, EmitContext, EmitterRegistry, Snippet};

// ─── Composer ──────────────────────────────────────────────────────

/// Drives emission and assembles the output files.
#[derive(Debug, Clone)]
pub struct Composer {
    model_name: Option<String>,
    debug_comments: bool,
    split_weights: bool,
}

impl Composer {
    pub fn new() -> Self {
        Self {
            model_name: None,
            debug_comments: false,
            split_weights: true,
        }
    }

    /// Override the graph name for the entry function and file stems.
    pub fn with_model_name(mut self, name: &str) -> Self {
        self.model_name = Some(name.to_string());
        self
    }

    /// Bracket each node's statements with cosmetic position markers.
    pub fn with_debug_comments(mut self, on: bool) -> Self {
        self.debug_comments = on;
        self
    }

    /// Place inlined weight arrays in a separate header instead of the
    /// source file.
    pub fn with_split_weights(mut self, on: bool) -> Self {
        self.split_weights = on;
        self
    }

    pub fn compose(
        &self,
        graph: &Graph,
        registry: &EmitterRegistry,
    ) -> CompileResult<Artifacts> {
        let order = graph.topo_order();

        // Resolve every emitter first: coverage gaps abort the run
        // before any emission work happens.
        let mut planned = Vec::with_capacity(order.len());
        for &id in order {
            planned.push((id, registry.require(graph, id)?));
        }

        // Per-node emission is independent; the indexed collect puts
        // the snippets back in execution order.
        let snippets = planned
            .par_iter()
            .map(|&(id, emitter)| {
                let node = graph.node(id);
                log::debug!("emit {}: {} ({})", id, node.name, node.op_type);
                emitter.emit(&EmitContext::new(graph, id))
            })
            .collect::<CompileResult<Vec<Snippet>>>()?;

        let display_name = self
            .model_name
            .clone()
            .unwrap_or_else(|| graph.name().to_string());
        let stem = sanitize_identifier(&display_name);
        let banner = format!(
            "// Auto-generated by lithograph v{}. Do not edit.\n// model: {}  graph: {}\n",
            env!("CARGO_PKG_VERSION"),
            display_name,
            Fingerprint::of(graph),
        );

        let includes = collect_includes(&snippets);
        let weight_blocks: Vec<&str> =
            snippets.iter().filter_map(|s| s.weight.as_deref()).collect();
        let signature = self.signature(graph, &stem);
        let body = self.render_body(graph, &snippets);

        log::info!(
            "model `{}`: composed {} node(s), {} include(s), {} weight block(s)",
            display_name,
            snippets.len(),
            includes.len(),
            weight_blocks.len(),
        );

        let split = self.split_weights && !weight_blocks.is_empty();
        let source = render_source(&banner, &stem, &includes, &weight_blocks, split, &signature, &body);
        let header = render_header(&banner, &stem, &signature);
        let weights = if split {
            Some(render_weights(&banner, &stem, &weight_blocks))
        } else {
            None
        };

        Ok(Artifacts {
            model_name: stem,
            header,
            source,
            weights,
        })
    }

    fn signature(&self, graph: &Graph, stem: &str) -> String {
        let mut params = vec!["Context& ctx".to_string()];
        for &id in graph.topo_order() {
            let node = graph.node(id);
            if node.is_input() {
                params.push(format!("Tensor* {}", sanitize_identifier(&node.name)));
            }
        }
        format!("void get_{stem}_ctx({})", params.join(", "))
    }

    fn render_body(&self, graph: &Graph, snippets: &[Snippet]) -> String {
        let mut blocks = Vec::with_capacity(snippets.len());
        for (position, (&id, snippet)) in
            graph.topo_order().iter().zip(snippets).enumerate()
        {
            let node = graph.node(id);
            let mut lines: Vec<String> = Vec::new();
            if self.debug_comments {
                let device = node
                    .device_hint
                    .as_deref()
                    .map(|d| format!(" @{d}"))
                    .unwrap_or_default();
                lines.push(format!(
                    "// <<< [{position}] {} ({}){device} >>>",
                    node.name, node.op_type
                ));
            }
            lines.extend(snippet.exec.lines().map(str::to_string));
            if self.debug_comments {
                lines.push(format!("// >>> [{position}] {} <<<", node.name));
            }
            let indented: Vec<String> =
                lines.into_iter().map(|l| format!("    {l}")).collect();
            blocks.push(indented.join("\n"));
        }
        blocks.join("\n\n")
    }
}

impl Default for Composer {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_includes(snippets: &[Snippet]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut includes = Vec::new();
    for snippet in snippets {
        for header in &snippet.headers {
            if seen.insert(header.as_str()) {
                includes.push(format!("#include \"{header}\""));
            }
        }
    }
    includes
}

fn render_source(
    banner: &str,
    stem: &str,
    includes: &[String],
    weight_blocks: &[&str],
    split: bool,
    signature: &str,
    body: &str,
) -> String {
    let mut out = String::from(banner);
    out.push('\n');
    out.push_str(&format!("#include \"{stem}.hpp\"\n"));
    if !includes.is_empty() || split {
        out.push('\n');
        for include in includes {
            out.push_str(include);
            out.push('\n');
        }
        if split {
            out.push_str(&format!("#include \"{stem}_weights.hpp\"\n"));
        }
    }
    if !split && !weight_blocks.is_empty() {
        out.push('\n');
        for block in weight_blocks {
            out.push_str(block);
            out.push('\n');
        }
    }
    out.push('\n');
    out.push_str(signature);
    if body.is_empty() {
        out.push_str(" {\n}\n");
    } else {
        out.push_str(&format!(" {{\n{body}\n}}\n"));
    }
    out
}

fn render_header(banner: &str, stem: &str, signature: &str) -> String {
    let guard = format!("_MODELS_{}_H", stem.to_uppercase());
    format!(
        "{banner}\n#ifndef {guard}\n#define {guard}\n\n\
         #include \"uTensor/uTensor.hpp\"\n\n\
         {signature};\n\n\
         #endif  // {guard}\n"
    )
}

fn render_weights(banner: &str, stem: &str, weight_blocks: &[&str]) -> String {
    let guard = format!("_MODELS_{}_WEIGHTS_H", stem.to_uppercase());
    let mut out = format!("{banner}\n#ifndef {guard}\n#define {guard}\n\n");
    for block in weight_blocks {
        out.push_str(block);
        out.push('\n');
    }
    out.push_str(&format!("\n#endif  // {guard}\n"));
    out
}

// ─── Artifacts ─────────────────────────────────────────────────────

/// The composed output bundle. File names derive from `model_name`.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    /// Sanitized stem used for file names and the entry function.
    pub model_name: String,
    /// Declaration header (`<model>.hpp`).
    pub header: String,
    /// Model source (`<model>.cpp`).
    pub source: String,
    /// Weight header (`<model>_weights.hpp`), present only when weight
    /// arrays were hoisted out of the source file.
    pub weights: Option<String>,
}

impl Artifacts {
    pub fn header_name(&self) -> String {
        format!("{}.hpp", self.model_name)
    }

    pub fn source_name(&self) -> String {
        format!("{}.cpp", self.model_name)
    }

    pub fn weights_name(&self) -> String {
        format!("{}_weights.hpp", self.model_name)
    }

    /// Write all artifacts under `dir`, creating it if needed. Returns
    /// the paths written.
    pub fn write_to(&self, dir: &Path) -> CompileResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|source| CompileError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let mut files = vec![
            (self.header_name(), &self.header),
            (self.source_name(), &self.source),
        ];
        if let Some(weights) = &self.weights {
            files.push((self.weights_name(), weights));
        }
        let mut written = Vec::with_capacity(files.len());
        for (name, contents) in files {
            let path = dir.join(name);
            std::fs::write(&path, contents).map_err(|source| CompileError::Io {
                path: path.clone(),
                source,
            })?;
            written.push(path);
        }
        Ok(written)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ElementType, GraphBuilder, Payload, TensorInfo};
    use crate::transform::{PassConfig, Transform};

    fn t(shape: &[usize]) -> TensorInfo {
        TensorInfo::new(ElementType::F32, Some(shape.to_vec()))
    }

    fn linear_graph() -> Graph {
        let mut b = GraphBuilder::new("mlp");
        b.input("x", ElementType::F32, &[1, 4]);
        b.constant("w", Payload::F32(vec![0.25; 8]), &[4, 2]);
        b.node("fc", "MatMul", &["x", "w"], vec![t(&[1, 2])]);
        b.node("out", "Relu", &["fc"], vec![t(&[1, 2])]);
        b.build(&["out"]).unwrap()
    }

    #[test]
    fn test_compose_orders_statements_by_execution() {
        let g = linear_graph();
        let artifacts = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        assert_eq!(artifacts.model_name, "mlp");
        assert!(artifacts.source.contains("#include \"mlp.hpp\""));
        assert!(artifacts
            .source
            .contains("void get_mlp_ctx(Context& ctx, Tensor* x) {"));

        let add_x = artifacts.source.find("ctx.add(x, \"x:0\");").unwrap();
        let push_fc = artifacts.source.find("new MatMulOp<float>()").unwrap();
        let push_out = artifacts.source.find("new ReluOp<float>()").unwrap();
        assert!(add_x < push_fc && push_fc < push_out);

        // No inline pass ran, so no weight artifact and no hoisted data.
        assert!(artifacts.weights.is_none());
        assert!(!artifacts.source.contains("mlp_weights.hpp"));
    }

    #[test]
    fn test_header_declares_entry_function() {
        let g = linear_graph();
        let artifacts = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        assert!(artifacts.header.contains("#ifndef _MODELS_MLP_H"));
        assert!(artifacts.header.contains("#include \"uTensor/uTensor.hpp\""));
        assert!(artifacts
            .header
            .contains("void get_mlp_ctx(Context& ctx, Tensor* x);"));
    }

    #[test]
    fn test_header_snapshot() {
        let g = linear_graph();
        let artifacts = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        // The graph fingerprint in the banner is content-derived; pin
        // it so the snapshot covers only the layout.
        let fp = Fingerprint::of(&g).to_string();
        let header = artifacts.header.replace(&fp, "#000000000000");
        insta::assert_snapshot!(header, @r###"
        // Auto-generated by lithograph v0.1.0. Do not edit.
        // model: mlp  graph: #000000000000

        #ifndef _MODELS_MLP_H
        #define _MODELS_MLP_H

        #include "uTensor/uTensor.hpp"

        void get_mlp_ctx(Context& ctx, Tensor* x);

        #endif  // _MODELS_MLP_H
        "###);
    }

    #[test]
    fn test_includes_deduplicated_first_seen() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[4]);
        b.node("r1", "Relu", &["x"], vec![t(&[4])]);
        b.node("r2", "Relu", &["r1"], vec![t(&[4])]);
        b.node("s", "Softmax", &["r2"], vec![t(&[4])]);
        let g = b.build(&["s"]).unwrap();

        let artifacts = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();
        let count = artifacts
            .source
            .matches("#include \"uTensor/ops/NnOps.hpp\"")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_inlined_weights_split_into_header() {
        let g = crate::transform::Inline
            .apply(linear_graph(), &PassConfig::empty())
            .unwrap();
        let artifacts = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        let weights = artifacts.weights.as_deref().unwrap();
        assert!(weights.contains("#ifndef _MODELS_MLP_WEIGHTS_H"));
        assert!(weights.contains("static const float w_0_data[8]"));
        assert!(artifacts.source.contains("#include \"mlp_weights.hpp\""));
        assert!(!artifacts.source.contains("static const float"));
    }

    #[test]
    fn test_inlined_weights_embedded_when_not_split() {
        let g = crate::transform::Inline
            .apply(linear_graph(), &PassConfig::empty())
            .unwrap();
        let artifacts = Composer::new()
            .with_split_weights(false)
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        assert!(artifacts.weights.is_none());
        assert!(artifacts.source.contains("static const float w_0_data[8]"));
        assert!(!artifacts.source.contains("mlp_weights.hpp"));
    }

    #[test]
    fn test_model_name_override() {
        let g = linear_graph();
        let artifacts = Composer::new()
            .with_model_name("deep mlp")
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        assert_eq!(artifacts.model_name, "deep_mlp");
        assert_eq!(artifacts.source_name(), "deep_mlp.cpp");
        assert!(artifacts.source.contains("void get_deep_mlp_ctx("));
        assert!(artifacts.source.contains("// model: deep mlp"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let g = linear_graph();
        let registry = EmitterRegistry::with_builtins();
        let a = Composer::new().compose(&g, &registry).unwrap();
        let b = Composer::new().compose(&g, &registry).unwrap();
        assert_eq!(a, b);
        assert!(a.source.contains(&Fingerprint::of(&g).to_string()));
    }

    #[test]
    fn test_debug_markers_are_cosmetic() {
        let g = linear_graph();
        let registry = EmitterRegistry::with_builtins();
        let plain = Composer::new().compose(&g, &registry).unwrap();
        let debug = Composer::new()
            .with_debug_comments(true)
            .compose(&g, &registry)
            .unwrap();

        assert!(debug.source.contains("// <<< [2] fc (MatMul) >>>"));
        assert!(debug.source.contains("// >>> [2] fc <<<"));

        let stripped: Vec<&str> = debug
            .source
            .lines()
            .filter(|l| {
                let l = l.trim_start();
                !l.starts_with("// <<<") && !l.starts_with("// >>>")
            })
            .collect();
        let plain_lines: Vec<&str> = plain.source.lines().collect();
        assert_eq!(stripped, plain_lines);
    }

    #[test]
    fn test_empty_graph_composes() {
        let g = GraphBuilder::new("empty").build(&[]).unwrap();
        let artifacts = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        assert!(artifacts.source.contains("void get_empty_ctx(Context& ctx) {\n}"));
        assert!(artifacts.weights.is_none());
    }

    #[test]
    fn test_unregistered_op_aborts_composition() {
        let mut b = GraphBuilder::new("m");
        b.input("x", ElementType::F32, &[4]);
        b.node("g", "Gather", &["x"], vec![t(&[2])]);
        let g = b.build(&["g"]).unwrap();

        let err = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap_err();
        match err {
            CompileError::UnsupportedOperator { op_type, node } => {
                assert_eq!(op_type, "Gather");
                assert_eq!(node, "g");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_write_to_emits_all_files() {
        let g = crate::transform::Inline
            .apply(linear_graph(), &PassConfig::empty())
            .unwrap();
        let artifacts = Composer::new()
            .compose(&g, &EmitterRegistry::with_builtins())
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let written = artifacts.write_to(dir.path()).unwrap();
        assert_eq!(written.len(), 3);
        for path in &written {
            assert!(path.exists(), "missing {}", path.display());
        }
        let source = std::fs::read_to_string(dir.path().join("mlp.cpp")).unwrap();
        assert!(source.starts_with("// Auto-generated by lithograph"));
    }
}
