//! Named pass pipeline.
//!
//! Pass lists arrive as strings (`inline`, `dropout(name_pattern=...)`),
//! are parsed into `PassSpec`s and resolved against a `PassRegistry`
//! before anything runs: one unknown name fails the whole pipeline up
//! front. Each applied pass is followed by a structural revalidation, so
//! a buggy rewrite surfaces at its own boundary instead of corrupting
//! later stages.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CompileError, CompileResult};
use crate::ir::Graph;
use crate::transform::{self, PassConfig, PassRegistry, Transform};

// ─── Pass Specs ────────────────────────────────────────────────────

/// A configured pass reference: name plus string options.
#[derive(Debug, Clone, PartialEq)]
pub struct PassSpec {
    pub name: String,
    pub options: BTreeMap<String, String>,
}

impl PassSpec {
    pub fn bare(name: &str) -> Self {
        Self {
            name: name.to_string(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_option(name: &str, key: &str, value: &str) -> Self {
        let mut spec = Self::bare(name);
        spec.options.insert(key.to_string(), value.to_string());
        spec
    }

    /// Parse `name` or `name(key=value,key2=value2)`. Values may be
    /// single- or double-quoted to protect commas.
    pub fn parse(text: &str) -> CompileResult<Self> {
        let text = text.trim();
        let malformed = |reason: String| CompileError::MalformedPassSpec {
            spec: text.to_string(),
            reason,
        };

        if text.is_empty() {
            return Err(malformed("empty spec".to_string()));
        }
        let Some(open) = text.find('(') else {
            if text.contains(')') {
                return Err(malformed("unexpected `)`".to_string()));
            }
            return Ok(Self::bare(text));
        };
        if !text.ends_with(')') {
            return Err(malformed("missing closing `)`".to_string()));
        }
        let name = text[..open].trim();
        if name.is_empty() {
            return Err(malformed("empty pass name".to_string()));
        }

        let inner = &text[open + 1..text.len() - 1];
        let mut options = BTreeMap::new();
        for chunk in split_options(inner) {
            let chunk = chunk.trim();
            if chunk.is_empty() {
                continue;
            }
            let Some((key, value)) = chunk.split_once('=') else {
                return Err(malformed(format!("option `{chunk}` is missing `=`")));
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(malformed(format!("option `{chunk}` has an empty key")));
            }
            options.insert(key.to_string(), unquote(value.trim()).to_string());
        }
        Ok(Self {
            name: name.to_string(),
            options,
        })
    }
}

impl fmt::Display for PassSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.options.is_empty() {
            return write!(f, "{}", self.name);
        }
        let opts: Vec<String> = self
            .options
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        write!(f, "{}({})", self.name, opts.join(","))
    }
}

/// Split on commas outside quotes. Parens need no balancing: the caller
/// already stripped the outermost pair by position.
fn split_options(inner: &str) -> Vec<&str> {
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut quote: Option<char> = None;
    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (Some(q), _) if c == q => quote = None,
            (None, '\'') | (None, '"') => quote = Some(c),
            (None, ',') => {
                chunks.push(&inner[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    chunks.push(&inner[start..]);
    chunks
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'\'' || first == b'"') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// Parse a list of textual pass specs.
pub fn parse_pass_specs(texts: &[String]) -> CompileResult<Vec<PassSpec>> {
    texts.iter().map(|t| PassSpec::parse(t)).collect()
}

/// The stock pipeline. `refcount` is last so counts reflect the graph
/// the emitters will see.
pub fn default_passes() -> Vec<PassSpec> {
    vec![
        PassSpec::with_option(
            "dropout",
            "name_pattern",
            transform::dropout::DEFAULT_NAME_PATTERN,
        ),
        PassSpec::bare("quantize"),
        PassSpec::bare("inline"),
        PassSpec::bare("cleanup"),
        PassSpec::bare("refcount"),
    ]
}

// ─── Pipeline ──────────────────────────────────────────────────────

/// An ordered list of resolved passes with their configurations.
pub struct Pipeline {
    stages: Vec<(Box<dyn Transform>, PassConfig)>,
}

impl Pipeline {
    /// Resolve every spec before running anything. The first unknown
    /// name fails the whole list.
    pub fn from_specs(registry: &PassRegistry, specs: &[PassSpec]) -> CompileResult<Self> {
        let mut stages = Vec::with_capacity(specs.len());
        for spec in specs {
            let pass = registry
                .create(&spec.name)
                .ok_or_else(|| CompileError::UnknownPass {
                    name: spec.name.clone(),
                })?;
            stages.push((pass, PassConfig::new(spec.options.clone())));
        }
        Ok(Self { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Apply the passes in order, revalidating after each one.
    pub fn run(&self, graph: Graph) -> CompileResult<Graph> {
        let mut graph = graph;
        for (pass, cfg) in &self.stages {
            let before = graph.len();
            graph = pass.apply(graph, cfg)?;
            graph.validate().map_err(|e| CompileError::InvariantViolation {
                detail: format!("pass `{}` produced an invalid graph: {e}", pass.name()),
            })?;
            log::info!(
                "pass {}: {} -> {} node(s)",
                pass.name(),
                before,
                graph.len()
            );
        }
        Ok(graph)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stages: Vec<&str> = self.stages.iter().map(|(pass, _)| pass.name()).collect();
        f.debug_struct("Pipeline").field("stages", &stages).finish()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
