//! Graph transformation passes.
//!
//! A pass is a pure rewrite: it takes ownership of a graph and returns a
//! new one (or an error), never touching shared state. Passes are looked
//! up by name in a `PassRegistry` and configured with the string options
//! parsed from their pass spec.

pub mod batch_norm;
pub mod cleanup;
pub mod dropout;
pub mod inline;
pub mod quantize;
pub mod refcount;

use std::collections::BTreeMap;

use crate::error::CompileResult;
use crate::ir::Graph;

pub use batch_norm::BatchNorm;
pub use cleanup::Cleanup;
pub use dropout::Dropout;
pub use inline::Inline;
pub use quantize::Quantize;
pub use refcount::RefCount;

// ─── Pass Configuration ────────────────────────────────────────────

/// String options for one pass instance. Passes read the keys they know
/// and fall back to their own defaults.
#[derive(Debug, Clone, Default)]
pub struct PassConfig {
    options: BTreeMap<String, String>,
}

impl PassConfig {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(options: BTreeMap<String, String>) -> Self {
        Self { options }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(|s| s.as_str())
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }
}

// ─── Transform Trait ───────────────────────────────────────────────

/// One named graph rewrite.
pub trait Transform: Send + Sync {
    fn name(&self) -> &'static str;

    /// One line for `litho passes`.
    fn describe(&self) -> &'static str;

    fn apply(&self, graph: Graph, cfg: &PassConfig) -> CompileResult<Graph>;
}

// ─── Registry ──────────────────────────────────────────────────────

type Factory = fn() -> Box<dyn Transform>;

/// Name to constructor table. Built-ins are pre-registered; callers may
/// register their own passes under new names.
pub struct PassRegistry {
    factories: BTreeMap<String, Factory>,
}

impl PassRegistry {
    pub fn empty() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in pass.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(|| Box::new(BatchNorm));
        registry.register(|| Box::new(Cleanup));
        registry.register(|| Box::new(Dropout));
        registry.register(|| Box::new(Inline));
        registry.register(|| Box::new(Quantize));
        registry.register(|| Box::new(RefCount));
        registry
    }

    /// Register a pass under the name it reports. Re-registering a name
    /// replaces the previous factory.
    pub fn register(&mut self, factory: Factory) {
        let name = factory().name();
        self.factories.insert(name.to_string(), factory);
    }

    pub fn create(&self, name: &str) -> Option<Box<dyn Transform>> {
        self.factories.get(name).map(|f| f())
    }

    /// `(name, description)` for every registered pass, sorted by name.
    pub fn list(&self) -> Vec<(String, &'static str)> {
        self.factories
            .iter()
            .map(|(name, f)| (name.clone(), f().describe()))
            .collect()
    }
}

impl Default for PassRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────
