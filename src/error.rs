//! Error types for the lithograph compiler.
//!
//! One enum covers the whole pipeline: graph construction, ordering,
//! transform passes, emission and export. Library code propagates with
//! `?`; only the CLI prints and exits.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for graph compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("graph contains a cycle through node `{node}`")]
    Cycle { node: String },

    #[error("node `{node}` references `{reference}`, which does not exist")]
    DanglingReference { node: String, reference: String },

    #[error("unknown pass `{name}`")]
    UnknownPass { name: String },

    #[error("malformed pass spec `{spec}`: {reason}")]
    MalformedPassSpec { spec: String, reason: String },

    #[error("graph invariant violated: {detail}")]
    InvariantViolation { detail: String },

    #[error("constant node `{node}` has no payload data")]
    MissingConstantData { node: String },

    #[error("dropout cluster `{cluster}` has {found} candidate external inputs, expected exactly 1")]
    AmbiguousClusterInput { cluster: String, found: usize },

    #[error("no emitter registered for op type `{op_type}` (node `{node}`)")]
    UnsupportedOperator { op_type: String, node: String },

    #[error("tensor `{tensor}` has no shape, which this stage requires")]
    MissingTensorShape { tensor: String },

    #[error("malformed model file: {detail}")]
    MalformedModel { detail: String },

    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", path.display())]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
