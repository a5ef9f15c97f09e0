pub mod emit;
pub mod error;
pub mod export;
pub mod fingerprint;
pub mod frontend;
pub mod ir;
pub mod pipeline;
pub mod transform;

// Re-exports for the common entry points
pub use error::{CompileError, CompileResult};
pub use fingerprint::Fingerprint;
pub use ir::{Graph, GraphBuilder};
