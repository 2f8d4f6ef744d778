//! Intra Engine (C3): per-function, field-sensitive flow-sensitive analysis.

mod access_path;
mod engine;
mod summary;

pub use access_path::AccessPath;
pub use engine::{IntraEngine, IntraResult};
pub use summary::{CallSiteCalleeKey, FunctionSummary, InterfaceSignature, OutputItem, OutputTarget};
