use super::access_path::AccessPath;
use crate::ir::{FunctionId, InstId, ValueId};
use crate::memory::MemObjectId;
use indexmap::{IndexMap, IndexSet};

/// A target in an output's simplified points-to set: either another
/// access-path reachable through the callee's own parameters/globals, or a
/// locally-allocated object that has escaped (spec §3 `escape_objs`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OutputTarget {
    Input(AccessPath),
    Escaped(MemObjectId),
}

/// One element of `FunctionSummary::outputs` (spec §3/§4.3 `OutputItem`).
/// Element 0 (the return value) has `path = AccessPath::direct(<the call
/// result itself>)` and is never used for the write-back half of summary
/// application; elements 1..N describe an actual side-effecting write.
#[derive(Debug, Clone)]
pub struct OutputItem {
    pub path: AccessPath,
    pub pts: Vec<OutputTarget>,
    pub is_pointer: bool,
}

/// Caller/callee call-site key used by the escape and argument caches (spec
/// §3 `func_arg`, `func_escape`).
pub type CallSiteCalleeKey = (InstId, FunctionId);

/// Per-function record owned by the intra engine (spec §3 `Function
/// Summary`).
#[derive(Debug, Clone, Default)]
pub struct FunctionSummary {
    pub inputs: IndexMap<ValueId, AccessPath>,
    pub outputs: Vec<OutputItem>,
    pub escape_objs: IndexSet<MemObjectId>,
    /// Resolves spec §9's open question: the canonical cache key for a
    /// caller-side escape materialization is the (call site, callee,
    /// callee-object) triple. A cache hit always returns an
    /// identity-equal object; a miss re-materializes once and is cached
    /// for the remainder of the session.
    pub func_escape: IndexMap<(InstId, FunctionId, MemObjectId), MemObjectId>,
}

impl FunctionSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// The external interface used for change detection (spec §4.6: "if the
    /// function's external interface (inputs signature, outputs signature,
    /// escape set) changed, add its callers to the work-set").
    pub fn interface_signature(&self) -> InterfaceSignature {
        InterfaceSignature {
            input_count: self.inputs.len(),
            input_keys: self.inputs.keys().copied().collect(),
            output_count: self.outputs.len(),
            escape_count: self.escape_objs.len(),
            escape_set: self.escape_objs.iter().copied().collect(),
        }
    }
}

/// A cheap, comparable snapshot of a summary's externally observable shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceSignature {
    input_count: usize,
    input_keys: Vec<ValueId>,
    output_count: usize,
    escape_count: usize,
    escape_set: Vec<MemObjectId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_summary_has_equal_signature() {
        let mut s1 = FunctionSummary::new();
        s1.inputs.insert(
            ValueId::Arg(FunctionId(0), 0),
            AccessPath::direct(ValueId::Arg(FunctionId(0), 0)),
        );
        let s2 = s1.clone();
        assert_eq!(s1.interface_signature(), s2.interface_signature());
    }

    #[test]
    fn changed_escape_set_changes_signature() {
        let mut s1 = FunctionSummary::new();
        let mut s2 = s1.clone();
        s2.escape_objs.insert(MemObjectId(3));
        assert_ne!(s1.interface_signature(), s2.interface_signature());
        s1.escape_objs.insert(MemObjectId(3));
        assert_eq!(s1.interface_signature(), s2.interface_signature());
    }
}
