//! Checker Adapter (C10): per-vulnerability-class source/sink predicates,
//! transfer filters, and confidence scoring (spec §4.10).

mod free_non_heap;
mod null_deref;
mod stack_address;
mod uninitialized;
mod use_after_free;

pub use free_non_heap::FreeOfNonHeapChecker;
pub use null_deref::NullPointerDerefChecker;
pub use stack_address::StackAddressChecker;
pub use uninitialized::UninitializedUseChecker;
pub use use_after_free::UseAfterFreeChecker;

use crate::bugreport::{BugReport, BugReportManager, BugTypeId, DiagStep};
use crate::inter::AnalysisResult;
use crate::ir::{FunctionId, InstId, Module, ValueId};
use crate::reachability::{ReachabilityEngine, SourceSinkOracle, Witness, WitnessStep};
use crate::vfg::{ValueFlowGraph, VfgNode};

/// Base confidence before any refinement (spec §4.10).
pub const BASE_SCORE: i32 = 70;
/// Added when a precision-improving side analysis (null-check refinement,
/// `--use-npa`) is active (spec §4.10).
pub const NPA_BONUS: i32 = 15;

/// Shared read-only context every concrete checker runs against. Grounded on
/// spec §5's "external consumers (C7, C8) read but never write" rule: none
/// of this ever mutates `AnalysisResult`.
pub struct CheckerContext<'a> {
    pub module: &'a Module,
    pub analysis: &'a AnalysisResult,
    pub vfg: &'a ValueFlowGraph,
    /// `--use-npa`: enables the null-check-refinement confidence bonus.
    pub use_npa: bool,
    /// `--ctx`: enables k-call-string context-sensitive reachability.
    pub context_sensitive: bool,
    /// Call-string length used when `context_sensitive` is set (spec §6).
    pub k_context: usize,
}

impl<'a> CheckerContext<'a> {
    /// Since the minimal IR contract (spec §6) carries no source-location
    /// fields, diagnostics key off the defining function's name and the
    /// instruction's own identity as a stable location proxy.
    pub fn locate(&self, node: VfgNode) -> (String, u32) {
        let name = self
            .module
            .functions
            .get(&node.function)
            .map(|f| f.name.clone())
            .unwrap_or_else(|| format!("fn{}", node.function.0));
        let line = match node.value {
            ValueId::Inst(i) => i.0,
            ValueId::Arg(_, idx) => idx,
            ValueId::Global(g) => g.0,
            ValueId::PseudoOutput(i, idx) => i.0.wrapping_add(idx),
        };
        (name, line)
    }

    pub fn function_name(&self, f: FunctionId) -> String {
        self.module.functions.get(&f).map(|fun| fun.name.clone()).unwrap_or_else(|| format!("fn{}", f.0))
    }
}

/// Converts a `Witness` into `DiagStep`s, tagging the first and last step
/// with the checker's own source/sink descriptions and leaving any interior
/// step a generic "value flows through here" note.
pub fn witness_to_diag_steps(ctx: &CheckerContext, witness: &Witness, source_tip: &str, sink_tip: &str) -> Vec<DiagStep> {
    let mut steps = Vec::new();
    let node_count = witness.steps.iter().filter(|s| matches!(s, WitnessStep::Node(_))).count();
    let mut seen = 0usize;
    for step in &witness.steps {
        match step {
            WitnessStep::Truncated => {
                steps.push(DiagStep::new("…", 0, "path truncated"));
            }
            WitnessStep::Node(node) => {
                let (file, line) = ctx.locate(*node);
                let tip = if seen == 0 {
                    source_tip.to_string()
                } else if seen + 1 == node_count {
                    sink_tip.to_string()
                } else {
                    "value flows through here".to_string()
                };
                let mut diag = DiagStep::new(file, line, tip);
                diag.function = Some(ctx.function_name(node.function));
                steps.push(diag);
                seen += 1;
            }
        }
    }
    steps
}

pub fn confidence_score(ctx: &CheckerContext, npa_applies: bool) -> i32 {
    if npa_applies && ctx.use_npa {
        BASE_SCORE + NPA_BONUS
    } else {
        BASE_SCORE
    }
}

/// Runs one checker's reachability query and inserts a `BugReport` per hit.
pub fn run_checker<O: SourceSinkOracle>(ctx: &CheckerContext, oracle: &O, mgr: &mut BugReportManager, type_id: BugTypeId, source_tip: &str, sink_tip: &str, score: i32) {
    let mut engine = ReachabilityEngine::new(ctx.vfg);
    if ctx.context_sensitive {
        engine = engine.with_context(ctx.k_context);
    }
    for hit in engine.find_reachable(oracle) {
        let diag_steps = witness_to_diag_steps(ctx, &hit.witness, source_tip, sink_tip);
        mgr.insert_report(
            type_id,
            BugReport {
                dominated: false,
                valid: true,
                score,
                diag_steps,
            },
        );
    }
}

/// The `CallKind` of `inst` in `func`, if it is a call instruction at all.
/// Concrete checkers use this as their transfer filter (spec §8 scenarios 3
/// and 5: realloc blocks UAF flow, malloc/calloc/realloc suppress
/// free-of-non-heap reports).
pub(crate) fn call_kind_at(module: &Module, inst: InstId, func: FunctionId) -> Option<crate::ir::CallKind> {
    let f = module.functions.get(&func)?;
    let i = f.insts.get(&inst)?;
    match &i.opcode {
        crate::ir::Opcode::Call(info) => Some(info.kind),
        _ => None,
    }
}
