//! Inter Engine (C6): drives the intra engine to a whole-module fixed point.
//!
//! Grounded on the original inter-procedural driver's bottom-up worklist
//! together with `scc_detector.rs`'s back-edge discipline: the call graph is
//! reduced to a DAG by cutting back-edges, and that DAG's postorder gives a
//! callees-before-callers processing order (spec §4.6).

use crate::callgraph::CallGraphState;
use crate::config::AnalysisConfig;
use crate::funcptr::FunctionPointerResults;
use crate::intra::{FunctionSummary, IntraEngine};
use crate::ir::{FunctionId, Module};
use crate::memory::MemoryArena;
use crate::points_to::PointsToGraph;
use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

/// Everything the inter-procedural fixed point produced, handed to C7/C8/C9.
pub struct AnalysisResult {
    pub arena: MemoryArena,
    pub summaries: FxHashMap<FunctionId, FunctionSummary>,
    pub pt_graphs: FxHashMap<FunctionId, PointsToGraph>,
    pub callgraph: CallGraphState,
    pub funcptr: FunctionPointerResults,
    /// How many rounds actually ran before quiescence (or the cap).
    pub rounds_run: u32,
    /// Set if the cap was hit before the work-set drained, or if any
    /// function's intra pass itself widened (spec §4.6 "conservative" flag).
    pub conservative: bool,
}

pub struct InterEngine<'a> {
    module: &'a Module,
    config: &'a AnalysisConfig,
}

impl<'a> InterEngine<'a> {
    pub fn new(module: &'a Module, config: &'a AnalysisConfig) -> Self {
        Self { module, config }
    }

    pub fn run(&self) -> AnalysisResult {
        let mut arena = MemoryArena::new();
        let mut callgraph = CallGraphState::new();

        for &f in &self.module.function_order {
            callgraph.ensure_node(f);
            for callee in self.module.direct_callees(f) {
                callgraph.ensure_node(callee);
                callgraph.add_edge(f, callee);
            }
        }
        callgraph.detect_back_edges();

        let bottom_up = Self::bottom_up_order(&callgraph, self.module);

        let mut summaries: FxHashMap<FunctionId, FunctionSummary> = FxHashMap::default();
        let mut pt_graphs: FxHashMap<FunctionId, PointsToGraph> = FxHashMap::default();
        let mut funcptr = FunctionPointerResults::new();
        let mut conservative = false;
        let mut work: IndexSet<FunctionId> = bottom_up.iter().copied().collect();
        let mut rounds_run = 0;
        let started = std::time::Instant::now();

        for _round in 0..self.config.max_rounds {
            rounds_run += 1;
            if work.is_empty() {
                break;
            }
            let current: Vec<FunctionId> = bottom_up.iter().copied().filter(|f| work.contains(f)).collect();
            work.clear();

            for f in current {
                let func = self.module.function(f);
                let engine = IntraEngine::new(self.module, func, self.config, &summaries, &callgraph);
                let result = engine.run(&mut arena);
                if result.conservative {
                    conservative = true;
                }

                let sig_changed = match summaries.get(&f) {
                    Some(old) => old.interface_signature() != result.summary.interface_signature(),
                    None => true,
                };
                let ptr_changed = funcptr.update_and_detect_changes(f, result.callsite_targets.clone());

                for targets in result.callsite_targets.values() {
                    for &callee in targets {
                        callgraph.ensure_node(callee);
                        callgraph.add_edge(f, callee);
                    }
                }

                summaries.insert(f, result.summary);
                pt_graphs.insert(f, result.pt_graph);

                if sig_changed || ptr_changed {
                    let callers: Vec<FunctionId> = callgraph.callers(f).collect();
                    for caller in callers {
                        work.insert(caller);
                    }
                }
            }

            if work.is_empty() {
                break;
            }

            // spec §5/§7/§4.6: the deadline is checked after every round; a
            // round that runs past it stops the fixed point early with the
            // conservative flag set rather than keep iterating unbounded.
            if started.elapsed().as_secs_f64() > self.config.timeout_seconds {
                conservative = true;
                break;
            }

            callgraph.detect_back_edges();
        }

        if !work.is_empty() {
            conservative = true;
        }

        AnalysisResult {
            arena,
            summaries,
            pt_graphs,
            callgraph,
            funcptr,
            rounds_run,
            conservative,
        }
    }

    /// Postorder DFS over the (by now acyclic) forward call graph: every
    /// callee is fully visited before its caller is pushed, which is exactly
    /// a bottom-up processing order.
    fn bottom_up_order(callgraph: &CallGraphState, module: &Module) -> Vec<FunctionId> {
        let mut visited: FxHashSet<FunctionId> = FxHashSet::default();
        let mut out = Vec::with_capacity(module.function_order.len());
        for &f in &module.function_order {
            Self::visit(f, callgraph, &mut visited, &mut out);
        }
        out
    }

    fn visit(u: FunctionId, callgraph: &CallGraphState, visited: &mut FxHashSet<FunctionId>, out: &mut Vec<FunctionId>) {
        if !visited.insert(u) {
            return;
        }
        for v in callgraph.callees(u).collect::<Vec<_>>() {
            Self::visit(v, callgraph, visited, out);
        }
        out.push(u);
    }
}
