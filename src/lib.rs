//! A field-sensitive, flow-sensitive points-to and value-flow analysis
//! engine: intra-procedural transfer functions (C1-C3), a bottom-up
//! inter-procedural fixed point over a dynamically refined call graph
//! (C4-C6), a value-flow graph (C7), source/sink reachability (C8), and a
//! bug-report pipeline (C9-C10) driving five concrete vulnerability
//! checkers.
//!
//! The core is single-threaded and session-scoped (spec §5): [`Session`]
//! owns the memory arena, call-graph state, and bug-report manager for
//! exactly one analysis run, and forbids a second session from overlapping
//! it in the same process.

pub mod bugreport;
pub mod callgraph;
pub mod checkers;
pub mod config;
pub mod errors;
pub mod funcptr;
pub mod inter;
pub mod intra;
pub mod ir;
pub mod memory;
pub mod points_to;
pub mod reachability;
pub mod vfg;

use bugreport::BugReportManager;
use checkers::{CheckerContext, FreeOfNonHeapChecker, NullPointerDerefChecker, StackAddressChecker, UninitializedUseChecker, UseAfterFreeChecker};
use config::AnalysisConfig;
use errors::{LotusFlowError, Result};
use inter::{AnalysisResult, InterEngine};
use ir::Module;
use std::sync::atomic::{AtomicBool, Ordering};
use vfg::VfgBuilder;

/// Guards against overlapping sessions in the same process (spec §5:
/// "multiple sessions must not overlap in time on the same process").
static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// Which vulnerability class a checker run targets (spec §6 CLI
/// `--vuln-type`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VulnType {
    NullPointer,
    UseAfterFree,
    Uninitialized,
    FreeNonHeap,
    StackAddress,
}

impl std::str::FromStr for VulnType {
    type Err = LotusFlowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "nullpointer" => Ok(VulnType::NullPointer),
            "useafterfree" => Ok(VulnType::UseAfterFree),
            "uninitialized" => Ok(VulnType::Uninitialized),
            "freenonheap" => Ok(VulnType::FreeNonHeap),
            "stackaddress" => Ok(VulnType::StackAddress),
            other => Err(LotusFlowError::input(format!("unknown --vuln-type '{other}'"))),
        }
    }
}

/// Owns every process-wide singleton for one analysis run: the memory
/// arena, the call-graph state, the function-pointer results, and the
/// bug-report manager (spec §5). Dropping a `Session` releases the guard so
/// a later session may start.
pub struct Session {
    config: AnalysisConfig,
    bug_reports: BugReportManager,
}

impl Session {
    /// Opens a new session. Fails if one is already active in this process
    /// (spec §5: sessions must not overlap).
    pub fn open(config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        if SESSION_ACTIVE.swap(true, Ordering::SeqCst) {
            return Err(LotusFlowError::invariant("a Session is already active in this process"));
        }
        Ok(Self {
            config,
            bug_reports: BugReportManager::new(),
        })
    }

    /// Runs the inter-procedural fixed point to convergence (C4-C6).
    pub fn analyze(&self, module: &Module) -> AnalysisResult {
        InterEngine::new(module, &self.config).run()
    }

    /// Runs one checker over a converged `AnalysisResult`, building the VFG
    /// on demand (spec §4.7: built once after the inter engine converges).
    pub fn run_checker(&mut self, module: &Module, analysis: &AnalysisResult, vuln_type: VulnType, use_npa: bool) {
        let vfg_builder = VfgBuilder::new(module, &analysis.pt_graphs, &analysis.arena, self.config.alias_mode);
        let vfg = vfg_builder.build();
        let ctx = CheckerContext {
            module,
            analysis,
            vfg: &vfg,
            use_npa,
            context_sensitive: self.config.context_sensitive,
            k_context: self.config.k_context as usize,
        };
        match vuln_type {
            VulnType::NullPointer => NullPointerDerefChecker.scan(&ctx, &mut self.bug_reports),
            VulnType::UseAfterFree => UseAfterFreeChecker.scan(&ctx, &mut self.bug_reports),
            VulnType::Uninitialized => UninitializedUseChecker.scan(&ctx, &mut self.bug_reports),
            VulnType::FreeNonHeap => FreeOfNonHeapChecker.scan(&ctx, &mut self.bug_reports),
            VulnType::StackAddress => StackAddressChecker.scan(&ctx, &mut self.bug_reports),
        }
    }

    pub fn bug_reports(&self) -> &BugReportManager {
        &self.bug_reports
    }

    pub fn bug_reports_mut(&mut self) -> &mut BugReportManager {
        &mut self.bug_reports
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_cannot_overlap() {
        let first = Session::open(AnalysisConfig::default()).unwrap();
        let second = Session::open(AnalysisConfig::default());
        assert!(second.is_err());
        drop(first);
        assert!(Session::open(AnalysisConfig::default()).is_ok());
    }

    #[test]
    fn vuln_type_parses_known_names() {
        assert_eq!("nullpointer".parse::<VulnType>().unwrap(), VulnType::NullPointer);
        assert!("bogus".parse::<VulnType>().is_err());
    }
}
