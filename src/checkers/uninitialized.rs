//! Uninitialized-Use checker.
//!
//! Not one of spec §8's six worked scenarios, but one of the five
//! vulnerability classes C10 names. Modeled by restricting the reachability
//! search to edges that never represent an actual write: a load reached from
//! an `alloca` purely through `DefUse`/`Alias` edges, without ever crossing
//! a `Raw` edge, was never preceded by a store to that location.

use super::{confidence_score, run_checker, CheckerContext};
use crate::bugreport::{BugReportManager, Classification, Importance};
use crate::ir::{Opcode, ValueId};
use crate::reachability::SourceSinkOracle;
use crate::vfg::{EdgeKind, VfgNode};

pub struct UninitializedUseChecker;

impl UninitializedUseChecker {
    pub fn scan(&self, ctx: &CheckerContext, mgr: &mut BugReportManager) {
        let type_id = mgr.register_bug_type(
            "Use of Uninitialized Value",
            "A stack object is read before any value has been stored to it. (CWE-457)",
            Importance::Medium,
            Classification::Warning,
        );
        let oracle = Oracle { ctx };
        let score = confidence_score(ctx, false);
        run_checker(ctx, &oracle, mgr, type_id, "Stack object allocated here, uninitialized", "Read before any store reaches this location", score);
    }
}

struct Oracle<'a> {
    ctx: &'a CheckerContext<'a>,
}

impl<'a> Oracle<'a> {
    fn opcode_of(&self, node: &VfgNode) -> Option<Opcode> {
        let ValueId::Inst(i) = node.value else { return None };
        self.ctx.module.functions.get(&node.function)?.insts.get(&i).map(|inst| inst.opcode.clone())
    }
}

impl<'a> SourceSinkOracle for Oracle<'a> {
    fn is_source(&self, node: &VfgNode) -> bool {
        matches!(self.opcode_of(node), Some(Opcode::Alloca))
    }

    fn is_sink(&self, node: &VfgNode) -> bool {
        matches!(self.opcode_of(node), Some(Opcode::Load { .. }))
    }

    fn is_valid_transfer(&self, _from: &VfgNode, _to: &VfgNode, kind: EdgeKind) -> bool {
        kind != EdgeKind::Raw
    }
}
