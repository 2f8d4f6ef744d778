//! Null Pointer Dereference checker (spec §8 scenarios 1 and 2).

use super::{confidence_score, run_checker, CheckerContext};
use crate::bugreport::{BugReportManager, Classification, Importance};
use crate::ir::{Opcode, ValueId};
use crate::reachability::SourceSinkOracle;
use crate::vfg::{EdgeKind, VfgNode};

pub struct NullPointerDerefChecker;

impl NullPointerDerefChecker {
    /// `%x = load %p` is flagged whenever `%p` traces back to a `NullConst`,
    /// whether directly or through an intervening store/load (spec §8
    /// scenarios 1 and 2).
    pub fn scan(&self, ctx: &CheckerContext, mgr: &mut BugReportManager) {
        let type_id = mgr.register_bug_type(
            "NULL Pointer Dereference",
            "A pointer known to be null, directly or via an intervening store/load, is dereferenced. (CWE-476)",
            Importance::High,
            Classification::Security,
        );
        let oracle = Oracle { ctx };
        let score = confidence_score(ctx, true);
        run_checker(ctx, &oracle, mgr, type_id, "Null value originates here", "Load from potentially null pointer", score);
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
        matches!(self.opcode_of(node), Some(Opcode::NullConst))
    }

    fn is_sink(&self, node: &VfgNode) -> bool {
        matches!(self.opcode_of(node), Some(Opcode::Load { .. }))
    }

    fn is_valid_transfer(&self, _from: &VfgNode, _to: &VfgNode, _kind: EdgeKind) -> bool {
        true
    }
}
