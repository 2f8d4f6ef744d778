//! Invalid Use of Stack Address checker (spec §8 scenario 4).

use super::{confidence_score, run_checker, CheckerContext};
use crate::bugreport::{BugReportManager, Classification, Importance};
use crate::ir::{Opcode, ValueId};
use crate::reachability::SourceSinkOracle;
use crate::vfg::{EdgeKind, VfgNode};

pub struct StackAddressChecker;

impl StackAddressChecker {
    /// `%a = alloca i32; store %a, @global_ptr` escapes the stack frame the
    /// moment the function returns (spec §8 scenario 4).
    pub fn scan(&self, ctx: &CheckerContext, mgr: &mut BugReportManager) {
        let type_id = mgr.register_bug_type(
            "Invalid Use of Stack Address",
            "The address of a stack-allocated object is stored somewhere that outlives its frame. (CWE-562)",
            Importance::High,
            Classification::Security,
        );
        let oracle = Oracle { ctx };
        let score = confidence_score(ctx, false);
        run_checker(ctx, &oracle, mgr, type_id, "Stack object allocated here", "Stack address stored into a global", score);
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
        matches!(self.opcode_of(node), Some(Opcode::Store { ptr: ValueId::Global(_), .. }))
    }

    fn is_valid_transfer(&self, _from: &VfgNode, _to: &VfgNode, _kind: EdgeKind) -> bool {
        true
    }
}
