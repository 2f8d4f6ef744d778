//! Use-After-Free checker (spec §8 scenario 3).

use super::{call_kind_at, confidence_score, run_checker, CheckerContext};
use crate::bugreport::{BugReportManager, Classification, Importance};
use crate::ir::{CallKind, Opcode, ValueId};
use crate::reachability::SourceSinkOracle;
use crate::vfg::{EdgeKind, VfgNode};

pub struct UseAfterFreeChecker;

impl UseAfterFreeChecker {
    /// `free(%p); ...; %x = load %q` is flagged when `%q` flows from `%p`
    /// without the flow passing through a `realloc` call, which refreshes
    /// the pointer's validity (spec §8 scenario 3: "`realloc` on the path
    /// must block the flow").
    pub fn scan(&self, ctx: &CheckerContext, mgr: &mut BugReportManager) {
        let type_id = mgr.register_bug_type(
            "Use After Free",
            "Memory is accessed through a pointer after the object it names has been freed. (CWE-416)",
            Importance::High,
            Classification::Security,
        );
        let oracle = Oracle { ctx };
        let score = confidence_score(ctx, false);
        run_checker(ctx, &oracle, mgr, type_id, "Memory freed here", "Load from freed memory", score);
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

    /// A node is freed if it's passed as an argument to some `free` call in
    /// its own function. The call instruction's own result is not a useful
    /// source node here (it has no operand-flow successors); the freed
    /// pointer value itself is what keeps flowing to later uses.
    fn is_freed_pointer(&self, node: &VfgNode) -> bool {
        let Some(func) = self.ctx.module.functions.get(&node.function) else { return false };
        func.insts.values().any(|inst| match &inst.opcode {
            Opcode::Call(info) => info.kind == CallKind::Free && info.args.contains(&node.value),
            _ => false,
        })
    }
}

impl<'a> SourceSinkOracle for Oracle<'a> {
    fn is_source(&self, node: &VfgNode) -> bool {
        self.is_freed_pointer(node)
    }

    fn is_sink(&self, node: &VfgNode) -> bool {
        matches!(self.opcode_of(node), Some(Opcode::Load { .. }))
    }

    fn is_valid_transfer(&self, _from: &VfgNode, to: &VfgNode, _kind: EdgeKind) -> bool {
        let ValueId::Inst(i) = to.value else { return true };
        !matches!(call_kind_at(self.ctx.module, i, to.function), Some(CallKind::Realloc))
    }
}
