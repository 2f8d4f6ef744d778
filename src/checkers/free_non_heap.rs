//! Free-of-Non-Heap checker (spec §8 scenario 5).

use super::{call_kind_at, confidence_score, run_checker, CheckerContext};
use crate::bugreport::{BugReportManager, Classification, Importance};
use crate::ir::{CallKind, Opcode, ValueId};
use crate::reachability::SourceSinkOracle;
use crate::vfg::{EdgeKind, VfgNode};

pub struct FreeOfNonHeapChecker;

impl FreeOfNonHeapChecker {
    /// `%a = alloca; free(%a)` is flagged unless the flow passes through a
    /// `malloc`/`calloc`/`realloc` call anywhere on the path, which would
    /// mean the pointer was re-seated onto the heap (spec §8 scenario 5).
    pub fn scan(&self, ctx: &CheckerContext, mgr: &mut BugReportManager) {
        let type_id = mgr.register_bug_type(
            "Free of Memory Not on the Heap",
            "free() is called on a pointer that never named heap-allocated memory. (CWE-590)",
            Importance::High,
            Classification::Security,
        );
        let oracle = Oracle { ctx };
        let score = confidence_score(ctx, false);
        run_checker(ctx, &oracle, mgr, type_id, "Stack object allocated here", "Freed as if heap-allocated", score);
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
        matches!(self.opcode_of(node), Some(Opcode::Call(info)) if info.kind == CallKind::Free)
    }

    fn is_valid_transfer(&self, _from: &VfgNode, to: &VfgNode, _kind: EdgeKind) -> bool {
        let ValueId::Inst(i) = to.value else { return true };
        !matches!(call_kind_at(self.ctx.module, i, to.function), Some(CallKind::Malloc | CallKind::Calloc | CallKind::Realloc))
    }
}
