//! Minimal owned IR contract (spec §6: "IR contract (consumed)").
//!
//! The real system treats the IR as an external collaborator with a stable
//! node-identity and visitor interface. This module supplies a small,
//! in-memory implementation of that contract so the core is independently
//! testable and so the CLI has something concrete to parse into.

use rustc_hash::FxHashMap;
use std::fmt;

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_id!(FunctionId);
newtype_id!(BlockId);
newtype_id!(InstId);
newtype_id!(GlobalId);

/// A value is either the result of an instruction, a function argument, or a
/// global reference. Pointer-equality on IR nodes is modeled here as equality
/// on this small sum type, which is `Copy` and therefore cheap to use as a
/// hash/btree key everywhere the spec requires "stable value identity."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueId {
    Inst(InstId),
    Arg(FunctionId, u32),
    Global(GlobalId),
    /// A pseudo-value synthesized by the intra engine for a call's side-effect
    /// output (spec §4.3 step 3: "side-effect outputs are synthetic values
    /// bound to (c, output-index)").
    PseudoOutput(InstId, u32),
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueId::Inst(i) => write!(f, "%{}", i.0),
            ValueId::Arg(func, idx) => write!(f, "arg({},{})", func.0, idx),
            ValueId::Global(g) => write!(f, "@{}", g.0),
            ValueId::PseudoOutput(inst, idx) => write!(f, "pseudo({},{})", inst.0, idx),
        }
    }
}

/// Opcode families, one row per spec §4.3 transfer-rule table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opcode {
    Alloca,
    Global(GlobalId),
    NullConst,
    BitcastOrGep { base: ValueId, offset: i64 },
    Load { ptr: ValueId },
    Store { ptr: ValueId, value: ValueId },
    Phi { incoming: Vec<ValueId> },
    Select { if_true: ValueId, if_false: ValueId },
    Call(CallInfo),
    Cast { operand: ValueId },
    Other,
}

/// Distinguishes direct vs. indirect calls and flags the well-known
/// allocator/deallocator intrinsics checkers key their transfer filters on
/// (spec §8 scenarios 3 and 5: realloc blocks UAF flow, malloc/calloc/realloc
/// suppress free-of-non-heap reports).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    pub callee: CallTarget,
    pub args: Vec<ValueId>,
    pub is_pointer_result: bool,
    pub kind: CallKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Malloc,
    Calloc,
    Realloc,
    Free,
    Ordinary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    Direct(FunctionId),
    Indirect(ValueId),
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub id: InstId,
    pub opcode: Opcode,
    pub is_pointer_typed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub insts: Vec<InstId>,
    /// Successor blocks, used to compute topological order (spec §4.3).
    pub successors: Vec<BlockId>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub arg_count: u32,
    pub arg_is_pointer: Vec<bool>,
    pub return_is_pointer: bool,
    pub blocks: Vec<BlockId>,
    pub entry: BlockId,
    pub block_bodies: FxHashMap<BlockId, BasicBlock>,
    pub insts: FxHashMap<InstId, Instruction>,
    pub return_insts: Vec<InstId>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        self.block_bodies.get(&id).expect("unknown block id")
    }

    pub fn inst(&self, id: InstId) -> &Instruction {
        self.insts.get(&id).expect("unknown inst id")
    }

    /// Topological order over the intra-procedural CFG (spec §4.3:
    /// "processes basic blocks in a topological order"). Falls back to
    /// declaration order for unreachable blocks, keeping iteration total and
    /// deterministic (spec's "Iteration order determinism" design note).
    pub fn topological_block_order(&self) -> Vec<BlockId> {
        let mut visited = rustc_hash::FxHashSet::default();
        let mut order = Vec::with_capacity(self.blocks.len());
        let mut stack: Vec<(BlockId, usize)> = vec![(self.entry, 0)];
        visited.insert(self.entry);
        let mut postorder = Vec::new();

        while let Some((block, idx)) = stack.pop() {
            let succs = &self.block(block).successors;
            if idx < succs.len() {
                stack.push((block, idx + 1));
                let next = succs[idx];
                if visited.insert(next) {
                    stack.push((next, 0));
                }
            } else {
                postorder.push(block);
            }
        }
        postorder.reverse();
        for b in &self.blocks {
            if !visited.contains(b) {
                postorder.push(*b);
            }
        }
        order.extend(postorder);
        order
    }
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub functions: FxHashMap<FunctionId, Function>,
    pub function_order: Vec<FunctionId>,
    pub globals: FxHashMap<GlobalId, GlobalInit>,
}

/// A global's constant initializer, used by the inter engine's global-init
/// heuristic (spec §4.6 step 3).
#[derive(Debug, Clone)]
pub enum GlobalInit {
    None,
    PointsToFunction(FunctionId),
    PointsToGlobal(GlobalId),
}

impl Module {
    pub fn function(&self, id: FunctionId) -> &Function {
        self.functions.get(&id).expect("unknown function id")
    }

    pub fn direct_callees(&self, func: FunctionId) -> Vec<FunctionId> {
        let f = self.function(func);
        let mut callees = Vec::new();
        for inst in f.insts.values() {
            if let Opcode::Call(info) = &inst.opcode {
                if let CallTarget::Direct(callee) = info.callee {
                    callees.push(callee);
                }
            }
        }
        callees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_function() -> Function {
        let b0 = BlockId(0);
        let b1 = BlockId(1);
        let mut block_bodies = FxHashMap::default();
        block_bodies.insert(
            b0,
            BasicBlock {
                id: b0,
                insts: vec![],
                successors: vec![b1],
            },
        );
        block_bodies.insert(
            b1,
            BasicBlock {
                id: b1,
                insts: vec![],
                successors: vec![],
            },
        );
        Function {
            id: FunctionId(0),
            name: "f".into(),
            arg_count: 0,
            arg_is_pointer: vec![],
            return_is_pointer: false,
            blocks: vec![b0, b1],
            entry: b0,
            block_bodies,
            insts: FxHashMap::default(),
            return_insts: vec![],
        }
    }

    #[test]
    fn topo_order_respects_edges() {
        let f = linear_function();
        let order = f.topological_block_order();
        assert_eq!(order, vec![BlockId(0), BlockId(1)]);
    }
}
