//! Value-Flow Graph (C7): directed graph over IR values, built once after
//! the inter engine converges (spec §4.7).

use crate::config::AliasMode;
use crate::ir::{CallTarget, FunctionId, Function, InstId, Module, Opcode, ValueId};
use crate::memory::{LocatorId, MemoryArena};
use crate::points_to::PointsToGraph;
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    DefUse,
    /// Store-to-load via alias (spec §4.7).
    Raw,
    Alias,
    /// Actual argument flowing into a callee's formal parameter, tagged with
    /// the call site so context-sensitive reachability can push it onto the
    /// traversal's call string (spec §4.8).
    Call(InstId),
    /// Callee return value flowing back into the call's result node, tagged
    /// with the same call site as the matching `Call` edge so a
    /// context-sensitive walk can check the two are the same invocation.
    Return(InstId),
}

/// A value-flow node: an IR value qualified by the function it lives in,
/// since `ValueId` alone is only unique within one function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VfgNode {
    pub function: FunctionId,
    pub value: ValueId,
}

#[derive(Debug, Default)]
pub struct ValueFlowGraph {
    edges: IndexMap<VfgNode, IndexSet<(VfgNode, EdgeKind)>>,
}

impl ValueFlowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_edge(&mut self, from: VfgNode, to: VfgNode, kind: EdgeKind) {
        self.edges.entry(from).or_default().insert((to, kind));
        self.edges.entry(to).or_default();
    }

    pub fn successors(&self, node: VfgNode) -> impl Iterator<Item = &(VfgNode, EdgeKind)> {
        self.edges.get(&node).into_iter().flat_map(|s| s.iter())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &VfgNode> {
        self.edges.keys()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|s| s.len()).sum()
    }
}

pub struct VfgBuilder<'a> {
    module: &'a Module,
    pt_graphs: &'a FxHashMap<FunctionId, PointsToGraph>,
    arena: &'a MemoryArena,
    alias_mode: AliasMode,
}

impl<'a> VfgBuilder<'a> {
    pub fn new(module: &'a Module, pt_graphs: &'a FxHashMap<FunctionId, PointsToGraph>, arena: &'a MemoryArena, alias_mode: AliasMode) -> Self {
        Self {
            module,
            pt_graphs,
            arena,
            alias_mode,
        }
    }

    pub fn build(&self) -> ValueFlowGraph {
        let mut vfg = ValueFlowGraph::new();

        for &f in &self.module.function_order {
            let func = self.module.function(f);
            for inst in func.insts.values() {
                let node = VfgNode { function: f, value: ValueId::Inst(inst.id) };
                for operand in Self::operands(&inst.opcode) {
                    vfg.add_edge(VfgNode { function: f, value: operand }, node, EdgeKind::DefUse);
                }
            }

            self.add_call_edges(&mut vfg, f, func);

            let Some(pt) = self.pt_graphs.get(&f) else { continue };
            for inst in func.insts.values() {
                if let Opcode::Load { ptr } = &inst.opcode {
                    let load_node = VfgNode { function: f, value: ValueId::Inst(inst.id) };
                    self.add_raw_edges(&mut vfg, f, func, pt, *ptr, load_node);
                }
            }

            if matches!(self.alias_mode, AliasMode::Over | AliasMode::Combined) {
                self.add_alias_edges(&mut vfg, f, func, pt);
            }
        }

        vfg
    }

    /// Interprocedural DefUse edges for direct calls: actual argument to
    /// formal parameter, and callee return value back to the call's result
    /// node in the caller (spec §4.7 extends naturally across a resolved
    /// call edge). Indirect calls are not wired explicitly here — their flow
    /// is already captured by the summary rewriting the inter engine baked
    /// into the caller's points-to graph.
    fn add_call_edges(&self, vfg: &mut ValueFlowGraph, f: FunctionId, func: &Function) {
        for inst in func.insts.values() {
            let Opcode::Call(info) = &inst.opcode else { continue };
            let CallTarget::Direct(callee_id) = info.callee else { continue };
            let Some(callee) = self.module.functions.get(&callee_id) else { continue };

            for (i, &arg) in info.args.iter().enumerate() {
                if (i as u32) >= callee.arg_count {
                    break;
                }
                let from = VfgNode { function: f, value: arg };
                let to = VfgNode { function: callee_id, value: ValueId::Arg(callee_id, i as u32) };
                vfg.add_edge(from, to, EdgeKind::Call(inst.id));
            }

            let call_node = VfgNode { function: f, value: ValueId::Inst(inst.id) };
            for &ret_inst in &callee.return_insts {
                let from = VfgNode { function: callee_id, value: ValueId::Inst(ret_inst) };
                vfg.add_edge(from, call_node, EdgeKind::Return(inst.id));
            }
        }
    }

    fn operands(opcode: &Opcode) -> Vec<ValueId> {
        match opcode {
            Opcode::BitcastOrGep { base, .. } => vec![*base],
            Opcode::Load { ptr } => vec![*ptr],
            Opcode::Store { ptr, value } => vec![*ptr, *value],
            Opcode::Phi { incoming } => incoming.clone(),
            Opcode::Select { if_true, if_false } => vec![*if_true, *if_false],
            Opcode::Call(info) => info.args.clone(),
            Opcode::Cast { operand } => vec![*operand],
            Opcode::Alloca | Opcode::Global(_) | Opcode::NullConst | Opcode::Other => vec![],
        }
    }

    /// RAW edges (spec §4.7): under-approximate mode only connects a store
    /// whose pointer operand is the *same* `ValueId` as the load's (a
    /// syntactic bitcast/load/store peer); over-approximate mode connects
    /// any store whose target locators intersect the load's.
    fn add_raw_edges(&self, vfg: &mut ValueFlowGraph, f: FunctionId, func: &Function, pt: &PointsToGraph, ptr: ValueId, load_node: VfgNode) {
        let load_locators = self.reachable_locators(pt, ptr);
        for inst in func.insts.values() {
            let Opcode::Store { ptr: store_ptr, .. } = &inst.opcode else { continue };
            let aliases = match self.alias_mode {
                AliasMode::Under => *store_ptr == ptr,
                AliasMode::Over | AliasMode::Combined => {
                    let store_locators = self.reachable_locators(pt, *store_ptr);
                    !load_locators.is_disjoint(&store_locators)
                }
            };
            if aliases {
                let store_node = VfgNode { function: f, value: ValueId::Inst(inst.id) };
                vfg.add_edge(store_node, load_node, EdgeKind::Raw);
            }
        }
    }

    /// Alias edges (over-approximate mode only, spec §4.7): every pair of
    /// pointer-typed values in the function whose PT sets intersect.
    fn add_alias_edges(&self, vfg: &mut ValueFlowGraph, f: FunctionId, func: &Function, pt: &PointsToGraph) {
        let candidates: Vec<ValueId> = func
            .insts
            .values()
            .filter(|inst| inst.is_pointer_typed)
            .map(|inst| ValueId::Inst(inst.id))
            .collect();
        for i in 0..candidates.len() {
            let li = self.reachable_locators(pt, candidates[i]);
            if li.is_empty() {
                continue;
            }
            for j in (i + 1)..candidates.len() {
                let lj = self.reachable_locators(pt, candidates[j]);
                if !li.is_disjoint(&lj) {
                    let a = VfgNode { function: f, value: candidates[i] };
                    let b = VfgNode { function: f, value: candidates[j] };
                    vfg.add_edge(a, b, EdgeKind::Alias);
                    vfg.add_edge(b, a, EdgeKind::Alias);
                }
            }
        }
    }

    fn reachable_locators(&self, pt: &PointsToGraph, v: ValueId) -> IndexSet<LocatorId> {
        match pt.value_result(v) {
            Some(id) => pt.resolve_locators(self.arena, id, true).into_iter().collect(),
            None => IndexSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BasicBlock, BlockId, InstId, Instruction};
    use crate::memory::MemObjectKind;

    fn simple_module_with_alias() -> (Module, FxHashMap<FunctionId, PointsToGraph>, MemoryArena) {
        // %0 = alloca; %1 = null; store %1, %0; %2 = load %0
        let b0 = BlockId(0);
        let i0 = InstId(0);
        let i1 = InstId(1);
        let i2 = InstId(2);
        let i3 = InstId(3);
        let mut block_bodies = FxHashMap::default();
        block_bodies.insert(b0, BasicBlock { id: b0, insts: vec![i0, i1, i2, i3], successors: vec![] });
        let mut insts = FxHashMap::default();
        insts.insert(i0, Instruction { id: i0, opcode: Opcode::Alloca, is_pointer_typed: true });
        insts.insert(i1, Instruction { id: i1, opcode: Opcode::NullConst, is_pointer_typed: true });
        insts.insert(i2, Instruction { id: i2, opcode: Opcode::Store { ptr: ValueId::Inst(i0), value: ValueId::Inst(i1) }, is_pointer_typed: false });
        insts.insert(i3, Instruction { id: i3, opcode: Opcode::Load { ptr: ValueId::Inst(i0) }, is_pointer_typed: true });
        let func_id = FunctionId(0);
        let func = Function {
            id: func_id,
            name: "f".into(),
            arg_count: 0,
            arg_is_pointer: vec![],
            return_is_pointer: false,
            blocks: vec![b0],
            entry: b0,
            block_bodies,
            insts,
            return_insts: vec![],
        };
        let mut functions = FxHashMap::default();
        functions.insert(func_id, func.clone());
        let module = Module {
            functions,
            function_order: vec![func_id],
            globals: FxHashMap::default(),
        };

        let mut arena = MemoryArena::new();
        let mut pt = PointsToGraph::new();
        let obj = arena.create_object(MemObjectKind::Concrete, Some(ValueId::Inst(i0)), 0);
        pt.add_points_to(&mut arena, ValueId::Inst(i0), obj, 0);
        let null = arena.null_object();
        pt.add_points_to(&mut arena, ValueId::Inst(i1), null, 0);
        pt.store_value_at(&mut arena, ValueId::Inst(i0), i2, ValueId::Inst(i1), true);
        pt.load_ptr_at(&arena, ValueId::Inst(i0), i3, ValueId::Inst(i3), true, 0);

        let mut pt_graphs = FxHashMap::default();
        pt_graphs.insert(func_id, pt);
        (module, pt_graphs, arena)
    }

    #[test]
    fn under_mode_links_syntactic_store_to_load() {
        let (module, pt_graphs, arena) = simple_module_with_alias();
        let builder = VfgBuilder::new(&module, &pt_graphs, &arena, AliasMode::Under);
        let vfg = builder.build();

        let f = FunctionId(0);
        let store_node = VfgNode { function: f, value: ValueId::Inst(InstId(2)) };
        let load_node = VfgNode { function: f, value: ValueId::Inst(InstId(3)) };
        let has_raw = vfg.successors(store_node).any(|(to, kind)| *to == load_node && *kind == EdgeKind::Raw);
        assert!(has_raw);
    }

    #[test]
    fn over_mode_adds_alias_edges() {
        let (module, pt_graphs, arena) = simple_module_with_alias();
        let builder = VfgBuilder::new(&module, &pt_graphs, &arena, AliasMode::Over);
        let vfg = builder.build();
        assert!(vfg.edge_count() > 0);
    }
}
