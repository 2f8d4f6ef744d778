//! Intra Engine (C3): per-function transfer functions, producing a PT graph
//! and a function summary.

use super::access_path::AccessPath;
use super::summary::{FunctionSummary, OutputItem, OutputTarget};
use crate::callgraph::CallGraphState;
use crate::config::AnalysisConfig;
use crate::ir::{CallInfo, CallTarget, Function, FunctionId, GlobalInit, InstId, Module, Opcode, ValueId};
use crate::memory::{MemObjectId, MemObjectKind, MemoryArena};
use crate::points_to::{PTResultId, PointsToGraph};
use indexmap::{IndexMap, IndexSet};
use rustc_hash::FxHashMap;

/// Marker index range used for the widening write pushed by
/// `apply_summary_less`, kept disjoint from the real side-effect-output
/// indices a summary-applying call allocates on the same instruction.
const WIDEN_MARKER_BASE: u32 = 0x8000_0000;

/// Result of running the intra engine once on a function.
pub struct IntraResult {
    pub pt_graph: PointsToGraph,
    pub summary: FunctionSummary,
    pub callsite_targets: IndexMap<InstId, IndexSet<FunctionId>>,
    /// Set when any transfer in this run widened due to a budget cap.
    pub conservative: bool,
}

/// Runs C3's transfer functions over one function.
pub struct IntraEngine<'a> {
    module: &'a Module,
    func: &'a Function,
    config: &'a AnalysisConfig,
    summaries: &'a FxHashMap<FunctionId, FunctionSummary>,
    callgraph: &'a CallGraphState,
    conservative: bool,
    /// Tracks, for every value computed so far, the `AccessPath` that would
    /// recompute it from a formal/global root plus one not-yet-consumed
    /// offset (applied by the next `Load`). Seeded with the function's
    /// formals at depth 0 (spec §4.3 `collectInputs`).
    access_paths: FxHashMap<ValueId, (AccessPath, i64)>,
}

impl<'a> IntraEngine<'a> {
    pub fn new(
        module: &'a Module,
        func: &'a Function,
        config: &'a AnalysisConfig,
        summaries: &'a FxHashMap<FunctionId, FunctionSummary>,
        callgraph: &'a CallGraphState,
    ) -> Self {
        let mut access_paths = FxHashMap::default();
        for idx in 0..func.arg_count {
            let arg = ValueId::Arg(func.id, idx);
            access_paths.insert(arg, (AccessPath::direct(arg), 0));
        }
        Self {
            module,
            func,
            config,
            summaries,
            callgraph,
            conservative: false,
            access_paths,
        }
    }

    pub fn run(mut self, arena: &mut MemoryArena) -> IntraResult {
        let mut pt = PointsToGraph::new();
        let mut summary = FunctionSummary::new();
        let mut callsite_targets: IndexMap<InstId, IndexSet<FunctionId>> = IndexMap::new();

        for block_id in self.func.topological_block_order() {
            let block = self.func.block(block_id);
            for &inst_id in &block.insts {
                self.process_instruction(inst_id, arena, &mut pt, &mut callsite_targets);
            }
        }

        self.collect_inputs(&mut summary);
        self.collect_outputs(&pt, arena, &mut summary);
        self.collect_escaped_objects(&pt, arena, &mut summary);

        IntraResult {
            pt_graph: pt,
            summary,
            callsite_targets,
            conservative: self.conservative,
        }
    }

    fn value_is_pointer(func: &Function, v: ValueId) -> bool {
        match v {
            ValueId::Inst(i) => func.inst(i).is_pointer_typed,
            ValueId::Arg(_, idx) => func.arg_is_pointer.get(idx as usize).copied().unwrap_or(false),
            ValueId::Global(_) => true,
            ValueId::PseudoOutput(..) => true,
        }
    }

    fn process_instruction(
        &mut self,
        inst_id: InstId,
        arena: &mut MemoryArena,
        pt: &mut PointsToGraph,
        callsite_targets: &mut IndexMap<InstId, IndexSet<FunctionId>>,
    ) {
        let opcode = self.func.inst(inst_id).opcode.clone();
        let v = ValueId::Inst(inst_id);
        let cap = self.config.restrict_ap_level;

        match opcode {
            Opcode::Alloca => {
                let obj = arena.create_object(MemObjectKind::Concrete, Some(v), 0);
                pt.add_points_to(arena, v, obj, 0);
            }
            Opcode::Global(g) => {
                let obj = arena.create_object(MemObjectKind::Concrete, Some(ValueId::Global(g)), 0);
                pt.add_points_to(arena, v, obj, 0);
                self.access_paths
                    .insert(v, (AccessPath::direct(ValueId::Global(g)), 0));
            }
            Opcode::NullConst => {
                let null = arena.null_object();
                pt.add_points_to(arena, v, null, 0);
            }
            Opcode::BitcastOrGep { base, offset } => {
                if let Some(base_pt) = pt.find_pt_result(base, false) {
                    pt.derive_pts_from(v, base_pt, offset);
                }
                if let Some((path, pending)) = self.access_paths.get(&base).cloned() {
                    let composed = MemoryArena::compose_offset(pending, offset);
                    self.access_paths.insert(v, (path, composed));
                }
            }
            Opcode::Load { ptr } => {
                pt.load_ptr_at(arena, ptr, inst_id, v, true, 0);
                if let Some((path, pending)) = self.access_paths.get(&ptr).cloned() {
                    let extended = path.extend(pending);
                    if extended.exceeds(cap) {
                        self.conservative = true;
                    } else {
                        self.access_paths.insert(v, (extended, 0));
                    }
                }
            }
            Opcode::Store { ptr, value } => {
                let is_ptr = Self::value_is_pointer(self.func, value);
                pt.store_value_at(arena, ptr, inst_id, value, is_ptr);
            }
            Opcode::Phi { incoming } => {
                for iv in incoming {
                    if let Some(ipt) = pt.find_pt_result(iv, false) {
                        pt.derive_pts_from(v, ipt, 0);
                    }
                }
            }
            Opcode::Select { if_true, if_false } => {
                if let Some(tpt) = pt.find_pt_result(if_true, false) {
                    pt.derive_pts_from(v, tpt, 0);
                }
                if let Some(fpt) = pt.find_pt_result(if_false, false) {
                    pt.derive_pts_from(v, fpt, 0);
                }
            }
            Opcode::Call(info) => {
                self.process_call(inst_id, &info, arena, pt, callsite_targets);
            }
            Opcode::Cast { operand } => {
                if let Some(opt) = pt.find_pt_result(operand, false) {
                    pt.derive_pts_from(v, opt, 0);
                }
                if let Some(entry) = self.access_paths.get(&operand).cloned() {
                    self.access_paths.insert(v, entry);
                }
            }
            Opcode::Other => {}
        }
    }

    /// Resolves the callee set for a call site, capping fan-out at
    /// `restrict_cg_size` (spec §4.3 failure semantics, §8 boundary case).
    fn resolve_call_targets(&mut self, info: &CallInfo, pt: &mut PointsToGraph, arena: &MemoryArena) -> Vec<FunctionId> {
        let mut targets = match &info.callee {
            CallTarget::Direct(f) => vec![*f],
            CallTarget::Indirect(fp) => {
                let mut out = Vec::new();
                if let Some(pid) = pt.find_pt_result(*fp, false) {
                    for loc in pt.resolve_locators(arena, pid, true) {
                        let obj = arena.locator(loc).object;
                        if let Some(func_id) = Self::function_for_object(self.module, arena, obj) {
                            if !out.contains(&func_id) {
                                out.push(func_id);
                            }
                        }
                    }
                }
                out
            }
        };
        if targets.len() as u32 > self.config.restrict_cg_size {
            targets.truncate(self.config.restrict_cg_size as usize);
            self.conservative = true;
        }
        targets
    }

    /// Maps a memory object back to the function it names, when that object
    /// was materialized for a global known to be a function pointer (spec
    /// §8 scenario 6: indirect call resolution via a PHI of two function
    /// pointer globals).
    fn function_for_object(module: &Module, arena: &MemoryArena, obj: MemObjectId) -> Option<FunctionId> {
        let object = arena.object(obj);
        if let Some(ValueId::Global(g)) = object.alloc_site {
            if let Some(GlobalInit::PointsToFunction(f)) = module.globals.get(&g) {
                return Some(*f);
            }
        }
        None
    }

    fn process_call(
        &mut self,
        inst_id: InstId,
        info: &CallInfo,
        arena: &mut MemoryArena,
        pt: &mut PointsToGraph,
        callsite_targets: &mut IndexMap<InstId, IndexSet<FunctionId>>,
    ) {
        let result_value = ValueId::Inst(inst_id);

        // spec §6/§8: restrict_inline_depth == 0 disables cross-function
        // summary application entirely; every pointer-typed call result
        // becomes a fresh Concrete object, same as an unresolved callee.
        if self.config.restrict_inline_depth == 0 {
            self.apply_summary_less(inst_id, info, arena, pt, result_value);
            return;
        }

        let targets = self.resolve_call_targets(info, pt, arena);
        callsite_targets.insert(inst_id, targets.iter().copied().collect());

        if targets.is_empty() {
            self.apply_summary_less(inst_id, info, arena, pt, result_value);
            return;
        }

        for callee in &targets {
            let is_back_edge = *callee == self.func.id || self.callgraph.is_back_edge(self.func.id, *callee);
            let summary = if is_back_edge {
                None
            } else {
                self.summaries.get(callee).cloned()
            };
            match summary {
                Some(callee_summary) => {
                    // spec §6: restrict_inline_size caps summary-application
                    // work per call site. A summary's size is the total
                    // number of points-to targets it would need walked
                    // (escape objects plus every output's target list); a
                    // summary too large to afford is treated like one that
                    // doesn't exist, widening the result instead.
                    let work = callee_summary.escape_objs.len()
                        + callee_summary.outputs.iter().map(|o| o.pts.len()).sum::<usize>();
                    if work as u32 > self.config.restrict_inline_size {
                        self.conservative = true;
                        self.apply_summary_less(inst_id, info, arena, pt, result_value);
                    } else {
                        self.apply_summary(*callee, &callee_summary, inst_id, info, arena, pt);
                    }
                }
                None => self.apply_summary_less(inst_id, info, arena, pt, result_value),
            }
        }
    }

    /// Call with no available summary (indirect with no resolvable targets,
    /// a not-yet-analyzed callee, or a back-edge): every pointer argument's
    /// pointee is conservatively widened to include Unknown, and a pointer
    /// result becomes a fresh Concrete object (spec §4.3 failure semantics).
    fn apply_summary_less(
        &mut self,
        inst_id: InstId,
        info: &CallInfo,
        arena: &mut MemoryArena,
        pt: &mut PointsToGraph,
        result_value: ValueId,
    ) {
        let unknown = arena.unknown_object();
        for (i, &arg) in info.args.iter().enumerate() {
            if Self::value_is_pointer(self.func, arg) {
                let marker = ValueId::PseudoOutput(inst_id, WIDEN_MARKER_BASE + i as u32);
                pt.add_points_to(arena, marker, unknown, 0);
                pt.store_value_at(arena, arg, inst_id, marker, true);
            }
        }
        if info.is_pointer_result {
            let obj = arena.create_object(MemObjectKind::Concrete, Some(result_value), 0);
            pt.add_points_to(arena, result_value, obj, 0);
        }
        self.conservative = true;
    }

    /// The summary-application algorithm (spec §4.3, 5 steps).
    fn apply_summary(
        &mut self,
        callee: FunctionId,
        callee_summary: &FunctionSummary,
        inst_id: InstId,
        info: &CallInfo,
        arena: &mut MemoryArena,
        pt: &mut PointsToGraph,
    ) {
        // Step 1: bind actuals to formals.
        let mut bindings: FxHashMap<u32, PTResultId> = FxHashMap::default();
        for (i, actual) in info.args.iter().enumerate() {
            if let Some(pid) = pt.find_pt_result(*actual, false) {
                bindings.insert(i as u32, pid);
            }
        }

        // Step 3: allocate pseudo-output values (return reuses the call
        // instruction itself; side-effect outputs are (call, index)).
        let pseudo_outputs: Vec<ValueId> = (0..callee_summary.outputs.len())
            .map(|i| {
                if i == 0 {
                    ValueId::Inst(inst_id)
                } else {
                    ValueId::PseudoOutput(inst_id, i as u32)
                }
            })
            .collect();

        // Step 4: materialize caller-side escape objects, cached per
        // (call site, callee, callee-object) (spec §9).
        let mut escape_map: FxHashMap<MemObjectId, MemObjectId> = FxHashMap::default();
        for &eobj in &callee_summary.escape_objs {
            let key = (inst_id, callee, eobj);
            escape_map.insert(eobj, Self::materialize_escape(key, arena));
        }

        // Step 2 / step 5: walk each output's targets, resolving `Input`
        // access paths against the bindings. Each chain only needs the
        // previous step's result, so walking in path order is already
        // increasing-depth order.
        for (i, item) in callee_summary.outputs.iter().enumerate() {
            if !item.is_pointer {
                continue;
            }
            let caller_value = pseudo_outputs[i];
            for target in &item.pts {
                match target {
                    OutputTarget::Input(ap) => {
                        if let Some(resolved) = Self::resolve_chain(pt, arena, &bindings, ap, ap.offsets.len()) {
                            pt.derive_pts_from(caller_value, resolved, 0);
                        }
                    }
                    OutputTarget::Escaped(eobj) => {
                        if let Some(&caller_obj) = escape_map.get(eobj) {
                            pt.add_points_to(arena, caller_value, caller_obj, 0);
                        }
                    }
                }
            }
            // i == 0 is the return value; nothing further to write back.
            // i >= 1 names a side-effecting write through `item.path`: all
            // but the last offset locate the written-to location, and the
            // last offset is where `caller_value` actually gets written.
            if i > 0 && !item.path.offsets.is_empty() {
                let upto = item.path.offsets.len() - 1;
                if let Some(base) = Self::resolve_chain(pt, arena, &bindings, &item.path, upto) {
                    let last = item.path.offsets[upto];
                    let targets = pt.resolve_locators_with_offset(arena, base, last, true);
                    for loc in targets {
                        arena.locator_mut(loc).push_write(inst_id, caller_value);
                    }
                }
            }
        }
    }

    fn materialize_escape(key: (InstId, FunctionId, MemObjectId), arena: &mut MemoryArena) -> MemObjectId {
        let (inst_id, _callee, eobj) = key;
        if let Some(cached) = arena.peek_object(Some(ValueId::Inst(inst_id)), MemObjectKind::Pseudo, eobj.0 as u64) {
            return cached;
        }
        arena.create_object(MemObjectKind::Pseudo, Some(ValueId::Inst(inst_id)), eobj.0 as u64)
    }

    /// Resolves an `AccessPath` against the current caller-side bindings,
    /// chaining `upto` offsets (fewer than the full path when the caller
    /// wants the write-target location rather than the stored value).
    fn resolve_chain(
        pt: &mut PointsToGraph,
        arena: &MemoryArena,
        bindings: &FxHashMap<u32, PTResultId>,
        ap: &AccessPath,
        upto: usize,
    ) -> Option<PTResultId> {
        let mut cur = Self::resolve_root(pt, arena, bindings, ap.root)?;
        for &off in &ap.offsets[..upto] {
            cur = Self::step_dereference(pt, arena, cur, off);
        }
        Some(cur)
    }

    fn resolve_root(
        pt: &mut PointsToGraph,
        arena: &MemoryArena,
        bindings: &FxHashMap<u32, PTResultId>,
        root: ValueId,
    ) -> Option<PTResultId> {
        match root {
            ValueId::Arg(_, idx) => bindings.get(&idx).copied(),
            ValueId::Global(g) => {
                let obj = arena.peek_object(Some(ValueId::Global(g)), MemObjectKind::Concrete, 0)?;
                let loc = arena.peek_locator(obj, 0)?;
                let id = pt.new_ephemeral();
                pt.add_direct_into(id, loc);
                Some(id)
            }
            _ => None,
        }
    }

    /// One dereference step: collects every value ever stored at `offset`
    /// past the locators reachable from `base`, and unions their points-to
    /// sets into a fresh ephemeral result.
    fn step_dereference(pt: &mut PointsToGraph, arena: &MemoryArena, base: PTResultId, offset: i64) -> PTResultId {
        let locs = pt.resolve_locators_with_offset(arena, base, offset, true);
        let next = pt.new_ephemeral();
        for loc in locs {
            let writes: Vec<_> = arena.locator(loc).writes().to_vec();
            for w in writes {
                if let Some(vpt) = pt.find_pt_result(w.value, false) {
                    pt.derive_into(next, vpt, 0);
                }
            }
        }
        next
    }

    /// `collectInputs` (spec §4.3): every tracked value whose `AccessPath`
    /// stays within the configured depth cap.
    fn collect_inputs(&mut self, summary: &mut FunctionSummary) {
        let cap = self.config.restrict_ap_level as usize;
        for (value, (path, _pending)) in &self.access_paths {
            if path.depth() <= cap {
                summary.inputs.insert(*value, path.clone());
            }
        }
    }

    /// `collectOutputs` (spec §4.3): the return value (element 0, always
    /// present even if empty) plus one `OutputItem` per offset reachable
    /// from a formal that was ever written to.
    fn collect_outputs(&mut self, pt: &PointsToGraph, arena: &MemoryArena, summary: &mut FunctionSummary) {
        let mut return_pts = Vec::new();
        for &ret_inst in &self.func.return_insts {
            if let Some(pid) = pt.value_result(ValueId::Inst(ret_inst)) {
                return_pts.push(pid);
            }
        }
        let return_targets = Self::pt_ids_to_escape_targets(&return_pts, pt, arena, summary);
        summary.outputs.push(OutputItem {
            path: AccessPath::direct(ValueId::Inst(InstId(0))),
            pts: return_targets,
            is_pointer: self.func.return_is_pointer,
        });

        for idx in 0..self.func.arg_count {
            let root = ValueId::Arg(self.func.id, idx);
            let Some(pid) = pt.value_result(root) else {
                continue;
            };
            let cap = self.config.restrict_ap_level;
            let offsets = Self::reachable_offsets(pt, arena, pid);
            for offset in offsets {
                let path = AccessPath::direct(root).extend(offset);
                if path.exceeds(cap) {
                    self.conservative = true;
                    continue;
                }
                let written_values = Self::values_written_at(pt, arena, pid, offset);
                if written_values.is_empty() {
                    continue;
                }
                let targets = Self::pt_ids_to_escape_targets(&written_values, pt, arena, summary);
                summary.outputs.push(OutputItem {
                    path,
                    pts: targets,
                    is_pointer: true,
                });
            }
        }
    }

    /// `collectEscapedObjects` (spec §4.3): locally allocated objects either
    /// returned or stored into a location reachable from a formal.
    fn collect_escaped_objects(&mut self, pt: &PointsToGraph, arena: &MemoryArena, summary: &mut FunctionSummary) {
        let mut local_objects: IndexSet<MemObjectId> = IndexSet::new();
        for (value, id) in pt.values() {
            if let ValueId::Inst(i) = value {
                if matches!(self.func.inst(*i).opcode, Opcode::Alloca) {
                    for loc in pt.resolve_locators(arena, *id, false) {
                        local_objects.insert(arena.locator(loc).object);
                    }
                }
            }
        }
        if local_objects.is_empty() {
            return;
        }

        for &ret_inst in &self.func.return_insts {
            if let Some(pid) = pt.value_result(ValueId::Inst(ret_inst)) {
                for loc in pt.resolve_locators(arena, pid, true) {
                    let obj = arena.locator(loc).object;
                    if local_objects.contains(&obj) {
                        summary.escape_objs.insert(obj);
                    }
                }
            }
        }

        for idx in 0..self.func.arg_count {
            let root = ValueId::Arg(self.func.id, idx);
            let Some(pid) = pt.value_result(root) else {
                continue;
            };
            for offset in Self::reachable_offsets(pt, arena, pid) {
                for vpt in Self::values_written_at(pt, arena, pid, offset) {
                    for loc in pt.resolve_locators(arena, vpt, true) {
                        let obj = arena.locator(loc).object;
                        if local_objects.contains(&obj) {
                            summary.escape_objs.insert(obj);
                        }
                    }
                }
            }
        }
    }

    /// Union of every offset known on any object reachable from `id`.
    fn reachable_offsets(pt: &PointsToGraph, arena: &MemoryArena, id: PTResultId) -> Vec<i64> {
        let mut offsets: IndexSet<i64> = IndexSet::new();
        for loc in pt.resolve_locators(arena, id, true) {
            let obj = arena.locator(loc).object;
            offsets.extend(arena.offsets_of(obj).iter().copied());
        }
        offsets.into_iter().collect()
    }

    fn values_written_at(pt: &PointsToGraph, arena: &MemoryArena, id: PTResultId, offset: i64) -> Vec<PTResultId> {
        let locs = pt.resolve_locators_with_offset(arena, id, offset, true);
        let mut out = Vec::new();
        for loc in locs {
            for w in arena.locator(loc).writes() {
                if let Some(vpt) = pt.value_result(w.value) {
                    out.push(vpt);
                }
            }
        }
        out
    }

    /// Simplifies a set of PT results down to the escaped objects they
    /// reach; everything else is re-derived by the caller directly against
    /// the live `PointsToGraph`, so only escapes need to survive as a
    /// standalone summary fact.
    fn pt_ids_to_escape_targets(
        ids: &[PTResultId],
        pt: &PointsToGraph,
        arena: &MemoryArena,
        summary: &FunctionSummary,
    ) -> Vec<OutputTarget> {
        let mut out = Vec::new();
        for &id in ids {
            for loc in pt.resolve_locators(arena, id, true) {
                let obj = arena.locator(loc).object;
                if summary.escape_objs.contains(&obj) {
                    out.push(OutputTarget::Escaped(obj));
                }
            }
        }
        out
    }
}
