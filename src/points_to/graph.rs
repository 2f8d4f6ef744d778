use super::result::{PTResult, PTResultId, PtEntry};
use crate::ir::{InstId, ValueId};
use crate::memory::{LocatorId, MemObjectId, MemoryArena};
use rustc_hash::FxHashMap;

/// Per-function points-to graph (spec §3/§4.2 `PointsToGraph`).
#[derive(Debug, Default)]
pub struct PointsToGraph {
    results: Vec<PTResult>,
    value_index: FxHashMap<ValueId, PTResultId>,
}

impl PointsToGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_pt_result(&mut self, v: ValueId, create_if_missing: bool) -> Option<PTResultId> {
        if let Some(&id) = self.value_index.get(&v) {
            return Some(id);
        }
        if !create_if_missing {
            return None;
        }
        let id = PTResultId(self.results.len() as u32);
        self.results.push(PTResult::new(id));
        self.value_index.insert(v, id);
        Some(id)
    }

    pub fn get(&self, id: PTResultId) -> &PTResult {
        &self.results[id.0 as usize]
    }

    /// Read-only lookup of an already-materialized PT result, without
    /// creating one. Prefer this over `find_pt_result(v, false)` in
    /// contexts that only hold a shared reference.
    pub fn value_result(&self, v: ValueId) -> Option<PTResultId> {
        self.value_index.get(&v).copied()
    }

    pub fn values(&self) -> impl Iterator<Item = (&ValueId, &PTResultId)> {
        self.value_index.iter()
    }

    /// Adds a direct (object, offset) target to `v`'s points-to set,
    /// materializing the target locator in `arena` as needed.
    pub fn add_points_to(
        &mut self,
        arena: &mut MemoryArena,
        v: ValueId,
        object: MemObjectId,
        offset: i64,
    ) -> PTResultId {
        let locator = arena.find_locator(object, offset, true).expect("create_if_missing=true always returns Some");
        let id = self.find_pt_result(v, true).expect("create_if_missing=true always returns Some");
        self.results[id.0 as usize].insert(PtEntry::Direct { locator, offset: 0 });
        id
    }

    /// Adds a derived target: `v`'s points-to set includes everything
    /// reachable from `parent`, offset by `offset`.
    pub fn derive_pts_from(&mut self, v: ValueId, parent: PTResultId, offset: i64) -> PTResultId {
        let id = self.find_pt_result(v, true).expect("create_if_missing=true always returns Some");
        if id != parent {
            self.results[id.0 as usize].insert(PtEntry::Derived { parent, offset });
        }
        id
    }

    /// Resolves the finite set of locators reachable from `id`, without
    /// creating any new locator (read-only consumers: C7, C8, and snapshot
    /// comparisons used to test idempotence). Cycles through derived edges
    /// are broken by a visited-set keyed on `PTResultId` (spec §3/§8: "the
    /// iterator over r terminates on a finite set; running it twice yields
    /// the same sequence").
    pub fn resolve_locators(
        &self,
        arena: &MemoryArena,
        id: PTResultId,
        follow_derived: bool,
    ) -> Vec<LocatorId> {
        self.resolve_locators_with_offset(arena, id, 0, follow_derived)
    }

    /// Same as `resolve_locators`, but composes every resolved locator's
    /// offset with `extra_offset` first. Used by the summary-application
    /// step chain (spec §4.3), where each hop in an `AccessPath` adds one
    /// more offset on top of whatever the previous hop already resolved.
    pub fn resolve_locators_with_offset(
        &self,
        arena: &MemoryArena,
        id: PTResultId,
        extra_offset: i64,
        follow_derived: bool,
    ) -> Vec<LocatorId> {
        let mut out = indexmap::IndexSet::new();
        let mut visited = rustc_hash::FxHashSet::default();
        self.collect_readonly(arena, id, extra_offset, follow_derived, &mut visited, &mut out);
        out.into_iter().collect()
    }

    /// Allocates a PT result not tied to any `ValueId` — used to hold an
    /// intermediate result while chaining through an `AccessPath` during
    /// summary application (spec §4.3).
    pub fn new_ephemeral(&mut self) -> PTResultId {
        let id = PTResultId(self.results.len() as u32);
        self.results.push(PTResult::new(id));
        id
    }

    /// Inserts a direct (locator, offset 0) target into an already-allocated
    /// result, e.g. one returned by `new_ephemeral`.
    pub fn add_direct_into(&mut self, id: PTResultId, locator: LocatorId) {
        self.results[id.0 as usize].insert(PtEntry::Direct { locator, offset: 0 });
    }

    /// Inserts a derived target into an already-allocated result.
    pub fn derive_into(&mut self, id: PTResultId, parent: PTResultId, offset: i64) {
        if id != parent {
            self.results[id.0 as usize].insert(PtEntry::Derived { parent, offset });
        }
    }

    fn collect_readonly(
        &self,
        arena: &MemoryArena,
        id: PTResultId,
        extra_offset: i64,
        follow_derived: bool,
        visited: &mut rustc_hash::FxHashSet<PTResultId>,
        out: &mut indexmap::IndexSet<LocatorId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        for entry in self.get(id).entries() {
            match *entry {
                PtEntry::Direct { locator, offset } => {
                    let base = arena.locator(locator);
                    let composed = MemoryArena::compose_offset(
                        MemoryArena::compose_offset(base.offset, offset),
                        extra_offset,
                    );
                    if let Some(resolved) = arena.peek_locator(base.object, composed) {
                        out.insert(resolved);
                    } else if composed == base.offset {
                        out.insert(locator);
                    }
                }
                PtEntry::Derived { parent, offset } if follow_derived => {
                    let composed = MemoryArena::compose_offset(offset, extra_offset);
                    self.collect_readonly(arena, parent, composed, follow_derived, visited, out);
                }
                PtEntry::Derived { .. } => {}
            }
        }
    }

    /// Same traversal as `resolve_locators`, but materializes missing
    /// locators along the way (used by `store_value_at`, which must have
    /// somewhere to record the write even if the target offset was never
    /// read before).
    fn resolve_locators_mut(
        &self,
        arena: &mut MemoryArena,
        id: PTResultId,
        extra_offset: i64,
        follow_derived: bool,
        visited: &mut rustc_hash::FxHashSet<PTResultId>,
        out: &mut indexmap::IndexSet<LocatorId>,
    ) {
        if !visited.insert(id) {
            return;
        }
        let entries: Vec<PtEntry> = self.get(id).entries().copied().collect();
        for entry in entries {
            match entry {
                PtEntry::Direct { locator, offset } => {
                    let (obj, base_offset) = {
                        let base = arena.locator(locator);
                        (base.object, base.offset)
                    };
                    let composed = MemoryArena::compose_offset(
                        MemoryArena::compose_offset(base_offset, offset),
                        extra_offset,
                    );
                    let resolved = arena.find_locator(obj, composed, true).expect("create_if_missing=true always returns Some");
                    out.insert(resolved);
                }
                PtEntry::Derived { parent, offset } if follow_derived => {
                    let composed = MemoryArena::compose_offset(offset, extra_offset);
                    self.resolve_locators_mut(arena, parent, composed, follow_derived, visited, out);
                }
                PtEntry::Derived { .. } => {}
            }
        }
    }

    /// Load transfer function (spec §4.2 `load_ptr_at`): for every locator
    /// reachable from `ptr`, collects all values ever stored there and
    /// derives `out`'s points-to set from each.
    pub fn load_ptr_at(
        &mut self,
        arena: &MemoryArena,
        ptr: ValueId,
        _inst: InstId,
        out: ValueId,
        follow_derived: bool,
        extra_offset: i64,
    ) {
        let Some(ptr_pt) = self.find_pt_result(ptr, false) else {
            return;
        };
        let mut visited = rustc_hash::FxHashSet::default();
        let mut locators = indexmap::IndexSet::new();
        self.collect_readonly(arena, ptr_pt, extra_offset, follow_derived, &mut visited, &mut locators);

        let source_pts: Vec<PTResultId> = locators
            .into_iter()
            .flat_map(|loc| arena.locator(loc).writes().to_vec())
            .filter_map(|write| self.find_pt_result(write.value, false))
            .collect();
        for pt in source_pts {
            self.derive_pts_from(out, pt, 0);
        }
    }

    /// Store transfer function (spec §4.2 `store_value_at`): appends a
    /// versioned write to every locator reachable from `ptr`.
    pub fn store_value_at(
        &mut self,
        arena: &mut MemoryArena,
        ptr: ValueId,
        inst: InstId,
        value: ValueId,
        is_pointer_typed: bool,
    ) {
        let Some(ptr_pt) = self.find_pt_result(ptr, false) else {
            return;
        };
        let mut visited = rustc_hash::FxHashSet::default();
        let mut locators = indexmap::IndexSet::new();
        self.resolve_locators_mut(arena, ptr_pt, 0, true, &mut visited, &mut locators);
        for loc in locators {
            arena.locator_mut(loc).push_write(inst, value);
        }
        if is_pointer_typed {
            self.find_pt_result(value, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, InstId as I};
    use crate::memory::MemObjectKind;

    fn v(i: u32) -> ValueId {
        ValueId::Inst(I(i))
    }

    #[test]
    fn direct_points_to_round_trips() {
        let mut arena = MemoryArena::new();
        let mut g = PointsToGraph::new();
        let obj = arena.create_object(MemObjectKind::Concrete, Some(v(0)), 0);
        let id = g.add_points_to(&mut arena, v(1), obj, 0);
        let locs = g.resolve_locators(&arena, id, true);
        assert_eq!(locs.len(), 1);
        assert_eq!(arena.locator(locs[0]).object, obj);
    }

    #[test]
    fn store_then_load_propagates_value() {
        let mut arena = MemoryArena::new();
        let mut g = PointsToGraph::new();
        let obj = arena.create_object(MemObjectKind::Concrete, Some(v(0)), 0);
        g.add_points_to(&mut arena, v(1), obj, 0); // %1 points to obj

        let payload_obj = arena.create_object(MemObjectKind::Concrete, Some(v(2)), 0);
        g.add_points_to(&mut arena, v(2), payload_obj, 0); // %2 points to payload_obj

        g.store_value_at(&mut arena, v(1), I(3), v(2), true); // store %2, %1
        g.load_ptr_at(&arena, v(1), I(4), v(5), true, 0); // %5 = load %1

        let pt5 = g.find_pt_result(v(5), false).unwrap();
        let locs = g.resolve_locators(&arena, pt5, true);
        assert_eq!(locs.len(), 1);
        assert_eq!(arena.locator(locs[0]).object, payload_obj);
    }

    #[test]
    fn derived_cycle_terminates() {
        let mut arena = MemoryArena::new();
        let mut g = PointsToGraph::new();
        let a = g.find_pt_result(v(1), true).unwrap();
        let b = g.find_pt_result(v(2), true).unwrap();
        g.derive_pts_from(v(1), b, 0);
        g.derive_pts_from(v(2), a, 0);
        // Should terminate, not loop forever, and yield an empty (no direct
        // targets anywhere in the cycle) but finite result both times.
        let first = g.resolve_locators(&arena, a, true);
        let second = g.resolve_locators(&arena, a, true);
        assert_eq!(first, second);
        assert!(first.is_empty());
    }

    #[test]
    fn load_with_no_known_targets_is_a_noop() {
        let arena = MemoryArena::new();
        let mut g = PointsToGraph::new();
        g.load_ptr_at(&arena, v(99), I(1), v(100), true, 0);
        assert!(g.find_pt_result(v(100), false).is_none());
    }
}
