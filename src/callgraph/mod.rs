//! Call-Graph State (C4): caller/callee edges with back-edge marking.
//!
//! Grounded on the original `CallGraphState`'s 3-colour DFS (`notVisited` /
//! `visiting` / `done`) over insertion-ordered maps.

use crate::ir::FunctionId;
use indexmap::IndexMap;
use indexmap::IndexSet;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct CallGraphState {
    top_down: IndexMap<FunctionId, IndexSet<FunctionId>>,
    bottom_up: IndexMap<FunctionId, IndexSet<FunctionId>>,
    back_edges: IndexSet<(FunctionId, FunctionId)>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl CallGraphState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `caller -> callee` into both forward and reverse maps, unless
    /// the edge is already known to be a back-edge (spec §4.4).
    pub fn add_edge(&mut self, caller: FunctionId, callee: FunctionId) {
        if self.back_edges.contains(&(caller, callee)) {
            return;
        }
        self.top_down.entry(caller).or_default().insert(callee);
        self.bottom_up.entry(callee).or_default().insert(caller);
        self.top_down.entry(callee).or_default();
        self.bottom_up.entry(caller).or_default();
    }

    pub fn is_back_edge(&self, u: FunctionId, v: FunctionId) -> bool {
        self.back_edges.contains(&(u, v))
    }

    /// Makes sure `f` appears in both maps even with no known edges yet, so
    /// leaf/isolated functions still show up in `functions()`.
    pub fn ensure_node(&mut self, f: FunctionId) {
        self.top_down.entry(f).or_default();
        self.bottom_up.entry(f).or_default();
    }

    pub fn callees(&self, f: FunctionId) -> impl Iterator<Item = FunctionId> + '_ {
        self.top_down
            .get(&f)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    pub fn callers(&self, f: FunctionId) -> impl Iterator<Item = FunctionId> + '_ {
        self.bottom_up
            .get(&f)
            .into_iter()
            .flat_map(|s| s.iter().copied())
    }

    pub fn functions(&self) -> impl Iterator<Item = FunctionId> + '_ {
        self.top_down.keys().copied()
    }

    /// DFS over the forward map colouring nodes white/gray/black. An edge to
    /// a gray (on-stack) node is a back-edge: it is recorded and removed
    /// from both forward maps during traversal (spec §4.4). Returns the set
    /// of callers whose outgoing edge set changed.
    pub fn detect_back_edges(&mut self) -> IndexSet<FunctionId> {
        let mut color: FxHashMap<FunctionId, Color> = FxHashMap::default();
        let nodes: Vec<FunctionId> = self.top_down.keys().copied().collect();
        let mut changed: IndexSet<FunctionId> = IndexSet::new();
        let mut to_remove: Vec<(FunctionId, FunctionId)> = Vec::new();

        for n in nodes {
            if color.get(&n).copied().unwrap_or(Color::White) == Color::White {
                self.visit(n, &mut color, &mut to_remove, &mut changed);
            }
        }

        for (u, v) in to_remove {
            self.back_edges.insert((u, v));
            if let Some(set) = self.top_down.get_mut(&u) {
                set.shift_remove(&v);
            }
            if let Some(set) = self.bottom_up.get_mut(&v) {
                set.shift_remove(&u);
            }
        }

        changed
    }

    fn visit(
        &self,
        u: FunctionId,
        color: &mut FxHashMap<FunctionId, Color>,
        to_remove: &mut Vec<(FunctionId, FunctionId)>,
        changed: &mut IndexSet<FunctionId>,
    ) {
        color.insert(u, Color::Gray);
        if let Some(callees) = self.top_down.get(&u) {
            for &v in callees {
                match color.get(&v).copied().unwrap_or(Color::White) {
                    Color::White => self.visit(v, color, to_remove, changed),
                    Color::Gray => {
                        to_remove.push((u, v));
                        changed.insert(u);
                    }
                    Color::Black => {}
                }
            }
        }
        color.insert(u, Color::Black);
    }

    /// Invariant check used by tests: `top_down[u]` contains `v` iff
    /// `bottom_up[v]` contains `u` (spec §8).
    #[cfg(test)]
    fn symmetric(&self) -> bool {
        for (u, callees) in &self.top_down {
            for v in callees {
                if !self.bottom_up.get(v).is_some_and(|s| s.contains(u)) {
                    return false;
                }
            }
        }
        for (v, callers) in &self.bottom_up {
            for u in callers {
                if !self.top_down.get(u).is_some_and(|s| s.contains(v)) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(n: u32) -> FunctionId {
        FunctionId(n)
    }

    #[test]
    fn forward_reverse_maps_stay_symmetric() {
        let mut cg = CallGraphState::new();
        cg.add_edge(f(0), f(1));
        cg.add_edge(f(1), f(2));
        cg.add_edge(f(2), f(0)); // cycle
        cg.detect_back_edges();
        assert!(cg.symmetric());
    }

    #[test]
    fn self_loop_is_back_edge() {
        let mut cg = CallGraphState::new();
        cg.add_edge(f(0), f(0));
        let changed = cg.detect_back_edges();
        assert!(cg.is_back_edge(f(0), f(0)));
        assert!(changed.contains(&f(0)));
        assert_eq!(cg.callees(f(0)).count(), 0);
    }

    #[test]
    fn cycle_removes_back_edge_from_forward_maps() {
        let mut cg = CallGraphState::new();
        cg.add_edge(f(0), f(1));
        cg.add_edge(f(1), f(0));
        cg.detect_back_edges();
        assert!(cg.is_back_edge(f(1), f(0)) || cg.is_back_edge(f(0), f(1)));
        // exactly one direction remains a forward edge
        let fwd_count = [(f(0), f(1)), (f(1), f(0))]
            .iter()
            .filter(|&&(a, b)| cg.callees(a).any(|c| c == b))
            .count();
        assert_eq!(fwd_count, 1);
    }

    #[test]
    fn acyclic_graph_has_no_back_edges() {
        let mut cg = CallGraphState::new();
        cg.add_edge(f(0), f(1));
        cg.add_edge(f(1), f(2));
        let changed = cg.detect_back_edges();
        assert!(changed.is_empty());
        assert_eq!(cg.callees(f(0)).collect::<Vec<_>>(), vec![f(1)]);
    }
}
