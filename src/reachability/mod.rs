//! Source/Sink Reachability (C8): BFS over the value-flow graph from
//! checker-supplied sources to checker-supplied sinks, with witness-path
//! extraction (spec §4.8).

use crate::vfg::{EdgeKind, ValueFlowGraph, VfgNode};
use indexmap::{IndexMap, IndexSet};
use std::collections::VecDeque;

/// Caps how many steps a witness path keeps before being truncated with an
/// ellipsis marker (spec §4.8: "truncate beyond a configured cap").
pub const DEFAULT_WITNESS_CAP: usize = 32;

/// Default call-string length for context-sensitive reachability (spec §6).
pub const DEFAULT_K_CONTEXT: usize = 2;

#[derive(Debug, Clone)]
pub enum WitnessStep {
    Node(VfgNode),
    Truncated,
}

#[derive(Debug, Clone)]
pub struct Witness {
    pub source: VfgNode,
    pub sink: VfgNode,
    pub steps: Vec<WitnessStep>,
}

/// A reachable (source, sink) pair together with the shortest witness found.
#[derive(Debug, Clone)]
pub struct ReachabilityHit {
    pub source: VfgNode,
    pub sink: VfgNode,
    pub witness: Witness,
}

/// The three checker-supplied predicates that parameterize a reachability
/// query (spec §4.8 / §4.10).
pub trait SourceSinkOracle {
    fn is_source(&self, node: &VfgNode) -> bool;
    fn is_sink(&self, node: &VfgNode) -> bool;
    /// Whether flow is allowed to cross this edge. Checkers use this to
    /// block flows their transfer functions neutralize (e.g. a `realloc`
    /// blocking a use-after-free path, spec §8 scenario 3).
    fn is_valid_transfer(&self, from: &VfgNode, to: &VfgNode, kind: EdgeKind) -> bool;
}

pub struct ReachabilityEngine<'a> {
    vfg: &'a ValueFlowGraph,
    witness_cap: usize,
    /// Call-string length. 0 (the default) means context-insensitive: the
    /// call string never accumulates anything, so a `Return` edge's context
    /// check always sees an empty top and is allowed unconditionally — the
    /// same behavior as ignoring call sites entirely. `with_context(k)` with
    /// `k >= 1` enables k-limited call-string matching (spec §4.8).
    k_context: usize,
}

impl<'a> ReachabilityEngine<'a> {
    pub fn new(vfg: &'a ValueFlowGraph) -> Self {
        Self {
            vfg,
            witness_cap: DEFAULT_WITNESS_CAP,
            k_context: 0,
        }
    }

    pub fn with_witness_cap(mut self, cap: usize) -> Self {
        self.witness_cap = cap;
        self
    }

    /// Enables k-limited call-string context sensitivity (spec §6 `--ctx`,
    /// §4.8 "k-call-string contexts").
    pub fn with_context(mut self, k: usize) -> Self {
        self.k_context = k;
        self
    }

    /// BFS from every source node; stops expanding a path the moment it
    /// reaches a sink so the witness is always a shortest path (spec §4.8).
    /// A separate reachability table is implicitly maintained per call
    /// string: the visited set is keyed on `(node, context)`, so the same
    /// node reached through two different call strings is explored twice,
    /// and the reported hits are the union over every full context reached
    /// — exactly the "union of results over all full contexts sharing
    /// suffix c" property spec §4.8 describes.
    pub fn find_reachable(&self, oracle: &dyn SourceSinkOracle) -> Vec<ReachabilityHit> {
        let mut hits = Vec::new();
        for &source in self.vfg.nodes() {
            if !oracle.is_source(&source) {
                continue;
            }
            hits.extend(self.bfs_from(source, oracle));
        }
        hits
    }

    fn bfs_from(&self, source: VfgNode, oracle: &dyn SourceSinkOracle) -> Vec<ReachabilityHit> {
        type State = (VfgNode, CallString);
        let start: State = (source, CallString::default());

        let mut visited: IndexSet<State> = IndexSet::new();
        let mut parent: IndexMap<State, State> = IndexMap::new();
        let mut queue: VecDeque<State> = VecDeque::new();
        let mut hits = Vec::new();

        visited.insert(start.clone());
        queue.push_back(start.clone());

        while let Some(cur) = queue.pop_front() {
            if cur.0 != source && oracle.is_sink(&cur.0) {
                hits.push(ReachabilityHit {
                    source,
                    sink: cur.0,
                    witness: self.build_witness(&start, &cur, &parent),
                });
                continue;
            }
            for (next, kind) in self.vfg.successors(cur.0) {
                if !oracle.is_valid_transfer(&cur.0, next, *kind) {
                    continue;
                }
                let Some(next_ctx) = self.step_context(&cur.1, *kind) else {
                    continue;
                };
                let next_state = (*next, next_ctx);
                if visited.contains(&next_state) {
                    continue;
                }
                visited.insert(next_state.clone());
                parent.insert(next_state.clone(), cur.clone());
                queue.push_back(next_state);
            }
        }

        hits
    }

    /// Advances a call string across one edge. `None` means the edge is an
    /// invalid call/return pairing under the current context and must be
    /// pruned (a `Return(site)` whose `site` doesn't match the top of a
    /// non-empty call string means this return doesn't belong to the
    /// invocation the walk is currently inside).
    fn step_context(&self, ctx: &CallString, kind: EdgeKind) -> Option<CallString> {
        match kind {
            EdgeKind::DefUse | EdgeKind::Raw | EdgeKind::Alias => Some(ctx.clone()),
            EdgeKind::Call(site) => Some(ctx.push(site.0, self.k_context)),
            EdgeKind::Return(site) => match ctx.top() {
                Some(top) if top == site.0 => Some(ctx.pop()),
                Some(_) => None,
                // Context truncated past k, or never entered via a tracked
                // call edge: no information to check against, so allow.
                None => Some(ctx.clone()),
            },
        }
    }

    fn build_witness(&self, source: &(VfgNode, CallString), sink: &(VfgNode, CallString), parent: &IndexMap<(VfgNode, CallString), (VfgNode, CallString)>) -> Witness {
        let mut path = vec![sink.0];
        let mut cur = sink.clone();
        while cur.0 != source.0 || cur.1 != source.1 {
            match parent.get(&cur) {
                Some(p) => {
                    path.push(p.0);
                    cur = p.clone();
                }
                None => break,
            }
        }
        path.reverse();
        let source = source.0;
        let sink = sink.0;

        let steps = if path.len() > self.witness_cap {
            let head = self.witness_cap / 2;
            let tail = self.witness_cap - head;
            let mut steps: Vec<WitnessStep> = path[..head].iter().map(|n| WitnessStep::Node(*n)).collect();
            steps.push(WitnessStep::Truncated);
            steps.extend(path[path.len() - tail..].iter().map(|n| WitnessStep::Node(*n)));
            steps
        } else {
            path.into_iter().map(WitnessStep::Node).collect()
        };

        Witness { source, sink, steps }
    }
}

/// A call-string context: the bounded stack of call sites (per spec §4.8's
/// "k-call-string context-sensitive mode"). Kept abstract over what a
/// "call site" is so C10 checkers can stamp it from the VFG's interprocedural
/// edges without this module depending on `InstId` directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct CallString(Vec<u32>);

impl CallString {
    pub fn push(&self, site: u32, k: usize) -> Self {
        let mut stack = self.0.clone();
        stack.push(site);
        if stack.len() > k {
            stack.remove(0);
        }
        CallString(stack)
    }

    pub fn is_suffix_compatible(&self, other: &CallString) -> bool {
        let n = self.0.len().min(other.0.len());
        self.0[self.0.len() - n..] == other.0[other.0.len() - n..]
    }

    /// The most recently pushed (innermost) call site, if the string isn't
    /// empty — either because nothing has been entered yet, or because a
    /// deeper nesting than `k` pushed it back out of the window.
    pub fn top(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// Pops the innermost call site. Only meaningful to call once `top()`
    /// has confirmed a `Return` edge's site matches it.
    pub fn pop(&self) -> Self {
        let mut stack = self.0.clone();
        stack.pop();
        CallString(stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, InstId, ValueId};

    struct AllowAll {
        source: VfgNode,
        sink: VfgNode,
    }

    impl SourceSinkOracle for AllowAll {
        fn is_source(&self, node: &VfgNode) -> bool {
            *node == self.source
        }
        fn is_sink(&self, node: &VfgNode) -> bool {
            *node == self.sink
        }
        fn is_valid_transfer(&self, _from: &VfgNode, _to: &VfgNode, _kind: EdgeKind) -> bool {
            true
        }
    }

    fn node(f: u32, i: u32) -> VfgNode {
        VfgNode {
            function: FunctionId(f),
            value: ValueId::Inst(InstId(i)),
        }
    }

    #[test]
    fn finds_direct_path_and_builds_witness() {
        let mut vfg = ValueFlowGraph::new();
        vfg.add_edge(node(0, 0), node(0, 1), EdgeKind::DefUse);
        vfg.add_edge(node(0, 1), node(0, 2), EdgeKind::Raw);

        let oracle = AllowAll { source: node(0, 0), sink: node(0, 2) };
        let engine = ReachabilityEngine::new(&vfg);
        let hits = engine.find_reachable(&oracle);

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].witness.steps.len(), 3);
    }

    #[test]
    fn blocked_transfer_prevents_reachability() {
        let oracle = AllowAllButTransfer;

        struct AllowAllButTransfer;
        impl SourceSinkOracle for AllowAllButTransfer {
            fn is_source(&self, n: &VfgNode) -> bool {
                *n == node(0, 0)
            }
            fn is_sink(&self, n: &VfgNode) -> bool {
                *n == node(0, 2)
            }
            fn is_valid_transfer(&self, _from: &VfgNode, _to: &VfgNode, _kind: EdgeKind) -> bool {
                false
            }
        }

        let mut vfg = ValueFlowGraph::new();
        vfg.add_edge(node(0, 0), node(0, 1), EdgeKind::DefUse);
        vfg.add_edge(node(0, 1), node(0, 2), EdgeKind::Raw);

        let engine = ReachabilityEngine::new(&vfg);
        let hits = engine.find_reachable(&oracle);
        assert!(hits.is_empty());
    }

    #[test]
    fn context_sensitive_mode_blocks_mismatched_call_return() {
        // A call-site 1 edge into the callee, then a return tagged with an
        // unrelated call-site 2: under k-call-string context sensitivity
        // this is not a valid call/return pairing and must be pruned, even
        // though the context-insensitive default allows it (spec §4.8).
        let mut vfg = ValueFlowGraph::new();
        vfg.add_edge(node(0, 0), node(1, 0), EdgeKind::Call(InstId(1)));
        vfg.add_edge(node(1, 0), node(0, 1), EdgeKind::Return(InstId(2)));

        let oracle = AllowAll { source: node(0, 0), sink: node(0, 1) };

        let insensitive = ReachabilityEngine::new(&vfg);
        assert_eq!(insensitive.find_reachable(&oracle).len(), 1);

        let sensitive = ReachabilityEngine::new(&vfg).with_context(1);
        assert!(sensitive.find_reachable(&oracle).is_empty());
    }

    #[test]
    fn context_sensitive_mode_allows_matched_call_return() {
        let mut vfg = ValueFlowGraph::new();
        vfg.add_edge(node(0, 0), node(1, 0), EdgeKind::Call(InstId(1)));
        vfg.add_edge(node(1, 0), node(0, 1), EdgeKind::Return(InstId(1)));

        let oracle = AllowAll { source: node(0, 0), sink: node(0, 1) };
        let sensitive = ReachabilityEngine::new(&vfg).with_context(1);
        assert_eq!(sensitive.find_reachable(&oracle).len(), 1);
    }

    #[test]
    fn call_string_suffix_compatibility() {
        let a = CallString::default().push(1, 2).push(2, 2);
        let b = CallString::default().push(9, 2).push(2, 2);
        assert!(a.is_suffix_compatible(&b));
        let c = CallString::default().push(9, 2).push(8, 2);
        assert!(!a.is_suffix_compatible(&c));
    }
}
