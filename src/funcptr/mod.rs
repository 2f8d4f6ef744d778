//! Function-Pointer Results (C5): per-call-site callee sets with change
//! detection, grounded on the original `FunctionPointerResults::hasChanged`.

use crate::ir::{FunctionId, InstId};
use indexmap::{IndexMap, IndexSet};

pub type CallTargetSet = IndexSet<FunctionId>;
pub type CallSiteTargetMap = IndexMap<InstId, CallTargetSet>;

#[derive(Debug, Default)]
pub struct FunctionPointerResults {
    results: IndexMap<FunctionId, CallSiteTargetMap>,
}

impl FunctionPointerResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_targets(&self, caller: FunctionId, site: InstId) -> Option<&CallTargetSet> {
        self.results.get(&caller).and_then(|m| m.get(&site))
    }

    pub fn set_targets(&mut self, caller: FunctionId, site: InstId, targets: CallTargetSet) {
        self.results.entry(caller).or_default().insert(site, targets);
    }

    /// Diffs `new_results` against what is stored for `caller`; updates the
    /// store only if something changed, and reports whether it did (spec
    /// §4.5). A call site gaining or losing any callee, or transitioning
    /// between empty and nonempty, counts as a change.
    pub fn update_and_detect_changes(
        &mut self,
        caller: FunctionId,
        new_results: CallSiteTargetMap,
    ) -> bool {
        let changed = Self::has_changed(self.results.get(&caller), &new_results);
        if changed {
            self.results.insert(caller, new_results);
        }
        changed
    }

    fn has_changed(old: Option<&CallSiteTargetMap>, new: &CallSiteTargetMap) -> bool {
        let Some(old_map) = old else {
            return new.values().any(|s| !s.is_empty());
        };
        for (site, new_targets) in new {
            match old_map.get(site) {
                None => {
                    if !new_targets.is_empty() {
                        return true;
                    }
                }
                Some(old_targets) => {
                    if old_targets.len() != new_targets.len() {
                        return true;
                    }
                    if old_targets.iter().any(|t| !new_targets.contains(t)) {
                        return true;
                    }
                }
            }
        }
        for (site, old_targets) in old_map {
            if !old_targets.is_empty() && !new.contains_key(site) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f(n: u32) -> FunctionId {
        FunctionId(n)
    }
    fn site(n: u32) -> InstId {
        InstId(n)
    }

    #[test]
    fn first_nonempty_result_is_a_change() {
        let mut r = FunctionPointerResults::new();
        let mut m = CallSiteTargetMap::new();
        m.insert(site(0), [f(1)].into_iter().collect());
        assert!(r.update_and_detect_changes(f(0), m));
    }

    #[test]
    fn repeating_identical_results_is_not_a_change() {
        let mut r = FunctionPointerResults::new();
        let mut m = CallSiteTargetMap::new();
        m.insert(site(0), [f(1), f(2)].into_iter().collect());
        assert!(r.update_and_detect_changes(f(0), m.clone()));
        assert!(!r.update_and_detect_changes(f(0), m));
    }

    #[test]
    fn gaining_a_callee_is_a_change() {
        let mut r = FunctionPointerResults::new();
        let mut m1 = CallSiteTargetMap::new();
        m1.insert(site(0), [f(1)].into_iter().collect());
        r.update_and_detect_changes(f(0), m1);

        let mut m2 = CallSiteTargetMap::new();
        m2.insert(site(0), [f(1), f(2)].into_iter().collect());
        assert!(r.update_and_detect_changes(f(0), m2));
    }

    #[test]
    fn removing_a_nonempty_site_is_a_change() {
        let mut r = FunctionPointerResults::new();
        let mut m1 = CallSiteTargetMap::new();
        m1.insert(site(0), [f(1)].into_iter().collect());
        r.update_and_detect_changes(f(0), m1);

        let m2 = CallSiteTargetMap::new();
        assert!(r.update_and_detect_changes(f(0), m2));
    }

    #[test]
    fn get_targets_reflects_stored_state() {
        let mut r = FunctionPointerResults::new();
        let mut m = CallSiteTargetMap::new();
        m.insert(site(0), [f(1)].into_iter().collect());
        r.update_and_detect_changes(f(0), m);
        assert_eq!(r.get_targets(f(0), site(0)).unwrap().len(), 1);
        assert!(r.get_targets(f(0), site(1)).is_none());
    }
}
