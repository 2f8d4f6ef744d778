use crate::ir::ValueId;

/// A symbolic description of a memory location reachable from a function's
/// arguments or globals (spec §3 `AccessPath`): "argument `%a` dereferenced,
/// then field +16" is `root = Arg(a), offsets = [16]`.
///
/// `offsets.len()` is the access-path depth used by `collectInputs` (0 =
/// direct formal, 1 = dereferenced formal, ...). Depth is bounded by
/// `restrict_ap_level`; paths that would exceed the cap are never
/// constructed (the engine widens to Unknown instead, per spec §4.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessPath {
    pub root: ValueId,
    pub offsets: Vec<i64>,
}

impl AccessPath {
    pub fn direct(root: ValueId) -> Self {
        Self {
            root,
            offsets: Vec::new(),
        }
    }

    pub fn extend(&self, offset: i64) -> Self {
        let mut offsets = self.offsets.clone();
        offsets.push(offset);
        Self {
            root: self.root,
            offsets,
        }
    }

    pub fn depth(&self) -> usize {
        self.offsets.len()
    }

    pub fn exceeds(&self, cap: u32) -> bool {
        self.offsets.len() > cap as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionId, ValueId as V};

    #[test]
    fn depth_tracks_offsets() {
        let root = V::Arg(FunctionId(0), 0);
        let d0 = AccessPath::direct(root);
        assert_eq!(d0.depth(), 0);
        let d1 = d0.extend(16);
        assert_eq!(d1.depth(), 1);
        let d2 = d1.extend(8);
        assert_eq!(d2.depth(), 2);
        assert!(!d2.exceeds(8));
        assert!(d2.exceeds(1));
    }
}
