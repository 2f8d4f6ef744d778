//! Memory Model (C1): memory objects, field locators, and the arena that
//! owns them for the lifetime of a session.

mod locator;
mod object;

pub use locator::{LocationWrite, Locator, LocatorId};
pub use object::{MemObject, MemObjectId, MemObjectKind};

use crate::ir::ValueId;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

/// Offset used to denote an unknown / merged field (spec §3: "offset = -1
/// denotes an unknown/merged field").
pub const UNKNOWN_OFFSET: i64 = -1;

/// Per-module arena owning every `MemObject` and `Locator` for one analysis
/// session (spec §3 Ownership: "MemObjects are owned by a per-module arena
/// (not per-function) so cross-function escape sharing is sound").
#[derive(Debug)]
pub struct MemoryArena {
    objects: Vec<MemObject>,
    null_id: MemObjectId,
    unknown_id: MemObjectId,
    /// Dedup key for Concrete/Pseudo objects: (allocation-site, kind-tag,
    /// creation-index) -> id (spec §4.1). Re-processing the same alloc site
    /// with the same creation index returns the same object, which is what
    /// makes re-running the intra engine idempotent (spec §8).
    object_index: FxHashMap<(Option<ValueId>, u8, u64), MemObjectId>,
    locators: Vec<Locator>,
    /// Canonicalizes (object, offset) -> locator id. The factory guarantees
    /// that two locators with equal (object, offset) are pointer-identical
    /// (spec §4.1) by always routing through this map.
    locator_index: FxHashMap<(MemObjectId, i64), LocatorId>,
    /// Per-object offsets in insertion order, for deterministic enumeration
    /// (e.g. by `collectOutputs`).
    object_locators: IndexMap<MemObjectId, Vec<i64>>,
}

impl MemoryArena {
    pub fn new() -> Self {
        let mut objects = Vec::new();
        let null_id = MemObjectId(0);
        let unknown_id = MemObjectId(1);
        objects.push(MemObject::new(null_id, MemObjectKind::Null, None));
        objects.push(MemObject::new(unknown_id, MemObjectKind::Unknown, None));
        Self {
            objects,
            null_id,
            unknown_id,
            object_index: FxHashMap::default(),
            locators: Vec::new(),
            locator_index: FxHashMap::default(),
            object_locators: IndexMap::new(),
        }
    }

    pub fn null_object(&self) -> MemObjectId {
        self.null_id
    }

    pub fn unknown_object(&self) -> MemObjectId {
        self.unknown_id
    }

    pub fn object(&self, id: MemObjectId) -> &MemObject {
        &self.objects[id.0 as usize]
    }

    /// Creates a fresh Concrete or Pseudo object, or returns the existing one
    /// for the same (site, kind, creation_index) key. Calling this for Null
    /// or Unknown always returns the shared singleton.
    pub fn create_object(
        &mut self,
        kind: MemObjectKind,
        alloc_site: Option<ValueId>,
        creation_index: u64,
    ) -> MemObjectId {
        match kind {
            MemObjectKind::Null => return self.null_id,
            MemObjectKind::Unknown => return self.unknown_id,
            MemObjectKind::Concrete | MemObjectKind::Pseudo => {}
        }
        let key = (alloc_site, kind.tag(), creation_index);
        if let Some(&id) = self.object_index.get(&key) {
            return id;
        }
        let id = MemObjectId(self.objects.len() as u32);
        self.objects.push(MemObject::new(id, kind, alloc_site));
        self.object_index.insert(key, id);
        id
    }

    /// Lazily materializes the locator for (object, offset), composing offset
    /// arithmetic by integer addition and collapsing to the unknown offset on
    /// 64-bit overflow (spec §4.1). Returns `None` when `create_if_missing`
    /// is false and no such locator exists yet.
    pub fn find_locator(
        &mut self,
        object: MemObjectId,
        offset: i64,
        create_if_missing: bool,
    ) -> Option<LocatorId> {
        if let Some(&id) = self.locator_index.get(&(object, offset)) {
            return Some(id);
        }
        if !create_if_missing {
            return None;
        }
        let id = LocatorId(self.locators.len() as u32);
        self.locators.push(Locator::new(id, object, offset));
        self.locator_index.insert((object, offset), id);
        self.object_locators
            .entry(object)
            .or_default()
            .push(offset);
        Some(id)
    }

    /// Composes a base offset with an additional delta, collapsing to
    /// `UNKNOWN_OFFSET` on overflow (spec §4.1).
    pub fn compose_offset(base: i64, delta: i64) -> i64 {
        if base == UNKNOWN_OFFSET || delta == UNKNOWN_OFFSET {
            return UNKNOWN_OFFSET;
        }
        base.checked_add(delta).unwrap_or(UNKNOWN_OFFSET)
    }

    /// Read-only lookup of an already-materialized Concrete/Pseudo object
    /// for the given dedup key, without creating one.
    pub fn peek_object(
        &self,
        alloc_site: Option<ValueId>,
        kind: MemObjectKind,
        creation_index: u64,
    ) -> Option<MemObjectId> {
        self.object_index
            .get(&(alloc_site, kind.tag(), creation_index))
            .copied()
    }

    /// Read-only lookup of an existing (object, offset) locator, without
    /// materializing one. Used by read-only consumers (C7, C8) and by the
    /// points-to iterator's non-mutating traversal.
    pub fn peek_locator(&self, object: MemObjectId, offset: i64) -> Option<LocatorId> {
        self.locator_index.get(&(object, offset)).copied()
    }

    pub fn locator(&self, id: LocatorId) -> &Locator {
        &self.locators[id.0 as usize]
    }

    pub fn locator_mut(&mut self, id: LocatorId) -> &mut Locator {
        &mut self.locators[id.0 as usize]
    }

    /// Offsets known for `object`, in the order they were first materialized.
    pub fn offsets_of(&self, object: MemObjectId) -> &[i64] {
        self.object_locators
            .get(&object)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

impl Default for MemoryArena {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_and_unknown_are_singletons() {
        let mut arena = MemoryArena::new();
        let n1 = arena.create_object(MemObjectKind::Null, None, 0);
        let n2 = arena.create_object(MemObjectKind::Null, Some(ValueId::Global(crate::ir::GlobalId(9))), 7);
        assert_eq!(n1, n2);
        assert_eq!(n1, arena.null_object());

        let u1 = arena.create_object(MemObjectKind::Unknown, None, 0);
        assert_eq!(u1, arena.unknown_object());
        assert_ne!(u1, n1);
    }

    #[test]
    fn concrete_objects_dedup_on_site_and_index() {
        let mut arena = MemoryArena::new();
        let site = ValueId::Inst(crate::ir::InstId(1));
        let a = arena.create_object(MemObjectKind::Concrete, Some(site), 0);
        let b = arena.create_object(MemObjectKind::Concrete, Some(site), 0);
        assert_eq!(a, b);
        let c = arena.create_object(MemObjectKind::Concrete, Some(site), 1);
        assert_ne!(a, c);
    }

    #[test]
    fn locator_identity_is_canonical() {
        let mut arena = MemoryArena::new();
        let obj = arena.create_object(MemObjectKind::Concrete, None, 0);
        let l1 = arena.find_locator(obj, 16, true).unwrap();
        let l2 = arena.find_locator(obj, 16, true).unwrap();
        assert_eq!(l1, l2);
        let l3 = arena.find_locator(obj, 24, true).unwrap();
        assert_ne!(l1, l3);
    }

    #[test]
    fn missing_locator_without_create() {
        let mut arena = MemoryArena::new();
        let obj = arena.create_object(MemObjectKind::Concrete, None, 0);
        assert!(arena.find_locator(obj, 8, false).is_none());
    }

    #[test]
    fn offset_composition_overflow_collapses_to_unknown() {
        assert_eq!(MemoryArena::compose_offset(i64::MAX, 1), UNKNOWN_OFFSET);
        assert_eq!(MemoryArena::compose_offset(4, 8), 12);
        assert_eq!(MemoryArena::compose_offset(UNKNOWN_OFFSET, 8), UNKNOWN_OFFSET);
    }
}
