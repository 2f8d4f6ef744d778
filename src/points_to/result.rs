use crate::memory::LocatorId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PTResultId(pub u32);

/// One points-to entry: either a direct (locator, offset) target, or a
/// derived reference to another `PTResult` plus an offset (spec §3
/// `PTResult`). Derived entries let equal-modulo-offset values share
/// points-to information instead of eagerly copying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtEntry {
    Direct { locator: LocatorId, offset: i64 },
    Derived { parent: PTResultId, offset: i64 },
}

/// Points-to information attached to one IR value (spec §3 `PTResult`).
#[derive(Debug, Clone)]
pub struct PTResult {
    pub id: PTResultId,
    entries: indexmap::IndexSet<PtEntry>,
}

impl PTResult {
    pub fn new(id: PTResultId) -> Self {
        Self {
            id,
            entries: indexmap::IndexSet::new(),
        }
    }

    pub fn insert(&mut self, entry: PtEntry) -> bool {
        self.entries.insert(entry)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PtEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
