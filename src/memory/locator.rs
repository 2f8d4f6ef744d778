use super::MemObjectId;
use crate::ir::{InstId, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocatorId(pub u32);

/// A single versioned write to a locator (spec §4.2: "each store attaches a
/// (defining-instruction, value-ref) pair to the target locator").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocationWrite {
    pub defining_inst: InstId,
    pub value: ValueId,
    pub version: u32,
}

/// A (MemObject, offset, function-level) triple (spec §3 `ObjectLocator`).
#[derive(Debug, Clone)]
pub struct Locator {
    pub id: LocatorId,
    pub object: MemObjectId,
    pub offset: i64,
    writes: Vec<LocationWrite>,
}

impl Locator {
    pub fn new(id: LocatorId, object: MemObjectId, offset: i64) -> Self {
        Self {
            id,
            object,
            offset,
            writes: Vec::new(),
        }
    }

    /// Appends a versioned write. Versions are sequential per-locator
    /// counters, acting as an instruction-identity timestamp so that later
    /// loads can read all prior writes without building an explicit SSA of
    /// memory (spec §4.2).
    pub fn push_write(&mut self, defining_inst: InstId, value: ValueId) {
        let version = self.writes.len() as u32;
        self.writes.push(LocationWrite {
            defining_inst,
            value,
            version,
        });
    }

    /// All values ever stored to this locator, in program (store) order.
    pub fn writes(&self) -> &[LocationWrite] {
        &self.writes
    }

    pub fn is_unknown_offset(&self) -> bool {
        self.offset == super::UNKNOWN_OFFSET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::FunctionId;

    #[test]
    fn writes_accumulate_in_order() {
        let mut loc = Locator::new(LocatorId(0), MemObjectId(5), 0);
        loc.push_write(InstId(1), ValueId::Arg(FunctionId(0), 0));
        loc.push_write(InstId(2), ValueId::Arg(FunctionId(0), 1));
        assert_eq!(loc.writes().len(), 2);
        assert_eq!(loc.writes()[0].version, 0);
        assert_eq!(loc.writes()[1].version, 1);
    }
}
