use crate::error::{Result, StoreError};

/// Identifier categories and their bit-width ceilings.
///
/// Categories that can hold many instances get wider id spaces; categories
/// with few expected instances (relationship types) get narrow ones. The
/// ceiling bounds both id allocation and the width of on-disk pointers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum IdType {
    Node,
    Relationship,
    Property,
    StringBlock,
    ArrayBlock,
    PropertyIndex,
    PropertyIndexBlock,
    RelationshipType,
    RelationshipTypeBlock,
}

impl IdType {
    fn bits(self) -> u32 {
        match self {
            IdType::Node | IdType::Relationship => 35,
            IdType::Property | IdType::StringBlock | IdType::ArrayBlock => 36,
            IdType::RelationshipType => 16,
            IdType::PropertyIndex
            | IdType::PropertyIndexBlock
            | IdType::RelationshipTypeBlock => 32,
        }
    }

    /// Maximum representable identifier for this category.
    pub fn max_value(self) -> u64 {
        (1u64 << self.bits()) - 1
    }
}

/// Per-store identifier allocator: a high-water mark plus a free list.
///
/// Allocation beyond the category ceiling is an error, never wrapped.
#[derive(Debug)]
pub struct IdGenerator {
    id_type: IdType,
    next: u64,
    free: Vec<u64>,
}

impl IdGenerator {
    pub fn new(id_type: IdType) -> Self {
        Self {
            id_type,
            next: 0,
            free: Vec::new(),
        }
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn allocate(&mut self) -> Result<u64> {
        if let Some(id) = self.free.pop() {
            return Ok(id);
        }
        if self.next > self.id_type.max_value() {
            return Err(StoreError::IdSpaceExhausted(self.id_type));
        }
        let id = self.next;
        self.next += 1;
        Ok(id)
    }

    pub fn free(&mut self, id: u64) {
        if id < self.next {
            self.free.push(id);
        }
    }

    /// Rebuilds the allocator from consistent store state after recovery.
    ///
    /// `in_use` must yield every identifier currently in use in the store.
    /// The high-water mark becomes highest-in-use + 1 and the free list is
    /// rebuilt from the gaps below it.
    pub fn resync<I>(&mut self, in_use: I)
    where
        I: IntoIterator<Item = u64>,
    {
        let mut used: Vec<u64> = in_use.into_iter().collect();
        used.sort_unstable();
        self.next = used.last().map_or(0, |high| high + 1);
        self.free.clear();
        let mut expected = 0u64;
        for id in used {
            while expected < id {
                self.free.push(expected);
                expected += 1;
            }
            expected = id + 1;
        }
        // Free lowest ids last so they are reused first.
        self.free.reverse();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceilings_follow_bit_widths() {
        assert_eq!(IdType::Node.max_value(), (1 << 35) - 1);
        assert_eq!(IdType::Relationship.max_value(), (1 << 35) - 1);
        assert_eq!(IdType::Property.max_value(), (1 << 36) - 1);
        assert_eq!(IdType::RelationshipType.max_value(), (1 << 16) - 1);
        assert_eq!(IdType::PropertyIndex.max_value(), (1 << 32) - 1);
    }

    #[test]
    fn allocate_reuses_freed_ids() -> Result<()> {
        let mut gen = IdGenerator::new(IdType::Node);
        let a = gen.allocate()?;
        let b = gen.allocate()?;
        assert_ne!(a, b);
        gen.free(a);
        assert_eq!(gen.allocate()?, a);
        Ok(())
    }

    #[test]
    fn allocate_fails_past_ceiling() {
        let mut gen = IdGenerator::new(IdType::RelationshipType);
        gen.next = IdType::RelationshipType.max_value() + 1;
        assert!(matches!(
            gen.allocate(),
            Err(StoreError::IdSpaceExhausted(IdType::RelationshipType))
        ));
    }

    #[test]
    fn resync_rebuilds_free_list_from_gaps() -> Result<()> {
        let mut gen = IdGenerator::new(IdType::Property);
        gen.resync([0, 1, 4, 5]);
        assert_eq!(gen.allocate()?, 2);
        assert_eq!(gen.allocate()?, 3);
        assert_eq!(gen.allocate()?, 6);
        Ok(())
    }
}
