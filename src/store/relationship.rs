use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Result, StoreError};
use crate::ids::{IdGenerator, IdType};
use crate::records::{NodeId, RelId, RelationshipRecord};

/// Fixed-format relationship record store.
#[derive(Debug)]
pub struct RelationshipStore {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    records: FxHashMap<RelId, RelationshipRecord>,
    ids: IdGenerator,
}

impl RelationshipStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: FxHashMap::default(),
                ids: IdGenerator::new(IdType::Relationship),
            }),
        }
    }

    pub fn allocate_id(&self) -> Result<RelId> {
        self.inner.write().ids.allocate()
    }

    pub fn free_id(&self, id: RelId) {
        self.inner.write().ids.free(id);
    }

    pub fn get_record(&self, id: RelId) -> Result<RelationshipRecord> {
        self.inner
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::InvalidRecord(format!("relationship {id} not in use")))
    }

    /// Returns the record if present, without treating absence as an error.
    pub fn get_light(&self, id: RelId) -> Option<RelationshipRecord> {
        self.inner.read().records.get(&id).cloned()
    }

    /// Batch chain-page read: follows `node_id`'s chain from `position`,
    /// returning up to `max` records and the position to resume from,
    /// under a single store lock.
    pub fn chain_page(
        &self,
        node_id: NodeId,
        position: Option<RelId>,
        max: usize,
    ) -> Result<(Vec<RelationshipRecord>, Option<RelId>)> {
        let inner = self.inner.read();
        let mut records = Vec::new();
        let mut current = position;
        while let Some(rel_id) = current {
            if records.len() == max {
                break;
            }
            let record = inner.records.get(&rel_id).ok_or_else(|| {
                StoreError::InvalidRecord(format!("relationship {rel_id} not in use"))
            })?;
            current = record.next_for(node_id)?;
            records.push(record.clone());
        }
        Ok((records, current))
    }

    /// Command-apply primitive: persists an in-use record, or frees the
    /// identifier of a not-in-use one.
    pub fn update_record(&self, record: &RelationshipRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if record.header.in_use {
            let mut stored = record.clone();
            stored.header.created = false;
            stored.header.changed = false;
            inner.records.insert(record.id, stored);
        } else {
            inner.records.remove(&record.id);
            inner.ids.free(record.id);
        }
        Ok(())
    }

    pub fn in_use_ids(&self) -> Vec<RelId> {
        self.inner.read().records.keys().copied().collect()
    }

    pub fn resync_ids(&self) {
        let mut inner = self.inner.write();
        let ids: Vec<RelId> = inner.records.keys().copied().collect();
        inner.ids.resync(ids);
    }
}

impl Default for RelationshipStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::RecordHeader;

    fn chained_rel(id: RelId, node: NodeId, other: NodeId, next: Option<RelId>) -> RelationshipRecord {
        let mut record = RelationshipRecord::new(id, node, other, 0);
        record.header = RecordHeader {
            in_use: true,
            created: false,
            changed: false,
        };
        record.first_next_rel = next;
        record
    }

    #[test]
    fn chain_page_walks_in_pages() -> Result<()> {
        let store = RelationshipStore::new();
        let node = 9;
        store.update_record(&chained_rel(0, node, 10, Some(1)))?;
        store.update_record(&chained_rel(1, node, 11, Some(2)))?;
        store.update_record(&chained_rel(2, node, 12, None))?;

        let (page, next) = store.chain_page(node, Some(0), 2)?;
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(next, Some(2));

        let (page, next) = store.chain_page(node, next, 2)?;
        assert_eq!(page.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);
        assert_eq!(next, None);
        Ok(())
    }

    #[test]
    fn chain_page_rejects_dangling_pointers() -> Result<()> {
        let store = RelationshipStore::new();
        store.update_record(&chained_rel(0, 9, 10, Some(7)))?;
        let (_, next) = store.chain_page(9, Some(0), 1)?;
        assert_eq!(next, Some(7));
        assert!(store.chain_page(9, next, 1).is_err());
        Ok(())
    }
}
