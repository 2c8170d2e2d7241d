use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Result, StoreError};
use crate::ids::{IdGenerator, IdType};
use crate::records::{NodeId, NodeRecord};

/// Fixed-format node record store.
#[derive(Debug)]
pub struct NodeStore {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    records: FxHashMap<NodeId, NodeRecord>,
    ids: IdGenerator,
}

impl NodeStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: FxHashMap::default(),
                ids: IdGenerator::new(IdType::Node),
            }),
        }
    }

    pub fn allocate_id(&self) -> Result<NodeId> {
        self.inner.write().ids.allocate()
    }

    pub fn free_id(&self, id: NodeId) {
        self.inner.write().ids.free(id);
    }

    /// Existence check without materializing anything.
    pub fn load_light(&self, id: NodeId) -> bool {
        self.inner.read().records.contains_key(&id)
    }

    pub fn get_record(&self, id: NodeId) -> Result<NodeRecord> {
        self.inner
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::InvalidRecord(format!("node {id} not in use")))
    }

    /// Command-apply primitive: persists an in-use record, or frees the
    /// identifier of a not-in-use one.
    pub fn update_record(&self, record: &NodeRecord) -> Result<()> {
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

    pub fn in_use_ids(&self) -> Vec<NodeId> {
        self.inner.read().records.keys().copied().collect()
    }

    pub fn resync_ids(&self) {
        let mut inner = self.inner.write();
        let ids: Vec<NodeId> = inner.records.keys().copied().collect();
        inner.ids.resync(ids);
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
