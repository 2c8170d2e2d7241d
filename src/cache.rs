use parking_lot::Mutex;

use crate::records::{KeyId, NodeId, RelId, RelTypeId};
use crate::store::{PropertyIndexData, RelationshipTypeData};

/// Hooks the transaction coordinator drives into an upper caching layer.
///
/// Deletions evict eagerly so stale entities never outlive their records;
/// name definitions register on commit so lookups need no store round trip.
pub trait CacheTracker: Send + Sync {
    fn evict_node(&self, id: NodeId);
    fn evict_relationship(&self, id: RelId);
    fn evict_relationship_type(&self, id: RelTypeId);
    fn register_relationship_type(&self, data: RelationshipTypeData);
    fn register_property_index(&self, data: PropertyIndexData);
    /// Called once per committed transaction, after all commands applied.
    fn materialize_committed(&self);
}

/// Tracker for deployments without a caching layer.
#[derive(Debug, Default)]
pub struct NoopCache;

impl CacheTracker for NoopCache {
    fn evict_node(&self, _id: NodeId) {}
    fn evict_relationship(&self, _id: RelId) {}
    fn evict_relationship_type(&self, _id: RelTypeId) {}
    fn register_relationship_type(&self, _data: RelationshipTypeData) {}
    fn register_property_index(&self, _data: PropertyIndexData) {}
    fn materialize_committed(&self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent {
    EvictNode(NodeId),
    EvictRelationship(RelId),
    EvictRelationshipType(RelTypeId),
    RegisterRelationshipType(RelTypeId, String),
    RegisterPropertyIndex(KeyId, String),
    MaterializeCommitted,
}

/// Test tracker that records every hook invocation in order.
#[derive(Debug, Default)]
pub struct RecordingCache {
    events: Mutex<Vec<CacheEvent>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().clone()
    }
}

impl CacheTracker for RecordingCache {
    fn evict_node(&self, id: NodeId) {
        self.events.lock().push(CacheEvent::EvictNode(id));
    }

    fn evict_relationship(&self, id: RelId) {
        self.events.lock().push(CacheEvent::EvictRelationship(id));
    }

    fn evict_relationship_type(&self, id: RelTypeId) {
        self.events
            .lock()
            .push(CacheEvent::EvictRelationshipType(id));
    }

    fn register_relationship_type(&self, data: RelationshipTypeData) {
        self.events
            .lock()
            .push(CacheEvent::RegisterRelationshipType(data.id, data.name));
    }

    fn register_property_index(&self, data: PropertyIndexData) {
        self.events
            .lock()
            .push(CacheEvent::RegisterPropertyIndex(data.key_id, data.name));
    }

    fn materialize_committed(&self) {
        self.events.lock().push(CacheEvent::MaterializeCommitted);
    }
}
