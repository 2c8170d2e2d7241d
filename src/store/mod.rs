//! Per-category record stores and the aggregate [`GraphStore`].
//!
//! Stores supply record read/write, heavy/light materialization, value
//! encoding, and identifier allocation. The transaction coordinator never
//! touches store internals; commands call `update_record` at apply time.

mod dynamic;
mod node;
mod property;
mod property_index;
mod relationship;
mod reltype;

pub use dynamic::{DynamicStore, DEFAULT_BLOCK_SIZE};
pub use node::NodeStore;
pub use property::PropertyStore;
pub use property_index::{PropertyIndexData, PropertyIndexStore};
pub use relationship::RelationshipStore;
pub use reltype::{RelationshipTypeData, RelationshipTypeStore};

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Batch size when paging through a long adjacency chain.
    pub relationship_grab_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            relationship_grab_size: 100,
        }
    }
}

/// The aggregate of all per-category stores plus the committed-transaction
/// counter.
///
/// Advancing `last_committed_tx` is the sole serialization point of the
/// commit order; callers must guarantee a single writer commits at a time.
#[derive(Debug)]
pub struct GraphStore {
    config: StoreConfig,
    nodes: NodeStore,
    relationships: RelationshipStore,
    properties: PropertyStore,
    relationship_types: RelationshipTypeStore,
    last_committed_tx: Mutex<u64>,
    recovering: AtomicBool,
}

impl GraphStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            nodes: NodeStore::new(),
            relationships: RelationshipStore::new(),
            properties: PropertyStore::new(),
            relationship_types: RelationshipTypeStore::new(),
            last_committed_tx: Mutex::new(0),
            recovering: AtomicBool::new(false),
        }
    }

    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    pub fn relationships(&self) -> &RelationshipStore {
        &self.relationships
    }

    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    pub fn relationship_types(&self) -> &RelationshipTypeStore {
        &self.relationship_types
    }

    pub fn relationship_grab_size(&self) -> usize {
        self.config.relationship_grab_size
    }

    pub fn last_committed_tx(&self) -> u64 {
        *self.last_committed_tx.lock()
    }

    pub fn set_last_committed_tx(&self, tx_id: u64) {
        *self.last_committed_tx.lock() = tx_id;
    }

    pub fn set_recovering(&self, recovering: bool) {
        self.recovering.store(recovering, Ordering::SeqCst);
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Resynchronizes every id generator's high-water mark and free list
    /// from the now-consistent store state. Recovery calls this once after
    /// the whole log has been replayed.
    pub fn resync_id_generators(&self) {
        self.nodes.resync_ids();
        self.relationships.resync_ids();
        self.properties.resync_ids();
        self.relationship_types.resync_ids();
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}
