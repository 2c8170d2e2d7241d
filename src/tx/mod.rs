//! The write-transaction coordinator.
//!
//! A [`WriteTransaction`] buffers record mutations per category, converts
//! them into sorted command lists at prepare, applies them at commit,
//! reverses resource claims at rollback, and re-applies injected commands
//! during recovery replay. Buffers clear and locks release when the
//! transaction completes, whatever the outcome.

mod prop_ops;
mod rel_ops;

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tracing::{debug, info};

use crate::cache::CacheTracker;
use crate::command::{self, Command};
use crate::error::{Result, StoreError};
use crate::locks::{LockKey, LockManager};
use crate::log::LogicalLog;
use crate::records::{
    ChainPayload, KeyId, NodeId, NodeRecord, PropertyId, PropertyIndexRecord, PropertyOwner,
    PropertyRecord, RelId, RelTypeId, RelationshipRecord, RelationshipTypeRecord,
};
use crate::store::GraphStore;
use crate::value::PropertyValue;

/// A property as seen by callers: its record id and decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    pub property_id: PropertyId,
    pub value: PropertyValue,
}

/// One page of a node's relationship chain, partitioned by direction.
#[derive(Debug, Default)]
pub struct RelationshipBatch {
    pub outgoing: Vec<RelationshipRecord>,
    pub incoming: Vec<RelationshipRecord>,
    pub loops: Vec<RelationshipRecord>,
    /// Position to resume the chain walk from, if it continues.
    pub next: Option<RelId>,
}

pub struct WriteTransaction<'s> {
    id: u64,
    store: &'s GraphStore,
    log: &'s LogicalLog,
    locks: &'s LockManager,
    cache: &'s dyn CacheTracker,
    node_records: FxHashMap<NodeId, NodeRecord>,
    rel_records: FxHashMap<RelId, RelationshipRecord>,
    prop_records: FxHashMap<PropertyId, PropertyRecord>,
    prop_index_records: FxHashMap<KeyId, PropertyIndexRecord>,
    rel_type_records: FxHashMap<RelTypeId, RelationshipTypeRecord>,
    node_commands: Vec<Command>,
    rel_commands: Vec<Command>,
    prop_commands: Vec<Command>,
    prop_index_commands: Vec<Command>,
    rel_type_commands: Vec<Command>,
    prepared: bool,
    committed: bool,
    recovered: bool,
}

impl<'s> WriteTransaction<'s> {
    pub fn new(
        id: u64,
        store: &'s GraphStore,
        log: &'s LogicalLog,
        locks: &'s LockManager,
        cache: &'s dyn CacheTracker,
    ) -> Self {
        Self {
            id,
            store,
            log,
            locks,
            cache,
            node_records: FxHashMap::default(),
            rel_records: FxHashMap::default(),
            prop_records: FxHashMap::default(),
            prop_index_records: FxHashMap::default(),
            rel_type_records: FxHashMap::default(),
            node_commands: Vec::new(),
            rel_commands: Vec::new(),
            prop_commands: Vec::new(),
            prop_index_commands: Vec::new(),
            rel_type_commands: Vec::new(),
            prepared: false,
            committed: false,
            recovered: false,
        }
    }

    /// A transaction rebuilt from the log during recovery. It takes no
    /// locks, appends nothing, and commits its injected commands verbatim.
    pub fn recovered(
        id: u64,
        store: &'s GraphStore,
        log: &'s LogicalLog,
        locks: &'s LockManager,
        cache: &'s dyn CacheTracker,
    ) -> Self {
        Self {
            recovered: true,
            ..Self::new(id, store, log, locks, cache)
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_read_only(&self) -> bool {
        self.node_records.is_empty()
            && self.rel_records.is_empty()
            && self.prop_records.is_empty()
            && self.prop_index_records.is_empty()
            && self.rel_type_records.is_empty()
            && self.node_commands.is_empty()
            && self.rel_commands.is_empty()
            && self.prop_commands.is_empty()
            && self.prop_index_commands.is_empty()
            && self.rel_type_commands.is_empty()
    }

    /// Turns buffered records into commands and appends them to the log.
    ///
    /// Category order: relationship types, nodes, relationships, property
    /// indexes, properties. A node deleted while its adjacency chain is
    /// still populated fails preparation.
    pub fn prepare(&mut self) -> Result<()> {
        if self.prepared || self.committed {
            return Err(StoreError::IllegalState(format!(
                "transaction {} already prepared or committed",
                self.id
            )));
        }
        if self.recovered {
            return Err(StoreError::IllegalState(
                "recovered transactions are prepared from the log".into(),
            ));
        }

        for record in self.rel_type_records.values() {
            self.rel_type_commands
                .push(Command::RelationshipType(record.clone()));
        }
        for record in self.node_records.values() {
            if !record.header.in_use && record.next_rel.is_some() {
                return Err(StoreError::InvalidRecord(format!(
                    "node {} deleted but still has relationships",
                    record.id
                )));
            }
            self.node_commands.push(Command::Node(record.clone()));
        }
        for record in self.rel_records.values() {
            self.rel_commands
                .push(Command::Relationship(record.clone()));
        }
        for record in self.prop_index_records.values() {
            self.prop_index_commands
                .push(Command::PropertyIndex(record.clone()));
        }
        for record in self.prop_records.values() {
            self.prop_commands.push(Command::Property(record.clone()));
        }

        for command in self.commands_in_order() {
            self.log.append_command(self.id, command)?;
        }
        for command in &self.node_commands {
            if command.is_deleted() {
                self.cache.evict_node(command.key());
            }
        }
        for command in &self.rel_commands {
            if command.is_deleted() {
                self.cache.evict_relationship(command.key());
            }
        }

        self.prepared = true;
        debug!(
            tx = self.id,
            commands = self.command_count(),
            "transaction prepared"
        );
        Ok(())
    }

    /// Applies the prepared commands under commit sequence `commit_tx`.
    ///
    /// Live commits require `commit_tx` to directly follow the store's
    /// committed counter. Buffers clear and locks release unconditionally.
    pub fn commit(&mut self, commit_tx: u64) -> Result<()> {
        if self.committed {
            return Err(StoreError::IllegalState(format!(
                "transaction {} already committed",
                self.id
            )));
        }
        if !self.prepared && !self.recovered {
            return Err(StoreError::IllegalState(format!(
                "transaction {} committed before prepare",
                self.id
            )));
        }
        let result = if self.recovered {
            self.apply_recovered(commit_tx)
        } else {
            self.apply_committed(commit_tx)
        };
        self.clear();
        self.locks.release_all(self.id);
        if result.is_ok() {
            self.committed = true;
            info!(tx = self.id, commit_tx, recovered = self.recovered, "transaction committed");
        }
        result
    }

    fn apply_committed(&mut self, commit_tx: u64) -> Result<()> {
        let last_committed = self.store.last_committed_tx();
        if commit_tx != last_committed + 1 {
            return Err(StoreError::OrderingViolation {
                commit_tx,
                last_committed,
            });
        }
        self.log.append_commit(self.id, commit_tx)?;
        self.log.sync()?;

        command::sort_commands(&mut self.rel_type_commands);
        command::sort_commands(&mut self.node_commands);
        command::sort_commands(&mut self.rel_commands);
        command::sort_commands(&mut self.prop_index_commands);
        command::sort_commands(&mut self.prop_commands);

        for cmd in self.commands_in_order() {
            if cmd.is_created() && !cmd.is_deleted() {
                cmd.apply(self.store)?;
                self.register_created(cmd)?;
            }
        }
        for cmd in self.commands_in_order() {
            if !cmd.is_created() && !cmd.is_deleted() {
                cmd.apply(self.store)?;
            }
        }
        for cmd in self.commands_in_order() {
            if cmd.is_deleted() {
                cmd.apply(self.store)?;
            }
        }

        self.cache.materialize_committed();
        self.store.set_last_committed_tx(commit_tx);
        Ok(())
    }

    /// Recovery replay applies every command unconditionally, in injected
    /// order, with a category order that differs from the live path:
    /// property indexes, properties, relationship types, relationships,
    /// nodes. Touched entities are evicted rather than registered.
    fn apply_recovered(&mut self, commit_tx: u64) -> Result<()> {
        let ordered = self
            .prop_index_commands
            .iter()
            .chain(self.prop_commands.iter())
            .chain(self.rel_type_commands.iter())
            .chain(self.rel_commands.iter())
            .chain(self.node_commands.iter());
        for cmd in ordered {
            cmd.apply(self.store)?;
            match cmd {
                Command::Node(record) => self.cache.evict_node(record.id),
                Command::Relationship(record) => {
                    self.cache.evict_relationship(record.id);
                    self.cache.evict_node(record.first_node);
                    self.cache.evict_node(record.second_node);
                }
                Command::RelationshipType(record) => {
                    self.cache.evict_relationship_type(record.id)
                }
                _ => {}
            }
        }
        self.store.set_last_committed_tx(commit_tx);
        Ok(())
    }

    /// Queues a command decoded from the log (recovered transactions only).
    pub fn inject_command(&mut self, command: Command) -> Result<()> {
        if !self.recovered {
            return Err(StoreError::IllegalState(
                "commands can only be injected into recovered transactions".into(),
            ));
        }
        match &command {
            Command::Node(_) => self.node_commands.push(command),
            Command::Relationship(_) => self.rel_commands.push(command),
            Command::Property(_) => self.prop_commands.push(command),
            Command::PropertyIndex(_) => self.prop_index_commands.push(command),
            Command::RelationshipType(_) => self.rel_type_commands.push(command),
        }
        Ok(())
    }

    /// Returns created-record identifiers to their generators and evicts
    /// every touched entity. Buffers clear even if a reclamation fails.
    pub fn rollback(&mut self) -> Result<()> {
        if self.committed {
            return Err(StoreError::IllegalState(format!(
                "transaction {} already committed, cannot rollback",
                self.id
            )));
        }
        let mut failure = None;
        for record in self.node_records.values() {
            if record.header.created {
                self.store.nodes().free_id(record.id);
            }
            self.cache.evict_node(record.id);
        }
        for record in self.rel_records.values() {
            if record.header.created {
                self.store.relationships().free_id(record.id);
            }
            self.cache.evict_relationship(record.id);
        }
        for record in self.prop_records.values() {
            if record.header.created {
                self.store.properties().free_id(record.id);
            }
            if let Some(chain) = record.value.chain() {
                if let ChainPayload::Loaded(blocks) = &chain.payload {
                    for block in blocks {
                        if block.header.created {
                            if let Err(err) =
                                self.store.properties().free_block_id(block.kind, block.id)
                            {
                                failure.get_or_insert(err);
                            }
                        }
                    }
                }
            }
            for block in &record.freed_blocks {
                if block.header.created {
                    if let Err(err) = self.store.properties().free_block_id(block.kind, block.id)
                    {
                        failure.get_or_insert(err);
                    }
                }
            }
            match record.owner {
                Some(PropertyOwner::Node(id)) => self.cache.evict_node(id),
                Some(PropertyOwner::Rel(id)) => self.cache.evict_relationship(id),
                None => {}
            }
        }
        for record in self.prop_index_records.values() {
            if record.header.created {
                self.store.properties().index_store().free_id(record.id);
                for block in &record.name_records {
                    self.store.properties().index_store().free_block_id(block.id);
                }
            }
        }
        for record in self.rel_type_records.values() {
            if record.header.created {
                self.store.relationship_types().free_id(record.id);
                for block in &record.name_records {
                    self.store.relationship_types().free_block_id(block.id);
                }
            }
            self.cache.evict_relationship_type(record.id);
        }

        self.clear();
        self.locks.release_all(self.id);
        debug!(tx = self.id, "transaction rolled back");
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    // -- node operations ---------------------------------------------------

    pub fn node_create(&mut self) -> Result<NodeId> {
        let id = self.store.nodes().allocate_id()?;
        self.node_records.insert(id, NodeRecord::created(id));
        debug!(tx = self.id, node = id, "node created");
        Ok(id)
    }

    /// Deletes a node, returning its prior committed property values.
    ///
    /// The adjacency chain is not checked here: preparation fails if the
    /// node still has relationships when the transaction prepares.
    pub fn node_delete(&mut self, node_id: NodeId) -> Result<BTreeMap<KeyId, PropertyEntry>> {
        self.locks.acquire_write(LockKey::node(node_id), self.id);
        let node = self.node_mut(node_id)?;
        if !node.header.in_use {
            return Err(StoreError::IllegalState(format!(
                "node {node_id} already deleted in this transaction"
            )));
        }
        node.header.in_use = false;
        let first_prop = node.next_prop.take();
        self.delete_property_chain(first_prop, PropertyOwner::Node(node_id))
    }

    pub fn node_load_light(&self, node_id: NodeId) -> bool {
        if let Some(record) = self.node_records.get(&node_id) {
            return record.header.in_use;
        }
        self.store.nodes().load_light(node_id)
    }

    pub fn get_created_nodes(&self) -> Vec<NodeId> {
        self.node_records
            .values()
            .filter(|record| record.header.created)
            .map(|record| record.id)
            .collect()
    }

    pub fn is_node_created(&self, node_id: NodeId) -> bool {
        self.node_records
            .get(&node_id)
            .is_some_and(|record| record.header.created)
    }

    pub fn is_relationship_created(&self, rel_id: RelId) -> bool {
        self.rel_records
            .get(&rel_id)
            .is_some_and(|record| record.header.created)
    }

    // -- name definitions --------------------------------------------------

    pub fn create_relationship_type(&mut self, name: &str) -> Result<RelTypeId> {
        let types = self.store.relationship_types();
        let id = types.allocate_id()?;
        let name_records = types.allocate_name_records(name)?;
        let mut record = RelationshipTypeRecord::created(id, name_records[0].id);
        record.name_records = name_records.to_vec();
        self.rel_type_records.insert(id, record);
        Ok(id)
    }

    pub fn create_property_index(&mut self, name: &str) -> Result<KeyId> {
        let index = self.store.properties().index_store();
        let id = index.allocate_id()?;
        let name_records = index.allocate_name_records(name)?;
        let mut record = PropertyIndexRecord::created(id, name_records[0].id);
        record.name_records = name_records.to_vec();
        self.prop_index_records.insert(id, record);
        Ok(id)
    }

    pub fn load_relationship_types(&self) -> Result<Vec<crate::store::RelationshipTypeData>> {
        self.store.relationship_types().get_relationship_types()
    }

    pub fn load_index(&self, key_id: KeyId) -> Result<crate::store::PropertyIndexData> {
        self.store.properties().index_store().get_index_data(key_id)
    }

    pub fn load_property_indexes(
        &self,
        count: usize,
    ) -> Result<Vec<crate::store::PropertyIndexData>> {
        self.store
            .properties()
            .index_store()
            .get_property_indexes(count)
    }

    // -- internals ---------------------------------------------------------

    fn commands_in_order(&self) -> impl Iterator<Item = &Command> {
        self.rel_type_commands
            .iter()
            .chain(self.node_commands.iter())
            .chain(self.rel_commands.iter())
            .chain(self.prop_index_commands.iter())
            .chain(self.prop_commands.iter())
    }

    fn command_count(&self) -> usize {
        self.rel_type_commands.len()
            + self.node_commands.len()
            + self.rel_commands.len()
            + self.prop_index_commands.len()
            + self.prop_commands.len()
    }

    fn register_created(&self, command: &Command) -> Result<()> {
        match command {
            Command::RelationshipType(record) => {
                let name = self.store.relationship_types().name_of(record)?;
                self.cache
                    .register_relationship_type(crate::store::RelationshipTypeData {
                        id: record.id,
                        name,
                    });
            }
            Command::PropertyIndex(record) => {
                let name = self.store.properties().index_store().name_of(record)?;
                self.cache
                    .register_property_index(crate::store::PropertyIndexData {
                        key_id: record.id,
                        name,
                    });
            }
            _ => {}
        }
        Ok(())
    }

    fn clear(&mut self) {
        self.node_records.clear();
        self.rel_records.clear();
        self.prop_records.clear();
        self.prop_index_records.clear();
        self.rel_type_records.clear();
        self.node_commands.clear();
        self.rel_commands.clear();
        self.prop_commands.clear();
        self.prop_index_commands.clear();
        self.rel_type_commands.clear();
    }

    fn node_mut(&mut self, node_id: NodeId) -> Result<&mut NodeRecord> {
        use std::collections::hash_map::Entry;
        match self.node_records.entry(node_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let record = self.store.nodes().get_record(node_id)?;
                Ok(entry.insert(record))
            }
        }
    }

    fn rel_mut(&mut self, rel_id: RelId) -> Result<&mut RelationshipRecord> {
        use std::collections::hash_map::Entry;
        match self.rel_records.entry(rel_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let record = self.store.relationships().get_record(rel_id)?;
                Ok(entry.insert(record))
            }
        }
    }

    /// Takes a property record out of the transaction buffer, loading it
    /// from the store on first touch. Callers reinsert after mutation.
    fn take_property(&mut self, prop_id: PropertyId) -> Result<PropertyRecord> {
        match self.prop_records.remove(&prop_id) {
            Some(record) => Ok(record),
            None => self.store.properties().get_record(prop_id),
        }
    }
}
