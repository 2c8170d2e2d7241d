//! Property mutations and reads: head-inserted doubly-linked chains.
//!
//! Each entity's properties form a doubly-linked chain headed by the
//! owner's `next_prop` pointer. New properties insert at the head; removal
//! rewires prev/next and, at the head, the owner. Deletions report the
//! value the property had at last commit, re-reading the store when this
//! transaction already changed the record.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::locks::LockKey;
use crate::records::{KeyId, NodeId, PropertyId, PropertyOwner, PropertyRecord, RelId};
use crate::value::PropertyValue;

use super::{PropertyEntry, WriteTransaction};

impl WriteTransaction<'_> {
    pub fn node_add_property(
        &mut self,
        node_id: NodeId,
        key_id: KeyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        let prop_id = self.store.properties().allocate_id()?;
        self.add_property(PropertyOwner::Node(node_id), prop_id, key_id, value)
    }

    /// As [`node_add_property`](Self::node_add_property), with a
    /// caller-reserved property identifier (batch loading).
    pub fn node_add_property_with_id(
        &mut self,
        node_id: NodeId,
        prop_id: PropertyId,
        key_id: KeyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        self.add_property(PropertyOwner::Node(node_id), prop_id, key_id, value)
    }

    pub fn rel_add_property(
        &mut self,
        rel_id: RelId,
        key_id: KeyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        let prop_id = self.store.properties().allocate_id()?;
        self.add_property(PropertyOwner::Rel(rel_id), prop_id, key_id, value)
    }

    pub fn rel_add_property_with_id(
        &mut self,
        rel_id: RelId,
        prop_id: PropertyId,
        key_id: KeyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        self.add_property(PropertyOwner::Rel(rel_id), prop_id, key_id, value)
    }

    pub fn node_change_property(
        &mut self,
        node_id: NodeId,
        prop_id: PropertyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        self.change_property(PropertyOwner::Node(node_id), prop_id, value)
    }

    pub fn rel_change_property(
        &mut self,
        rel_id: RelId,
        prop_id: PropertyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        self.change_property(PropertyOwner::Rel(rel_id), prop_id, value)
    }

    pub fn node_remove_property(&mut self, node_id: NodeId, prop_id: PropertyId) -> Result<()> {
        self.remove_property(PropertyOwner::Node(node_id), prop_id)
    }

    pub fn rel_remove_property(&mut self, rel_id: RelId, prop_id: PropertyId) -> Result<()> {
        self.remove_property(PropertyOwner::Rel(rel_id), prop_id)
    }

    // -- committed reads ---------------------------------------------------

    /// The committed value of a property record.
    pub fn load_property_value(&self, prop_id: PropertyId) -> Result<PropertyValue> {
        self.committed_property_value(prop_id)
    }

    /// As [`load_property_value`](Self::load_property_value), with absence
    /// folded to `None`.
    pub fn property_value_or_none(&self, prop_id: PropertyId) -> Option<PropertyValue> {
        self.committed_property_value(prop_id).ok()
    }

    pub fn get_key_id_for_property(&self, prop_id: PropertyId) -> Result<KeyId> {
        if let Some(record) = self.prop_records.get(&prop_id) {
            return Ok(record.key_id);
        }
        Ok(self.store.properties().get_record(prop_id)?.key_id)
    }

    /// Loads a node's committed property chain. Reading from a node this
    /// transaction deleted is an error unless `light` is set.
    pub fn node_load_properties(
        &self,
        node_id: NodeId,
        light: bool,
    ) -> Result<BTreeMap<KeyId, PropertyEntry>> {
        if let Some(record) = self.node_records.get(&node_id) {
            if !record.header.in_use && !light {
                return Err(StoreError::IllegalState(format!(
                    "node {node_id} deleted in this transaction"
                )));
            }
        }
        if !self.store.nodes().load_light(node_id) {
            if self.node_records.contains_key(&node_id) {
                return Ok(BTreeMap::new());
            }
            return Err(StoreError::InvalidRecord(format!("node {node_id} not in use")));
        }
        let first = self.store.nodes().get_record(node_id)?.next_prop;
        self.load_committed_properties(first)
    }

    pub fn rel_load_properties(
        &self,
        rel_id: RelId,
        light: bool,
    ) -> Result<BTreeMap<KeyId, PropertyEntry>> {
        if let Some(record) = self.rel_records.get(&rel_id) {
            if !record.header.in_use && !light {
                return Err(StoreError::IllegalState(format!(
                    "relationship {rel_id} deleted in this transaction"
                )));
            }
        }
        match self.store.relationships().get_light(rel_id) {
            Some(record) => self.load_committed_properties(record.next_prop),
            None if self.rel_records.contains_key(&rel_id) => Ok(BTreeMap::new()),
            None => Err(StoreError::InvalidRecord(format!(
                "relationship {rel_id} not in use"
            ))),
        }
    }

    // -- internals ---------------------------------------------------------

    fn add_property(
        &mut self,
        owner: PropertyOwner,
        prop_id: PropertyId,
        key_id: KeyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        let storage = self.store.properties().encode_value(value)?;
        let mut record = PropertyRecord::created(prop_id, owner, key_id, storage);
        let old_head = self.claim_property_head(owner, prop_id)?;
        if let Some(old_id) = old_head {
            let mut old = self.take_property(old_id)?;
            old.prev_prop = Some(prop_id);
            if !old.header.created {
                old.header.changed = true;
            }
            self.prop_records.insert(old_id, old);
            record.next_prop = Some(old_id);
        }
        self.prop_records.insert(prop_id, record);
        debug!(tx = self.id, property = prop_id, key = key_id, "property added");
        Ok(PropertyEntry {
            property_id: prop_id,
            value: value.clone(),
        })
    }

    /// Locks the owner, verifies it is live, and moves its property-chain
    /// head pointer to `prop_id`, returning the old head.
    fn claim_property_head(
        &mut self,
        owner: PropertyOwner,
        prop_id: PropertyId,
    ) -> Result<Option<PropertyId>> {
        match owner {
            PropertyOwner::Node(node_id) => {
                self.locks.acquire_write(LockKey::node(node_id), self.id);
                let node = self.node_mut(node_id)?;
                if !node.header.in_use {
                    return Err(StoreError::IllegalState(format!(
                        "node {node_id} deleted in this transaction"
                    )));
                }
                let old = node.next_prop.replace(prop_id);
                if !node.header.created {
                    node.header.changed = true;
                }
                Ok(old)
            }
            PropertyOwner::Rel(rel_id) => {
                self.locks
                    .acquire_write(LockKey::relationship(rel_id), self.id);
                let rel = self.rel_mut(rel_id)?;
                if !rel.header.in_use {
                    return Err(StoreError::IllegalState(format!(
                        "relationship {rel_id} deleted in this transaction"
                    )));
                }
                let old = rel.next_prop.replace(prop_id);
                if !rel.header.created {
                    rel.header.changed = true;
                }
                Ok(old)
            }
        }
    }

    fn change_property(
        &mut self,
        owner: PropertyOwner,
        prop_id: PropertyId,
        value: &PropertyValue,
    ) -> Result<PropertyEntry> {
        self.lock_owner(owner);
        let mut record = self.take_property(prop_id)?;
        check_owner(&record, owner)?;
        if !record.header.in_use {
            return Err(StoreError::IllegalState(format!(
                "property {prop_id} deleted in this transaction"
            )));
        }
        if record.is_light() {
            self.store.properties().make_heavy(&mut record)?;
        }
        record.release_value_blocks();
        record.value = self.store.properties().encode_value(value)?;
        if !record.header.created {
            record.header.changed = true;
        }
        self.prop_records.insert(prop_id, record);
        debug!(tx = self.id, property = prop_id, "property changed");
        Ok(PropertyEntry {
            property_id: prop_id,
            value: value.clone(),
        })
    }

    fn remove_property(&mut self, owner: PropertyOwner, prop_id: PropertyId) -> Result<()> {
        self.lock_owner(owner);
        let mut record = self.take_property(prop_id)?;
        check_owner(&record, owner)?;
        if !record.header.in_use {
            return Err(StoreError::IllegalState(format!(
                "property {prop_id} deleted in this transaction"
            )));
        }
        if record.is_light() {
            self.store.properties().make_heavy(&mut record)?;
        }

        let prev = record.prev_prop;
        let next = record.next_prop;
        match prev {
            Some(prev_id) => {
                let mut prev_record = self.take_property(prev_id)?;
                prev_record.next_prop = next;
                if !prev_record.header.created {
                    prev_record.header.changed = true;
                }
                self.prop_records.insert(prev_id, prev_record);
            }
            None => match owner {
                PropertyOwner::Node(node_id) => {
                    let node = self.node_mut(node_id)?;
                    node.next_prop = next;
                    if !node.header.created {
                        node.header.changed = true;
                    }
                }
                PropertyOwner::Rel(rel_id) => {
                    let rel = self.rel_mut(rel_id)?;
                    rel.next_prop = next;
                    if !rel.header.created {
                        rel.header.changed = true;
                    }
                }
            },
        }
        if let Some(next_id) = next {
            let mut next_record = self.take_property(next_id)?;
            next_record.prev_prop = prev;
            if !next_record.header.created {
                next_record.header.changed = true;
            }
            self.prop_records.insert(next_id, next_record);
        }

        record.set_in_use(false);
        self.prop_records.insert(prop_id, record);
        debug!(tx = self.id, property = prop_id, "property removed");
        Ok(())
    }

    /// Walks a property chain marking every record deleted, collecting the
    /// prior committed values of records that existed before this
    /// transaction.
    pub(super) fn delete_property_chain(
        &mut self,
        first: Option<PropertyId>,
        owner: PropertyOwner,
    ) -> Result<BTreeMap<KeyId, PropertyEntry>> {
        let mut collected = BTreeMap::new();
        let mut next = first;
        while let Some(prop_id) = next {
            let mut record = self.take_property(prop_id)?;
            check_owner(&record, owner)?;
            if !record.header.created {
                let value = if record.header.changed {
                    self.committed_property_value(prop_id)?
                } else {
                    if record.is_light() {
                        self.store.properties().make_heavy(&mut record)?;
                    }
                    self.store.properties().get_value(&record)?
                };
                collected.insert(
                    record.key_id,
                    PropertyEntry {
                        property_id: prop_id,
                        value,
                    },
                );
            }
            next = record.next_prop;
            if record.is_light() {
                self.store.properties().make_heavy(&mut record)?;
            }
            record.set_in_use(false);
            self.prop_records.insert(prop_id, record);
        }
        Ok(collected)
    }

    pub(super) fn committed_property_value(&self, prop_id: PropertyId) -> Result<PropertyValue> {
        let mut record = self.store.properties().get_record(prop_id)?;
        self.store.properties().make_heavy(&mut record)?;
        self.store.properties().get_value(&record)
    }

    fn load_committed_properties(
        &self,
        first: Option<PropertyId>,
    ) -> Result<BTreeMap<KeyId, PropertyEntry>> {
        let mut properties = BTreeMap::new();
        let mut next = first;
        while let Some(prop_id) = next {
            let mut record = self.store.properties().get_record(prop_id)?;
            self.store.properties().make_heavy(&mut record)?;
            let value = self.store.properties().get_value(&record)?;
            next = record.next_prop;
            properties.insert(
                record.key_id,
                PropertyEntry {
                    property_id: prop_id,
                    value,
                },
            );
        }
        Ok(properties)
    }

    fn lock_owner(&mut self, owner: PropertyOwner) {
        let key = match owner {
            PropertyOwner::Node(id) => LockKey::node(id),
            PropertyOwner::Rel(id) => LockKey::relationship(id),
        };
        self.locks.acquire_write(key, self.id);
    }
}

fn check_owner(record: &PropertyRecord, owner: PropertyOwner) -> Result<()> {
    match record.owner {
        Some(actual) if actual != owner => Err(StoreError::InvalidRecord(format!(
            "property {} belongs to {actual:?}, not {owner:?}",
            record.id
        ))),
        _ => Ok(()),
    }
}
