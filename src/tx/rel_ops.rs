//! Relationship mutations: doubly-linked adjacency chain maintenance.
//!
//! Every node's relationships form one doubly-linked chain; each
//! relationship occupies a position in the chain of both endpoints (one
//! position for loops). Creation splices at the head, deletion rewires the
//! neighbors and, when the deleted record was the head, the node itself.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::locks::LockKey;
use crate::records::{
    KeyId, NodeId, PropertyOwner, RecordHeader, RelId, RelTypeId, RelationshipRecord,
};

use super::{PropertyEntry, RelationshipBatch, WriteTransaction};

impl WriteTransaction<'_> {
    pub fn relationship_create(
        &mut self,
        first_node: NodeId,
        second_node: NodeId,
        type_id: RelTypeId,
    ) -> Result<RelId> {
        self.locks.acquire_write(LockKey::node(first_node), self.id);
        if second_node != first_node {
            self.locks.acquire_write(LockKey::node(second_node), self.id);
        }
        self.require_live_node(first_node)?;
        if second_node != first_node {
            self.require_live_node(second_node)?;
        }

        let rel_id = self.store.relationships().allocate_id()?;
        self.locks
            .acquire_write(LockKey::relationship(rel_id), self.id);
        let mut record = RelationshipRecord::new(rel_id, first_node, second_node, type_id);
        record.header = RecordHeader::created();
        self.connect(first_node, &mut record)?;
        if second_node != first_node {
            self.connect(second_node, &mut record)?;
        }
        self.rel_records.insert(rel_id, record);
        debug!(tx = self.id, rel = rel_id, first_node, second_node, "relationship created");
        Ok(rel_id)
    }

    /// Deletes a relationship, returning its prior committed property
    /// values, and splices it out of both endpoint chains.
    pub fn rel_delete(&mut self, rel_id: RelId) -> Result<BTreeMap<KeyId, PropertyEntry>> {
        self.locks
            .acquire_write(LockKey::relationship(rel_id), self.id);
        let record = self.rel_mut(rel_id)?.clone();
        if !record.header.in_use {
            return Err(StoreError::IllegalState(format!(
                "relationship {rel_id} already deleted in this transaction"
            )));
        }
        let properties =
            self.delete_property_chain(record.next_prop, PropertyOwner::Rel(rel_id))?;

        self.splice_neighbors(record.first_node, record.first_prev_rel, record.first_next_rel)?;
        if record.second_node != record.first_node {
            self.splice_neighbors(
                record.second_node,
                record.second_prev_rel,
                record.second_next_rel,
            )?;
        }
        self.update_node_chain_head(record.first_node, record.first_prev_rel, record.first_next_rel)?;
        if record.second_node != record.first_node {
            self.update_node_chain_head(
                record.second_node,
                record.second_prev_rel,
                record.second_next_rel,
            )?;
        }

        let rel = self.rel_mut(rel_id)?;
        rel.header.in_use = false;
        rel.next_prop = None;
        debug!(tx = self.id, rel = rel_id, "relationship deleted");
        Ok(properties)
    }

    pub fn rel_load_light(&self, rel_id: RelId) -> Option<(NodeId, NodeId, RelTypeId)> {
        if let Some(record) = self.rel_records.get(&rel_id) {
            if !record.header.in_use {
                return None;
            }
            return Some((record.first_node, record.second_node, record.type_id));
        }
        self.store
            .relationships()
            .get_light(rel_id)
            .map(|record| (record.first_node, record.second_node, record.type_id))
    }

    /// The committed head of a node's adjacency chain, to start paging from.
    pub fn get_relationship_chain_position(&self, node_id: NodeId) -> Result<Option<RelId>> {
        if self.store.nodes().load_light(node_id) {
            return Ok(self.store.nodes().get_record(node_id)?.next_rel);
        }
        if self.node_records.contains_key(&node_id) {
            // Created in this transaction, no committed chain yet.
            return Ok(None);
        }
        Err(StoreError::InvalidRecord(format!("node {node_id} not in use")))
    }

    /// Walks up to one grab-size batch of the committed chain from
    /// `position`, partitioned by direction relative to `node_id`.
    pub fn get_more_relationships(
        &self,
        node_id: NodeId,
        position: Option<RelId>,
    ) -> Result<RelationshipBatch> {
        let grab_size = self.store.relationship_grab_size();
        let (records, next) =
            self.store
                .relationships()
                .chain_page(node_id, position, grab_size)?;
        let mut batch = RelationshipBatch::default();
        for record in records {
            if record.first_node == record.second_node {
                batch.loops.push(record);
            } else if record.first_node == node_id {
                batch.outgoing.push(record);
            } else {
                batch.incoming.push(record);
            }
        }
        batch.next = next;
        Ok(batch)
    }

    fn require_live_node(&mut self, node_id: NodeId) -> Result<()> {
        let node = self.node_mut(node_id)?;
        if !node.header.in_use {
            return Err(StoreError::IllegalState(format!(
                "node {node_id} deleted in this transaction"
            )));
        }
        Ok(())
    }

    /// Head insertion: the old chain head's back pointer moves to the new
    /// relationship, whose forward pointer takes over the old head.
    fn connect(&mut self, node_id: NodeId, rel: &mut RelationshipRecord) -> Result<()> {
        let old_head = self.node_mut(node_id)?.next_rel;
        if let Some(next_id) = old_head {
            self.locks
                .acquire_write(LockKey::relationship(next_id), self.id);
            let next = self.rel_mut(next_id)?;
            let mut touched = false;
            if next.first_node == node_id {
                next.first_prev_rel = Some(rel.id);
                touched = true;
            }
            if next.second_node == node_id {
                next.second_prev_rel = Some(rel.id);
                touched = true;
            }
            if !touched {
                return Err(StoreError::InvalidRecord(format!(
                    "relationship {next_id} does not touch node {node_id}"
                )));
            }
            if !next.header.created {
                next.header.changed = true;
            }
        }
        let mut touched = false;
        if rel.first_node == node_id {
            rel.first_next_rel = old_head;
            touched = true;
        }
        if rel.second_node == node_id {
            rel.second_next_rel = old_head;
            touched = true;
        }
        if !touched {
            return Err(StoreError::InvalidRecord(format!(
                "relationship {} does not touch node {node_id}",
                rel.id
            )));
        }
        let node = self.node_mut(node_id)?;
        node.next_rel = Some(rel.id);
        if !node.header.created {
            node.header.changed = true;
        }
        Ok(())
    }

    /// Rewires the previous and next chain occupants around a deleted
    /// relationship, for one endpoint's chain.
    fn splice_neighbors(
        &mut self,
        node_id: NodeId,
        prev: Option<RelId>,
        next: Option<RelId>,
    ) -> Result<()> {
        if let Some(prev_id) = prev {
            self.locks
                .acquire_write(LockKey::relationship(prev_id), self.id);
            let prev_rel = self.rel_mut(prev_id)?;
            let mut touched = false;
            if prev_rel.first_node == node_id {
                prev_rel.first_next_rel = next;
                touched = true;
            }
            if prev_rel.second_node == node_id {
                prev_rel.second_next_rel = next;
                touched = true;
            }
            if !touched {
                return Err(StoreError::InvalidRecord(format!(
                    "relationship {prev_id} does not touch node {node_id}"
                )));
            }
            if !prev_rel.header.created {
                prev_rel.header.changed = true;
            }
        }
        if let Some(next_id) = next {
            self.locks
                .acquire_write(LockKey::relationship(next_id), self.id);
            let next_rel = self.rel_mut(next_id)?;
            let mut touched = false;
            if next_rel.first_node == node_id {
                next_rel.first_prev_rel = prev;
                touched = true;
            }
            if next_rel.second_node == node_id {
                next_rel.second_prev_rel = prev;
                touched = true;
            }
            if !touched {
                return Err(StoreError::InvalidRecord(format!(
                    "relationship {next_id} does not touch node {node_id}"
                )));
            }
            if !next_rel.header.created {
                next_rel.header.changed = true;
            }
        }
        Ok(())
    }

    /// When the deleted relationship headed the node's chain, the node's
    /// head pointer skips to the next occupant.
    fn update_node_chain_head(
        &mut self,
        node_id: NodeId,
        prev: Option<RelId>,
        next: Option<RelId>,
    ) -> Result<()> {
        if prev.is_none() {
            self.locks.acquire_write(LockKey::node(node_id), self.id);
            let node = self.node_mut(node_id)?;
            node.next_rel = next;
            if !node.header.created {
                node.header.changed = true;
            }
        }
        Ok(())
    }
}
