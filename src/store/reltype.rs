use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::ids::{IdGenerator, IdType};
use crate::records::{DynamicKind, DynamicRecord, RelTypeId, RelationshipTypeRecord};

use super::dynamic::DynamicStore;

/// A materialized relationship-type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationshipTypeData {
    pub id: RelTypeId,
    pub name: String,
}

/// Store of relationship-type definitions and their name-block chains.
#[derive(Debug)]
pub struct RelationshipTypeStore {
    inner: RwLock<Inner>,
    names: DynamicStore,
}

#[derive(Debug)]
struct Inner {
    records: FxHashMap<RelTypeId, RelationshipTypeRecord>,
    ids: IdGenerator,
}

impl RelationshipTypeStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: FxHashMap::default(),
                ids: IdGenerator::new(IdType::RelationshipType),
            }),
            names: DynamicStore::new(DynamicKind::TypeName),
        }
    }

    pub fn allocate_id(&self) -> Result<RelTypeId> {
        Ok(self.inner.write().ids.allocate()? as RelTypeId)
    }

    pub fn free_id(&self, id: RelTypeId) {
        self.inner.write().ids.free(id as u64);
    }

    pub fn free_block_id(&self, id: u64) {
        self.names.free_id(id);
    }

    pub fn allocate_name_records(&self, name: &str) -> Result<SmallVec<[DynamicRecord; 2]>> {
        let chars: Vec<u16> = name.encode_utf16().collect();
        self.names.allocate_chars(&chars)
    }

    pub fn get_record(&self, id: RelTypeId) -> Result<RelationshipTypeRecord> {
        let inner = self.inner.read();
        let record = inner.records.get(&id).ok_or_else(|| {
            StoreError::InvalidRecord(format!("relationship type {id} not in use"))
        })?;
        let mut light = record.clone();
        light.name_records.clear();
        Ok(light)
    }

    pub fn is_light(record: &RelationshipTypeRecord) -> bool {
        record.name_records.is_empty()
    }

    pub fn make_heavy(&self, record: &mut RelationshipTypeRecord) -> Result<()> {
        if Self::is_light(record) {
            record.name_records = self.names.read_chain(record.name_block)?.to_vec();
        }
        Ok(())
    }

    pub fn name_of(&self, record: &RelationshipTypeRecord) -> Result<String> {
        if Self::is_light(record) {
            return Err(StoreError::IllegalState(format!(
                "relationship type {} name read while light",
                record.id
            )));
        }
        let mut chars = Vec::new();
        for block in &record.name_records {
            chars.extend_from_slice(block.chars()?);
        }
        String::from_utf16(&chars).map_err(|_| {
            StoreError::Corruption(format!(
                "relationship type {} holds invalid name text",
                record.id
            ))
        })
    }

    pub fn get_relationship_type(&self, id: RelTypeId) -> Result<RelationshipTypeData> {
        let mut record = self.get_record(id)?;
        self.make_heavy(&mut record)?;
        let name = self.name_of(&record)?;
        Ok(RelationshipTypeData { id, name })
    }

    /// Every registered type, ordered by id.
    pub fn get_relationship_types(&self) -> Result<Vec<RelationshipTypeData>> {
        let mut ids: Vec<RelTypeId> = self.inner.read().records.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .map(|id| self.get_relationship_type(id))
            .collect()
    }

    /// Command-apply primitive.
    pub fn update_record(&self, record: &RelationshipTypeRecord) -> Result<()> {
        for block in &record.name_records {
            self.names.write_record(block)?;
        }
        let mut inner = self.inner.write();
        if record.header.in_use {
            let mut stored = record.clone();
            stored.header.created = false;
            stored.header.changed = false;
            stored.name_records.clear();
            inner.records.insert(record.id, stored);
        } else {
            inner.records.remove(&record.id);
            inner.ids.free(record.id as u64);
        }
        Ok(())
    }

    pub fn in_use_ids(&self) -> Vec<u64> {
        self.inner
            .read()
            .records
            .keys()
            .map(|id| *id as u64)
            .collect()
    }

    pub fn resync_ids(&self) {
        let mut inner = self.inner.write();
        let ids: Vec<u64> = inner.records.keys().map(|id| *id as u64).collect();
        inner.ids.resync(ids);
        drop(inner);
        self.names.resync_ids();
    }
}

impl Default for RelationshipTypeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_name_roundtrips() -> Result<()> {
        let store = RelationshipTypeStore::new();
        let id = store.allocate_id()?;
        let name_records = store.allocate_name_records("KNOWS")?;
        let mut record = RelationshipTypeRecord::created(id, name_records[0].id);
        record.name_records = name_records.to_vec();
        store.update_record(&record)?;

        let types = store.get_relationship_types()?;
        assert_eq!(types.len(), 1);
        assert_eq!(types[0].name, "KNOWS");
        Ok(())
    }

    #[test]
    fn type_id_space_is_narrow() {
        assert_eq!(IdType::RelationshipType.max_value(), u16::MAX as u64);
    }
}
