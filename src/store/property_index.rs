use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::ids::{IdGenerator, IdType};
use crate::records::{DynamicKind, DynamicRecord, KeyId, PropertyIndexRecord};

use super::dynamic::DynamicStore;

/// A materialized property-key definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyIndexData {
    pub key_id: KeyId,
    pub name: String,
}

/// Store of property-key name definitions and their name-block chains.
#[derive(Debug)]
pub struct PropertyIndexStore {
    inner: RwLock<Inner>,
    names: DynamicStore,
}

#[derive(Debug)]
struct Inner {
    records: FxHashMap<KeyId, PropertyIndexRecord>,
    ids: IdGenerator,
}

impl PropertyIndexStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: FxHashMap::default(),
                ids: IdGenerator::new(IdType::PropertyIndex),
            }),
            names: DynamicStore::new(DynamicKind::KeyName),
        }
    }

    pub fn allocate_id(&self) -> Result<KeyId> {
        Ok(self.inner.write().ids.allocate()? as KeyId)
    }

    pub fn free_id(&self, id: KeyId) {
        self.inner.write().ids.free(id as u64);
    }

    pub fn free_block_id(&self, id: u64) {
        self.names.free_id(id);
    }

    /// Allocates the name-block chain for `name`, stored as UTF-16 units.
    pub fn allocate_name_records(&self, name: &str) -> Result<SmallVec<[DynamicRecord; 2]>> {
        let chars: Vec<u16> = name.encode_utf16().collect();
        self.names.allocate_chars(&chars)
    }

    /// Reads a record light: the name chain is not materialized.
    pub fn get_record(&self, id: KeyId) -> Result<PropertyIndexRecord> {
        let inner = self.inner.read();
        let record = inner
            .records
            .get(&id)
            .ok_or_else(|| StoreError::InvalidRecord(format!("property index {id} not in use")))?;
        let mut light = record.clone();
        light.name_records.clear();
        Ok(light)
    }

    pub fn is_light(record: &PropertyIndexRecord) -> bool {
        record.name_records.is_empty()
    }

    pub fn make_heavy(&self, record: &mut PropertyIndexRecord) -> Result<()> {
        if Self::is_light(record) {
            record.name_records = self.names.read_chain(record.name_block)?.to_vec();
        }
        Ok(())
    }

    /// Decodes the key name text. The record must be heavy.
    pub fn name_of(&self, record: &PropertyIndexRecord) -> Result<String> {
        if Self::is_light(record) {
            return Err(StoreError::IllegalState(format!(
                "property index {} name read while light",
                record.id
            )));
        }
        let mut chars = Vec::new();
        for block in &record.name_records {
            chars.extend_from_slice(block.chars()?);
        }
        String::from_utf16(&chars).map_err(|_| {
            StoreError::Corruption(format!(
                "property index {} holds invalid name text",
                record.id
            ))
        })
    }

    pub fn get_index_data(&self, id: KeyId) -> Result<PropertyIndexData> {
        let mut record = self.get_record(id)?;
        self.make_heavy(&mut record)?;
        let name = self.name_of(&record)?;
        Ok(PropertyIndexData { key_id: id, name })
    }

    /// The first `count` definitions, ordered by key id.
    pub fn get_property_indexes(&self, count: usize) -> Result<Vec<PropertyIndexData>> {
        let mut ids: Vec<KeyId> = self.inner.read().records.keys().copied().collect();
        ids.sort_unstable();
        ids.truncate(count);
        ids.into_iter().map(|id| self.get_index_data(id)).collect()
    }

    /// Command-apply primitive.
    pub fn update_record(&self, record: &PropertyIndexRecord) -> Result<()> {
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

impl Default for PropertyIndexStore {
    fn default() -> Self {
        Self::new()
    }
}
