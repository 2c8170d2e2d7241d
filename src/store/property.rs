use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::{Result, StoreError};
use crate::ids::{IdGenerator, IdType};
use crate::records::{
    ChainPayload, DynamicChain, DynamicKind, PropertyId, PropertyRecord, PropertyStorage,
};
use crate::value::PropertyValue;

use super::dynamic::DynamicStore;
use super::property_index::PropertyIndexStore;

const ARRAY_KIND_INT: u8 = 1;
const ARRAY_KIND_FLOAT: u8 = 2;

/// Property record store, plus the dynamic-block stores backing oversized
/// string and array values and the property-key name store.
#[derive(Debug)]
pub struct PropertyStore {
    inner: RwLock<Inner>,
    strings: DynamicStore,
    arrays: DynamicStore,
    index: PropertyIndexStore,
}

#[derive(Debug)]
struct Inner {
    records: FxHashMap<PropertyId, PropertyRecord>,
    ids: IdGenerator,
}

impl PropertyStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: FxHashMap::default(),
                ids: IdGenerator::new(IdType::Property),
            }),
            strings: DynamicStore::new(DynamicKind::StringValue),
            arrays: DynamicStore::new(DynamicKind::ArrayValue),
            index: PropertyIndexStore::new(),
        }
    }

    pub fn index_store(&self) -> &PropertyIndexStore {
        &self.index
    }

    pub fn allocate_id(&self) -> Result<PropertyId> {
        self.inner.write().ids.allocate()
    }

    pub fn free_id(&self, id: PropertyId) {
        self.inner.write().ids.free(id);
    }

    /// Frees a created dynamic-block identifier back to the free list owned
    /// by the value kind that produced it (rollback path).
    pub fn free_block_id(&self, kind: DynamicKind, id: u64) -> Result<()> {
        self.dynamic_store(kind)?.free_id(id);
        Ok(())
    }

    /// Reads a property record. The value chain comes back light; callers
    /// must [`make_heavy`](Self::make_heavy) before reading the value.
    pub fn get_record(&self, id: PropertyId) -> Result<PropertyRecord> {
        self.inner
            .read()
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::InvalidRecord(format!("property {id} not in use")))
    }

    /// Materializes the value's dynamic-block chain.
    pub fn make_heavy(&self, record: &mut PropertyRecord) -> Result<()> {
        let Some(kind) = record.value.dynamic_kind() else {
            return Ok(());
        };
        let store = self.dynamic_store(kind)?;
        if let Some(chain) = record.value.chain_mut() {
            if chain.is_light() {
                let records = store.read_chain(chain.first_block)?;
                chain.payload = ChainPayload::Loaded(records);
            }
        }
        Ok(())
    }

    /// Encodes a caller value into record storage, allocating dynamic
    /// blocks for strings and arrays.
    pub fn encode_value(&self, value: &PropertyValue) -> Result<PropertyStorage> {
        match value {
            PropertyValue::Bool(v) => Ok(PropertyStorage::Bool(*v)),
            PropertyValue::Int(v) => Ok(PropertyStorage::Int(*v)),
            PropertyValue::Float(v) => Ok(PropertyStorage::Float(*v)),
            PropertyValue::String(text) => {
                let records = self.strings.allocate_bytes(text.as_bytes())?;
                let first = records[0].id;
                Ok(PropertyStorage::String(DynamicChain::loaded(
                    first, records,
                )))
            }
            PropertyValue::IntArray(_) | PropertyValue::FloatArray(_) => {
                let bytes = encode_array(value)?;
                let records = self.arrays.allocate_bytes(&bytes)?;
                let first = records[0].id;
                Ok(PropertyStorage::Array(DynamicChain::loaded(first, records)))
            }
        }
    }

    /// Decodes the stored value. The chain must be heavy.
    pub fn get_value(&self, record: &PropertyRecord) -> Result<PropertyValue> {
        match &record.value {
            PropertyStorage::Bool(v) => Ok(PropertyValue::Bool(*v)),
            PropertyStorage::Int(v) => Ok(PropertyValue::Int(*v)),
            PropertyStorage::Float(v) => Ok(PropertyValue::Float(*v)),
            PropertyStorage::String(chain) => {
                let bytes = concat_chain(chain)?;
                String::from_utf8(bytes)
                    .map(PropertyValue::String)
                    .map_err(|_| {
                        StoreError::Corruption(format!(
                            "property {} holds invalid string data",
                            record.id
                        ))
                    })
            }
            PropertyStorage::Array(chain) => {
                let bytes = concat_chain(chain)?;
                decode_array(&bytes).ok_or_else(|| {
                    StoreError::Corruption(format!(
                        "property {} holds invalid array data",
                        record.id
                    ))
                })
            }
        }
    }

    /// Command-apply primitive. Writes the record and its live chain
    /// records, frees identifiers of the record and blocks turned off.
    pub fn update_record(&self, record: &PropertyRecord) -> Result<()> {
        if record.header.in_use {
            if let (Some(kind), Some(chain)) =
                (record.value.dynamic_kind(), record.value.chain())
            {
                if let ChainPayload::Loaded(blocks) = &chain.payload {
                    let store = self.dynamic_store(kind)?;
                    for block in blocks {
                        store.write_record(block)?;
                    }
                }
            }
            let mut stored = record.clone();
            stored.header.created = false;
            stored.header.changed = false;
            stored.freed_blocks.clear();
            if let Some(chain) = stored.value.chain_mut() {
                chain.payload = ChainPayload::Light;
            }
            self.inner.write().records.insert(record.id, stored);
        } else {
            let mut inner = self.inner.write();
            inner.records.remove(&record.id);
            inner.ids.free(record.id);
        }
        for block in &record.freed_blocks {
            self.dynamic_store(block.kind)?.write_record(block)?;
        }
        Ok(())
    }

    pub fn in_use_ids(&self) -> Vec<PropertyId> {
        self.inner.read().records.keys().copied().collect()
    }

    pub fn resync_ids(&self) {
        let mut inner = self.inner.write();
        let ids: Vec<PropertyId> = inner.records.keys().copied().collect();
        inner.ids.resync(ids);
        drop(inner);
        self.strings.resync_ids();
        self.arrays.resync_ids();
        self.index.resync_ids();
    }

    fn dynamic_store(&self, kind: DynamicKind) -> Result<&DynamicStore> {
        match kind {
            DynamicKind::StringValue => Ok(&self.strings),
            DynamicKind::ArrayValue => Ok(&self.arrays),
            other => Err(StoreError::IllegalState(format!(
                "dynamic kind {other:?} does not belong to the property store"
            ))),
        }
    }
}

impl Default for PropertyStore {
    fn default() -> Self {
        Self::new()
    }
}

fn concat_chain(chain: &DynamicChain) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for record in chain.records()? {
        data.extend_from_slice(record.bytes()?);
    }
    Ok(data)
}

fn encode_array(value: &PropertyValue) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match value {
        PropertyValue::IntArray(values) => {
            buf.push(ARRAY_KIND_INT);
            buf.extend_from_slice(&(values.len() as u32).to_be_bytes());
            for v in values {
                buf.extend_from_slice(&v.to_be_bytes());
            }
        }
        PropertyValue::FloatArray(values) => {
            buf.push(ARRAY_KIND_FLOAT);
            buf.extend_from_slice(&(values.len() as u32).to_be_bytes());
            for v in values {
                buf.extend_from_slice(&v.to_bits().to_be_bytes());
            }
        }
        _ => {
            return Err(StoreError::IllegalState(
                "scalar value passed to array encoder".into(),
            ))
        }
    }
    Ok(buf)
}

fn decode_array(bytes: &[u8]) -> Option<PropertyValue> {
    if bytes.len() < 5 {
        return None;
    }
    let kind = bytes[0];
    let count = u32::from_be_bytes(bytes[1..5].try_into().ok()?) as usize;
    let body = &bytes[5..];
    if body.len() != count * 8 {
        return None;
    }
    match kind {
        ARRAY_KIND_INT => {
            let values = body
                .chunks_exact(8)
                .map(|chunk| i64::from_be_bytes(chunk.try_into().unwrap()))
                .collect();
            Some(PropertyValue::IntArray(values))
        }
        ARRAY_KIND_FLOAT => {
            let values = body
                .chunks_exact(8)
                .map(|chunk| f64::from_bits(u64::from_be_bytes(chunk.try_into().unwrap())))
                .collect();
            Some(PropertyValue::FloatArray(values))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{PropertyOwner, RecordHeader};

    fn heavy_record(store: &PropertyStore, value: &PropertyValue) -> Result<PropertyRecord> {
        let storage = store.encode_value(value)?;
        Ok(PropertyRecord::created(
            store.allocate_id()?,
            PropertyOwner::Node(1),
            0,
            storage,
        ))
    }

    #[test]
    fn string_value_roundtrips_through_chain() -> Result<()> {
        let store = PropertyStore::new();
        let original = PropertyValue::String("x".repeat(500));
        let record = heavy_record(&store, &original)?;
        store.update_record(&record)?;

        let mut loaded = store.get_record(record.id)?;
        assert!(loaded.is_light());
        assert!(store.get_value(&loaded).is_err());
        store.make_heavy(&mut loaded)?;
        assert_eq!(store.get_value(&loaded)?, original);
        Ok(())
    }

    #[test]
    fn array_value_roundtrips_through_chain() -> Result<()> {
        let store = PropertyStore::new();
        let original = PropertyValue::IntArray((0..100).collect());
        let record = heavy_record(&store, &original)?;
        store.update_record(&record)?;

        let mut loaded = store.get_record(record.id)?;
        store.make_heavy(&mut loaded)?;
        assert_eq!(store.get_value(&loaded)?, original);
        Ok(())
    }

    #[test]
    fn deleting_record_frees_property_and_block_ids() -> Result<()> {
        let store = PropertyStore::new();
        let original = PropertyValue::String("y".repeat(300));
        let mut record = heavy_record(&store, &original)?;
        store.update_record(&record)?;

        store.make_heavy(&mut record)?;
        record.set_in_use(false);
        store.update_record(&record)?;
        assert!(store.get_record(record.id).is_err());
        assert!(store.strings.in_use_ids().is_empty());
        Ok(())
    }

    #[test]
    fn scalars_stay_inline() -> Result<()> {
        let store = PropertyStore::new();
        let record = heavy_record(&store, &PropertyValue::Int(42))?;
        store.update_record(&record)?;
        let loaded = store.get_record(record.id)?;
        // No materialization needed for inline values.
        assert_eq!(store.get_value(&loaded)?, PropertyValue::Int(42));
        assert!(store.strings.in_use_ids().is_empty());
        Ok(())
    }

    #[test]
    fn sanitized_copy_drops_tx_flags() -> Result<()> {
        let store = PropertyStore::new();
        let record = heavy_record(&store, &PropertyValue::Bool(true))?;
        assert_eq!(record.header, RecordHeader::created());
        store.update_record(&record)?;
        let loaded = store.get_record(record.id)?;
        assert!(loaded.header.in_use);
        assert!(!loaded.header.created);
        Ok(())
    }
}
