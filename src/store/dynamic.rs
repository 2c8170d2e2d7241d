use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::ids::IdGenerator;
use crate::records::{BlockId, DynamicKind, DynamicRecord};

/// Default payload capacity of one dynamic block, in bytes.
pub const DEFAULT_BLOCK_SIZE: usize = 120;

/// Store for the overflow blocks of one logical value kind.
///
/// Allocation reserves identifiers and builds chained records, but nothing
/// reaches the store map until a command applies the records at commit.
#[derive(Debug)]
pub struct DynamicStore {
    kind: DynamicKind,
    block_size: usize,
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    records: FxHashMap<BlockId, DynamicRecord>,
    ids: IdGenerator,
}

impl DynamicStore {
    pub fn new(kind: DynamicKind) -> Self {
        Self::with_block_size(kind, DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(kind: DynamicKind, block_size: usize) -> Self {
        Self {
            kind,
            block_size,
            inner: RwLock::new(Inner {
                records: FxHashMap::default(),
                ids: IdGenerator::new(kind.id_type()),
            }),
        }
    }

    pub fn kind(&self) -> DynamicKind {
        self.kind
    }

    /// Splits `data` into a forward-linked chain of created records.
    pub fn allocate_bytes(&self, data: &[u8]) -> Result<SmallVec<[DynamicRecord; 2]>> {
        let mut inner = self.inner.write();
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(self.block_size).collect()
        };
        let mut ids = Vec::with_capacity(chunks.len());
        for _ in 0..chunks.len() {
            ids.push(inner.ids.allocate()?);
        }
        let mut records = SmallVec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let mut record = DynamicRecord::new(ids[index], self.kind);
            record.header.in_use = true;
            record.header.created = true;
            record.prev_block = index.checked_sub(1).map(|i| ids[i]);
            record.next_block = ids.get(index + 1).copied();
            record.set_bytes(chunk.to_vec());
            records.push(record);
        }
        Ok(records)
    }

    /// As [`allocate_bytes`](Self::allocate_bytes), for UTF-16 name text.
    pub fn allocate_chars(&self, data: &[u16]) -> Result<SmallVec<[DynamicRecord; 2]>> {
        let chars_per_block = (self.block_size / 2).max(1);
        let mut inner = self.inner.write();
        let chunks: Vec<&[u16]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(chars_per_block).collect()
        };
        let mut ids = Vec::with_capacity(chunks.len());
        for _ in 0..chunks.len() {
            ids.push(inner.ids.allocate()?);
        }
        let mut records = SmallVec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let mut record = DynamicRecord::new(ids[index], self.kind);
            record.header.in_use = true;
            record.header.created = true;
            record.prev_block = index.checked_sub(1).map(|i| ids[i]);
            record.next_block = ids.get(index + 1).copied();
            record.set_chars(chunk.to_vec());
            records.push(record);
        }
        Ok(records)
    }

    /// Reads a whole chain heavy, following next-block pointers from `first`.
    pub fn read_chain(&self, first: BlockId) -> Result<SmallVec<[DynamicRecord; 2]>> {
        let inner = self.inner.read();
        let mut records = SmallVec::new();
        let mut next = Some(first);
        while let Some(id) = next {
            let record = inner.records.get(&id).ok_or_else(|| {
                StoreError::InvalidRecord(format!("dynamic block {id} not in use"))
            })?;
            next = record.next_block;
            records.push(record.clone());
        }
        Ok(records)
    }

    /// Command-apply primitive: persists an in-use record, or frees the
    /// identifier of a not-in-use one.
    pub fn write_record(&self, record: &DynamicRecord) -> Result<()> {
        let mut inner = self.inner.write();
        if record.header.in_use {
            if record.is_light() {
                return Err(StoreError::IllegalState(format!(
                    "dynamic block {} written while light",
                    record.id
                )));
            }
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

    /// Returns a created-record identifier to the free list (rollback path).
    pub fn free_id(&self, id: BlockId) {
        self.inner.write().ids.free(id);
    }

    pub fn in_use_ids(&self) -> Vec<BlockId> {
        self.inner.read().records.keys().copied().collect()
    }

    pub fn resync_ids(&self) {
        let mut inner = self.inner.write();
        let ids: Vec<BlockId> = inner.records.keys().copied().collect();
        inner.ids.resync(ids);
    }
}
