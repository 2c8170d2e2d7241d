use smallvec::SmallVec;

use crate::error::{Result, StoreError};
use crate::ids::IdType;

pub type NodeId = u64;
pub type RelId = u64;
pub type PropertyId = u64;
pub type BlockId = u64;
pub type KeyId = u32;
pub type RelTypeId = u32;

/// Flags shared by every record kind, embedded by composition.
///
/// `created` and `changed` are transaction-local: they describe what this
/// transaction did to the record and never reach the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordHeader {
    pub in_use: bool,
    pub created: bool,
    pub changed: bool,
}

impl RecordHeader {
    pub fn in_use() -> Self {
        Self {
            in_use: true,
            created: false,
            changed: false,
        }
    }

    pub fn created() -> Self {
        Self {
            in_use: true,
            created: true,
            changed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: NodeId,
    pub header: RecordHeader,
    /// Head of the relationship adjacency chain.
    pub next_rel: Option<RelId>,
    /// Head of the property chain.
    pub next_prop: Option<PropertyId>,
}

impl NodeRecord {
    pub fn new(id: NodeId) -> Self {
        Self {
            id,
            header: RecordHeader::default(),
            next_rel: None,
            next_prop: None,
        }
    }

    pub fn created(id: NodeId) -> Self {
        Self {
            header: RecordHeader::created(),
            ..Self::new(id)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipRecord {
    pub id: RelId,
    pub header: RecordHeader,
    pub first_node: NodeId,
    pub second_node: NodeId,
    pub type_id: RelTypeId,
    /// Position in the first node's adjacency chain.
    pub first_prev_rel: Option<RelId>,
    pub first_next_rel: Option<RelId>,
    /// Position in the second node's adjacency chain.
    pub second_prev_rel: Option<RelId>,
    pub second_next_rel: Option<RelId>,
    pub next_prop: Option<PropertyId>,
}

impl RelationshipRecord {
    pub fn new(id: RelId, first_node: NodeId, second_node: NodeId, type_id: RelTypeId) -> Self {
        Self {
            id,
            header: RecordHeader::default(),
            first_node,
            second_node,
            type_id,
            first_prev_rel: None,
            first_next_rel: None,
            second_prev_rel: None,
            second_next_rel: None,
            next_prop: None,
        }
    }

    /// Next pointer of the chain this relationship occupies for `node`.
    pub fn next_for(&self, node: NodeId) -> Result<Option<RelId>> {
        if self.first_node == node {
            Ok(self.first_next_rel)
        } else if self.second_node == node {
            Ok(self.second_next_rel)
        } else {
            Err(StoreError::InvalidRecord(format!(
                "relationship {} does not touch node {node}",
                self.id
            )))
        }
    }
}

/// Which logical value kind produced a dynamic block; each kind has its own
/// free list.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DynamicKind {
    StringValue,
    ArrayValue,
    KeyName,
    TypeName,
}

impl DynamicKind {
    pub fn id_type(self) -> IdType {
        match self {
            DynamicKind::StringValue => IdType::StringBlock,
            DynamicKind::ArrayValue => IdType::ArrayBlock,
            DynamicKind::KeyName => IdType::PropertyIndexBlock,
            DynamicKind::TypeName => IdType::RelationshipTypeBlock,
        }
    }
}

/// Payload of a dynamic block: unloaded, raw bytes, or UTF-16 code units.
/// Bytes and chars are mutually exclusive per record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DynamicData {
    Light,
    Bytes(Vec<u8>),
    Chars(Vec<u16>),
}

/// One overflow block of an oversized value, chained forward to the next.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicRecord {
    pub id: BlockId,
    pub header: RecordHeader,
    pub kind: DynamicKind,
    pub length: u32,
    pub prev_block: Option<BlockId>,
    pub next_block: Option<BlockId>,
    data: DynamicData,
}

impl DynamicRecord {
    pub fn new(id: BlockId, kind: DynamicKind) -> Self {
        Self {
            id,
            header: RecordHeader::default(),
            kind,
            length: 0,
            prev_block: None,
            next_block: None,
            data: DynamicData::Light,
        }
    }

    pub fn is_light(&self) -> bool {
        self.data == DynamicData::Light
    }

    /// Turning the in-use flag off discards the bulk payload.
    pub fn set_in_use(&mut self, in_use: bool) {
        self.header.in_use = in_use;
        if !in_use {
            self.data = DynamicData::Light;
        }
    }

    pub fn set_bytes(&mut self, data: Vec<u8>) {
        self.length = data.len() as u32;
        self.data = DynamicData::Bytes(data);
    }

    pub fn set_chars(&mut self, data: Vec<u16>) {
        self.length = (data.len() * 2) as u32;
        self.data = DynamicData::Chars(data);
    }

    /// Raw payload bytes. Reading while light is a programming error.
    pub fn bytes(&self) -> Result<&[u8]> {
        match &self.data {
            DynamicData::Bytes(data) => Ok(data),
            DynamicData::Light => Err(StoreError::IllegalState(format!(
                "dynamic block {} read while light",
                self.id
            ))),
            DynamicData::Chars(_) => Err(StoreError::IllegalState(format!(
                "dynamic block {} holds char data",
                self.id
            ))),
        }
    }

    pub fn chars(&self) -> Result<&[u16]> {
        match &self.data {
            DynamicData::Chars(data) => Ok(data),
            DynamicData::Light => Err(StoreError::IllegalState(format!(
                "dynamic block {} read while light",
                self.id
            ))),
            DynamicData::Bytes(_) => Err(StoreError::IllegalState(format!(
                "dynamic block {} holds byte data",
                self.id
            ))),
        }
    }

    pub fn data(&self) -> &DynamicData {
        &self.data
    }
}

/// The record-level view of a property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyStorage {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(DynamicChain),
    Array(DynamicChain),
}

impl PropertyStorage {
    pub fn chain(&self) -> Option<&DynamicChain> {
        match self {
            PropertyStorage::String(chain) | PropertyStorage::Array(chain) => Some(chain),
            _ => None,
        }
    }

    pub fn chain_mut(&mut self) -> Option<&mut DynamicChain> {
        match self {
            PropertyStorage::String(chain) | PropertyStorage::Array(chain) => Some(chain),
            _ => None,
        }
    }

    pub fn dynamic_kind(&self) -> Option<DynamicKind> {
        match self {
            PropertyStorage::String(_) => Some(DynamicKind::StringValue),
            PropertyStorage::Array(_) => Some(DynamicKind::ArrayValue),
            _ => None,
        }
    }
}

/// A reference to a dynamic-block chain, either unloaded or materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicChain {
    pub first_block: BlockId,
    pub payload: ChainPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainPayload {
    Light,
    Loaded(SmallVec<[DynamicRecord; 2]>),
}

impl DynamicChain {
    pub fn light(first_block: BlockId) -> Self {
        Self {
            first_block,
            payload: ChainPayload::Light,
        }
    }

    pub fn loaded(first_block: BlockId, records: SmallVec<[DynamicRecord; 2]>) -> Self {
        Self {
            first_block,
            payload: ChainPayload::Loaded(records),
        }
    }

    pub fn is_light(&self) -> bool {
        matches!(self.payload, ChainPayload::Light)
    }

    pub fn records(&self) -> Result<&[DynamicRecord]> {
        match &self.payload {
            ChainPayload::Loaded(records) => Ok(records),
            ChainPayload::Light => Err(StoreError::IllegalState(format!(
                "dynamic chain at block {} read while light",
                self.first_block
            ))),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PropertyOwner {
    Node(NodeId),
    Rel(RelId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    pub id: PropertyId,
    pub header: RecordHeader,
    pub owner: Option<PropertyOwner>,
    pub key_id: KeyId,
    pub prev_prop: Option<PropertyId>,
    pub next_prop: Option<PropertyId>,
    pub value: PropertyStorage,
    /// Dynamic records released by a change or remove in this transaction,
    /// carried so the command apply can free their identifiers.
    pub freed_blocks: Vec<DynamicRecord>,
}

impl PropertyRecord {
    pub fn created(
        id: PropertyId,
        owner: PropertyOwner,
        key_id: KeyId,
        value: PropertyStorage,
    ) -> Self {
        Self {
            id,
            header: RecordHeader::created(),
            owner: Some(owner),
            key_id,
            prev_prop: None,
            next_prop: None,
            value,
            freed_blocks: Vec::new(),
        }
    }

    /// Whether the value chain still needs materialization before the value
    /// can be read or its blocks freed.
    pub fn is_light(&self) -> bool {
        self.value.chain().is_some_and(|chain| chain.is_light())
    }

    /// Turning the in-use flag off discards any materialized chain payload
    /// into `freed_blocks` with each block marked not-in-use.
    pub fn set_in_use(&mut self, in_use: bool) {
        self.header.in_use = in_use;
        if !in_use {
            self.release_value_blocks();
        }
    }

    /// Moves the current value's dynamic records into `freed_blocks`,
    /// marking each not-in-use. The chain must be heavy if one exists.
    pub fn release_value_blocks(&mut self) {
        if let Some(chain) = self.value.chain_mut() {
            if let ChainPayload::Loaded(records) = &mut chain.payload {
                for mut record in records.drain(..) {
                    record.set_in_use(false);
                    self.freed_blocks.push(record);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyIndexRecord {
    pub id: KeyId,
    pub header: RecordHeader,
    pub name_block: BlockId,
    pub name_records: Vec<DynamicRecord>,
}

impl PropertyIndexRecord {
    pub fn created(id: KeyId, name_block: BlockId) -> Self {
        Self {
            id,
            header: RecordHeader::created(),
            name_block,
            name_records: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipTypeRecord {
    pub id: RelTypeId,
    pub header: RecordHeader,
    pub name_block: BlockId,
    pub name_records: Vec<DynamicRecord>,
}

impl RelationshipTypeRecord {
    pub fn created(id: RelTypeId, name_block: BlockId) -> Self {
        Self {
            id,
            header: RecordHeader::created(),
            name_block,
            name_records: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_record_discards_payload_when_freed() {
        let mut record = DynamicRecord::new(7, DynamicKind::StringValue);
        record.header.in_use = true;
        record.set_bytes(b"oversized".to_vec());
        assert_eq!(record.length, 9);
        record.set_in_use(false);
        assert!(record.is_light());
        assert!(record.bytes().is_err());
    }

    #[test]
    fn light_chain_read_is_illegal_state() {
        let chain = DynamicChain::light(3);
        assert!(matches!(
            chain.records(),
            Err(StoreError::IllegalState(_))
        ));
    }

    #[test]
    fn property_release_moves_blocks_to_freed() {
        let mut block = DynamicRecord::new(11, DynamicKind::StringValue);
        block.header.in_use = true;
        block.set_bytes(vec![1, 2, 3]);
        let chain = DynamicChain::loaded(11, SmallVec::from_vec(vec![block]));
        let mut record = PropertyRecord::created(
            5,
            PropertyOwner::Node(1),
            0,
            PropertyStorage::String(chain),
        );
        record.set_in_use(false);
        assert_eq!(record.freed_blocks.len(), 1);
        assert!(!record.freed_blocks[0].header.in_use);
        assert!(record.value.chain().unwrap().records().unwrap().is_empty());
    }

    #[test]
    fn relationship_next_for_rejects_foreign_node() {
        let rel = RelationshipRecord::new(1, 10, 20, 0);
        assert!(rel.next_for(10).is_ok());
        assert!(rel.next_for(20).is_ok());
        assert!(matches!(
            rel.next_for(30),
            Err(StoreError::InvalidRecord(_))
        ));
    }
}
