//! Commands: self-contained record snapshots produced at prepare time.
//!
//! A command carries everything needed to apply itself against the stores,
//! both live and during recovery replay, so it also defines the durable log
//! payload format. Encoding is explicit big-endian; absent pointers use a
//! `u64::MAX` sentinel on the wire.

use crate::error::{Result, StoreError};
use crate::records::{
    ChainPayload, DynamicChain, DynamicData, DynamicKind, DynamicRecord, NodeRecord,
    PropertyIndexRecord, PropertyOwner, PropertyRecord, PropertyStorage, RecordHeader,
    RelationshipRecord, RelationshipTypeRecord,
};
use crate::store::GraphStore;

const NONE_SENTINEL: u64 = u64::MAX;

const TAG_NODE: u8 = 1;
const TAG_RELATIONSHIP: u8 = 2;
const TAG_PROPERTY: u8 = 3;
const TAG_PROPERTY_INDEX: u8 = 4;
const TAG_RELATIONSHIP_TYPE: u8 = 5;

/// One record mutation, tagged by category.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Node(NodeRecord),
    Relationship(RelationshipRecord),
    Property(PropertyRecord),
    PropertyIndex(PropertyIndexRecord),
    RelationshipType(RelationshipTypeRecord),
}

impl Command {
    /// The record identifier, used as the sort key within a category.
    pub fn key(&self) -> u64 {
        match self {
            Command::Node(r) => r.id,
            Command::Relationship(r) => r.id,
            Command::Property(r) => r.id,
            Command::PropertyIndex(r) => r.id as u64,
            Command::RelationshipType(r) => r.id as u64,
        }
    }

    fn header(&self) -> &RecordHeader {
        match self {
            Command::Node(r) => &r.header,
            Command::Relationship(r) => &r.header,
            Command::Property(r) => &r.header,
            Command::PropertyIndex(r) => &r.header,
            Command::RelationshipType(r) => &r.header,
        }
    }

    pub fn is_created(&self) -> bool {
        self.header().created
    }

    pub fn is_deleted(&self) -> bool {
        !self.header().in_use
    }

    /// Applies the snapshot to the backing store.
    pub fn apply(&self, store: &GraphStore) -> Result<()> {
        match self {
            Command::Node(r) => store.nodes().update_record(r),
            Command::Relationship(r) => store.relationships().update_record(r),
            Command::Property(r) => store.properties().update_record(r),
            Command::PropertyIndex(r) => store.properties().index_store().update_record(r),
            Command::RelationshipType(r) => store.relationship_types().update_record(r),
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Command::Node(r) => {
                buf.push(TAG_NODE);
                buf.extend_from_slice(&r.id.to_be_bytes());
                encode_header(&r.header, buf);
                encode_opt(r.next_rel, buf);
                encode_opt(r.next_prop, buf);
            }
            Command::Relationship(r) => {
                buf.push(TAG_RELATIONSHIP);
                buf.extend_from_slice(&r.id.to_be_bytes());
                encode_header(&r.header, buf);
                buf.extend_from_slice(&r.first_node.to_be_bytes());
                buf.extend_from_slice(&r.second_node.to_be_bytes());
                buf.extend_from_slice(&r.type_id.to_be_bytes());
                encode_opt(r.first_prev_rel, buf);
                encode_opt(r.first_next_rel, buf);
                encode_opt(r.second_prev_rel, buf);
                encode_opt(r.second_next_rel, buf);
                encode_opt(r.next_prop, buf);
            }
            Command::Property(r) => {
                buf.push(TAG_PROPERTY);
                buf.extend_from_slice(&r.id.to_be_bytes());
                encode_header(&r.header, buf);
                match r.owner {
                    None => buf.push(0),
                    Some(PropertyOwner::Node(id)) => {
                        buf.push(1);
                        buf.extend_from_slice(&id.to_be_bytes());
                    }
                    Some(PropertyOwner::Rel(id)) => {
                        buf.push(2);
                        buf.extend_from_slice(&id.to_be_bytes());
                    }
                }
                buf.extend_from_slice(&r.key_id.to_be_bytes());
                encode_opt(r.prev_prop, buf);
                encode_opt(r.next_prop, buf);
                encode_storage(&r.value, buf);
                buf.extend_from_slice(&(r.freed_blocks.len() as u32).to_be_bytes());
                for block in &r.freed_blocks {
                    encode_dynamic(block, buf);
                }
            }
            Command::PropertyIndex(r) => {
                buf.push(TAG_PROPERTY_INDEX);
                buf.extend_from_slice(&r.id.to_be_bytes());
                encode_header(&r.header, buf);
                buf.extend_from_slice(&r.name_block.to_be_bytes());
                buf.extend_from_slice(&(r.name_records.len() as u32).to_be_bytes());
                for block in &r.name_records {
                    encode_dynamic(block, buf);
                }
            }
            Command::RelationshipType(r) => {
                buf.push(TAG_RELATIONSHIP_TYPE);
                buf.extend_from_slice(&r.id.to_be_bytes());
                encode_header(&r.header, buf);
                buf.extend_from_slice(&r.name_block.to_be_bytes());
                buf.extend_from_slice(&(r.name_records.len() as u32).to_be_bytes());
                for block in &r.name_records {
                    encode_dynamic(block, buf);
                }
            }
        }
    }

    pub fn decode(buf: &[u8]) -> Result<Command> {
        let mut cursor = Cursor::new(buf);
        let command = Self::decode_from(&mut cursor)?;
        if !cursor.at_end() {
            return Err(StoreError::Corruption(
                "trailing bytes after command payload".into(),
            ));
        }
        Ok(command)
    }

    fn decode_from(cursor: &mut Cursor<'_>) -> Result<Command> {
        let tag = cursor.u8()?;
        match tag {
            TAG_NODE => {
                let id = cursor.u64()?;
                let header = decode_header(cursor)?;
                let next_rel = decode_opt(cursor)?;
                let next_prop = decode_opt(cursor)?;
                Ok(Command::Node(NodeRecord {
                    id,
                    header,
                    next_rel,
                    next_prop,
                }))
            }
            TAG_RELATIONSHIP => {
                let id = cursor.u64()?;
                let header = decode_header(cursor)?;
                let first_node = cursor.u64()?;
                let second_node = cursor.u64()?;
                let type_id = cursor.u32()?;
                let first_prev_rel = decode_opt(cursor)?;
                let first_next_rel = decode_opt(cursor)?;
                let second_prev_rel = decode_opt(cursor)?;
                let second_next_rel = decode_opt(cursor)?;
                let next_prop = decode_opt(cursor)?;
                Ok(Command::Relationship(RelationshipRecord {
                    id,
                    header,
                    first_node,
                    second_node,
                    type_id,
                    first_prev_rel,
                    first_next_rel,
                    second_prev_rel,
                    second_next_rel,
                    next_prop,
                }))
            }
            TAG_PROPERTY => {
                let id = cursor.u64()?;
                let header = decode_header(cursor)?;
                let owner = match cursor.u8()? {
                    0 => None,
                    1 => Some(PropertyOwner::Node(cursor.u64()?)),
                    2 => Some(PropertyOwner::Rel(cursor.u64()?)),
                    other => {
                        return Err(StoreError::Corruption(format!(
                            "unknown property owner tag {other}"
                        )))
                    }
                };
                let key_id = cursor.u32()?;
                let prev_prop = decode_opt(cursor)?;
                let next_prop = decode_opt(cursor)?;
                let value = decode_storage(cursor)?;
                let freed_count = cursor.u32()? as usize;
                let mut freed_blocks = Vec::with_capacity(freed_count);
                for _ in 0..freed_count {
                    freed_blocks.push(decode_dynamic(cursor)?);
                }
                Ok(Command::Property(PropertyRecord {
                    id,
                    header,
                    owner,
                    key_id,
                    prev_prop,
                    next_prop,
                    value,
                    freed_blocks,
                }))
            }
            TAG_PROPERTY_INDEX => {
                let id = cursor.u32()?;
                let header = decode_header(cursor)?;
                let name_block = cursor.u64()?;
                let count = cursor.u32()? as usize;
                let mut name_records = Vec::with_capacity(count);
                for _ in 0..count {
                    name_records.push(decode_dynamic(cursor)?);
                }
                Ok(Command::PropertyIndex(PropertyIndexRecord {
                    id,
                    header,
                    name_block,
                    name_records,
                }))
            }
            TAG_RELATIONSHIP_TYPE => {
                let id = cursor.u32()?;
                let header = decode_header(cursor)?;
                let name_block = cursor.u64()?;
                let count = cursor.u32()? as usize;
                let mut name_records = Vec::with_capacity(count);
                for _ in 0..count {
                    name_records.push(decode_dynamic(cursor)?);
                }
                Ok(Command::RelationshipType(RelationshipTypeRecord {
                    id,
                    header,
                    name_block,
                    name_records,
                }))
            }
            other => Err(StoreError::Corruption(format!(
                "unknown command tag {other}"
            ))),
        }
    }
}

/// Sorts one category's commands by record identifier, using the signed
/// difference of the keys so identifier wraparound stays totally ordered.
pub fn sort_commands(commands: &mut [Command]) {
    commands.sort_by(|a, b| {
        let diff = (a.key() as i64).wrapping_sub(b.key() as i64);
        diff.cmp(&0)
    });
}

fn encode_header(header: &RecordHeader, buf: &mut Vec<u8>) {
    let mut flags = 0u8;
    if header.in_use {
        flags |= 1;
    }
    if header.created {
        flags |= 2;
    }
    if header.changed {
        flags |= 4;
    }
    buf.push(flags);
}

fn decode_header(cursor: &mut Cursor<'_>) -> Result<RecordHeader> {
    let flags = cursor.u8()?;
    if flags & !7 != 0 {
        return Err(StoreError::Corruption(format!(
            "unknown record flags {flags:#04x}"
        )));
    }
    Ok(RecordHeader {
        in_use: flags & 1 != 0,
        created: flags & 2 != 0,
        changed: flags & 4 != 0,
    })
}

fn encode_opt(value: Option<u64>, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&value.unwrap_or(NONE_SENTINEL).to_be_bytes());
}

fn decode_opt(cursor: &mut Cursor<'_>) -> Result<Option<u64>> {
    let raw = cursor.u64()?;
    Ok((raw != NONE_SENTINEL).then_some(raw))
}

fn encode_storage(value: &PropertyStorage, buf: &mut Vec<u8>) {
    match value {
        PropertyStorage::Bool(v) => {
            buf.push(0);
            buf.push(u8::from(*v));
        }
        PropertyStorage::Int(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_be_bytes());
        }
        PropertyStorage::Float(v) => {
            buf.push(2);
            buf.extend_from_slice(&v.to_bits().to_be_bytes());
        }
        PropertyStorage::String(chain) => {
            buf.push(3);
            encode_chain(chain, buf);
        }
        PropertyStorage::Array(chain) => {
            buf.push(4);
            encode_chain(chain, buf);
        }
    }
}

fn decode_storage(cursor: &mut Cursor<'_>) -> Result<PropertyStorage> {
    match cursor.u8()? {
        0 => Ok(PropertyStorage::Bool(cursor.u8()? != 0)),
        1 => Ok(PropertyStorage::Int(i64::from_be_bytes(
            cursor.array::<8>()?,
        ))),
        2 => Ok(PropertyStorage::Float(f64::from_bits(cursor.u64()?))),
        3 => Ok(PropertyStorage::String(decode_chain(cursor)?)),
        4 => Ok(PropertyStorage::Array(decode_chain(cursor)?)),
        other => Err(StoreError::Corruption(format!(
            "unknown property storage tag {other}"
        ))),
    }
}

fn encode_chain(chain: &DynamicChain, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&chain.first_block.to_be_bytes());
    match &chain.payload {
        ChainPayload::Light => buf.extend_from_slice(&u32::MAX.to_be_bytes()),
        ChainPayload::Loaded(records) => {
            buf.extend_from_slice(&(records.len() as u32).to_be_bytes());
            for record in records {
                encode_dynamic(record, buf);
            }
        }
    }
}

fn decode_chain(cursor: &mut Cursor<'_>) -> Result<DynamicChain> {
    let first_block = cursor.u64()?;
    let count = cursor.u32()?;
    if count == u32::MAX {
        return Ok(DynamicChain::light(first_block));
    }
    let mut records = smallvec::SmallVec::new();
    for _ in 0..count {
        records.push(decode_dynamic(cursor)?);
    }
    Ok(DynamicChain::loaded(first_block, records))
}

fn encode_dynamic(record: &DynamicRecord, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&record.id.to_be_bytes());
    encode_header(&record.header, buf);
    buf.push(match record.kind {
        DynamicKind::StringValue => 0,
        DynamicKind::ArrayValue => 1,
        DynamicKind::KeyName => 2,
        DynamicKind::TypeName => 3,
    });
    encode_opt(record.prev_block, buf);
    encode_opt(record.next_block, buf);
    match record.data() {
        DynamicData::Light => buf.push(0),
        DynamicData::Bytes(data) => {
            buf.push(1);
            buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
            buf.extend_from_slice(data);
        }
        DynamicData::Chars(data) => {
            buf.push(2);
            buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
            for unit in data {
                buf.extend_from_slice(&unit.to_be_bytes());
            }
        }
    }
}

fn decode_dynamic(cursor: &mut Cursor<'_>) -> Result<DynamicRecord> {
    let id = cursor.u64()?;
    let header = decode_header(cursor)?;
    let kind = match cursor.u8()? {
        0 => DynamicKind::StringValue,
        1 => DynamicKind::ArrayValue,
        2 => DynamicKind::KeyName,
        3 => DynamicKind::TypeName,
        other => {
            return Err(StoreError::Corruption(format!(
                "unknown dynamic kind tag {other}"
            )))
        }
    };
    let mut record = DynamicRecord::new(id, kind);
    record.header = header;
    record.prev_block = decode_opt(cursor)?;
    record.next_block = decode_opt(cursor)?;
    match cursor.u8()? {
        0 => {}
        1 => {
            let len = cursor.u32()? as usize;
            record.set_bytes(cursor.bytes(len)?.to_vec());
        }
        2 => {
            let len = cursor.u32()? as usize;
            let raw = cursor.bytes(len * 2)?;
            let units = raw
                .chunks_exact(2)
                .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
                .collect();
            record.set_chars(units);
        }
        other => {
            return Err(StoreError::Corruption(format!(
                "unknown dynamic payload tag {other}"
            )))
        }
    }
    Ok(record)
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos == self.buf.len()
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(StoreError::Corruption(
                "command payload truncated".into(),
            )),
        }
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self.bytes(N)?;
        Ok(slice.try_into().expect("length checked"))
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.array::<4>()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.array::<8>()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(command: &Command) -> Command {
        let mut buf = Vec::new();
        command.encode(&mut buf);
        Command::decode(&buf).unwrap()
    }

    #[test]
    fn node_command_roundtrips() {
        let mut record = NodeRecord::created(42);
        record.next_rel = Some(7);
        let command = Command::Node(record);
        assert_eq!(roundtrip(&command), command);
    }

    #[test]
    fn relationship_command_roundtrips() {
        let mut record = RelationshipRecord::new(3, 10, 20, 1);
        record.header = RecordHeader::created();
        record.first_next_rel = Some(9);
        record.second_prev_rel = Some(4);
        let command = Command::Relationship(record);
        assert_eq!(roundtrip(&command), command);
    }

    #[test]
    fn property_command_with_chain_roundtrips() {
        let mut block = DynamicRecord::new(6, DynamicKind::StringValue);
        block.header = RecordHeader::created();
        block.set_bytes(b"some longer text".to_vec());
        let chain = DynamicChain::loaded(6, smallvec::smallvec![block]);
        let mut record = PropertyRecord::created(
            11,
            PropertyOwner::Rel(2),
            3,
            PropertyStorage::String(chain),
        );
        let mut freed = DynamicRecord::new(5, DynamicKind::StringValue);
        freed.prev_block = Some(1);
        record.freed_blocks.push(freed);
        let command = Command::Property(record);
        assert_eq!(roundtrip(&command), command);
    }

    #[test]
    fn index_and_type_commands_roundtrip() {
        let mut name = DynamicRecord::new(1, DynamicKind::KeyName);
        name.header = RecordHeader::created();
        name.set_chars("age".encode_utf16().collect());
        let mut index = PropertyIndexRecord::created(0, 1);
        index.name_records.push(name);
        let command = Command::PropertyIndex(index);
        assert_eq!(roundtrip(&command), command);

        let mut name = DynamicRecord::new(2, DynamicKind::TypeName);
        name.header = RecordHeader::created();
        name.set_chars("KNOWS".encode_utf16().collect());
        let mut reltype = RelationshipTypeRecord::created(1, 2);
        reltype.name_records.push(name);
        let command = Command::RelationshipType(reltype);
        assert_eq!(roundtrip(&command), command);
    }

    #[test]
    fn decode_rejects_truncated_and_trailing_input() {
        let mut buf = Vec::new();
        Command::Node(NodeRecord::created(1)).encode(&mut buf);
        assert!(Command::decode(&buf[..buf.len() - 1]).is_err());
        buf.push(0);
        assert!(Command::decode(&buf).is_err());
    }

    #[test]
    fn sort_orders_by_signed_key_difference() {
        let mut commands: Vec<Command> = [5u64, 1, 3, 2]
            .iter()
            .map(|id| Command::Node(NodeRecord::created(*id)))
            .collect();
        sort_commands(&mut commands);
        let keys: Vec<u64> = commands.iter().map(Command::key).collect();
        assert_eq!(keys, vec![1, 2, 3, 5]);
    }

    #[test]
    fn created_and_deleted_flags_come_from_the_header() {
        let created = Command::Node(NodeRecord::created(1));
        assert!(created.is_created());
        assert!(!created.is_deleted());

        let mut record = NodeRecord::new(2);
        record.header.in_use = false;
        let deleted = Command::Node(record);
        assert!(deleted.is_deleted());
        assert!(!deleted.is_created());
    }
}
