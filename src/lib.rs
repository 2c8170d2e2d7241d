//! Write path of a graph-structured storage engine.
//!
//! The crate turns in-memory graph mutations (create/delete node,
//! create/delete relationship, add/change/remove property) into durable,
//! ordered, crash-recoverable changes to fixed-format records. The heart of
//! it is [`tx::WriteTransaction`], which buffers record mutations, converts
//! them into sorted command lists at prepare time, applies them at commit,
//! reverses them at rollback, and re-applies them during recovery replay.

pub mod cache;
pub mod command;
pub mod error;
pub mod ids;
pub mod locks;
pub mod log;
pub mod records;
pub mod store;
pub mod tx;
pub mod value;

pub use cache::{CacheEvent, CacheTracker, NoopCache, RecordingCache};
pub use command::Command;
pub use error::{Result, StoreError};
pub use ids::IdType;
pub use locks::{LockCategory, LockKey, LockManager};
pub use log::{recover, LogicalLog, RecoveredTx};
pub use store::{GraphStore, StoreConfig};
pub use tx::{PropertyEntry, RelationshipBatch, WriteTransaction};
pub use value::PropertyValue;
