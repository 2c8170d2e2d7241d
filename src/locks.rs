use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

/// Which kind of record a lock key refers to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum LockCategory {
    Node,
    Relationship,
}

/// A lock token naming one record: never a usable domain entity, just an
/// identifier plus its category.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct LockKey {
    pub category: LockCategory,
    pub id: u64,
}

impl LockKey {
    pub fn relationship(id: u64) -> Self {
        Self {
            category: LockCategory::Relationship,
            id,
        }
    }

    pub fn node(id: u64) -> Self {
        Self {
            category: LockCategory::Node,
            id,
        }
    }
}

#[derive(Debug)]
struct Held {
    owner: u64,
    count: u32,
}

/// Pessimistic per-record write locks.
///
/// Acquisition blocks until the key is free; re-acquisition by the same
/// owner is counted. No deadlock detection happens here; an external
/// scheduler is assumed to provide detection or timeouts.
#[derive(Debug, Default)]
pub struct LockManager {
    held: Mutex<FxHashMap<LockKey, Held>>,
    released: Condvar,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocking write-lock acquisition on behalf of transaction `owner`.
    pub fn acquire_write(&self, key: LockKey, owner: u64) {
        let mut held = self.held.lock();
        loop {
            match held.get_mut(&key) {
                None => {
                    held.insert(key, Held { owner, count: 1 });
                    return;
                }
                Some(entry) if entry.owner == owner => {
                    entry.count += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut held),
            }
        }
    }

    /// Releases one hold on `key` by `owner`. Unknown keys are ignored.
    pub fn release_write(&self, key: LockKey, owner: u64) {
        let mut held = self.held.lock();
        if let Some(entry) = held.get_mut(&key) {
            if entry.owner != owner {
                return;
            }
            entry.count -= 1;
            if entry.count == 0 {
                held.remove(&key);
                self.released.notify_all();
            }
        }
    }

    /// Releases every lock held by `owner` (transaction completion).
    pub fn release_all(&self, owner: u64) {
        let mut held = self.held.lock();
        held.retain(|_, entry| entry.owner != owner);
        self.released.notify_all();
    }
}
