use chainstore::{
    CacheEvent, GraphStore, LockManager, LogicalLog, NoopCache, PropertyValue, RecordingCache,
    StoreError, WriteTransaction,
};

struct Engine {
    store: GraphStore,
    locks: LockManager,
    log: LogicalLog,
    _dir: tempfile::TempDir,
}

impl Engine {
    fn new() -> Engine {
        let dir = tempfile::tempdir().unwrap();
        let log = LogicalLog::open(dir.path().join("log")).unwrap();
        Engine {
            store: GraphStore::default(),
            locks: LockManager::new(),
            log,
            _dir: dir,
        }
    }
}

#[test]
fn rollback_frees_created_ids_and_evicts_caches() {
    let engine = Engine::new();
    let cache = RecordingCache::new();

    let mut tx = WriteTransaction::new(1, &engine.store, &engine.log, &engine.locks, &cache);
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    let c = tx.node_create().unwrap();
    tx.relationship_create(a, b, 0).unwrap();
    tx.relationship_create(b, c, 0).unwrap();
    tx.rollback().unwrap();

    // Nothing reached the store.
    assert!(engine.store.nodes().in_use_ids().is_empty());
    assert!(engine.store.relationships().in_use_ids().is_empty());

    let events = cache.events();
    let node_evictions = events
        .iter()
        .filter(|e| matches!(e, CacheEvent::EvictNode(_)))
        .count();
    let rel_evictions = events
        .iter()
        .filter(|e| matches!(e, CacheEvent::EvictRelationship(_)))
        .count();
    assert_eq!(node_evictions, 3);
    assert_eq!(rel_evictions, 2);
    assert_eq!(events.len(), 5);

    // Freed identifiers are reused.
    let cache = NoopCache;
    let mut tx = WriteTransaction::new(2, &engine.store, &engine.log, &engine.locks, &cache);
    let reused = tx.node_create().unwrap();
    assert!(reused < 3);
    tx.rollback().unwrap();
}

#[test]
fn rollback_returns_created_property_ids() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = WriteTransaction::new(1, &engine.store, &engine.log, &engine.locks, &cache);
    let node = tx.node_create().unwrap();
    let key = tx.create_property_index("name").unwrap();
    let entry = tx
        .node_add_property(node, key, &PropertyValue::String("z".repeat(400)))
        .unwrap();
    tx.rollback().unwrap();

    assert!(engine.store.properties().in_use_ids().is_empty());
    // The freed property id comes straight back.
    assert_eq!(
        engine.store.properties().allocate_id().unwrap(),
        entry.property_id
    );
}

#[test]
fn rollback_after_failed_prepare_leaves_the_store_untouched() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = WriteTransaction::new(1, &engine.store, &engine.log, &engine.locks, &cache);
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    tx.relationship_create(a, b, 0).unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let mut tx = WriteTransaction::new(2, &engine.store, &engine.log, &engine.locks, &cache);
    tx.node_delete(a).unwrap();
    assert!(tx.prepare().is_err());
    tx.rollback().unwrap();

    assert!(engine.store.nodes().get_record(a).is_ok());
    assert!(engine.store.nodes().get_record(b).is_ok());
}

#[test]
fn rollback_releases_locks_for_other_transactions() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = WriteTransaction::new(1, &engine.store, &engine.log, &engine.locks, &cache);
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    tx.relationship_create(a, b, 0).unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let mut tx = WriteTransaction::new(2, &engine.store, &engine.log, &engine.locks, &cache);
    tx.node_delete(b).unwrap();
    tx.rollback().unwrap();

    // The node lock taken by the rolled-back delete is gone; a later
    // transaction deletes without blocking.
    let mut tx = WriteTransaction::new(3, &engine.store, &engine.log, &engine.locks, &cache);
    tx.rel_delete(0).unwrap();
    tx.node_delete(b).unwrap();
    tx.prepare().unwrap();
    tx.commit(2).unwrap();
    assert!(engine.store.nodes().get_record(b).is_err());
}

#[test]
fn ordering_violation_leaves_the_commit_counter_unchanged() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = WriteTransaction::new(1, &engine.store, &engine.log, &engine.locks, &cache);
    tx.node_create().unwrap();
    tx.prepare().unwrap();
    assert!(matches!(
        tx.commit(7),
        Err(StoreError::OrderingViolation {
            commit_tx: 7,
            last_committed: 0
        })
    ));
    assert_eq!(engine.store.last_committed_tx(), 0);
    assert!(engine.store.nodes().in_use_ids().is_empty());
}
