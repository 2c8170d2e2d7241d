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

    fn tx<'a>(&'a self, id: u64, cache: &'a NoopCache) -> WriteTransaction<'a> {
        WriteTransaction::new(id, &self.store, &self.log, &self.locks, cache)
    }
}

#[test]
fn deleting_a_node_with_relationships_fails_at_prepare() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = engine.tx(1, &cache);
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    let knows = tx.create_relationship_type("KNOWS").unwrap();
    let rel = tx.relationship_create(a, b, knows).unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let mut tx = engine.tx(2, &cache);
    tx.node_delete(a).unwrap();
    assert!(matches!(tx.prepare(), Err(StoreError::InvalidRecord(_))));
    tx.rollback().unwrap();
    // Nothing happened.
    assert!(engine.store.nodes().get_record(a).is_ok());

    let mut tx = engine.tx(3, &cache);
    tx.rel_delete(rel).unwrap();
    tx.node_delete(a).unwrap();
    tx.prepare().unwrap();
    tx.commit(2).unwrap();

    assert!(engine.store.nodes().get_record(a).is_err());
    assert!(engine.store.relationships().get_record(rel).is_err());
    assert!(engine.store.nodes().get_record(b).is_ok());
    assert_eq!(engine.store.nodes().get_record(b).unwrap().next_rel, None);
}

#[test]
fn deletes_report_the_prior_committed_value() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = engine.tx(1, &cache);
    let node = tx.node_create().unwrap();
    let name_key = tx.create_property_index("name").unwrap();
    let entry = tx
        .node_add_property(node, name_key, &PropertyValue::from("Trinity"))
        .unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    // Change the value and delete the node in the same transaction: the
    // delete must surface the value of the last commit, not the change.
    let mut tx = engine.tx(2, &cache);
    tx.node_change_property(node, entry.property_id, &PropertyValue::from("Neo"))
        .unwrap();
    let removed = tx.node_delete(node).unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(
        removed[&name_key].value,
        PropertyValue::from("Trinity")
    );
    tx.prepare().unwrap();
    tx.commit(2).unwrap();
    assert!(engine.store.nodes().get_record(node).is_err());
}

#[test]
fn relationship_delete_reports_its_properties() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = engine.tx(1, &cache);
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    let knows = tx.create_relationship_type("KNOWS").unwrap();
    let since = tx.create_property_index("since").unwrap();
    let rel = tx.relationship_create(a, b, knows).unwrap();
    tx.rel_add_property(rel, since, &PropertyValue::Int(1999))
        .unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let mut tx = engine.tx(2, &cache);
    let removed = tx.rel_delete(rel).unwrap();
    assert_eq!(removed[&since].value, PropertyValue::Int(1999));
    tx.prepare().unwrap();
    tx.commit(2).unwrap();
}

#[test]
fn property_chain_inserts_at_the_head() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = engine.tx(1, &cache);
    let node = tx.node_create().unwrap();
    let k1 = tx.create_property_index("one").unwrap();
    let k2 = tx.create_property_index("two").unwrap();
    let k3 = tx.create_property_index("three").unwrap();
    tx.node_add_property(node, k1, &PropertyValue::Int(1)).unwrap();
    let middle = tx.node_add_property(node, k2, &PropertyValue::Int(2)).unwrap();
    let last = tx.node_add_property(node, k3, &PropertyValue::Int(3)).unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    // Head of the chain is the most recently added property.
    let head = engine.store.nodes().get_record(node).unwrap().next_prop;
    assert_eq!(head, Some(last.property_id));

    let read_tx = engine.tx(2, &cache);
    let properties = read_tx.node_load_properties(node, false).unwrap();
    assert_eq!(properties.len(), 3);
    assert_eq!(properties[&k2].value, PropertyValue::Int(2));
    drop(read_tx);

    // Removing the middle record rewires its neighbors.
    let mut tx = engine.tx(3, &cache);
    tx.node_remove_property(node, middle.property_id).unwrap();
    tx.prepare().unwrap();
    tx.commit(2).unwrap();

    let read_tx = engine.tx(4, &cache);
    let properties = read_tx.node_load_properties(node, false).unwrap();
    assert_eq!(properties.len(), 2);
    assert!(properties.contains_key(&k1));
    assert!(properties.contains_key(&k3));
    assert!(read_tx
        .property_value_or_none(middle.property_id)
        .is_none());
}

#[test]
fn removing_the_last_property_reverts_the_chain_head() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = engine.tx(1, &cache);
    let node = tx.node_create().unwrap();
    let key = tx.create_property_index("name").unwrap();
    let entry = tx
        .node_add_property(node, key, &PropertyValue::from("Trinity"))
        .unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let mut tx = engine.tx(2, &cache);
    tx.node_change_property(node, entry.property_id, &PropertyValue::from("Neo"))
        .unwrap();
    tx.node_remove_property(node, entry.property_id).unwrap();
    tx.prepare().unwrap();
    tx.commit(2).unwrap();

    assert_eq!(engine.store.nodes().get_record(node).unwrap().next_prop, None);
    let read_tx = engine.tx(3, &cache);
    assert!(read_tx.node_load_properties(node, false).unwrap().is_empty());
}

#[test]
fn oversized_values_roundtrip_through_block_chains() {
    let engine = Engine::new();
    let cache = NoopCache;

    let big_string = "x".repeat(1000);
    let big_array: Vec<i64> = (0..200).collect();

    let mut tx = engine.tx(1, &cache);
    let node = tx.node_create().unwrap();
    let text_key = tx.create_property_index("text").unwrap();
    let data_key = tx.create_property_index("data").unwrap();
    tx.node_add_property(node, text_key, &PropertyValue::String(big_string.clone()))
        .unwrap();
    tx.node_add_property(node, data_key, &PropertyValue::IntArray(big_array.clone()))
        .unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let read_tx = engine.tx(2, &cache);
    let properties = read_tx.node_load_properties(node, false).unwrap();
    assert_eq!(properties[&text_key].value, PropertyValue::String(big_string));
    assert_eq!(properties[&data_key].value, PropertyValue::IntArray(big_array));
}

#[test]
fn relationship_batches_partition_by_direction() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = engine.tx(1, &cache);
    let a = tx.node_create().unwrap();
    let b = tx.node_create().unwrap();
    let knows = tx.create_relationship_type("KNOWS").unwrap();
    let out = tx.relationship_create(a, b, knows).unwrap();
    let inbound = tx.relationship_create(b, a, knows).unwrap();
    let looped = tx.relationship_create(a, a, knows).unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let read_tx = engine.tx(2, &cache);
    let position = read_tx.get_relationship_chain_position(a).unwrap();
    let batch = read_tx.get_more_relationships(a, position).unwrap();
    assert_eq!(batch.next, None);
    assert_eq!(
        batch.outgoing.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![out]
    );
    assert_eq!(
        batch.incoming.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![inbound]
    );
    assert_eq!(
        batch.loops.iter().map(|r| r.id).collect::<Vec<_>>(),
        vec![looped]
    );
}

#[test]
fn long_chains_page_by_grab_size() {
    let engine = Engine::new();
    let cache = NoopCache;
    let grab = engine.store.relationship_grab_size();

    let mut tx = engine.tx(1, &cache);
    let hub = tx.node_create().unwrap();
    let knows = tx.create_relationship_type("KNOWS").unwrap();
    let total = grab + 7;
    for _ in 0..total {
        let other = tx.node_create().unwrap();
        tx.relationship_create(hub, other, knows).unwrap();
    }
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let read_tx = engine.tx(2, &cache);
    let mut position = read_tx.get_relationship_chain_position(hub).unwrap();
    let mut seen = 0;
    let mut pages = 0;
    while position.is_some() {
        let batch = read_tx.get_more_relationships(hub, position).unwrap();
        seen += batch.outgoing.len() + batch.incoming.len() + batch.loops.len();
        position = batch.next;
        pages += 1;
    }
    assert_eq!(seen, total);
    assert_eq!(pages, 2);
}

#[test]
fn name_definitions_register_with_the_cache() {
    let engine = Engine::new();
    let cache = RecordingCache::new();

    let mut tx = WriteTransaction::new(1, &engine.store, &engine.log, &engine.locks, &cache);
    let knows = tx.create_relationship_type("KNOWS").unwrap();
    let name = tx.create_property_index("name").unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let events = cache.events();
    assert!(events.contains(&CacheEvent::RegisterRelationshipType(
        knows,
        "KNOWS".to_string()
    )));
    assert!(events.contains(&CacheEvent::RegisterPropertyIndex(name, "name".to_string())));
    assert_eq!(events.last(), Some(&CacheEvent::MaterializeCommitted));

    let read_tx = engine.tx(2, &NoopCache);
    let types = read_tx.load_relationship_types().unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].name, "KNOWS");
    assert_eq!(read_tx.load_index(name).unwrap().name, "name");
    assert_eq!(read_tx.load_property_indexes(10).unwrap().len(), 1);
}

#[test]
fn reading_a_deleted_node_requires_the_light_flag() {
    let engine = Engine::new();
    let cache = NoopCache;

    let mut tx = engine.tx(1, &cache);
    let node = tx.node_create().unwrap();
    let key = tx.create_property_index("name").unwrap();
    tx.node_add_property(node, key, &PropertyValue::Bool(true))
        .unwrap();
    tx.prepare().unwrap();
    tx.commit(1).unwrap();

    let mut tx = engine.tx(2, &cache);
    tx.node_delete(node).unwrap();
    assert!(matches!(
        tx.node_load_properties(node, false),
        Err(StoreError::IllegalState(_))
    ));
    // The light read still sees the committed chain.
    let light = tx.node_load_properties(node, true).unwrap();
    assert_eq!(light.len(), 1);
    assert!(!tx.node_load_light(node));
    tx.rollback().unwrap();
}
