use campusgraph::storage::NewRelationship;
use campusgraph::{Attributes, DefaultAccount, DefaultObject, Entity, ModelManager, NodeConfig, SyncState};
use serde_json::json;

fn attrs(value: serde_json::Value) -> Attributes {
    value.as_object().cloned().unwrap_or_default()
}

fn manager_with_rooms() -> ModelManager {
    let manager = ModelManager::in_memory().unwrap();
    manager.create_node_type_like("room", "Room", "object").unwrap();
    manager
}

#[test]
fn test_account_round_trip_keeps_class() {
    let manager = ModelManager::in_memory().unwrap();
    let alice = DefaultAccount::new("alice", "alice@example.edu", Attributes::new(), manager.writer()).unwrap();
    manager.flush().unwrap();

    let loaded = manager.get_node_by_uuid(&alice.uuid()).unwrap().unwrap();
    assert!(loaded.is::<DefaultAccount>());
    let account = loaded.downcast::<DefaultAccount>().unwrap();
    assert_eq!(account.username(), "alice");
    assert_eq!(account.email(), "alice@example.edu");
    assert_eq!(account.sync_state(), SyncState::Synced);
}

#[test]
fn test_friendship_is_created_once() {
    let manager = ModelManager::in_memory().unwrap();
    let alice = DefaultAccount::new("alice", "a@example.edu", Attributes::new(), manager.writer()).unwrap();
    let bob = DefaultAccount::new("bob", "b@example.edu", Attributes::new(), manager.writer()).unwrap();

    let first = manager
        .create_relationship(&alice, &bob, "friendship", attrs(json!({"since": 2020})))
        .unwrap();
    let second = manager
        .create_relationship(&alice, &bob, "friendship", attrs(json!({"level": "close"})))
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.get_attribute("since"), Some(&json!(2020)));
    assert_eq!(second.get_attribute("level"), Some(&json!("close")));
    assert_eq!(manager.get_relationships(&alice, Some("friendship")).unwrap().len(), 1);
}

#[test]
fn test_raw_duplicate_edge_violates_unique_triple() {
    let manager = ModelManager::in_memory().unwrap();
    let a = manager.create::<DefaultObject>("a", Attributes::new()).unwrap();
    let b = manager.create::<DefaultObject>("b", Attributes::new()).unwrap();
    let rel = manager.create_relationship(&a, &b, "owns", Attributes::new()).unwrap();

    let duplicate = NewRelationship {
        type_id: rel.type_id,
        type_code: rel.type_code.clone(),
        source_id: rel.source_id,
        target_id: rel.target_id,
        attributes: Attributes::new(),
        weight: 1,
    };
    let result = manager
        .synchronizer()
        .with_store(|store| store.insert_relationship(&duplicate));
    assert!(result.is_err());
}

#[test]
fn test_exit_between_rooms_is_directed() {
    let manager = manager_with_rooms();
    let hall = manager.create_node("Hall", "room", Attributes::new()).unwrap();
    let library = manager.create_node("Library", "room", Attributes::new()).unwrap();

    manager
        .create_relationship(hall.as_ref(), library.as_ref(), "exit", attrs(json!({"direction": "north"})))
        .unwrap();

    let exit = manager
        .get_relationship_between(hall.as_ref(), library.as_ref(), "exit")
        .unwrap()
        .unwrap();
    assert_eq!(exit.get_attribute("direction"), Some(&json!("north")));

    let library_id = manager
        .synchronizer()
        .get_node_by_uuid(&library.object().uuid())
        .unwrap()
        .unwrap()
        .id;
    let exits = manager.get_relationships(hall.as_ref(), Some("exit")).unwrap();
    assert_eq!(exits.len(), 1);
    assert_eq!(exits[0].target_id, library_id);
    assert!(manager
        .get_relationship_between(library.as_ref(), hall.as_ref(), "exit")
        .unwrap()
        .is_none());

    let rooms = manager.get_active_nodes_by_type("room").unwrap();
    assert_eq!(rooms.len(), 2);
    assert!(rooms.iter().all(|r| r.is::<DefaultObject>()));
}

#[test]
fn test_last_write_wins_after_flush() {
    let manager = ModelManager::in_memory().unwrap();
    let counter = manager.create::<DefaultObject>("counter", Attributes::new()).unwrap();
    counter.set_attribute("count", 1).unwrap();
    counter.set_attribute("count", 2).unwrap();
    manager.flush().unwrap();

    let node = manager.synchronizer().get_node_by_uuid(&counter.uuid()).unwrap().unwrap();
    assert_eq!(node.get_attribute("count"), Some(&json!(2)));
    assert_eq!(counter.sync_state(), SyncState::Synced);
}

#[test]
fn test_two_lookups_share_one_object() {
    let manager = ModelManager::in_memory().unwrap();
    let desk = manager.create::<DefaultObject>("desk", Attributes::new()).unwrap();
    manager.flush().unwrap();
    let uuid = desk.uuid();
    drop(desk);

    let a = manager.get_node_by_uuid(&uuid).unwrap().unwrap();
    let b = manager.get_node_by_uuid(&uuid).unwrap().unwrap();
    a.object().set_attribute("x", 1).unwrap();
    b.object().set_attribute("y", 2).unwrap();
    manager.flush().unwrap();

    let row = manager.synchronizer().get_node_by_uuid(&uuid).unwrap().unwrap();
    assert_eq!(row.get_attribute("x"), Some(&json!(1)));
    assert_eq!(row.get_attribute("y"), Some(&json!(2)));
    assert_eq!(a.object().sync_state(), SyncState::Synced);
    assert_eq!(b.object().sync_state(), SyncState::Synced);
}

#[test]
fn test_owner_written_before_its_location() {
    let manager = manager_with_rooms();
    let key = manager.create::<DefaultObject>("key", Attributes::new()).unwrap();
    let hall = manager.create_node("Hall", "room", Attributes::new()).unwrap();
    assert!(key.move_to(hall.as_ref()));
    manager.flush().unwrap();

    let stored = manager.synchronizer().get_node_by_uuid(&key.uuid()).unwrap().unwrap();
    assert_eq!(stored.location_uuid, Some(hall.object().uuid()));
    assert_eq!(key.sync_state(), SyncState::Synced);

    let loaded = manager.get_node_by_uuid(&key.uuid()).unwrap().unwrap();
    assert_eq!(loaded.object().location(), Some(hall.object().uuid()));
}

#[test]
fn test_soft_delete_hides_from_queries() {
    let manager = ModelManager::in_memory().unwrap();
    let lamp = manager
        .create::<DefaultObject>("Brass Lamp", attrs(json!({"lit": true})))
        .unwrap();
    lamp.add_tag("light");
    manager.flush().unwrap();

    assert!(manager.delete_node(&lamp).unwrap());
    assert!(!manager.delete_node(&lamp).unwrap());

    assert!(manager.search("lamp", None).unwrap().is_empty());
    assert!(manager.find_nodes_by_tag("light", None).unwrap().is_empty());
    assert!(manager.find_nodes_by_attribute("lit", &json!(true), None).unwrap().is_empty());
    let stored = manager.synchronizer().get_node_by_uuid(&lamp.uuid()).unwrap().unwrap();
    assert!(!stored.is_active);
    assert_eq!(lamp.sync_state(), SyncState::Inactive);
}

#[test]
fn test_type_code_is_frozen_on_existing_rows() {
    let manager = manager_with_rooms();
    let hall = manager.create_node("Hall", "room", Attributes::new()).unwrap();
    manager.flush().unwrap();

    assert!(manager.delete_node_type("room").unwrap());
    manager.refresh_type_caches().unwrap();

    hall.object().set_attribute("capacity", 200).unwrap();
    manager.flush().unwrap();
    let stored = manager
        .synchronizer()
        .get_node_by_uuid(&hall.object().uuid())
        .unwrap()
        .unwrap();
    assert_eq!(stored.type_code, "room");
    assert_eq!(stored.get_attribute("capacity"), Some(&json!(200)));

    let err = manager.create_node("Annex", "room", Attributes::new()).unwrap_err();
    assert!(err.is_resolution());
}

#[test]
fn test_batch_creation_skips_bad_configs() {
    let manager = manager_with_rooms();
    let configs = vec![
        NodeConfig::new("Hall", "room"),
        NodeConfig::new("Nowhere", "spaceship"),
        NodeConfig::new("", "room"),
    ];
    let created = manager.batch_create_nodes(configs);
    manager.flush().unwrap();

    assert_eq!(created.len(), 1);
    assert!(manager.get_node_by_name("Hall", Some("room")).unwrap().is_some());
}

#[test]
fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campus.db");

    let uuid = {
        let manager = ModelManager::open_path(&path).unwrap();
        manager.install_builtin_types().unwrap();
        let carol = DefaultAccount::new("carol", "carol@example.edu", Attributes::new(), manager.writer()).unwrap();
        carol.record_failed_login();
        manager.shutdown();
        carol.uuid()
    };

    let manager = ModelManager::open_path(&path).unwrap();
    let loaded = manager.get_node_by_name("carol", Some("account")).unwrap().unwrap();
    let carol = loaded.downcast::<DefaultAccount>().unwrap();
    assert_eq!(carol.uuid(), uuid);
    assert_eq!(carol.email(), "carol@example.edu");
    assert_eq!(carol.failed_login_attempts(), 1);
}
