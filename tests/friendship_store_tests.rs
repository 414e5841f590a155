//! Friendship store tests
//!
//! The relational source of truth must stay symmetric by construction:
//! both directional keys are written and removed together.

use chingu_graph::errors::EngineError;
use chingu_graph::friendship::FriendshipStore;
use tempfile::TempDir;

fn setup_store() -> (FriendshipStore, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let store = FriendshipStore::new(temp_dir.path()).expect("Failed to open friendship store");
    (store, temp_dir)
}

#[test]
fn test_add_is_symmetric() {
    let (store, _dir) = setup_store();

    store.add_friendship(1, 2).unwrap();

    assert!(store.are_friends(1, 2).unwrap());
    assert!(store.are_friends(2, 1).unwrap());
    assert_eq!(store.friends_of(1).unwrap(), vec![2]);
    assert_eq!(store.friends_of(2).unwrap(), vec![1]);
}

#[test]
fn test_remove_is_symmetric() {
    let (store, _dir) = setup_store();

    store.add_friendship(1, 2).unwrap();
    store.remove_friendship(2, 1).unwrap();

    assert!(!store.are_friends(1, 2).unwrap());
    assert!(!store.are_friends(2, 1).unwrap());
    assert!(store.friends_of(1).unwrap().is_empty());
    assert!(store.friends_of(2).unwrap().is_empty());
}

#[test]
fn test_self_friendship_rejected() {
    let (store, _dir) = setup_store();

    match store.add_friendship(7, 7) {
        Err(EngineError::SelfRelation(7)) => {}
        other => panic!("expected SelfRelation, got {other:?}"),
    }
}

#[test]
fn test_duplicate_add_conflicts() {
    let (store, _dir) = setup_store();

    store.add_friendship(1, 2).unwrap();
    match store.add_friendship(2, 1) {
        Err(EngineError::FriendshipExists { .. }) => {}
        other => panic!("expected FriendshipExists, got {other:?}"),
    }
}

#[test]
fn test_remove_missing_edge_is_not_found() {
    let (store, _dir) = setup_store();

    match store.remove_friendship(1, 2) {
        Err(EngineError::FriendshipNotFound { .. }) => {}
        other => panic!("expected FriendshipNotFound, got {other:?}"),
    }
}

#[test]
fn test_friends_of_sorted_ascending() {
    let (store, _dir) = setup_store();

    store.add_friendship(1, 30).unwrap();
    store.add_friendship(1, 2).unwrap();
    store.add_friendship(1, 115).unwrap();

    assert_eq!(store.friends_of(1).unwrap(), vec![2, 30, 115]);
}

#[test]
fn test_edge_record_carries_creation_time() {
    let (store, _dir) = setup_store();

    let before = chrono::Utc::now();
    store.add_friendship(1, 2).unwrap();
    let after = chrono::Utc::now();

    let edge = store.edge(1, 2).unwrap().expect("edge must exist");
    assert!(edge.created_at >= before && edge.created_at <= after);
    // both orientations resolve to a record
    assert!(store.edge(2, 1).unwrap().is_some());
}

#[test]
fn test_unrelated_members_not_entangled() {
    let (store, _dir) = setup_store();

    store.add_friendship(1, 2).unwrap();
    store.add_friendship(3, 4).unwrap();

    assert!(!store.are_friends(1, 3).unwrap());
    assert_eq!(store.friends_of(3).unwrap(), vec![4]);
    // prefix scans must not bleed across member ids (1 vs 11)
    store.add_friendship(11, 5).unwrap();
    assert_eq!(store.friends_of(1).unwrap(), vec![2]);
}
