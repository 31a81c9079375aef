use rand::Rng;
use statusd::store::Applied;
use statusd::{Error, RecordId, RecordStore, StatusRecord};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Barrier;

// Applying the same replicated record twice leaves the store as applying it once.
#[tokio::test]
async fn replicate_upsert_is_idempotent() {
    let store = RecordStore::new(1);
    let record = StatusRecord::new(RecordId(4242), "alice", "Busy");

    store.replicate_upsert(record.clone());
    let once = store.all();
    assert_eq!(
        store.replicate_upsert(record.clone()),
        Applied::Stored { displaced: None }
    );
    assert_eq!(store.all(), once);
    assert_eq!(store.find_by_identity("ALICE"), Some(record));
}

// Equal identities, whatever their case, always map to one id.
#[tokio::test]
async fn identity_keeps_its_id_across_random_writes() {
    let store = RecordStore::new(3);
    let identities = ["alice", "bob", "carol", "dave"];
    let mut rng = rand::thread_rng();
    let mut ids: HashMap<String, RecordId> = HashMap::new();

    for i in 0..500 {
        let identity = identities[rng.gen_range(0, identities.len())];
        let identity = if rng.gen::<bool>() {
            identity.to_uppercase()
        } else {
            identity.to_string()
        };
        let record = store.create_or_update(&identity, &format!("status {i}"));
        let id = *ids.entry(identity.to_lowercase()).or_insert(record.id);
        assert_eq!(record.id, id, "{identity} changed id");
    }
    assert_eq!(store.len(), ids.len());
}

#[tokio::test]
async fn concurrent_writers_share_one_record_per_identity() {
    let store = RecordStore::new(5);
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let store = store.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                let identity = if i % 2 == 0 { "Shared" } else { "shared" };
                store.create_or_update(identity, &format!("writer {i}")).id
            })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn update_by_id_checks_existence_and_ownership() {
    let store = RecordStore::new(1);
    let alice = store.create_or_update("alice", "Busy");
    let bob = store.create_or_update("bob", "Free");

    assert!(matches!(
        store.update_by_id(RecordId(1), "zed", "x"),
        Err(Error::NotFound(RecordId(1)))
    ));
    assert!(matches!(
        store.update_by_id(alice.id, "BOB", "x"),
        Err(Error::IdentityConflict { .. })
    ));

    let renamed = store.update_by_id(alice.id, "alicia", "Away").unwrap();
    assert_eq!(renamed.id, alice.id);
    assert!(store.find_by_identity("alice").is_none());
    assert_eq!(store.find_by_identity("Alicia"), Some(renamed));
    assert_eq!(store.find_by_identity("bob"), Some(bob));
}

#[tokio::test]
async fn replicate_delete_of_unknown_id_is_a_no_op() {
    let store = RecordStore::new(1);
    store.create_or_update("alice", "Busy");
    assert!(store.replicate_delete(RecordId(77)).is_none());
    assert_eq!(store.len(), 1);
    assert!(matches!(store.delete(RecordId(77)), Err(Error::NotFound(_))));
}
