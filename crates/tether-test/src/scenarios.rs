//! End-to-end scenarios over the in-process transport

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use serde_json::json;

use tether_core::{ContextKind, Mutation, StateContainer, Strategy, SyncOptions, SYNC_RECONNECT};
use tether_persist::{FileStorage, MemoryStorage, PersistenceAdapter, PERSIST_KEY};
use tether_runtime::{Replica, ReplicaStatus};

use crate::*;

const LIMIT: Duration = Duration::from_secs(2);

fn broadcast() -> SessionConfig {
    SessionConfig::new(SyncOptions::new())
}

async fn master_of(session: &Session) -> Vec<String> {
    session
        .hub
        .registrations()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.is_master)
        .map(|r| r.name.as_str().to_string())
        .collect()
}

// ============================================================================
// RELAY
// ============================================================================

#[tokio::test]
async fn test_counter_reaches_other_replica_once() {
    let session = Session::start(broadcast()).unwrap();
    let a = session.join(ContextKind::ContentScript).await;
    let b = session.join(ContextKind::Popup).await;

    a.commit(COUNTER);

    assert!(eventually(LIMIT, || b.get("counter") == Some(json!(1))).await);
    assert!(eventually(LIMIT, || session.store.get("counter") == Some(json!(1))).await);
    settle().await;
    assert_eq!(a.get("counter"), Some(json!(1)));
    assert_eq!(a.log.count(COUNTER), 1);
    assert_eq!(session.log.count(COUNTER), 1);
}

#[tokio::test]
async fn test_single_replica_has_no_loops() {
    let session = Session::start(broadcast()).unwrap();
    let a = session.join(ContextKind::Page).await;

    for _ in 0..3 {
        a.commit(COUNTER);
    }
    assert!(eventually(LIMIT, || session.store.get("counter") == Some(json!(3))).await);

    session.store.commit(Mutation::new(COUNTER));
    assert!(eventually(LIMIT, || a.get("counter") == Some(json!(4))).await);

    settle().await;
    assert_eq!(a.log.count(COUNTER), 4);
    assert_eq!(session.log.count(COUNTER), 4);
    assert_eq!(session.store.get("counter"), Some(json!(4)));
}

#[tokio::test]
async fn test_early_mutations_replay_in_order() {
    let session = Session::start(broadcast()).unwrap();
    let a = session.spawn_replica(ContextKind::Options);

    // The replica task has not run yet, so none of these can be sent
    a.store.commit(Mutation::with_payload(SET_THEME, json!("dark")));
    a.commit(COUNTER);
    a.commit(COUNTER);

    within(LIMIT, a.handle.wait_initialized()).await.unwrap().unwrap();
    assert!(eventually(LIMIT, || session.store.get("counter") == Some(json!(2))).await);

    assert_eq!(session.log.kinds(), vec![SET_THEME, COUNTER, COUNTER]);
    assert_eq!(session.store.get("theme"), Some(json!("dark")));
    assert_eq!(a.get("counter"), Some(json!(2)));
    assert_eq!(a.handle.pending_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_ignored_mutations_stay_local() {
    let storage = Arc::new(MemoryStorage::new());
    let options = SyncOptions::new()
        .with_ignore([HOVER])
        .with_persist(["hovers"]);
    let session = Session::start(SessionConfig::new(options).with_storage(storage.clone())).unwrap();
    session.hub.restored().await;
    let a = session.join(ContextKind::ContentScript).await;
    let b = session.join(ContextKind::Popup).await;

    a.commit(HOVER);
    session.store.commit(Mutation::new(HOVER));
    settle().await;
    session.hub.flush().await.unwrap();

    assert_eq!(a.get("hovers"), Some(json!(1)));
    assert_eq!(b.get("hovers"), Some(json!(0)));
    assert_eq!(session.store.get("hovers"), Some(json!(1)));
    assert_eq!(session.log.count(HOVER), 1);
    assert_eq!(storage.write_count(), 0);
}

// ============================================================================
// MASTER STRATEGY
// ============================================================================

#[tokio::test]
async fn test_master_failover() {
    let options = SyncOptions::new().with_strategy(Strategy::Master);
    let session = Session::start(SessionConfig::new(options)).unwrap();

    let first = session.join(ContextKind::ContentScript).await;
    let second = session.spawn_replica(ContextKind::ContentScript);
    within(LIMIT, second.handle.wait_for_status(|s| *s == ReplicaStatus::Connected))
        .await
        .unwrap()
        .unwrap();
    let popup = session.join(ContextKind::Popup).await;

    assert_eq!(master_of(&session).await, vec![first.handle.channel_name().to_string()]);

    first.commit(COUNTER);
    assert!(eventually(LIMIT, || popup.get("counter") == Some(json!(1))).await);
    settle().await;
    assert!(!second.handle.is_initialized());
    assert_eq!(second.get("counter"), Some(json!(0)));

    // Queued on the idle candidate until it is promoted
    second.commit(COUNTER);
    first.handle.shutdown().await;

    within(LIMIT, second.handle.wait_initialized()).await.unwrap().unwrap();
    assert_eq!(master_of(&session).await, vec![second.handle.channel_name().to_string()]);
    assert!(eventually(LIMIT, || session.store.get("counter") == Some(json!(2))).await);
    assert!(eventually(LIMIT, || popup.get("counter") == Some(json!(2))).await);
    assert_eq!(second.get("counter"), Some(json!(2)));
}

#[tokio::test]
async fn test_latest_connected_election() {
    let options = SyncOptions::new()
        .with_strategy(Strategy::Master)
        .with_election_policy(tether_core::Election::LatestConnected);
    let session = Session::start(SessionConfig::new(options)).unwrap();

    let first = session.join(ContextKind::ContentScript).await;
    let second = session.join(ContextKind::ContentScript).await;

    assert_eq!(master_of(&session).await, vec![second.handle.channel_name().to_string()]);
    // The demoted candidate is simply no longer synced
    second.commit(COUNTER);
    assert!(eventually(LIMIT, || session.store.get("counter") == Some(json!(1))).await);
    settle().await;
    assert_eq!(first.get("counter"), Some(json!(0)));
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[tokio::test]
async fn test_writes_only_on_change() {
    let storage = Arc::new(MemoryStorage::new());
    let options = SyncOptions::new().with_persist(["counter"]);
    let session = Session::start(SessionConfig::new(options).with_storage(storage.clone())).unwrap();
    session.hub.restored().await;
    let a = session.join(ContextKind::Popup).await;

    a.commit(COUNTER);
    for _ in 0..3 {
        a.store.commit(Mutation::with_payload(SET_THEME, json!("dark")));
    }
    assert!(eventually(LIMIT, || session.log.count(SET_THEME) == 3).await);
    session.hub.flush().await.unwrap();

    assert_eq!(storage.write_count(), 1);
    assert_eq!(storage.get(PERSIST_KEY), Some(json!({"counter": 1})));
}

#[tokio::test]
async fn test_restart_restores_persisted_fields() {
    let storage = Arc::new(MemoryStorage::new());
    let options = SyncOptions::new().with_persist(["counter"]);

    let first = Session::start(SessionConfig::new(options.clone()).with_storage(storage.clone())).unwrap();
    first.hub.restored().await;
    let a = first.join(ContextKind::ContentScript).await;
    for _ in 0..7 {
        a.commit(COUNTER);
    }
    assert!(eventually(LIMIT, || first.store.get("counter") == Some(json!(7))).await);
    first.hub.flush().await.unwrap();
    a.handle.shutdown().await;
    first.hub.shutdown().await;

    let store = counter_store();
    store.commit(Mutation::with_payload(SET_THEME, json!("dark")));
    let second = Session::start_with_store(store, SessionConfig::new(options).with_storage(storage.clone())).unwrap();
    second.hub.restored().await;

    assert_eq!(second.store.get("counter"), Some(json!(7)));
    assert_eq!(second.store.get("theme"), Some(json!("dark")));

    let b = second.join(ContextKind::Popup).await;
    assert!(eventually(LIMIT, || b.get("counter") == Some(json!(7))).await);
    assert_eq!(b.get("theme"), Some(json!("dark")));
}

#[tokio::test]
async fn test_drifted_file_snapshot_is_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(FileStorage::new(dir.path()));
    storage
        .write(PERSIST_KEY, json!({"counter": 4, "retired": true}))
        .await
        .unwrap();

    let options = SyncOptions::new().with_persist(["counter"]);
    let session = Session::start(SessionConfig::new(options).with_storage(storage.clone())).unwrap();
    session.hub.restored().await;
    session.hub.flush().await.unwrap();

    assert_eq!(session.store.get("counter"), Some(json!(4)));
    assert_eq!(storage.read(PERSIST_KEY).await.unwrap(), Some(json!({"counter": 4})));
}

#[tokio::test]
async fn test_storage_failures_are_not_fatal() {
    let storage = Arc::new(FailingStorage::broken());
    let options = SyncOptions::new().with_persist(["counter"]);
    let session = Session::start(SessionConfig::new(options).with_storage(storage.clone())).unwrap();
    session.hub.restored().await;

    let a = session.join(ContextKind::ContentScript).await;
    let b = session.join(ContextKind::Popup).await;
    a.commit(COUNTER);
    assert!(eventually(LIMIT, || b.get("counter") == Some(json!(1))).await);
    session.hub.flush().await.unwrap();

    assert_eq!(storage.write_attempts(), 1);
    assert_eq!(session.hub.registrations().await.unwrap().len(), 2);
}

// ============================================================================
// RECONNECT
// ============================================================================

#[tokio::test]
async fn test_replica_reconnects_and_resyncs() {
    let session = Session::start(broadcast()).unwrap();
    let a = session.join(ContextKind::ContentScript).await;
    let name = a.handle.channel_name().to_string();

    let table = session.hub.registrations().await.unwrap();
    let id = table.iter().find(|r| r.name.as_str() == name).unwrap().id;
    assert!(session.hub.disconnect(id).await.unwrap());
    session.store.commit(Mutation::new(COUNTER));

    assert!(eventually(LIMIT, || a.log.count(SYNC_RECONNECT) == 1).await);
    assert!(eventually(LIMIT, || a.get("counter") == Some(json!(1))).await);
    within(LIMIT, a.handle.wait_initialized()).await.unwrap().unwrap();

    let table = session.hub.registrations().await.unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table[0].name.as_str(), name);
    assert_ne!(table[0].id, id);
    // The reconnect signal never reaches the hub
    assert_eq!(session.log.count(SYNC_RECONNECT), 0);
}

// ============================================================================
// INTERLEAVINGS
// ============================================================================

#[tokio::test]
async fn test_relay_racing_channel_loss_applies_once() {
    let session = Session::start(broadcast()).unwrap();
    let a = session.join(ContextKind::ContentScript).await;
    let b = session.join(ContextKind::Popup).await;
    let name = a.handle.channel_name().to_string();
    let table = session.hub.registrations().await.unwrap();
    let id = table.iter().find(|r| r.name.as_str() == name).unwrap().id;

    // Relayed to `a`, then its channel is dropped right behind the relay
    session.store.commit(Mutation::new(COUNTER));
    assert!(session.hub.disconnect(id).await.unwrap());

    assert!(eventually(LIMIT, || a.log.count(SYNC_RECONNECT) == 1).await);
    within(LIMIT, a.handle.wait_initialized()).await.unwrap().unwrap();
    assert!(eventually(LIMIT, || b.get("counter") == Some(json!(1))).await);
    settle().await;

    assert_eq!(a.get("counter"), Some(json!(1)));
    assert_eq!(a.handle.pending_len().await.unwrap(), 0);
    assert_eq!(session.store.get("counter"), Some(json!(1)));
    assert_eq!(b.get("counter"), Some(json!(1)));
    assert_eq!(session.log.count(COUNTER), 1);
}

#[tokio::test]
async fn test_commit_racing_snapshot_reaches_everyone() {
    let session = Session::start(broadcast()).unwrap();
    let b = session.join(ContextKind::Popup).await;

    let store = InterleavingStore::new(counter_store());
    store.commit_before_next_update(Mutation::new(COUNTER));
    let a = Replica::builder(Arc::clone(&store), ContextKind::ContentScript)
        .spawn(session.connector().clone());
    within(LIMIT, a.wait_initialized()).await.unwrap().unwrap();

    assert!(eventually(LIMIT, || session.store.get("counter") == Some(json!(1))).await);
    assert!(eventually(LIMIT, || b.get("counter") == Some(json!(1))).await);
    assert!(eventually(LIMIT, || store.inner().get("counter") == Some(json!(1))).await);
    settle().await;

    assert_eq!(store.inner().get("counter"), Some(json!(1)));
    assert_eq!(session.log.count(COUNTER), 1);
    assert_eq!(b.log.count(COUNTER), 1);
}

// ============================================================================
// CONVERGENCE
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Increments issued anywhere end up applied exactly once everywhere
    #[test]
    fn prop_counters_converge(writers in proptest::collection::vec(0usize..3, 1..24)) {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async {
            let session = Session::start(broadcast()).unwrap();
            let a = session.join(ContextKind::ContentScript).await;
            let b = session.join(ContextKind::Page).await;

            for writer in &writers {
                match writer {
                    0 => session.store.commit(Mutation::new(COUNTER)),
                    1 => a.commit(COUNTER),
                    _ => b.commit(COUNTER),
                }
            }

            let expected = Some(json!(writers.len()));
            assert!(eventually(LIMIT, || {
                session.store.get("counter") == expected
                    && a.get("counter") == expected
                    && b.get("counter") == expected
            })
            .await);
        });
    }
}
