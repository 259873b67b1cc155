//! Multi-participant session harness
//!
//! A [`Session`] runs one hub over an in-process transport and spawns
//! replicas on demand. Every participant gets its own [`MemoryStore`] built
//! from [`counter_store`], so state only ever crosses participants through
//! the sync protocol.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use tether_core::{ConfigError, ContextKind, MemoryStore, Mutation, State, StateContainer, SyncOptions};
use tether_persist::PersistenceAdapter;
use tether_runtime::{Hub, HubHandle, Replica, ReplicaHandle};
use tether_transport::{memory_transport, MemoryConnector};

// ============================================================================
// STORES
// ============================================================================

/// Increments `counter`
pub const COUNTER: &str = "COUNTER";
/// Sets `theme` to the payload
pub const SET_THEME: &str = "SET_THEME";
/// Increments `hovers`; usually configured as ignored
pub const HOVER: &str = "HOVER";

fn increment(state: &mut State, field: &str) {
    let next = state.get(field).and_then(Value::as_i64).unwrap_or(0) + 1;
    state.insert(field.to_string(), json!(next));
}

/// Store used by every participant in a session
///
/// Initial state: `{"counter": 0, "theme": "light", "hovers": 0}`.
pub fn counter_store() -> Arc<MemoryStore> {
    MemoryStore::builder()
        .field("counter", json!(0))
        .field("theme", json!("light"))
        .field("hovers", json!(0))
        .mutation(COUNTER, |state, _| increment(state, "counter"))
        .mutation(SET_THEME, |state, payload| {
            state.insert("theme".into(), payload.cloned().unwrap_or(Value::Null));
        })
        .mutation(HOVER, |state, _| increment(state, "hovers"))
        .build()
}

/// Record of every mutation type committed on a store, in commit order
#[derive(Clone, Default)]
pub struct CommitLog {
    kinds: Arc<Mutex<Vec<String>>>,
}

impl CommitLog {
    pub fn attach(store: &dyn StateContainer) -> Self {
        let log = CommitLog::default();
        let sink = Arc::clone(&log.kinds);
        store.subscribe(Arc::new(move |mutation: &Mutation, _: &State| {
            sink.lock().push(mutation.kind.clone());
        }));
        log
    }

    pub fn kinds(&self) -> Vec<String> {
        self.kinds.lock().clone()
    }

    /// Number of commits of one mutation type
    pub fn count(&self, kind: &str) -> usize {
        self.kinds.lock().iter().filter(|k| *k == kind).count()
    }
}

// ============================================================================
// SESSION
// ============================================================================

/// One replica of a session and its private store
pub struct Peer {
    pub store: Arc<MemoryStore>,
    pub log: CommitLog,
    pub handle: ReplicaHandle,
}

impl Peer {
    pub fn commit(&self, kind: &str) {
        self.store.commit(Mutation::new(kind));
    }

    pub fn get(&self, field: &str) -> Option<Value> {
        self.store.get(field)
    }
}

/// Configuration for a [`Session`]
#[derive(Clone, Default)]
pub struct SessionConfig {
    pub options: SyncOptions,
    pub storage: Option<Arc<dyn PersistenceAdapter>>,
}

impl SessionConfig {
    pub fn new(options: SyncOptions) -> Self {
        SessionConfig {
            options,
            storage: None,
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn PersistenceAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }
}

/// A running hub plus the transport replicas connect through
pub struct Session {
    pub store: Arc<MemoryStore>,
    pub log: CommitLog,
    pub hub: HubHandle,
    connector: MemoryConnector,
    options: SyncOptions,
}

impl Session {
    /// Start a hub with a fresh [`counter_store`]
    pub fn start(config: SessionConfig) -> Result<Self, ConfigError> {
        Self::start_with_store(counter_store(), config)
    }

    pub fn start_with_store(store: Arc<MemoryStore>, config: SessionConfig) -> Result<Self, ConfigError> {
        let (connector, listener) = memory_transport();
        let log = CommitLog::attach(store.as_ref());

        let mut builder = Hub::builder(Arc::clone(&store)).options(config.options.clone());
        if let Some(storage) = config.storage {
            builder = builder.storage(storage);
        }
        let hub = builder.spawn(listener)?;

        Ok(Session {
            store,
            log,
            hub,
            connector,
            options: config.options,
        })
    }

    /// Spawn a replica with the session options
    pub fn spawn_replica(&self, kind: ContextKind) -> Peer {
        self.spawn_replica_with(kind, self.options.clone())
    }

    pub fn spawn_replica_with(&self, kind: ContextKind, options: SyncOptions) -> Peer {
        let store = counter_store();
        let log = CommitLog::attach(store.as_ref());
        let handle = Replica::builder(Arc::clone(&store), kind)
            .options(options)
            .spawn(self.connector.clone());
        Peer { store, log, handle }
    }

    /// Spawn a replica and wait for its first snapshot
    pub async fn join(&self, kind: ContextKind) -> Peer {
        let peer = self.spawn_replica(kind);
        assert!(
            within(Duration::from_secs(1), peer.handle.wait_initialized()).await.is_some(),
            "replica never initialized"
        );
        peer
    }

    pub fn connector(&self) -> &MemoryConnector {
        &self.connector
    }
}

// ============================================================================
// WAITING
// ============================================================================

/// Poll `cond` until it holds or `limit` runs out
pub async fn eventually(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        if cond() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// Let every participant drain its inbox for a moment
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

/// Run `fut` with a time limit; `None` if it did not finish
pub async fn within<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    tokio::time::timeout(limit, fut).await.ok()
}
