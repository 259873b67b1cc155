//! Storage and store fakes

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use tether_core::{MemoryStore, Mutation, State, StateContainer, StorageError, Subscriber};
use tether_persist::{MemoryStorage, PersistenceAdapter};

/// Storage that can be told to fail reads, writes or both
///
/// Successful operations go to an inner [`MemoryStorage`].
#[derive(Debug, Default)]
pub struct FailingStorage {
    inner: MemoryStorage,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    write_attempts: AtomicUsize,
}

impl FailingStorage {
    /// Storage where every operation fails
    pub fn broken() -> Self {
        let storage = FailingStorage::default();
        storage.set_fail_reads(true);
        storage.set_fail_writes(true);
        storage
    }

    pub fn with_entry(self, key: impl Into<String>, value: Value) -> Self {
        FailingStorage {
            inner: self.inner.with_entry(key, value),
            ..self
        }
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Release);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Writes attempted, failed or not
    pub fn write_attempts(&self) -> usize {
        self.write_attempts.load(Ordering::Acquire)
    }

    pub fn inner(&self) -> &MemoryStorage {
        &self.inner
    }
}

#[async_trait]
impl PersistenceAdapter for FailingStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        if self.fail_reads.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!("read of {key} refused")));
        }
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.write_attempts.fetch_add(1, Ordering::AcqRel);
        if self.fail_writes.load(Ordering::Acquire) {
            return Err(StorageError::Backend(format!("write of {key} refused")));
        }
        self.inner.write(key, value).await
    }
}

/// Store that commits one staged mutation just before the next
/// `update_state`, like a commit from another task landing while a
/// snapshot is being applied
pub struct InterleavingStore {
    inner: Arc<MemoryStore>,
    staged: Mutex<Option<Mutation>>,
}

impl InterleavingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(InterleavingStore {
            inner,
            staged: Mutex::new(None),
        })
    }

    pub fn commit_before_next_update(&self, mutation: Mutation) {
        *self.staged.lock() = Some(mutation);
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }
}

impl StateContainer for InterleavingStore {
    fn state(&self) -> State {
        self.inner.state()
    }

    fn commit(&self, mutation: Mutation) {
        self.inner.commit(mutation)
    }

    fn replace_state(&self, state: State) {
        self.inner.replace_state(state)
    }

    fn update_state(&self, f: &mut dyn FnMut(&State) -> State) {
        let staged = self.staged.lock().take();
        if let Some(mutation) = staged {
            self.inner.commit(mutation);
        }
        self.inner.update_state(f)
    }

    fn subscribe(&self, subscriber: Subscriber) {
        self.inner.subscribe(subscriber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tether_persist::PERSIST_KEY;

    use crate::{counter_store, COUNTER};

    #[test]
    fn test_staged_commit_lands_once_before_update() {
        let store = InterleavingStore::new(counter_store());
        store.commit_before_next_update(Mutation::new(COUNTER));

        let mut seen = None;
        store.update_state(&mut |current: &State| {
            seen = current.get("counter").cloned();
            current.clone()
        });
        store.update_state(&mut |current: &State| current.clone());

        assert_eq!(seen, Some(json!(1)));
        assert_eq!(store.inner().get("counter"), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_broken_storage_fails_everything() {
        let storage = FailingStorage::broken();
        assert!(matches!(storage.read(PERSIST_KEY).await, Err(StorageError::Backend(_))));
        assert!(storage.write(PERSIST_KEY, json!({})).await.is_err());
        assert_eq!(storage.write_attempts(), 1);
        assert_eq!(storage.inner().write_count(), 0);
    }

    #[tokio::test]
    async fn test_failures_can_be_lifted() {
        let storage = FailingStorage::default().with_entry(PERSIST_KEY, json!({"counter": 1}));
        storage.set_fail_writes(true);
        assert!(storage.write(PERSIST_KEY, json!({"counter": 2})).await.is_err());

        storage.set_fail_writes(false);
        storage.write(PERSIST_KEY, json!({"counter": 3})).await.unwrap();
        assert_eq!(storage.read(PERSIST_KEY).await.unwrap(), Some(json!({"counter": 3})));
        assert_eq!(storage.write_attempts(), 2);
    }
}
