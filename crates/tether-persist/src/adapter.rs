//! Persistence adapter seam

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use tether_core::StorageError;

/// Storage key holding the serialized persisted-field projection
pub const PERSIST_KEY: &str = "tether.persisted-state";

/// Durable async key/value storage
///
/// Failures are reported to the caller, which logs them and carries on.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError>;

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// In-memory storage that survives participant restarts within a process
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, Value>>,
    writes: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a value without counting it as a write
    pub fn with_entry(self, key: impl Into<String>, value: Value) -> Self {
        self.entries.lock().insert(key.into(), value);
        self
    }

    /// Current value under a key
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryStorage {
    async fn read(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.get(key))
    }

    async fn write(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value);
        self.writes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
