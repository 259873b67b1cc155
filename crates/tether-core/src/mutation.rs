//! Mutations - the unit of replication
//!
//! A mutation is a named state change with an opaque payload. Every
//! mutation value also carries a process-local instance tag that is never
//! put on the wire: clones share it, decoding mints a new one. Trackers
//! use `(type, instance)` as identity so that each committed instance is
//! matched exactly once, even when two mutations are structurally equal.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical state - an insertion-ordered field map
pub type State = serde_json::Map<String, Value>;

/// Mutation type committed locally by a replica on every reconnect
pub const SYNC_RECONNECT: &str = "SYNC_RECONNECT";

static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(1);

/// Process-local identity of one mutation instance
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InstanceTag(u64);

impl InstanceTag {
    pub fn fresh() -> Self {
        InstanceTag(NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for InstanceTag {
    fn default() -> Self {
        Self::fresh()
    }
}

/// A named state change
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Mutation {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip)]
    instance: InstanceTag,
}

impl Mutation {
    /// Mutation without payload
    pub fn new(kind: impl Into<String>) -> Self {
        Mutation {
            kind: kind.into(),
            payload: None,
            instance: InstanceTag::fresh(),
        }
    }

    pub fn with_payload(kind: impl Into<String>, payload: Value) -> Self {
        Mutation {
            kind: kind.into(),
            payload: Some(payload),
            instance: InstanceTag::fresh(),
        }
    }

    /// The reconnect signal
    pub fn reconnect() -> Self {
        Self::new(SYNC_RECONNECT)
    }

    #[inline]
    pub fn is_reconnect(&self) -> bool {
        self.kind == SYNC_RECONNECT
    }

    #[inline]
    pub fn instance(&self) -> InstanceTag {
        self.instance
    }

    /// Copy of this mutation as a new, independently tracked instance
    pub fn reissue(&self) -> Self {
        Mutation {
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            instance: InstanceTag::fresh(),
        }
    }

    /// Identity check used for dedup: same type and same instance
    #[inline]
    pub fn same_instance(&self, other: &Mutation) -> bool {
        self.instance == other.instance && self.kind == other.kind
    }
}
