//! Origin tracking for loop prevention
//!
//! When a participant commits a mutation it received from a peer, it first
//! records that mutation here. The commit notification that follows looks
//! the mutation up again, learns where it came from and consumes the
//! entry, so the mutation is never echoed back to its origin.

use tether_core::{InstanceTag, Mutation};

/// One in-flight mutation received from a peer
#[derive(Debug, Clone)]
pub struct OriginEntry<O> {
    pub kind: String,
    pub instance: InstanceTag,
    pub origin: O,
}

/// Ledger of received, not yet notified mutations
#[derive(Debug)]
pub struct OriginTracker<O> {
    entries: Vec<OriginEntry<O>>,
}

impl<O> Default for OriginTracker<O> {
    fn default() -> Self {
        OriginTracker {
            entries: Vec::new(),
        }
    }
}

impl<O> OriginTracker<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mutation about to be committed on behalf of `origin`
    pub fn record(&mut self, mutation: &Mutation, origin: O) {
        self.entries.push(OriginEntry {
            kind: mutation.kind.clone(),
            instance: mutation.instance(),
            origin,
        });
    }

    /// Consume the entry matching this mutation instance, if any
    pub fn take(&mut self, mutation: &Mutation) -> Option<O> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.instance == mutation.instance() && e.kind == mutation.kind)?;
        Some(self.entries.remove(pos).origin)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
