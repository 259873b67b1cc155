//! Replica registry - live channels keyed by channel identity

use std::collections::BTreeMap;
use std::time::SystemTime;

use tether_core::{ChannelId, RegistrationInfo};
use tether_transport::Channel;

/// A registered replica: its record plus the send side of its channel
#[derive(Debug)]
pub struct Registration {
    pub info: RegistrationInfo,
    pub channel: Channel,
}

/// All replicas currently connected to the hub
#[derive(Debug, Default)]
pub struct ReplicaRegistry {
    entries: BTreeMap<ChannelId, Registration>,
    next_seq: u64,
}

impl ReplicaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly accepted channel
    pub fn insert(&mut self, channel: Channel) -> &RegistrationInfo {
        let id = channel.id();
        let seq = self.next_seq;
        self.next_seq += 1;

        let info = RegistrationInfo {
            id,
            name: channel.name().clone(),
            is_candidate: channel.name().is_master_candidate(),
            is_master: false,
            connected_at: SystemTime::now(),
            seq,
        };
        &self.entries.entry(id).or_insert(Registration { info, channel }).info
    }

    pub fn remove(&mut self, id: ChannelId) -> Option<Registration> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: ChannelId) -> Option<&Registration> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Registrations in connection order
    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.entries.values()
    }

    /// Snapshot of every registration record
    pub fn infos(&self) -> Vec<RegistrationInfo> {
        self.entries.values().map(|r| r.info.clone()).collect()
    }

    /// Currently marked master, if any
    pub fn master(&self) -> Option<ChannelId> {
        self.entries
            .values()
            .find(|r| r.info.is_master)
            .map(|r| r.info.id)
    }

    pub fn set_master(&mut self, id: ChannelId, is_master: bool) {
        if let Some(reg) = self.entries.get_mut(&id) {
            reg.info.is_master = is_master;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{ChannelName, ContextKind};
    use tether_transport::LinkState;
    use tokio::sync::mpsc;

    fn channel(id: u64, kind: ContextKind) -> Channel {
        let (tx, _rx) = mpsc::unbounded_channel();
        Channel::new(ChannelId::new(id), ChannelName::generate(kind), tx, LinkState::new())
    }

    #[test]
    fn test_insert_assigns_increasing_seq() {
        let mut registry = ReplicaRegistry::new();
        let a = registry.insert(channel(1, ContextKind::ContentScript)).seq;
        let b = registry.insert(channel(2, ContextKind::Popup)).seq;
        assert!(b > a);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_candidate_flag_follows_name() {
        let mut registry = ReplicaRegistry::new();
        assert!(registry.insert(channel(1, ContextKind::ContentScript)).is_candidate);
        assert!(!registry.insert(channel(2, ContextKind::Options)).is_candidate);
    }

    #[test]
    fn test_master_marking_and_removal() {
        let mut registry = ReplicaRegistry::new();
        registry.insert(channel(1, ContextKind::ContentScript));
        registry.insert(channel(2, ContextKind::ContentScript));

        registry.set_master(ChannelId::new(2), true);
        assert_eq!(registry.master(), Some(ChannelId::new(2)));

        assert!(registry.remove(ChannelId::new(2)).is_some());
        assert_eq!(registry.master(), None);
        assert!(!registry.contains(ChannelId::new(2)));
    }
}
