//! Master election
//!
//! Under the master strategy exactly one candidate replica (or none, if no
//! candidate is connected) is marked master. The election runs on every
//! connect and disconnect.

use tether_core::{ChannelId, Election, RegistrationInfo};

use crate::ReplicaRegistry;

/// Outcome of one election round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ElectionOutcome {
    pub demoted: Option<ChannelId>,
    pub promoted: Option<ChannelId>,
}

impl ElectionOutcome {
    pub fn changed(&self) -> bool {
        self.demoted.is_some() || self.promoted.is_some()
    }
}

/// Pick the master among the candidates of a registration table
///
/// A custom function that picks an unknown channel or a non-candidate
/// while candidates exist falls back to the earliest-connected rule.
pub fn elect(policy: &Election, table: &[RegistrationInfo]) -> Option<ChannelId> {
    let mut candidates = table.iter().filter(|r| r.is_candidate);
    match policy {
        Election::EarliestConnected => candidates.min_by_key(|r| r.arrival_key()).map(|r| r.id),
        Election::LatestConnected => candidates.max_by_key(|r| r.arrival_key()).map(|r| r.id),
        Election::Custom(elect_fn) => {
            let chosen = elect_fn(table);
            if let Some(id) = chosen {
                if candidates.any(|r| r.id == id) {
                    return Some(id);
                }
            }
            let fallback = elect(&Election::EarliestConnected, table);
            if fallback.is_some() {
                tracing::warn!(?chosen, ?fallback, "election function did not pick a candidate, using earliest connected");
            }
            fallback
        }
    }
}

/// Run one election round and apply it to the registry
pub fn run_election(policy: &Election, registry: &mut ReplicaRegistry) -> ElectionOutcome {
    let chosen = elect(policy, &registry.infos());
    let current = registry.master();
    if chosen == current {
        return ElectionOutcome::default();
    }

    if let Some(old) = current {
        registry.set_master(old, false);
    }
    if let Some(new) = chosen {
        registry.set_master(new, true);
    }
    ElectionOutcome {
        demoted: current,
        promoted: chosen,
    }
}
