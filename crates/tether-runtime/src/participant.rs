//! Capability shared by the hub and replicas

use std::sync::Arc;

use tokio::sync::mpsc;

use tether_core::{Mutation, State, StateContainer, SyncOptions};

/// A sync participant: configured, and told about every local commit
pub trait SyncParticipant {
    fn options(&self) -> &SyncOptions;

    /// React to a commit observed on the local state container
    fn on_mutation(&mut self, mutation: Mutation, state: State);

    fn is_ignored(&self, mutation: &Mutation) -> bool {
        self.options().is_ignored(&mutation.kind)
    }
}

/// Forward every commit of `store` into a participant inbox
///
/// The notification is queued at commit time, so it is handled after the
/// event that caused the commit and before anything that arrives later.
pub fn forward_commits<E, F>(store: &dyn StateContainer, inbox: mpsc::UnboundedSender<E>, wrap: F)
where
    E: Send + 'static,
    F: Fn(Mutation, State) -> E + Send + Sync + 'static,
{
    store.subscribe(Arc::new(move |mutation: &Mutation, state: &State| {
        // A stopped participant simply stops listening
        let _ = inbox.send(wrap(mutation.clone(), state.clone()));
    }));
}
