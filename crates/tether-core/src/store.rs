//! State container seam
//!
//! The protocol never owns the state container. It only needs to read the
//! current state, commit mutations, replace the state wholesale and be told
//! about every commit. [`MemoryStore`] is a small container with named
//! mutation handlers, enough for tests and the demo application.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex};
use serde_json::Value;

use crate::{Mutation, State};

/// Commit listener: the mutation and the state right after it was applied
pub type Subscriber = Arc<dyn Fn(&Mutation, &State) + Send + Sync>;

/// Applies one mutation type to the state
pub type MutationHandler = Arc<dyn Fn(&mut State, Option<&Value>) + Send + Sync>;

/// Mutable state container with subscribe-on-mutation
pub trait StateContainer: Send + Sync {
    /// Snapshot of the current state
    fn state(&self) -> State;

    /// Apply a mutation, then notify every subscriber
    fn commit(&self, mutation: Mutation);

    /// Overwrite the whole state; subscribers are not notified
    fn replace_state(&self, state: State);

    /// Replace the state with a function of the current one
    ///
    /// Runs atomically with respect to `commit`: no commit is applied or
    /// notified while `f` runs. `f` must not call back into the container.
    fn update_state(&self, f: &mut dyn FnMut(&State) -> State);

    fn subscribe(&self, subscriber: Subscriber);
}

/// In-memory state container
pub struct MemoryStore {
    state: Mutex<State>,
    handlers: HashMap<String, MutationHandler>,
    subscribers: Mutex<Vec<Subscriber>>,
    /// Serializes commit + notify so subscribers observe commit order
    commit_lock: ReentrantMutex<()>,
}

impl MemoryStore {
    pub fn builder() -> MemoryStoreBuilder {
        MemoryStoreBuilder::default()
    }

    /// Read one field of the current state
    pub fn get(&self, field: &str) -> Option<Value> {
        self.state.lock().get(field).cloned()
    }

    pub fn has_handler(&self, kind: &str) -> bool {
        self.handlers.contains_key(kind)
    }
}

impl StateContainer for MemoryStore {
    fn state(&self) -> State {
        self.state.lock().clone()
    }

    fn commit(&self, mutation: Mutation) {
        let _guard = self.commit_lock.lock();

        let snapshot = {
            let mut state = self.state.lock();
            match self.handlers.get(&mutation.kind) {
                Some(handler) => handler(&mut state, mutation.payload.as_ref()),
                None => tracing::debug!(kind = %mutation.kind, "no handler for mutation"),
            }
            state.clone()
        };

        let subscribers = self.subscribers.lock().clone();
        for subscriber in subscribers {
            subscriber(&mutation, &snapshot);
        }
    }

    fn replace_state(&self, state: State) {
        let _guard = self.commit_lock.lock();
        *self.state.lock() = state;
    }

    fn update_state(&self, f: &mut dyn FnMut(&State) -> State) {
        let _guard = self.commit_lock.lock();
        let mut state = self.state.lock();
        let next = f(&state);
        *state = next;
    }

    fn subscribe(&self, subscriber: Subscriber) {
        self.subscribers.lock().push(subscriber);
    }
}

/// Builder for [`MemoryStore`]
#[derive(Default)]
pub struct MemoryStoreBuilder {
    state: State,
    handlers: HashMap<String, MutationHandler>,
}

impl MemoryStoreBuilder {
    /// Set an initial field value
    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.state.insert(name.into(), value);
        self
    }

    pub fn state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// Register the handler for a mutation type
    pub fn mutation<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut State, Option<&Value>) + Send + Sync + 'static,
    {
        self.handlers.insert(kind.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> Arc<MemoryStore> {
        Arc::new(MemoryStore {
            state: Mutex::new(self.state),
            handlers: self.handlers,
            subscribers: Mutex::new(Vec::new()),
            commit_lock: ReentrantMutex::new(()),
        })
    }
}
