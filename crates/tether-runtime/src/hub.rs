//! Hub - the authoritative owner of canonical state
//!
//! The hub accepts replica channels, commits the mutations they send,
//! relays every commit to the other replicas, elects a master under the
//! master strategy and keeps the persisted fields in durable storage.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use tether_core::{
    ChannelId, ConfigError, Mutation, RegistrationInfo, State, StateContainer, StorageError,
    SyncMessage, SyncOptions, TetherError, TetherResult,
};
use tether_persist::{merge_restored, project, PersistenceAdapter, PERSIST_KEY};
use tether_transport::{Channel, ChannelEvent, ChannelEvents, Listener};

use crate::election::run_election;
use crate::participant::{forward_commits, SyncParticipant};
use crate::writer::PersistWriter;
use crate::{OriginTracker, Registration, ReplicaRegistry};

/// Everything the hub loop reacts to
pub(crate) enum HubEvent {
    Connected(Channel, ChannelEvents),
    Message(ChannelId, Bytes),
    Disconnected(ChannelId),
    /// Commit notification, numbered in commit order
    Mutation(u64, Mutation, State),
    Restored(Result<Option<Value>, StorageError>),
    Command(HubCommand),
}

pub(crate) enum HubCommand {
    Registrations(oneshot::Sender<Vec<RegistrationInfo>>),
    Disconnect(ChannelId, oneshot::Sender<bool>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Hub runtime state; lives inside the hub task
pub struct Hub {
    store: Arc<dyn StateContainer>,
    options: SyncOptions,
    registry: ReplicaRegistry,
    origins: OriginTracker<ChannelId>,
    /// State as of the last handled commit notification
    ///
    /// Snapshots are taken from here rather than from the store, so a
    /// snapshot never contains a commit that will also be relayed.
    synced: State,
    commit_seq: Arc<AtomicU64>,
    handled_seq: u64,
    /// Notifications up to this number predate the restore and still need
    /// the restored fields applied
    restore_overlay: Option<(u64, Value)>,
    writer: Option<PersistWriter>,
    /// Projection as of the last write, the change-detection baseline
    last_persisted: Option<State>,
    /// A write was skipped while the restore was pending
    persist_deferred: bool,
    restored: bool,
    restored_tx: watch::Sender<bool>,
    inbox_tx: mpsc::UnboundedSender<HubEvent>,
}

impl Hub {
    pub fn builder<S: StateContainer + 'static>(store: Arc<S>) -> HubBuilder {
        HubBuilder {
            store,
            options: SyncOptions::default(),
            storage: None,
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<HubEvent>) {
        tracing::info!(strategy = self.options.strategy.as_str(), "hub started");
        while let Some(event) = inbox.recv().await {
            match event {
                HubEvent::Connected(channel, events) => self.on_connect(channel, events),
                HubEvent::Message(id, frame) => self.on_message(id, &frame),
                HubEvent::Disconnected(id) => self.on_disconnect(id),
                HubEvent::Mutation(seq, mutation, state) => {
                    self.handled_seq = seq;
                    let state = self.overlay_restored(seq, state);
                    self.on_mutation(mutation, state);
                }
                HubEvent::Restored(result) => self.on_restored(result),
                HubEvent::Command(HubCommand::Shutdown) => break,
                HubEvent::Command(command) => self.on_command(command),
            }
        }
        tracing::info!(replicas = self.registry.len(), "hub stopped");
    }

    fn on_connect(&mut self, channel: Channel, events: ChannelEvents) {
        let id = channel.id();
        self.spawn_pump(id, events);

        let info = self.registry.insert(channel);
        tracing::info!(channel = %info.name, %id, candidate = info.is_candidate, "replica connected");

        let promoted = if self.options.is_master() {
            self.elect()
        } else {
            None
        };
        // A freshly promoted master has already been synced by the election
        if promoted == Some(id) {
            return;
        }
        if let Some(reg) = self.registry.get(id) {
            if self.is_eligible(reg) {
                self.sync_state(reg);
            } else {
                tracing::debug!(%id, "skipping sync for non-master candidate");
            }
        }
    }

    fn on_message(&mut self, id: ChannelId, frame: &[u8]) {
        let Some(reg) = self.registry.get(id) else {
            tracing::warn!(%id, "message from unregistered channel dropped");
            return;
        };
        let eligible = self.is_eligible(reg);

        let message = match SyncMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(%id, error = %e, "malformed frame dropped");
                return;
            }
        };
        tracing::debug!(%id, kind = message.kind(), "received message");

        match message {
            SyncMessage::Mutation(mutation) => {
                if !eligible {
                    tracing::warn!(%id, kind = %mutation.kind, "mutation from non-master candidate dropped");
                    return;
                }
                self.origins.record(&mutation, id);
                self.store.commit(mutation);
            }
            SyncMessage::State(_) => {
                tracing::warn!(%id, "unexpected state snapshot from replica dropped");
            }
        }
    }

    fn on_disconnect(&mut self, id: ChannelId) {
        let Some(reg) = self.registry.remove(id) else {
            return;
        };
        tracing::info!(channel = %reg.info.name, %id, "replica disconnected");
        if self.options.is_master() {
            self.elect();
        }
    }

    fn on_restored(&mut self, result: Result<Option<Value>, StorageError>) {
        self.restored = true;
        match result {
            Err(e) => {
                tracing::error!(error = %e, "failed to read persisted state");
            }
            Ok(None) => {
                tracing::info!("no persisted state found");
                if self.persist_deferred {
                    self.persist();
                }
            }
            Ok(Some(saved)) => {
                let mut boundary = 0;
                self.store.update_state(&mut |current: &State| {
                    boundary = self.commit_seq.load(Ordering::Acquire);
                    merge_restored(current, &saved, &self.options.persist)
                });
                self.synced = merge_restored(&self.synced, &saved, &self.options.persist);
                if boundary > self.handled_seq {
                    self.restore_overlay = Some((boundary, saved.clone()));
                }

                let projection = project(&self.synced, &self.options.persist);

                let projected = Value::Object(projection.clone());
                if saved != projected {
                    tracing::info!("persisted snapshot differs from restored fields, rewriting");
                    if let Some(writer) = &self.writer {
                        writer.write(projected);
                    }
                }
                self.last_persisted = Some(projection);

                tracing::info!(replicas = self.registry.len(), "persisted state restored, resyncing replicas");
                for reg in self.registry.iter() {
                    if self.is_eligible(reg) {
                        self.sync_state(reg);
                    }
                }
            }
        }
        self.restored_tx.send_replace(true);
    }

    fn on_command(&mut self, command: HubCommand) {
        match command {
            HubCommand::Registrations(reply) => {
                let _ = reply.send(self.registry.infos());
            }
            HubCommand::Disconnect(id, reply) => {
                let removed = self.registry.remove(id);
                if let Some(reg) = &removed {
                    tracing::info!(channel = %reg.info.name, %id, "disconnecting replica");
                    reg.channel.disconnect();
                    if self.options.is_master() {
                        self.elect();
                    }
                }
                let _ = reply.send(removed.is_some());
            }
            HubCommand::Flush(done) => match &self.writer {
                Some(writer) => writer.flush(done),
                None => {
                    let _ = done.send(());
                }
            },
            HubCommand::Shutdown => {}
        }
    }

    /// Apply the restored fields to a notification committed before the restore
    fn overlay_restored(&mut self, seq: u64, state: State) -> State {
        match &self.restore_overlay {
            Some((boundary, saved)) if seq <= *boundary => {
                merge_restored(&state, saved, &self.options.persist)
            }
            Some(_) => {
                self.restore_overlay = None;
                state
            }
            None => state,
        }
    }

    /// Re-run the election; returns the newly promoted master, if any
    fn elect(&mut self) -> Option<ChannelId> {
        let outcome = run_election(&self.options.election, &mut self.registry);
        if !outcome.changed() {
            return None;
        }
        if let Some(old) = outcome.demoted {
            tracing::info!(channel = %old, "master demoted");
        }
        match outcome.promoted {
            Some(new) => {
                tracing::info!(channel = %new, "master elected");
                if let Some(reg) = self.registry.get(new) {
                    self.sync_state(reg);
                }
            }
            None => tracing::info!("no master candidate connected"),
        }
        outcome.promoted
    }

    /// Whether a replica takes part in snapshot and mutation traffic
    fn is_eligible(&self, reg: &Registration) -> bool {
        !(self.options.is_master() && reg.info.is_candidate && !reg.info.is_master)
    }

    fn sync_state(&self, reg: &Registration) {
        tracing::debug!(channel = %reg.info.name, "syncing state");
        if let Err(e) = reg.channel.send(&SyncMessage::State(self.synced.clone())) {
            tracing::debug!(channel = %reg.info.name, error = %e, "state sync not delivered");
        }
    }

    fn persist(&mut self) {
        if !self.options.persists() {
            return;
        }
        if !self.restored {
            tracing::debug!("restore pending, persistence deferred");
            self.persist_deferred = true;
            return;
        }
        self.persist_deferred = false;

        let projection = project(&self.synced, &self.options.persist);
        if self.last_persisted.as_ref() == Some(&projection) {
            tracing::debug!("persisted fields unchanged, skipping write");
            return;
        }
        if let Some(writer) = &self.writer {
            writer.write(Value::Object(projection.clone()));
        }
        self.last_persisted = Some(projection);
    }

    fn spawn_pump(&self, id: ChannelId, mut events: ChannelEvents) {
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let forwarded = match event {
                    ChannelEvent::Message(frame) => inbox.send(HubEvent::Message(id, frame)),
                    ChannelEvent::Disconnect => inbox.send(HubEvent::Disconnected(id)),
                };
                if forwarded.is_err() {
                    break;
                }
            }
        });
    }
}

impl SyncParticipant for Hub {
    fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn on_mutation(&mut self, mutation: Mutation, state: State) {
        self.synced = state;
        let sender = self.origins.take(&mutation);
        let from = sender.map_or_else(|| "self".to_string(), |id| id.to_string());

        if self.is_ignored(&mutation) {
            tracing::debug!(kind = %mutation.kind, %from, "mutation ignored");
            return;
        }

        let frame = match SyncMessage::Mutation(mutation).encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode mutation");
                return;
            }
        };
        for reg in self.registry.iter() {
            if Some(reg.info.id) == sender || !self.is_eligible(reg) {
                continue;
            }
            match reg.channel.send_frame(frame.clone()) {
                Ok(()) => tracing::debug!(%from, to = %reg.info.name, "mutation relayed"),
                Err(e) => tracing::debug!(to = %reg.info.name, error = %e, "relay not delivered"),
            }
        }

        self.persist();
    }
}

/// Builder for a hub task
pub struct HubBuilder {
    store: Arc<dyn StateContainer>,
    options: SyncOptions,
    storage: Option<Arc<dyn PersistenceAdapter>>,
}

impl HubBuilder {
    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    pub fn storage(mut self, storage: Arc<dyn PersistenceAdapter>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Validate the configuration and start the hub on `listener`
    pub fn spawn<L: Listener + 'static>(self, mut listener: L) -> Result<HubHandle, ConfigError> {
        if self.options.persists() && self.storage.is_none() {
            return Err(ConfigError::PersistWithoutStorage);
        }

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let persisting = self.options.persists();
        let (restored_tx, restored_rx) = watch::channel(!persisting);

        let commit_seq = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&commit_seq);
        forward_commits(self.store.as_ref(), inbox_tx.clone(), move |mutation, state| {
            HubEvent::Mutation(counter.fetch_add(1, Ordering::AcqRel) + 1, mutation, state)
        });
        let synced = self.store.state();

        let writer = match &self.storage {
            Some(storage) if persisting => {
                let reader = Arc::clone(storage);
                let inbox = inbox_tx.clone();
                tokio::spawn(async move {
                    tracing::info!("reading persisted state");
                    let _ = inbox.send(HubEvent::Restored(reader.read(PERSIST_KEY).await));
                });
                Some(PersistWriter::spawn(Arc::clone(storage), PERSIST_KEY))
            }
            _ => None,
        };

        let accept_inbox = inbox_tx.clone();
        let acceptor = tokio::spawn(async move {
            while let Some((channel, events)) = listener.accept().await {
                if accept_inbox.send(HubEvent::Connected(channel, events)).is_err() {
                    break;
                }
            }
            tracing::debug!("listener closed");
        });

        let hub = Hub {
            store: self.store,
            options: self.options,
            registry: ReplicaRegistry::new(),
            origins: OriginTracker::new(),
            synced,
            commit_seq,
            handled_seq: 0,
            restore_overlay: None,
            writer,
            last_persisted: None,
            persist_deferred: false,
            restored: !persisting,
            restored_tx,
            inbox_tx: inbox_tx.clone(),
        };
        let task = tokio::spawn(hub.run(inbox_rx).instrument(tracing::info_span!("hub")));

        Ok(HubHandle {
            inbox: inbox_tx,
            restored: restored_rx,
            task,
            acceptor,
        })
    }
}

/// Control surface of a running hub
pub struct HubHandle {
    inbox: mpsc::UnboundedSender<HubEvent>,
    restored: watch::Receiver<bool>,
    task: JoinHandle<()>,
    acceptor: JoinHandle<()>,
}

impl HubHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> HubCommand) -> TetherResult<T> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(HubEvent::Command(make(tx)))
            .map_err(|_| TetherError::ParticipantStopped)?;
        rx.await.map_err(|_| TetherError::ParticipantStopped)
    }

    /// Snapshot of the registration table, in connection order
    pub async fn registrations(&self) -> TetherResult<Vec<RegistrationInfo>> {
        self.request(HubCommand::Registrations).await
    }

    /// Currently elected master
    pub async fn master(&self) -> TetherResult<Option<ChannelId>> {
        let table = self.registrations().await?;
        Ok(table.into_iter().find(|r| r.is_master).map(|r| r.id))
    }

    /// Sever one replica's channel; the replica will reconnect
    pub async fn disconnect(&self, id: ChannelId) -> TetherResult<bool> {
        self.request(|reply| HubCommand::Disconnect(id, reply)).await
    }

    /// Wait until every persistence write queued so far has settled
    pub async fn flush(&self) -> TetherResult<()> {
        self.request(HubCommand::Flush).await
    }

    /// Wait for the startup restore of persisted fields to finish
    pub async fn restored(&self) {
        let mut rx = self.restored.clone();
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn is_restored(&self) -> bool {
        *self.restored.borrow()
    }

    /// Stop the hub; every replica channel is dropped
    pub async fn shutdown(self) {
        self.acceptor.abort();
        let _ = self.inbox.send(HubEvent::Command(HubCommand::Shutdown));
        let _ = self.task.await;
    }
}
