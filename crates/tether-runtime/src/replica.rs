//! Replica - a non-authoritative mirror of hub state
//!
//! State machine: `Disconnected -> Connected -> Initialized`, back to
//! `Disconnected` on channel loss, and straight into a new connect attempt.
//! Local mutations made before the first snapshot are queued and replayed
//! once it lands; mutations applied on behalf of the hub are never sent
//! back to it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use tether_core::{
    ChannelName, ContextKind, Mutation, State, StateContainer, SyncMessage, SyncOptions,
    TetherError, TetherResult,
};
use tether_transport::{Channel, ChannelEvent, ChannelEvents, Connector};

use crate::participant::{forward_commits, SyncParticipant};
use crate::OriginTracker;

/// Connection state of a replica
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaStatus {
    Disconnected,
    /// Channel open, waiting for the first snapshot
    Connected,
    Initialized,
    Stopped,
}

/// Everything the replica loop reacts to; channel events carry the
/// connection generation they belong to
enum ReplicaEvent {
    Message(u64, Bytes),
    Disconnected(u64),
    /// Commit notification with its commit number
    Mutation(u64, Mutation),
    PendingLen(oneshot::Sender<usize>),
}

/// Replica runtime state; lives inside the replica task
pub struct Replica {
    store: Arc<dyn StateContainer>,
    options: SyncOptions,
    connector: Arc<dyn Connector>,
    name: ChannelName,
    channel: Option<Channel>,
    generation: u64,
    initialized: bool,
    pending: VecDeque<Mutation>,
    /// Mutations committed on behalf of the hub, awaiting their notification
    received: OriginTracker<()>,
    commit_seq: Arc<AtomicU64>,
    /// Commit number of the notification being handled
    handling_seq: u64,
    /// Commits up to this number were overwritten by the last snapshot
    snapshot_seq: u64,
    status_tx: watch::Sender<ReplicaStatus>,
    shutdown_rx: watch::Receiver<bool>,
    inbox_tx: mpsc::UnboundedSender<ReplicaEvent>,
}

impl Replica {
    pub fn builder<S: StateContainer + 'static>(store: Arc<S>, kind: ContextKind) -> ReplicaBuilder {
        ReplicaBuilder {
            store,
            kind,
            options: SyncOptions::default(),
        }
    }

    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<ReplicaEvent>) {
        let mut shutdown = self.shutdown_rx.clone();
        if self.connect(false).await {
            loop {
                let event = tokio::select! {
                    event = inbox.recv() => event,
                    _ = shutdown.wait_for(|stop| *stop) => None,
                };
                let Some(event) = event else { break };

                match event {
                    ReplicaEvent::Message(generation, frame) if generation == self.generation => {
                        self.on_message(&frame)
                    }
                    ReplicaEvent::Disconnected(generation) if generation == self.generation => {
                        if !self.on_disconnect().await {
                            break;
                        }
                    }
                    ReplicaEvent::Message(..) | ReplicaEvent::Disconnected(_) => {
                        tracing::trace!("event from a previous connection dropped");
                    }
                    ReplicaEvent::Mutation(seq, mutation) => {
                        self.handling_seq = seq;
                        self.on_mutation(mutation, State::new());
                    }
                    ReplicaEvent::PendingLen(reply) => {
                        let _ = reply.send(self.pending.len());
                    }
                }
            }
        }
        if let Some(channel) = self.channel.take() {
            channel.disconnect();
        }
        self.status_tx.send_replace(ReplicaStatus::Stopped);
        tracing::info!("replica stopped");
    }

    /// Open a channel to the hub, retrying until it succeeds
    ///
    /// Returns false if the replica was shut down while connecting.
    async fn connect(&mut self, reconnect: bool) -> bool {
        self.initialized = false;
        self.generation += 1;
        self.status_tx.send_replace(ReplicaStatus::Disconnected);

        let mut shutdown = self.shutdown_rx.clone();
        let (channel, events) = loop {
            match self.connector.connect(&self.name).await {
                Ok(link) => break link,
                Err(e) => {
                    tracing::warn!(error = %e, "connect failed, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(self.options.reconnect_delay) => {}
                        _ = shutdown.wait_for(|stop| *stop) => return false,
                    }
                }
            }
        };

        tracing::info!(reconnect, channel = %channel.id(), "connected to hub");
        self.spawn_pump(self.generation, events);
        self.channel = Some(channel);
        self.status_tx.send_replace(ReplicaStatus::Connected);

        if reconnect {
            self.store.commit(Mutation::reconnect());
        }
        true
    }

    async fn on_disconnect(&mut self) -> bool {
        tracing::info!(pending = self.pending.len(), "disconnected from hub");
        self.channel = None;
        self.connect(true).await
    }

    fn on_message(&mut self, frame: &[u8]) {
        let message = match SyncMessage::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed frame dropped");
                return;
            }
        };
        tracing::debug!(kind = message.kind(), "received message");

        match message {
            SyncMessage::State(state) => {
                tracing::debug!(fields = state.len(), "replacing state with snapshot");
                let mut snapshot = Some(state);
                let mut boundary = 0;
                self.store.update_state(&mut |_: &State| {
                    boundary = self.commit_seq.load(Ordering::Acquire);
                    snapshot.take().unwrap_or_default()
                });
                self.snapshot_seq = boundary;
                self.initialized = true;
                self.status_tx.send_replace(ReplicaStatus::Initialized);
                self.drain_pending();
            }
            SyncMessage::Mutation(mutation) => {
                if !self.initialized {
                    tracing::warn!(kind = %mutation.kind, "mutation before first snapshot dropped");
                    return;
                }
                self.received.record(&mutation, ());
                self.store.commit(mutation);
            }
        }
    }

    /// Replay mutations issued before the first snapshot, oldest first
    fn drain_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        tracing::debug!(count = self.pending.len(), "processing pending mutations");
        while let Some(mutation) = self.pending.pop_front() {
            self.store.commit(mutation);
        }
    }

    fn spawn_pump(&self, generation: u64, mut events: ChannelEvents) {
        let inbox = self.inbox_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let forwarded = match event {
                    ChannelEvent::Message(frame) => inbox.send(ReplicaEvent::Message(generation, frame)),
                    ChannelEvent::Disconnect => inbox.send(ReplicaEvent::Disconnected(generation)),
                };
                if forwarded.is_err() {
                    break;
                }
            }
        });
    }
}

impl SyncParticipant for Replica {
    fn options(&self) -> &SyncOptions {
        &self.options
    }

    fn on_mutation(&mut self, mutation: Mutation, _state: State) {
        if mutation.is_reconnect() {
            return;
        }
        if self.is_ignored(&mutation) {
            tracing::debug!(kind = %mutation.kind, "mutation ignored");
            return;
        }
        if self.received.take(&mutation).is_some() {
            tracing::debug!(kind = %mutation.kind, "skipping mutation applied from hub");
            return;
        }
        if !self.initialized {
            tracing::debug!(kind = %mutation.kind, "not initialized yet, queueing mutation");
            self.pending.push_back(mutation);
            return;
        }
        if self.handling_seq <= self.snapshot_seq {
            // Committed before the snapshot overwrote the state
            tracing::debug!(kind = %mutation.kind, "replaying mutation lost to snapshot");
            self.store.commit(mutation.reissue());
            return;
        }

        let Some(channel) = &self.channel else {
            self.pending.push_back(mutation);
            return;
        };
        match channel.send(&SyncMessage::Mutation(mutation.clone())) {
            Ok(()) => tracing::debug!(kind = %mutation.kind, "mutation sent to hub"),
            Err(e) => {
                // The disconnect event follows; replay after the next snapshot
                tracing::warn!(kind = %mutation.kind, error = %e, "send failed, queueing mutation");
                self.pending.push_back(mutation);
            }
        }
    }
}

/// Builder for a replica task
pub struct ReplicaBuilder {
    store: Arc<dyn StateContainer>,
    kind: ContextKind,
    options: SyncOptions,
}

impl ReplicaBuilder {
    pub fn options(mut self, options: SyncOptions) -> Self {
        self.options = options;
        self
    }

    /// Subscribe to the store and start connecting through `connector`
    pub fn spawn<C: Connector + 'static>(self, connector: C) -> ReplicaHandle {
        let name = ChannelName::generate(self.kind);
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ReplicaStatus::Disconnected);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let commit_seq = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&commit_seq);
        forward_commits(self.store.as_ref(), inbox_tx.clone(), move |mutation, _| {
            ReplicaEvent::Mutation(counter.fetch_add(1, Ordering::AcqRel) + 1, mutation)
        });

        let replica = Replica {
            store: self.store,
            options: self.options,
            connector: Arc::new(connector),
            name: name.clone(),
            channel: None,
            generation: 0,
            initialized: false,
            pending: VecDeque::new(),
            received: OriginTracker::new(),
            commit_seq,
            handling_seq: 0,
            snapshot_seq: 0,
            status_tx,
            shutdown_rx,
            inbox_tx: inbox_tx.clone(),
        };
        let span = tracing::info_span!("replica", channel = %name);
        let task = tokio::spawn(replica.run(inbox_rx).instrument(span));

        ReplicaHandle {
            name,
            inbox: inbox_tx,
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Control surface of a running replica
pub struct ReplicaHandle {
    name: ChannelName,
    inbox: mpsc::UnboundedSender<ReplicaEvent>,
    status: watch::Receiver<ReplicaStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReplicaHandle {
    pub fn channel_name(&self) -> &ChannelName {
        &self.name
    }

    pub fn status(&self) -> ReplicaStatus {
        *self.status.borrow()
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == ReplicaStatus::Initialized
    }

    /// Wait until the replica reaches a status matching `pred`
    pub async fn wait_for_status(&self, pred: impl FnMut(&ReplicaStatus) -> bool) -> TetherResult<ReplicaStatus> {
        let mut rx = self.status.clone();
        let status = rx
            .wait_for(pred)
            .await
            .map_err(|_| TetherError::ParticipantStopped)?;
        Ok(*status)
    }

    /// Wait for the first (or next) snapshot to land
    pub async fn wait_initialized(&self) -> TetherResult<()> {
        self.wait_for_status(|s| *s == ReplicaStatus::Initialized)
            .await
            .map(|_| ())
    }

    /// Number of locally issued mutations waiting for a snapshot
    pub async fn pending_len(&self) -> TetherResult<usize> {
        let (tx, rx) = oneshot::channel();
        self.inbox
            .send(ReplicaEvent::PendingLen(tx))
            .map_err(|_| TetherError::ParticipantStopped)?;
        rx.await.map_err(|_| TetherError::ParticipantStopped)
    }

    /// Stop the replica and close its channel
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        let _ = self.task.await;
    }
}
