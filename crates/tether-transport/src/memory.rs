//! In-process transport
//!
//! Every connect creates a pair of unbounded queues, one per direction, and
//! hands the hub end to the listener. Messages cross the link as encoded
//! frames, so the two ends never share payload values.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use tether_core::{ChannelId, ChannelName, TransportError};

use crate::{Channel, ChannelEvents, Connector, LinkState, Listener};

type Accepted = (Channel, ChannelEvents);

/// Create a connected connector/listener pair
pub fn memory_transport() -> (MemoryConnector, MemoryListener) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let connector = MemoryConnector {
        accept_tx,
        next_id: Arc::new(AtomicU64::new(1)),
    };
    (connector, MemoryListener { accept_rx })
}

/// Replica-side handle of the in-process transport
#[derive(Clone, Debug)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<Accepted>,
    next_id: Arc<AtomicU64>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, name: &ChannelName) -> Result<Accepted, TransportError> {
        let id = ChannelId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let link = LinkState::new();
        let (to_replica_tx, to_replica_rx) = mpsc::unbounded_channel();
        let (to_hub_tx, to_hub_rx) = mpsc::unbounded_channel();

        let hub_end = (
            Channel::new(id, name.clone(), to_replica_tx, Arc::clone(&link)),
            ChannelEvents::new(to_hub_rx, Arc::clone(&link)),
        );
        self.accept_tx
            .send(hub_end)
            .map_err(|_| TransportError::Unreachable("listener closed".into()))?;

        tracing::trace!(channel = %name, %id, "memory channel opened");
        Ok((
            Channel::new(id, name.clone(), to_hub_tx, Arc::clone(&link)),
            ChannelEvents::new(to_replica_rx, link),
        ))
    }
}

/// Hub-side handle of the in-process transport
#[derive(Debug)]
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<Accepted>,
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&mut self) -> Option<Accepted> {
        self.accept_rx.recv().await
    }
}
