//! Channel abstraction
//!
//! A channel is one ordered, bidirectional link between the hub and a
//! replica. Each end is split into a [`Channel`] (send side) and a
//! [`ChannelEvents`] stream (receive side). The stream yields every message
//! in send order and then exactly one [`ChannelEvent::Disconnect`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use tether_core::{ChannelId, ChannelName, SyncMessage, TransportError};

/// Event observed on the receive side of a channel
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    Message(Bytes),
    Disconnect,
}

/// Shared state of both ends of one link
#[derive(Debug, Default)]
pub struct LinkState {
    closed: AtomicBool,
}

impl LinkState {
    pub fn new() -> Arc<Self> {
        Arc::new(LinkState::default())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns true if this call closed the link
    fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }
}

/// Send side of one channel end
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    name: ChannelName,
    outbound: mpsc::UnboundedSender<ChannelEvent>,
    link: Arc<LinkState>,
}

impl Channel {
    pub fn new(
        id: ChannelId,
        name: ChannelName,
        outbound: mpsc::UnboundedSender<ChannelEvent>,
        link: Arc<LinkState>,
    ) -> Self {
        Channel {
            id,
            name,
            outbound,
            link,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &ChannelName {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.link.is_closed()
    }

    /// Encode and send a message; never waits for delivery
    pub fn send(&self, message: &SyncMessage) -> Result<(), TransportError> {
        let frame = message.encode()?;
        self.send_frame(frame)
    }

    /// Send an already encoded frame
    pub fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.link.is_closed() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(ChannelEvent::Message(frame))
            .map_err(|_| TransportError::Closed)
    }

    /// Close the link; only the peer observes the disconnect
    pub fn disconnect(&self) {
        if self.link.close() {
            let _ = self.outbound.send(ChannelEvent::Disconnect);
        }
    }
}

/// Receive side of one channel end
#[derive(Debug)]
pub struct ChannelEvents {
    inbound: mpsc::UnboundedReceiver<ChannelEvent>,
    link: Arc<LinkState>,
    finished: bool,
}

impl ChannelEvents {
    pub fn new(inbound: mpsc::UnboundedReceiver<ChannelEvent>, link: Arc<LinkState>) -> Self {
        ChannelEvents {
            inbound,
            link,
            finished: false,
        }
    }

    /// Next event; `None` once the disconnect has been reported
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        if self.finished {
            return None;
        }
        match self.inbound.recv().await {
            Some(ChannelEvent::Message(frame)) => Some(ChannelEvent::Message(frame)),
            Some(ChannelEvent::Disconnect) | None => {
                self.finished = true;
                self.link.close();
                Some(ChannelEvent::Disconnect)
            }
        }
    }
}

/// Opens channels to the hub (replica side)
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, name: &ChannelName) -> Result<(Channel, ChannelEvents), TransportError>;
}

/// Accepts channels from replicas (hub side)
#[async_trait]
pub trait Listener: Send {
    /// Next incoming channel; `None` once the transport is gone
    async fn accept(&mut self) -> Option<(Channel, ChannelEvents)>;
}
