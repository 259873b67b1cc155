//! Sync message envelope
//!
//! Frames are JSON documents of the form `{"type": ..., "data": ...}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{CodecError, Mutation, State};

pub const SYNC_STATE: &str = "SYNC_STATE";
pub const SYNC_MUTATION: &str = "SYNC_MUTATION";

/// Message exchanged between the hub and a replica
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SyncMessage {
    /// Full canonical state snapshot, hub to replica
    #[serde(rename = "SYNC_STATE")]
    State(State),
    /// One mutation, either direction
    #[serde(rename = "SYNC_MUTATION")]
    Mutation(Mutation),
}

impl SyncMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::State(_) => SYNC_STATE,
            SyncMessage::Mutation(_) => SYNC_MUTATION,
        }
    }

    /// Serialize into a wire frame
    pub fn encode(&self) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Parse a wire frame
    pub fn decode(frame: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(frame)?)
    }
}
