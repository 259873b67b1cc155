//! tether Runtime - hub and replica event loops
//!
//! Every participant is one task draining one inbox, so channel events,
//! commit notifications and control commands are handled one at a time:
//! 1. Hub: accept channels, relay mutations, elect a master, persist
//! 2. Replica: mirror the hub, queue early mutations, suppress echoes,
//!    reconnect forever

pub mod origin;
pub mod registry;
pub mod election;
pub mod participant;
pub mod writer;
pub mod hub;
pub mod replica;
pub mod telemetry;

pub use origin::*;
pub use registry::*;
pub use election::*;
pub use participant::*;
pub use hub::{Hub, HubBuilder, HubHandle};
pub use replica::{Replica, ReplicaBuilder, ReplicaHandle, ReplicaStatus};
pub use telemetry::{init_logging, LogFormat};
