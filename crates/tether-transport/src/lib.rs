//! tether Transport Layer - named, ordered, bidirectional channels
//!
//! This crate provides:
//! - The channel abstraction (send, lifecycle events)
//! - Connector / Listener seams for replicas and the hub
//! - An in-process transport for tests and single-process deployments

pub mod channel;
pub mod memory;

pub use channel::*;
pub use memory::{memory_transport, MemoryConnector, MemoryListener};
