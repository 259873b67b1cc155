//! tether Core - Fundamental types and primitives
//!
//! This crate defines the types shared by every tether participant:
//! - Identifiers (ChannelId, ChannelName, ContextKind)
//! - Mutations and canonical state
//! - The sync message envelope
//! - Options and their validation
//! - The state-container seam and an in-memory store

pub mod id;
pub mod mutation;
pub mod message;
pub mod registration;
pub mod config;
pub mod store;
pub mod error;

pub use id::*;
pub use mutation::*;
pub use message::*;
pub use registration::*;
pub use config::*;
pub use store::*;
pub use error::*;
