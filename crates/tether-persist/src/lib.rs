//! tether Persistence - durable storage of the persisted field projection
//!
//! This crate provides:
//! - The persistence adapter seam (async read/write of one key)
//! - In-memory and file-backed adapters
//! - Projection and restore-merge helpers

pub mod adapter;
pub mod file;
pub mod projection;

pub use adapter::*;
pub use file::FileStorage;
pub use projection::*;
