//! tether Test Harness - end-to-end protocol validation
//!
//! This crate provides:
//! - A hub plus any number of replicas wired over the in-process transport
//! - Storage fakes that fail on demand
//! - End-to-end scenarios (relay, loop freedom, queueing, election,
//!   persistence, reconnect)

pub mod harness;
pub mod fakes;

#[cfg(test)]
mod scenarios;

pub use harness::*;
pub use fakes::*;
