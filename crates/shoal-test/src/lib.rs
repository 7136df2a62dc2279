//! Shoal Test Harness - multi-node scenarios and fault injection
//!
//! This crate provides:
//! - `ChaosClient`: seeded reply loss and delay on any store connection
//! - `Cluster`: N nodes on one in-memory store, ticked in lockstep
//! - `Observer`: a reader-only context for checking replicated state
//! - End-to-end scenarios

pub mod chaos;
pub mod harness;
pub mod integration;

pub use chaos::*;
pub use harness::*;
