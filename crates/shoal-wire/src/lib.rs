//! Shoal Wire Format - Binary layout of entity state
//!
//! This crate implements the only binary layouts the core depends on:
//! - Update records published to an entity's channel
//! - Snapshots read back from an entity's field hash (with reserved `_epoch`)

pub mod record;
pub mod snapshot;

pub use record::*;
pub use snapshot::*;
