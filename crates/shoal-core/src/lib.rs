//! Shoal Core - Fundamental types and primitives
//!
//! This crate defines the core types used throughout Shoal:
//! - Identifiers (Epoch, ReaderId, CommandHandle)
//! - Field maps and tombstone semantics
//! - Set diffing for index and entity reconciliation
//! - Error types

pub mod diff;
pub mod error;
pub mod field;
pub mod id;

pub use diff::*;
pub use error::*;
pub use field::*;
pub use id::*;
