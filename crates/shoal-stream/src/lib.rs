//! Shoal Stream - reconciling readers and writers over the store
//!
//! This crate provides:
//! - `ReconcilingReader`: snapshot + change log into current field state
//! - `ReconcilingWriter`: atomic, epoch-tagged field-diff batches
//! - `StreamContext`: shared connections and the reader arena

pub mod config;
pub mod context;
pub mod reader;
pub mod writer;

pub use config::StreamConfig;
pub use context::{ContextStats, StreamContext};
pub use reader::{ReaderState, ReaderStats, ReaderUpdate, ReconcilingReader};
pub use writer::{ReconcilingWriter, WriterStats};
