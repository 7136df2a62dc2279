//! Shoal Store - the boundary to the backing key-value store
//!
//! - `StoreClient`: one connection, fire-and-forget commands, polled replies
//! - `Subscriber`: reference-counted subscriptions with a per-tick message buffer
//! - `Receiver`: per-tick command results keyed by handle
//! - `InMemoryStore`: a shared in-process backend

pub mod client;
pub mod command;
pub mod memory;
pub mod receiver;
pub mod subscriber;

pub use client::*;
pub use command::*;
pub use memory::*;
pub use receiver::*;
pub use subscriber::*;
