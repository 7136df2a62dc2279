//! Shoal Transport - network clients for the backing store
//!
//! This crate provides:
//! - RESP2 command encoding and incremental reply decoding
//! - A tokio TCP `StoreClient` with background read/write tasks

pub mod resp;
pub mod tcp;

pub use resp::{decode_reply, encode_command};
pub use tcp::TcpStoreClient;
