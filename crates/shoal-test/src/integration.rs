//! End-to-end scenarios
//!
//! Nodes, observers and a seeding writer sharing one in-memory store:
//! - Replication to readers opened before and after a write
//! - Index-driven entity sets
//! - Authority handoff between servers
//! - Dual ownership during migration
//! - Bootstrap under lost and delayed snapshot replies
//! - Readers whose log connection trails their snapshot reads
