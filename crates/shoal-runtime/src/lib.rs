//! Shoal Runtime - node orchestration and main loop
//!
//! Each tick runs five stages:
//! 1. Drain connections (subscriber and command receiver)
//! 2. Orchestrate (assignments, write view, read view, logic, migration)
//! 3. Confirm writes
//! 4. Flush outbound commands
//! 5. Record stats

pub mod config;
pub mod logging;
pub mod motion;
pub mod node;

pub use config::NodeConfig;
pub use logging::{init_tracing, LogFormat};
pub use motion::MotionLogic;
pub use node::*;
