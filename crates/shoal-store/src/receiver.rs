//! Receiver - command connection with a per-tick result table

use std::collections::HashMap;

use shoal_core::{CommandHandle, ShoalResult};

use crate::{Command, Reply, StoreClient};

/// Command connection shared by readers for snapshot reads.
///
/// Replies drained during a tick are kept until the next tick begins.
/// A result that nobody takes within its tick is dropped.
pub struct Receiver {
    client: Box<dyn StoreClient>,
    results: HashMap<CommandHandle, Reply>,
    sent: u64,
    received: u64,
}

impl Receiver {
    pub fn new(client: Box<dyn StoreClient>) -> Self {
        Receiver {
            client,
            results: HashMap::new(),
            sent: 0,
            received: 0,
        }
    }

    /// Send a command; its reply shows up in a later tick's results
    pub fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
        let handle = self.client.send_command(command)?;
        self.sent += 1;
        Ok(handle)
    }

    /// Start a tick: drop unclaimed results and drain the connection
    pub fn tick(&mut self) {
        if !self.results.is_empty() {
            tracing::trace!(dropped = self.results.len(), "dropping unclaimed results");
            self.results.clear();
        }

        while let Some((handle, reply)) = self.client.try_receive() {
            self.received += 1;
            self.results.insert(handle, reply);
        }
    }

    /// Take the result for a handle if it arrived this tick
    pub fn take(&mut self, handle: CommandHandle) -> Option<Reply> {
        self.results.remove(&handle)
    }

    /// Peek at the result for a handle
    pub fn get(&self, handle: CommandHandle) -> Option<&Reply> {
        self.results.get(&handle)
    }

    /// Commands sent and replies received over the connection's lifetime
    pub fn counts(&self) -> (u64, u64) {
        (self.sent, self.received)
    }

    pub fn flush(&mut self) -> ShoalResult<()> {
        self.client.flush()
    }
}
