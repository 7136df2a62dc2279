//! Store client - one connection to the backing store
//!
//! Commands are fire-and-forget: `send_command` returns a handle immediately
//! and the reply is picked up later with a non-blocking poll. Commands on one
//! connection execute in send order; nothing is guaranteed across connections.

use shoal_core::{CommandHandle, ShoalResult};

use crate::{Command, Reply};

/// A single connection to the backing store
pub trait StoreClient: Send {
    /// Queue a command, returning the handle its reply will carry
    fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle>;

    /// Take the next available reply, if any
    fn try_receive(&mut self) -> Option<(CommandHandle, Reply)>;

    /// Push any buffered outbound traffic to the backend
    fn flush(&mut self) -> ShoalResult<()>;
}

impl<T: StoreClient + ?Sized> StoreClient for Box<T> {
    fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
        (**self).send_command(command)
    }

    fn try_receive(&mut self) -> Option<(CommandHandle, Reply)> {
        (**self).try_receive()
    }

    fn flush(&mut self) -> ShoalResult<()> {
        (**self).flush()
    }
}
