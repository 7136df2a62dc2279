//! In-memory backend
//!
//! A single-process stand-in for the key-value store, shared by any number of
//! connections. It models exactly what the streaming layer relies on:
//! - Hashes (HSET / HDEL / HGETALL)
//! - Pub/sub fan-out with subscribe acknowledgements
//! - MULTI / EXEC, applied atomically under one lock
//!
//! There is a single keyspace; SELECT is acknowledged and otherwise ignored.
//! Commands execute as soon as they are sent, so `flush` is a no-op.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use shoal_core::{CommandHandle, FieldMap, ShoalError, ShoalResult};

use crate::{Command, Reply, StoreClient};

type ConnectionId = u64;

/// Per-connection state held by the store
#[derive(Debug, Default)]
struct Connection {
    /// Replies and pushes waiting to be received
    inbox: VecDeque<(CommandHandle, Reply)>,
    /// Handle the next reply will carry
    next_reply: CommandHandle,
    /// Commands queued by MULTI
    transaction: Option<Vec<Command>>,
    /// Channels this connection is subscribed to
    channels: BTreeSet<String>,
}

impl Connection {
    fn push(&mut self, reply: Reply) {
        let handle = self.next_reply;
        self.next_reply = handle.next();
        self.inbox.push_back((handle, reply));
    }
}

#[derive(Debug, Default)]
struct StoreState {
    hashes: HashMap<String, FieldMap>,
    subscriptions: HashMap<String, BTreeSet<ConnectionId>>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection: ConnectionId,
    commands_executed: u64,
}

impl StoreState {
    fn execute(&mut self, conn: ConnectionId, command: Command) -> Reply {
        self.commands_executed += 1;

        match command {
            Command::Select(_) => Reply::ok(),
            Command::Ping => Reply::Status("PONG".into()),
            Command::Multi | Command::Exec => {
                Reply::Error(format!("ERR {} cannot be nested", command.name()))
            }
            Command::HSet { key, fields } => {
                let hash = self.hashes.entry(key).or_default();
                let mut added = 0;
                for (field, value) in fields {
                    if hash.insert(field, value).is_none() {
                        added += 1;
                    }
                }
                Reply::Integer(added)
            }
            Command::HDel { key, fields } => {
                let Some(hash) = self.hashes.get_mut(&key) else {
                    return Reply::Integer(0);
                };
                let removed = fields.iter().filter(|f| hash.remove(*f).is_some()).count();
                if hash.is_empty() {
                    self.hashes.remove(&key);
                }
                Reply::Integer(removed as i64)
            }
            Command::HGetAll { key } => {
                let items = self
                    .hashes
                    .get(&key)
                    .map(|hash| {
                        hash.iter()
                            .flat_map(|(field, value)| {
                                [
                                    Reply::bulk(Bytes::copy_from_slice(field.as_bytes())),
                                    Reply::bulk(value.clone()),
                                ]
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Reply::Array(Some(items))
            }
            Command::Publish { channel, payload } => {
                let subscribers: Vec<ConnectionId> = self
                    .subscriptions
                    .get(&channel)
                    .map(|s| s.iter().copied().collect())
                    .unwrap_or_default();

                for id in &subscribers {
                    if let Some(target) = self.connections.get_mut(id) {
                        target.push(Reply::Array(Some(vec![
                            Reply::bulk(&b"message"[..]),
                            Reply::bulk(Bytes::copy_from_slice(channel.as_bytes())),
                            Reply::bulk(payload.clone()),
                        ])));
                    }
                }
                Reply::Integer(subscribers.len() as i64)
            }
            Command::Subscribe { channel } => {
                self.subscriptions
                    .entry(channel.clone())
                    .or_default()
                    .insert(conn);
                let count = self
                    .connections
                    .get_mut(&conn)
                    .map(|c| {
                        c.channels.insert(channel.clone());
                        c.channels.len()
                    })
                    .unwrap_or(0);
                pubsub_ack("subscribe", &channel, count)
            }
            Command::Unsubscribe { channel } => {
                if let Some(subs) = self.subscriptions.get_mut(&channel) {
                    subs.remove(&conn);
                    if subs.is_empty() {
                        self.subscriptions.remove(&channel);
                    }
                }
                let count = self
                    .connections
                    .get_mut(&conn)
                    .map(|c| {
                        c.channels.remove(&channel);
                        c.channels.len()
                    })
                    .unwrap_or(0);
                pubsub_ack("unsubscribe", &channel, count)
            }
        }
    }

    /// Handle one command from a connection, including transaction queuing
    fn dispatch(&mut self, conn: ConnectionId, command: Command) {
        let in_transaction = self
            .connections
            .get(&conn)
            .is_some_and(|c| c.transaction.is_some());

        let reply = match (command, in_transaction) {
            (Command::Multi, false) => {
                if let Some(c) = self.connections.get_mut(&conn) {
                    c.transaction = Some(Vec::new());
                }
                Reply::ok()
            }
            (Command::Multi, true) => Reply::Error("ERR MULTI calls can not be nested".into()),
            (Command::Exec, false) => Reply::Error("ERR EXEC without MULTI".into()),
            (Command::Exec, true) => {
                let queued = self
                    .connections
                    .get_mut(&conn)
                    .and_then(|c| c.transaction.take())
                    .unwrap_or_default();
                let results = queued
                    .into_iter()
                    .map(|cmd| self.execute(conn, cmd))
                    .collect();
                Reply::Array(Some(results))
            }
            (command, true) => {
                if let Some(queue) = self
                    .connections
                    .get_mut(&conn)
                    .and_then(|c| c.transaction.as_mut())
                {
                    queue.push(command);
                }
                Reply::Status("QUEUED".into())
            }
            (command, false) => self.execute(conn, command),
        };

        if let Some(c) = self.connections.get_mut(&conn) {
            c.push(reply);
        }
    }

    fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(c) = self.connections.remove(&conn) {
            for channel in c.channels {
                if let Some(subs) = self.subscriptions.get_mut(&channel) {
                    subs.remove(&conn);
                    if subs.is_empty() {
                        self.subscriptions.remove(&channel);
                    }
                }
            }
        }
    }
}

fn pubsub_ack(kind: &'static str, channel: &str, count: usize) -> Reply {
    Reply::Array(Some(vec![
        Reply::bulk(kind.as_bytes()),
        Reply::bulk(Bytes::copy_from_slice(channel.as_bytes())),
        Reply::Integer(count as i64),
    ]))
}

/// Shared in-memory store
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection
    pub fn connect(&self) -> InMemoryClient {
        let mut state = self.state.lock();
        let id = state.next_connection;
        state.next_connection += 1;
        state.connections.insert(id, Connection::default());

        InMemoryClient {
            id,
            next_handle: CommandHandle::default(),
            store: self.clone(),
            open: true,
        }
    }

    /// Copy of a hash, `None` if it does not exist
    pub fn hash(&self, key: &str) -> Option<FieldMap> {
        self.state.lock().hashes.get(key).cloned()
    }

    /// Number of connections subscribed to a channel
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .subscriptions
            .get(channel)
            .map_or(0, |s| s.len())
    }

    /// Number of open connections
    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Total commands executed (transactions count each queued command)
    pub fn commands_executed(&self) -> u64 {
        self.state.lock().commands_executed
    }
}

/// One connection to an `InMemoryStore`
#[derive(Debug)]
pub struct InMemoryClient {
    id: ConnectionId,
    next_handle: CommandHandle,
    store: InMemoryStore,
    open: bool,
}

impl InMemoryClient {
    /// Close the connection, dropping its subscriptions
    pub fn close(&mut self) {
        if self.open {
            self.store.state.lock().disconnect(self.id);
            self.open = false;
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }
}

impl StoreClient for InMemoryClient {
    fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
        if !self.open {
            return Err(ShoalError::ConnectionClosed);
        }

        let handle = self.next_handle;
        self.next_handle = handle.next();
        self.store.state.lock().dispatch(self.id, command);
        Ok(handle)
    }

    fn try_receive(&mut self) -> Option<(CommandHandle, Reply)> {
        self.store
            .state
            .lock()
            .connections
            .get_mut(&self.id)?
            .inbox
            .pop_front()
    }

    fn flush(&mut self) -> ShoalResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(ShoalError::ConnectionClosed)
        }
    }
}

impl Drop for InMemoryClient {
    fn drop(&mut self) {
        self.close();
    }
}
