//! Stream context - shared I/O and the reader arena
//!
//! One context per process tick loop. It owns the pub/sub subscriber, the
//! command receiver used for snapshot reads, and every open reader. Views
//! hold `ReaderId` handles and go through the context to poll or close.

use std::collections::HashMap;

use shoal_core::{FieldMap, ReaderId, ShoalError, ShoalResult};
use shoal_store::{Receiver, StoreClient, Subscriber};

use crate::{ReaderState, ReaderUpdate, ReconcilingReader, StreamConfig};

/// Context statistics
#[derive(Clone, Debug, Default)]
pub struct ContextStats {
    pub readers_opened: u64,
    pub readers_closed: u64,
    pub records_malformed: u64,
}

/// Owner of shared connections and readers
pub struct StreamContext {
    subscriber: Subscriber,
    receiver: Receiver,
    readers: HashMap<ReaderId, ReconcilingReader>,
    next_reader: u64,
    tick: u64,
    config: StreamConfig,
    stats: ContextStats,
}

impl StreamContext {
    /// Create a context over a pub/sub connection and a command connection
    pub fn new(
        subscriber: Box<dyn StoreClient>,
        commands: Box<dyn StoreClient>,
        config: StreamConfig,
    ) -> ShoalResult<Self> {
        config.validate()?;

        Ok(StreamContext {
            subscriber: Subscriber::new(subscriber),
            receiver: Receiver::new(commands),
            readers: HashMap::new(),
            next_reader: 0,
            tick: 0,
            config,
            stats: ContextStats::default(),
        })
    }

    /// Start a tick: drain both connections into their per-tick buffers
    pub fn begin_tick(&mut self) {
        self.tick += 1;
        self.subscriber.tick();
        self.receiver.tick();
    }

    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Open a reader over `key`
    pub fn open_reader(&mut self, key: &str) -> ShoalResult<ReaderId> {
        let reader = ReconcilingReader::open(key, &mut self.subscriber)?;
        let id = ReaderId::new(self.next_reader);
        self.next_reader += 1;
        self.readers.insert(id, reader);
        self.stats.readers_opened += 1;
        Ok(id)
    }

    /// Advance one reader for the current tick
    pub fn poll_reader(&mut self, id: ReaderId) -> ShoalResult<Option<ReaderUpdate>> {
        let reader = self
            .readers
            .get_mut(&id)
            .ok_or(ShoalError::ReaderNotFound(id.0))?;

        let malformed = reader.stats().records_malformed;
        let update = reader.poll(&self.subscriber, &mut self.receiver, self.tick, &self.config);
        self.stats.records_malformed += reader.stats().records_malformed - malformed;
        Ok(update)
    }

    /// Close and drop a reader
    pub fn close_reader(&mut self, id: ReaderId) -> ShoalResult<()> {
        let mut reader = self
            .readers
            .remove(&id)
            .ok_or(ShoalError::ReaderNotFound(id.0))?;
        reader.close(&mut self.subscriber);
        self.stats.readers_closed += 1;
        Ok(())
    }

    pub fn reader(&self, id: ReaderId) -> Option<&ReconcilingReader> {
        self.readers.get(&id)
    }

    /// Current state of a reader; `None` unless it is Valid
    pub fn data(&self, id: ReaderId) -> Option<&FieldMap> {
        self.readers.get(&id)?.data()
    }

    pub fn state(&self, id: ReaderId) -> Option<ReaderState> {
        self.readers.get(&id).map(|r| r.state())
    }

    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }

    pub fn subscriber(&self) -> &Subscriber {
        &self.subscriber
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> &ContextStats {
        &self.stats
    }

    /// Flush both connections
    pub fn flush(&mut self) -> ShoalResult<()> {
        self.subscriber.flush()?;
        self.receiver.flush()
    }
}
