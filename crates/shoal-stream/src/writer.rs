//! Reconciling writer - atomic, epoch-tagged field-diff batches
//!
//! Each `send` becomes one transaction on the writer's connection:
//!
//! ```text
//! MULTI
//! HSET    key  <upserts...> _epoch <epoch>
//! HDEL    key  <tombstoned fields...>        (only if any)
//! PUBLISH key  <update record>
//! EXEC
//! ```
//!
//! A reader that observes the publish therefore also observes a hash at
//! least as new as the record.

use std::collections::{HashMap, VecDeque};

use bytes::Bytes;
use shoal_core::{
    is_reserved, is_tombstone, CommandHandle, Epoch, FieldMap, ShoalError, ShoalResult,
    EPOCH_FIELD,
};
use shoal_store::{Command, Reply, StoreClient};
use shoal_wire::UpdateRecord;

/// Writer statistics
#[derive(Clone, Debug, Default)]
pub struct WriterStats {
    pub batches_sent: u64,
    pub batches_confirmed: u64,
    pub failed_batches: u64,
    pub fields_written: u64,
    pub events_written: u64,
}

#[derive(Debug)]
struct PendingBatch {
    exec: CommandHandle,
    key: String,
    epoch: Epoch,
}

/// Writer owning one store connection
pub struct ReconcilingWriter {
    client: Box<dyn StoreClient>,
    /// Per-writer component of every epoch
    tag: u32,
    /// Last sequence number used per key, one entry per key ever sent on.
    /// Never evicted: a restarted sequence reads as already covered by
    /// older snapshots. Bounded by the entity set.
    sequences: HashMap<String, u64>,
    pending: VecDeque<PendingBatch>,
    stats: WriterStats,
}

impl ReconcilingWriter {
    /// Create a writer with a random epoch tag
    pub fn new(client: Box<dyn StoreClient>) -> Self {
        Self::with_tag(client, rand::random())
    }

    /// Create a writer with a fixed epoch tag
    pub fn with_tag(client: Box<dyn StoreClient>, tag: u32) -> Self {
        ReconcilingWriter {
            client,
            tag,
            sequences: HashMap::new(),
            pending: VecDeque::new(),
            stats: WriterStats::default(),
        }
    }

    /// Publish a field diff and events on `key` as one atomic batch.
    ///
    /// Returns the epoch stamped on the batch. Errors only for invalid input
    /// or a broken connection; backend rejections of the transaction surface
    /// later through `drain_replies`.
    pub fn send(&mut self, key: &str, diff: &FieldMap, events: &[Bytes]) -> ShoalResult<Epoch> {
        if let Some(field) = diff.keys().find(|f| is_reserved(f)) {
            return Err(ShoalError::ReservedField(field.clone()));
        }

        let epoch = self.next_epoch(key);
        let record = UpdateRecord::new(epoch, diff.clone(), events.to_vec());

        let mut upserts: Vec<(String, Bytes)> = Vec::with_capacity(diff.len() + 1);
        let mut deletes = Vec::new();
        for (field, value) in diff {
            if is_tombstone(value) {
                deletes.push(field.clone());
            } else {
                upserts.push((field.clone(), value.clone()));
            }
        }
        upserts.push((
            EPOCH_FIELD.to_string(),
            Bytes::copy_from_slice(&epoch.to_bytes()),
        ));

        self.client.send_command(Command::Multi)?;
        self.client.send_command(Command::HSet {
            key: key.to_string(),
            fields: upserts,
        })?;
        if !deletes.is_empty() {
            self.client.send_command(Command::HDel {
                key: key.to_string(),
                fields: deletes,
            })?;
        }
        self.client.send_command(Command::Publish {
            channel: key.to_string(),
            payload: record.encode(),
        })?;
        let exec = self.client.send_command(Command::Exec)?;

        self.pending.push_back(PendingBatch {
            exec,
            key: key.to_string(),
            epoch,
        });
        self.stats.batches_sent += 1;
        self.stats.fields_written += diff.len() as u64;
        self.stats.events_written += events.len() as u64;

        tracing::trace!(key, %epoch, fields = diff.len(), events = events.len(), "batch sent");
        Ok(epoch)
    }

    /// Consume replies, returning how many batches failed since the last call
    pub fn drain_replies(&mut self) -> usize {
        let mut failed = 0;

        while let Some((handle, reply)) = self.client.try_receive() {
            let Some(front) = self.pending.front() else {
                continue;
            };
            if front.exec != handle {
                continue;
            }

            let batch = self.pending.pop_front();
            if let Some(reason) = batch_failure(&reply) {
                failed += 1;
                self.stats.failed_batches += 1;
                if let Some(batch) = batch {
                    tracing::warn!(key = %batch.key, epoch = %batch.epoch, "write batch failed: {}", reason);
                }
            } else {
                self.stats.batches_confirmed += 1;
            }
        }

        failed
    }

    /// Push buffered commands to the backend
    pub fn flush(&mut self) -> ShoalResult<()> {
        self.client.flush()
    }

    /// Batches sent but not yet confirmed
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn tag(&self) -> u32 {
        self.tag
    }

    pub fn stats(&self) -> &WriterStats {
        &self.stats
    }

    fn next_epoch(&mut self, key: &str) -> Epoch {
        let seq = self.sequences.entry(key.to_string()).or_insert(0);
        *seq += 1;
        Epoch::from_tag_seq(self.tag, *seq)
    }
}

/// Describe why an EXEC reply means the batch did not apply cleanly
fn batch_failure(reply: &Reply) -> Option<String> {
    match reply {
        Reply::Array(Some(results)) => results
            .iter()
            .find_map(|r| match r {
                Reply::Error(e) => Some(e.clone()),
                _ => None,
            }),
        Reply::Array(None) => Some("transaction aborted".into()),
        Reply::Error(e) => Some(e.clone()),
        other => Some(format!("unexpected EXEC reply {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_core::{f64_value, read_f64};
    use shoal_store::{InMemoryClient, InMemoryStore};

    fn diff(pairs: &[(&str, &[u8])]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Bytes::copy_from_slice(v)))
            .collect()
    }

    /// Connection whose transactions are always rejected
    struct RejectingClient(InMemoryClient);

    impl StoreClient for RejectingClient {
        fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
            self.0.send_command(command)
        }

        fn try_receive(&mut self) -> Option<(CommandHandle, Reply)> {
            self.0.try_receive().map(|(handle, reply)| match reply {
                Reply::Array(Some(_)) => (handle, Reply::Error("EXECABORT rejected".into())),
                other => (handle, other),
            })
        }

        fn flush(&mut self) -> ShoalResult<()> {
            self.0.flush()
        }
    }

    #[test]
    fn test_send_writes_hash_and_epoch() {
        let store = InMemoryStore::new();
        let mut writer = ReconcilingWriter::with_tag(Box::new(store.connect()), 7);

        let mut fields = FieldMap::new();
        fields.insert("vx".into(), f64_value(1.0));
        let epoch = writer.send("e1", &fields, &[]).unwrap();

        let hash = store.hash("e1").unwrap();
        assert_eq!(read_f64(&hash, "vx"), Some(1.0));
        assert_eq!(Epoch::from_slice(&hash[EPOCH_FIELD]), Some(epoch));
        assert_eq!(epoch.tag(), 7);
        assert_eq!(epoch.seq(), 1);
    }

    #[test]
    fn test_tombstone_deletes_field() {
        let store = InMemoryStore::new();
        let mut writer = ReconcilingWriter::with_tag(Box::new(store.connect()), 1);

        writer.send("e1", &diff(&[("a", b"1"), ("b", b"2")]), &[]).unwrap();
        writer.send("e1", &diff(&[("a", b"")]), &[]).unwrap();

        let hash = store.hash("e1").unwrap();
        assert!(!hash.contains_key("a"));
        assert_eq!(hash["b"].as_ref(), b"2");
    }

    #[test]
    fn test_epochs_increase_per_key() {
        let store = InMemoryStore::new();
        let mut writer = ReconcilingWriter::with_tag(Box::new(store.connect()), 3);

        let a1 = writer.send("a", &diff(&[("x", b"1")]), &[]).unwrap();
        let b1 = writer.send("b", &diff(&[("x", b"1")]), &[]).unwrap();
        let a2 = writer.send("a", &diff(&[("x", b"2")]), &[]).unwrap();

        assert_eq!(a1.seq(), 1);
        assert_eq!(b1.seq(), 1);
        assert_eq!(a2.seq(), 2);
        assert_ne!(a1, a2);
    }

    #[test]
    fn test_reserved_field_rejected() {
        let store = InMemoryStore::new();
        let mut writer = ReconcilingWriter::new(Box::new(store.connect()));

        let result = writer.send("e1", &diff(&[("_epoch", b"12345678")]), &[]);
        assert!(matches!(result, Err(ShoalError::ReservedField(_))));
        assert!(store.hash("e1").is_none());
        assert_eq!(writer.stats().batches_sent, 0);
    }

    #[test]
    fn test_drain_confirms_batches() {
        let store = InMemoryStore::new();
        let mut writer = ReconcilingWriter::new(Box::new(store.connect()));

        writer.send("e1", &diff(&[("x", b"1")]), &[]).unwrap();
        writer.send("e1", &diff(&[("x", b"")]), &[]).unwrap();
        assert_eq!(writer.in_flight(), 2);

        assert_eq!(writer.drain_replies(), 0);
        assert_eq!(writer.in_flight(), 0);
        assert_eq!(writer.stats().batches_confirmed, 2);
    }

    #[test]
    fn test_rejected_batch_is_counted() {
        let store = InMemoryStore::new();
        let client = RejectingClient(store.connect());
        let mut writer = ReconcilingWriter::new(Box::new(client));

        writer.send("e1", &diff(&[("x", b"1")]), &[]).unwrap();
        assert_eq!(writer.drain_replies(), 1);
        assert_eq!(writer.stats().failed_batches, 1);
    }

    #[test]
    fn test_closed_connection_surfaces_error() {
        let store = InMemoryStore::new();
        let mut client = store.connect();
        client.close();
        let mut writer = ReconcilingWriter::new(Box::new(client));

        let result = writer.send("e1", &diff(&[("x", b"1")]), &[]);
        assert!(matches!(result, Err(ShoalError::ConnectionClosed)));
    }
}
