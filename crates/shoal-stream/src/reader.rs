//! Reconciling reader - snapshot plus change log into current field state
//!
//! ```text
//! open ──► Bootstrapping ──► Valid ──► Closed
//!                │                       ▲
//!                └───────────────────────┘
//! ```
//!
//! Bootstrapping buffers log records until the subscription is acknowledged,
//! then issues one snapshot read. When the snapshot arrives, the buffered
//! record carrying the snapshot's epoch marks where the snapshot sits in the
//! log: it and everything before it are already reflected in the snapshot,
//! everything after it is applied on top.
//!
//! Without such a record the snapshot is adopted as-is and its epoch kept
//! as a watermark: later records from the snapshot's own writer at or below
//! its sequence are skipped as already reflected. If the buffer held such a
//! record, the log is behind the snapshot read, so everything buffered, and
//! every live record up to the snapshot's own, precedes the snapshot and is
//! skipped. Otherwise the buffered records were published after the read
//! and are replayed on the next poll.

use bytes::Bytes;
use shoal_core::{apply_diff, CommandHandle, Epoch, FieldMap, ShoalResult};
use shoal_store::{Command, Receiver, Subscriber};
use shoal_wire::{Snapshot, UpdateRecord};

use crate::StreamConfig;

/// Reader lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReaderState {
    /// Waiting for subscription, snapshot and reconciliation
    Bootstrapping,
    /// Tracking the log on top of a reconciled snapshot
    Valid,
    /// Unsubscribed; polls return nothing
    Closed,
}

/// What a reader produced in one tick
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReaderUpdate {
    /// Consolidated field diff for the tick, or the whole state when `full_state`
    pub fields: FieldMap,
    /// Events from the applied records, in arrival order
    pub events: Vec<Bytes>,
    /// Number of records applied
    pub records: usize,
    /// Set once, on the tick bootstrap completes
    pub full_state: bool,
}

/// Reader statistics
#[derive(Clone, Debug, Default)]
pub struct ReaderStats {
    pub records_applied: u64,
    pub records_malformed: u64,
    /// Records already covered by the snapshot
    pub records_superseded: u64,
    pub snapshot_retries: u32,
    pub updates: u64,
}

#[derive(Clone, Copy, Debug)]
struct SnapshotRequest {
    handle: CommandHandle,
    sent_at: u64,
}

/// Per-key reconciling reader.
///
/// The reader holds no connection of its own: each poll borrows the shared
/// subscriber and command receiver, so many readers run over two connections.
#[derive(Debug)]
pub struct ReconcilingReader {
    key: String,
    state: ReaderState,
    data: FieldMap,
    buffered: Vec<UpdateRecord>,
    request: Option<SnapshotRequest>,
    /// Epoch of an unaligned snapshot whose own record has not been seen
    covered: Option<Epoch>,
    /// The log was seen trailing the snapshot read
    log_behind: bool,
    stats: ReaderStats,
}

impl ReconcilingReader {
    /// Subscribe to the key's channel and start bootstrapping
    pub fn open(key: impl Into<String>, subscriber: &mut Subscriber) -> ShoalResult<Self> {
        let key = key.into();
        subscriber.subscribe(&key)?;
        tracing::debug!(key = %key, "reader opened");

        Ok(ReconcilingReader {
            key,
            state: ReaderState::Bootstrapping,
            data: FieldMap::new(),
            buffered: Vec::new(),
            request: None,
            covered: None,
            log_behind: false,
            stats: ReaderStats::default(),
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn is_valid(&self) -> bool {
        self.state == ReaderState::Valid
    }

    /// Current field state; `None` unless Valid
    pub fn data(&self) -> Option<&FieldMap> {
        match self.state {
            ReaderState::Valid => Some(&self.data),
            _ => None,
        }
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Advance the reader by one tick.
    ///
    /// Must be called every tick: log messages and command results only live
    /// for the tick they were received in.
    pub fn poll(
        &mut self,
        subscriber: &Subscriber,
        receiver: &mut Receiver,
        tick: u64,
        config: &StreamConfig,
    ) -> Option<ReaderUpdate> {
        if self.state == ReaderState::Closed {
            return None;
        }

        let records = self.decode_messages(subscriber.messages(&self.key));

        match self.state {
            ReaderState::Bootstrapping => {
                self.buffered.extend(records);
                self.bootstrap(subscriber, receiver, tick, config)
            }
            ReaderState::Valid => self.apply(records),
            ReaderState::Closed => None,
        }
    }

    /// Unsubscribe and drop all state
    pub fn close(&mut self, subscriber: &mut Subscriber) {
        if self.state == ReaderState::Closed {
            return;
        }

        if let Err(e) = subscriber.unsubscribe(&self.key) {
            tracing::warn!(key = %self.key, "unsubscribe failed: {}", e);
        }
        self.state = ReaderState::Closed;
        self.data.clear();
        self.buffered.clear();
        self.request = None;
        self.covered = None;
        self.log_behind = false;
        tracing::debug!(key = %self.key, "reader closed");
    }

    fn decode_messages(&mut self, messages: &[Bytes]) -> Vec<UpdateRecord> {
        let mut records = Vec::with_capacity(messages.len());

        for payload in messages {
            match UpdateRecord::decode(payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    self.stats.records_malformed += 1;
                    tracing::warn!(key = %self.key, len = payload.len(), "skipping malformed update record: {}", e);
                }
            }
        }

        records
    }

    fn bootstrap(
        &mut self,
        subscriber: &Subscriber,
        receiver: &mut Receiver,
        tick: u64,
        config: &StreamConfig,
    ) -> Option<ReaderUpdate> {
        // Stage 1: Subscription must be active before the snapshot is read
        if !subscriber.is_active(&self.key) {
            return None;
        }

        // Stage 2: Issue (or re-issue) the snapshot read
        let Some(request) = self.request else {
            self.request_snapshot(receiver, tick);
            return None;
        };

        // Stage 3: Wait for the reply
        let Some(reply) = receiver.take(request.handle) else {
            if tick.saturating_sub(request.sent_at) >= config.snapshot_timeout_ticks {
                self.stats.snapshot_retries += 1;
                let retries = self.stats.snapshot_retries;
                if retries >= config.max_snapshot_retries {
                    tracing::error!(key = %self.key, retries, "snapshot read still unanswered");
                } else {
                    tracing::warn!(key = %self.key, retries, "snapshot read timed out, retrying");
                }
                self.request_snapshot(receiver, tick);
            }
            return None;
        };

        // A failed read counts as lost: the timeout above retries it
        let snapshot = match reply.into_pairs().map(Snapshot::from_pairs) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(key = %self.key, "snapshot read failed: {}", e);
                return None;
            }
        };

        // Stage 4: Align the snapshot with the buffered log
        Some(self.reconcile(snapshot))
    }

    fn request_snapshot(&mut self, receiver: &mut Receiver, tick: u64) {
        match receiver.send_command(Command::HGetAll {
            key: self.key.clone(),
        }) {
            Ok(handle) => {
                self.request = Some(SnapshotRequest {
                    handle,
                    sent_at: tick,
                });
            }
            Err(e) => {
                // Left unset so the next tick tries again
                self.request = None;
                tracing::warn!(key = %self.key, "snapshot read not sent: {}", e);
            }
        }
    }

    fn reconcile(&mut self, snapshot: Snapshot) -> ReaderUpdate {
        let buffered = std::mem::take(&mut self.buffered);
        let matched = snapshot
            .epoch
            .and_then(|epoch| buffered.iter().position(|r| r.epoch == epoch));

        self.data = snapshot.fields;
        self.request = None;
        self.state = ReaderState::Valid;
        self.stats.updates += 1;

        let mut events = Vec::new();
        let applied = match matched {
            Some(index) => {
                let (superseded, pending) = buffered.split_at(index + 1);
                for record in pending {
                    apply_diff(&mut self.data, &record.fields);
                    events.extend(record.events.iter().cloned());
                }
                self.stats.records_superseded += superseded.len() as u64;
                self.stats.records_applied += pending.len() as u64;
                pending.len()
            }
            None => {
                self.covered = snapshot.epoch;
                self.log_behind = snapshot.epoch.is_some_and(|epoch| {
                    buffered.iter().any(|record| covers(epoch, record.epoch))
                });
                if self.log_behind {
                    self.stats.records_superseded += buffered.len() as u64;
                } else {
                    self.buffered = buffered;
                }
                0
            }
        };

        tracing::debug!(
            key = %self.key,
            epoch = ?snapshot.epoch,
            aligned = matched.is_some(),
            applied,
            log_behind = self.log_behind,
            replayed = self.buffered.len(),
            "reader valid"
        );

        ReaderUpdate {
            fields: self.data.clone(),
            events,
            records: applied,
            full_state: true,
        }
    }

    /// Check whether a live record is already reflected in the snapshot the
    /// reader was built from
    fn skip_covered(&mut self, record: &UpdateRecord) -> bool {
        let Some(covered) = self.covered else {
            return false;
        };

        let skip = if record.epoch.tag() == covered.tag() {
            if record.epoch.seq() >= covered.seq() {
                self.covered = None;
                self.log_behind = false;
            }
            record.epoch.seq() <= covered.seq()
        } else {
            self.log_behind
        };

        if skip {
            self.stats.records_superseded += 1;
        }
        skip
    }

    fn apply(&mut self, records: Vec<UpdateRecord>) -> Option<ReaderUpdate> {
        let replayed = std::mem::take(&mut self.buffered);
        let records: Vec<UpdateRecord> = replayed
            .into_iter()
            .chain(records)
            .filter(|record| !self.skip_covered(record))
            .collect();

        if records.is_empty() {
            return None;
        }

        let mut update = ReaderUpdate {
            records: records.len(),
            ..ReaderUpdate::default()
        };

        for record in records {
            apply_diff(&mut self.data, &record.fields);
            // Last write within the tick wins
            update.fields.extend(record.fields);
            update.events.extend(record.events);
        }

        self.stats.records_applied += update.records as u64;
        self.stats.updates += 1;
        Some(update)
    }
}

/// Check whether `snapshot` already reflects the batch stamped `record`
fn covers(snapshot: Epoch, record: Epoch) -> bool {
    snapshot.tag() == record.tag() && record.seq() <= snapshot.seq()
}
