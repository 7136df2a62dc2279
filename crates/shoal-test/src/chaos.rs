//! Chaos store client
//!
//! Wraps any `StoreClient` and interferes with the replies it hands out:
//! - Dropping replies of a chosen kind (e.g. lost snapshot reads)
//! - Delaying replies by a number of flushes
//!
//! Delays hold back everything queued behind the delayed reply, so a
//! connection's replies still arrive in order. One flush is one tick for
//! every connection the streaming layer owns.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use shoal_core::{CommandHandle, ShoalResult};
use shoal_store::{Command, PushMessage, Reply, StoreClient};

/// Coarse classification of a reply by its shape
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplyKind {
    /// Pub/sub `message` push
    Message,
    /// Subscribe or unsubscribe acknowledgement
    SubscriptionAck,
    /// Any other array, i.e. an HGETALL or EXEC result
    Snapshot,
    /// Status, integer, bulk and error replies
    Other,
}

impl ReplyKind {
    pub fn of(reply: &Reply) -> Self {
        match PushMessage::parse(reply) {
            Some(PushMessage::Message { .. }) => ReplyKind::Message,
            Some(_) => ReplyKind::SubscriptionAck,
            None if reply.as_array().is_some() => ReplyKind::Snapshot,
            None => ReplyKind::Other,
        }
    }
}

/// One interference rule
#[derive(Clone, Debug)]
pub struct ChaosRule {
    /// Kind of reply affected; `None` matches every reply
    pub kind: Option<ReplyKind>,
    /// Probability of dropping a matching reply (0.0 - 1.0)
    pub drop_prob: f64,
    /// Inclusive range of flushes a matching reply is held for
    pub delay_flushes: (u32, u32),
    /// Stop interfering after this many drops
    pub max_drops: Option<u64>,
}

impl ChaosRule {
    /// Drop every matching reply, up to `max_drops`
    pub fn drop(kind: ReplyKind, max_drops: u64) -> Self {
        ChaosRule {
            kind: Some(kind),
            drop_prob: 1.0,
            delay_flushes: (0, 0),
            max_drops: Some(max_drops),
        }
    }

    /// Hold matching replies for `min..=max` flushes
    pub fn delay(kind: Option<ReplyKind>, min: u32, max: u32) -> Self {
        ChaosRule {
            kind,
            drop_prob: 0.0,
            delay_flushes: (min, max.max(min)),
            max_drops: None,
        }
    }

    fn matches(&self, kind: ReplyKind) -> bool {
        self.kind.map_or(true, |k| k == kind)
    }
}

/// Chaos configuration: rules are checked in order, first match wins
#[derive(Clone, Debug, Default)]
pub struct ChaosConfig {
    pub rules: Vec<ChaosRule>,
}

impl ChaosConfig {
    /// No interference
    pub fn none() -> Self {
        Self::default()
    }

    /// Lose the first `count` snapshot replies
    pub fn lost_snapshots(count: u64) -> Self {
        ChaosConfig {
            rules: vec![ChaosRule::drop(ReplyKind::Snapshot, count)],
        }
    }

    /// Random latency of up to `max_flushes` on every reply
    pub fn laggy(max_flushes: u32) -> Self {
        ChaosConfig {
            rules: vec![ChaosRule::delay(None, 0, max_flushes)],
        }
    }

    /// Hold every log message for exactly `flushes` flushes, for the
    /// pub/sub connection
    pub fn lagged_log(flushes: u32) -> Self {
        ChaosConfig {
            rules: vec![ChaosRule::delay(Some(ReplyKind::Message), flushes, flushes)],
        }
    }

    /// Drop snapshot replies with probability `prob` and lag everything else
    pub fn hostile(prob: f64, max_flushes: u32) -> Self {
        ChaosConfig {
            rules: vec![
                ChaosRule {
                    kind: Some(ReplyKind::Snapshot),
                    drop_prob: prob,
                    delay_flushes: (0, max_flushes),
                    max_drops: None,
                },
                ChaosRule::delay(None, 0, max_flushes),
            ],
        }
    }

    pub fn with_rule(mut self, rule: ChaosRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// Chaos statistics, shared with whoever holds a handle
#[derive(Clone, Debug, Default)]
pub struct ChaosStats {
    pub replies_seen: u64,
    pub replies_dropped: u64,
    pub replies_delayed: u64,
    pub commands_sent: u64,
}

/// Shared view of a chaos client's statistics
pub type ChaosStatsHandle = Arc<Mutex<ChaosStats>>;

struct HeldReply {
    release_at: u64,
    handle: CommandHandle,
    reply: Reply,
}

/// Store client with seeded reply interference
pub struct ChaosClient<C> {
    inner: C,
    config: ChaosConfig,
    rng: StdRng,
    flushes: u64,
    held: VecDeque<HeldReply>,
    drops: Vec<u64>,
    stats: ChaosStatsHandle,
}

impl<C: StoreClient> ChaosClient<C> {
    pub fn new(inner: C, config: ChaosConfig, seed: u64) -> Self {
        let drops = vec![0; config.rules.len()];
        ChaosClient {
            inner,
            config,
            rng: StdRng::seed_from_u64(seed),
            flushes: 0,
            held: VecDeque::new(),
            drops,
            stats: Arc::new(Mutex::new(ChaosStats::default())),
        }
    }

    pub fn stats(&self) -> ChaosStatsHandle {
        Arc::clone(&self.stats)
    }

    /// Replies currently held back
    pub fn held(&self) -> usize {
        self.held.len()
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Decide what happens to a fresh reply: `None` drops it, otherwise the
    /// number of flushes to hold it for
    fn judge(&mut self, reply: &Reply) -> Option<u32> {
        let kind = ReplyKind::of(reply);
        let Some(index) = self.config.rules.iter().position(|r| r.matches(kind)) else {
            return Some(0);
        };
        let rule = &self.config.rules[index];

        let exhausted = rule.max_drops.is_some_and(|max| self.drops[index] >= max);
        if !exhausted && rule.drop_prob > 0.0 && self.rng.gen::<f64>() < rule.drop_prob {
            self.drops[index] += 1;
            return None;
        }

        let (min, max) = rule.delay_flushes;
        if max == 0 {
            Some(0)
        } else {
            Some(self.rng.gen_range(min..=max))
        }
    }
}

impl<C: StoreClient> StoreClient for ChaosClient<C> {
    fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
        self.stats.lock().commands_sent += 1;
        self.inner.send_command(command)
    }

    fn try_receive(&mut self) -> Option<(CommandHandle, Reply)> {
        loop {
            if let Some(front) = self.held.front() {
                if front.release_at > self.flushes {
                    return None;
                }
                return self.held.pop_front().map(|held| (held.handle, held.reply));
            }

            let (handle, reply) = self.inner.try_receive()?;
            self.stats.lock().replies_seen += 1;

            match self.judge(&reply) {
                None => {
                    tracing::debug!(?handle, "chaos dropped reply");
                    self.stats.lock().replies_dropped += 1;
                }
                Some(0) => return Some((handle, reply)),
                Some(delay) => {
                    self.stats.lock().replies_delayed += 1;
                    self.held.push_back(HeldReply {
                        release_at: self.flushes + u64::from(delay),
                        handle,
                        reply,
                    });
                }
            }
        }
    }

    fn flush(&mut self) -> ShoalResult<()> {
        self.flushes += 1;
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shoal_store::InMemoryStore;

    fn drain<C: StoreClient>(client: &mut C) -> Vec<Reply> {
        std::iter::from_fn(|| client.try_receive().map(|(_, r)| r)).collect()
    }

    #[test]
    fn test_reply_kinds() {
        let store = InMemoryStore::new();
        let mut client = store.connect();
        client
            .send_command(Command::Subscribe { channel: "c".into() })
            .unwrap();
        client
            .send_command(Command::HGetAll { key: "k".into() })
            .unwrap();
        client.send_command(Command::Ping).unwrap();

        let kinds: Vec<ReplyKind> = drain(&mut client).iter().map(ReplyKind::of).collect();
        assert_eq!(
            kinds,
            [ReplyKind::SubscriptionAck, ReplyKind::Snapshot, ReplyKind::Other]
        );
    }

    #[test]
    fn test_drops_limited_snapshots() {
        let store = InMemoryStore::new();
        let mut client = ChaosClient::new(store.connect(), ChaosConfig::lost_snapshots(1), 7);
        let stats = client.stats();

        for _ in 0..2 {
            client
                .send_command(Command::HGetAll { key: "k".into() })
                .unwrap();
        }
        client.send_command(Command::Ping).unwrap();

        let replies = drain(&mut client);
        assert_eq!(replies.len(), 2);
        assert_eq!(ReplyKind::of(&replies[0]), ReplyKind::Snapshot);
        assert_eq!(stats.lock().replies_dropped, 1);
        assert_eq!(stats.lock().replies_seen, 3);
    }

    #[test]
    fn test_delay_preserves_order() {
        let store = InMemoryStore::new();
        let config = ChaosConfig::none().with_rule(ChaosRule::delay(Some(ReplyKind::Snapshot), 2, 2));
        let mut client = ChaosClient::new(store.connect(), config, 1);

        client
            .send_command(Command::HGetAll { key: "k".into() })
            .unwrap();
        client.send_command(Command::Ping).unwrap();

        // The snapshot is held and the ping waits behind it
        assert!(drain(&mut client).is_empty());
        assert_eq!(client.held(), 1);

        client.flush().unwrap();
        assert!(drain(&mut client).is_empty());

        client.flush().unwrap();
        let replies = drain(&mut client);
        assert_eq!(replies.len(), 2);
        assert_eq!(ReplyKind::of(&replies[0]), ReplyKind::Snapshot);
        assert_eq!(replies[1], Reply::Status("PONG".into()));
    }

    #[test]
    fn test_lagged_log_holds_messages_only() {
        let store = InMemoryStore::new();
        let mut publisher = store.connect();
        let mut client = ChaosClient::new(store.connect(), ChaosConfig::lagged_log(1), 3);

        client
            .send_command(Command::Subscribe { channel: "c".into() })
            .unwrap();
        publisher
            .send_command(Command::Publish {
                channel: "c".into(),
                payload: bytes::Bytes::from_static(b"m"),
            })
            .unwrap();

        let replies = drain(&mut client);
        assert_eq!(replies.len(), 1);
        assert_eq!(ReplyKind::of(&replies[0]), ReplyKind::SubscriptionAck);

        client.flush().unwrap();
        let replies = drain(&mut client);
        assert_eq!(replies.len(), 1);
        assert_eq!(ReplyKind::of(&replies[0]), ReplyKind::Message);
    }

    #[test]
    fn test_same_seed_same_decisions() {
        let run = |seed| {
            let store = InMemoryStore::new();
            let config = ChaosConfig::hostile(0.5, 0);
            let mut client = ChaosClient::new(store.connect(), config, seed);
            for _ in 0..32 {
                client
                    .send_command(Command::HGetAll { key: "k".into() })
                    .unwrap();
            }
            drain(&mut client).len()
        };
        assert_eq!(run(42), run(42));
    }
}
