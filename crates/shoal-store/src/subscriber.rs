//! Subscriber - reference-counted channel subscriptions on a dedicated connection
//!
//! Several readers may follow the same key; they share one underlying
//! subscription. Messages are collected into a per-tick buffer that is
//! cleared at the start of every tick: a consumer that does not look in a
//! given tick loses that tick's messages.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use shoal_core::ShoalResult;

use crate::{Command, Reply, StoreClient};

/// A push received on a subscribed connection
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PushMessage {
    /// Subscription acknowledged
    Subscribed { channel: String },
    /// Unsubscription acknowledged
    Unsubscribed { channel: String },
    /// Payload published on a channel
    Message { channel: String, payload: Bytes },
}

impl PushMessage {
    /// Interpret a reply as a pub/sub push
    pub fn parse(reply: &Reply) -> Option<Self> {
        let items = reply.as_array()?;
        if items.len() != 3 {
            return None;
        }

        let kind = items[0].as_bulk()?;
        let channel = String::from_utf8(items[1].as_bulk()?.to_vec()).ok()?;

        match kind.as_ref() {
            b"subscribe" => Some(PushMessage::Subscribed { channel }),
            b"unsubscribe" => Some(PushMessage::Unsubscribed { channel }),
            b"message" => Some(PushMessage::Message {
                channel,
                payload: items[2].as_bulk()?.clone(),
            }),
            _ => None,
        }
    }
}

/// Subscription manager owning the pub/sub connection
pub struct Subscriber {
    client: Box<dyn StoreClient>,
    refcounts: HashMap<String, usize>,
    /// SUBSCRIBE commands sent per channel and not yet acknowledged
    pending: HashMap<String, u32>,
    active: HashSet<String>,
    messages: HashMap<String, Vec<Bytes>>,
    unrecognized: u64,
}

impl Subscriber {
    pub fn new(client: Box<dyn StoreClient>) -> Self {
        Subscriber {
            client,
            refcounts: HashMap::new(),
            pending: HashMap::new(),
            active: HashSet::new(),
            messages: HashMap::new(),
            unrecognized: 0,
        }
    }

    /// Add a reference to a channel, subscribing on the first one
    pub fn subscribe(&mut self, channel: &str) -> ShoalResult<()> {
        if let Some(count) = self.refcounts.get_mut(channel) {
            *count += 1;
            return Ok(());
        }

        self.client.send_command(Command::Subscribe {
            channel: channel.to_string(),
        })?;
        self.refcounts.insert(channel.to_string(), 1);
        *self.pending.entry(channel.to_string()).or_insert(0) += 1;
        tracing::debug!(channel, "subscribing");
        Ok(())
    }

    /// Drop a reference to a channel, unsubscribing on the last one
    pub fn unsubscribe(&mut self, channel: &str) -> ShoalResult<()> {
        let Some(count) = self.refcounts.get_mut(channel) else {
            return Ok(());
        };

        if *count > 1 {
            *count -= 1;
            return Ok(());
        }

        // Outstanding acks stay counted so a resubscribe waits for its own
        self.refcounts.remove(channel);
        self.active.remove(channel);
        self.messages.remove(channel);
        tracing::debug!(channel, "unsubscribing");
        self.client.send_command(Command::Unsubscribe {
            channel: channel.to_string(),
        })?;
        Ok(())
    }

    /// Start a tick: clear last tick's messages and drain the connection
    pub fn tick(&mut self) {
        self.messages.clear();

        while let Some((_, reply)) = self.client.try_receive() {
            match PushMessage::parse(&reply) {
                Some(PushMessage::Message { channel, payload }) => {
                    if self.refcounts.contains_key(&channel) {
                        self.messages.entry(channel).or_default().push(payload);
                    }
                }
                Some(PushMessage::Subscribed { channel }) => self.acknowledge(channel),
                Some(PushMessage::Unsubscribed { .. }) => {}
                None => {
                    self.unrecognized += 1;
                    tracing::warn!(?reply, "unrecognized reply on subscriber connection");
                }
            }
        }
    }

    /// Count one SUBSCRIBE ack; only the last outstanding one activates the
    /// channel, and only if it is still referenced
    fn acknowledge(&mut self, channel: String) {
        let Some(outstanding) = self.pending.get_mut(&channel) else {
            return;
        };
        *outstanding = outstanding.saturating_sub(1);
        if *outstanding > 0 {
            return;
        }
        self.pending.remove(&channel);
        if self.refcounts.contains_key(&channel) {
            self.active.insert(channel);
        }
    }

    /// Check whether the backend has acknowledged the subscription
    pub fn is_active(&self, channel: &str) -> bool {
        self.active.contains(channel)
    }

    /// Check whether a subscription is sent but not yet acknowledged
    pub fn is_pending(&self, channel: &str) -> bool {
        self.refcounts.contains_key(channel) && self.pending.contains_key(channel)
    }

    /// Number of references held on a channel
    pub fn refcount(&self, channel: &str) -> usize {
        self.refcounts.get(channel).copied().unwrap_or(0)
    }

    /// Messages received on a channel this tick, in publish order
    pub fn messages(&self, channel: &str) -> &[Bytes] {
        self.messages.get(channel).map_or(&[], |m| m.as_slice())
    }

    /// Replies that were not pub/sub pushes
    pub fn unrecognized(&self) -> u64 {
        self.unrecognized
    }

    /// Flush the subscription connection
    pub fn flush(&mut self) -> ShoalResult<()> {
        self.client.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use shoal_core::CommandHandle;

    use crate::InMemoryStore;

    /// Hands a shared client to the subscriber while the test keeps a handle
    struct Shared(Arc<Mutex<StepClient>>);

    impl StoreClient for Shared {
        fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
            self.0.lock().send_command(command)
        }

        fn try_receive(&mut self) -> Option<(CommandHandle, Reply)> {
            self.0.lock().try_receive()
        }

        fn flush(&mut self) -> ShoalResult<()> {
            self.0.lock().flush()
        }
    }

    #[test]
    fn test_refcounted_subscription() {
        let store = InMemoryStore::new();
        let mut subscriber = Subscriber::new(Box::new(store.connect()));

        subscriber.subscribe("e1").unwrap();
        subscriber.subscribe("e1").unwrap();
        assert_eq!(subscriber.refcount("e1"), 2);
        assert_eq!(store.subscriber_count("e1"), 1);
        assert!(subscriber.is_pending("e1"));

        subscriber.tick();
        assert!(subscriber.is_active("e1"));

        subscriber.unsubscribe("e1").unwrap();
        assert_eq!(store.subscriber_count("e1"), 1);
        assert!(subscriber.is_active("e1"));

        subscriber.unsubscribe("e1").unwrap();
        assert_eq!(store.subscriber_count("e1"), 0);
        assert!(!subscriber.is_active("e1"));
    }

    #[test]
    fn test_messages_are_cleared_every_tick() {
        let store = InMemoryStore::new();
        let mut subscriber = Subscriber::new(Box::new(store.connect()));
        let mut publisher = store.connect();

        subscriber.subscribe("e1").unwrap();
        subscriber.tick();

        for payload in [&b"a"[..], &b"b"[..]] {
            publisher
                .send_command(Command::Publish {
                    channel: "e1".into(),
                    payload: Bytes::from_static(payload),
                })
                .unwrap();
        }

        subscriber.tick();
        assert_eq!(subscriber.messages("e1").len(), 2);
        assert_eq!(subscriber.messages("e1")[0].as_ref(), b"a");

        subscriber.tick();
        assert!(subscriber.messages("e1").is_empty());
    }

    /// Connection whose replies are handed out one `release` at a time
    struct StepClient {
        inner: crate::InMemoryClient,
        held: VecDeque<(CommandHandle, Reply)>,
        ready: usize,
    }

    impl StepClient {
        fn release(&mut self, n: usize) {
            self.ready += n;
        }
    }

    impl StoreClient for StepClient {
        fn send_command(&mut self, command: Command) -> ShoalResult<CommandHandle> {
            self.inner.send_command(command)
        }

        fn try_receive(&mut self) -> Option<(CommandHandle, Reply)> {
            while let Some(reply) = self.inner.try_receive() {
                self.held.push_back(reply);
            }
            if self.ready == 0 {
                return None;
            }
            let reply = self.held.pop_front()?;
            self.ready -= 1;
            Some(reply)
        }

        fn flush(&mut self) -> ShoalResult<()> {
            self.inner.flush()
        }
    }

    #[test]
    fn test_resubscribe_waits_for_its_own_ack() {
        let store = InMemoryStore::new();
        let client = Arc::new(Mutex::new(StepClient {
            inner: store.connect(),
            held: VecDeque::new(),
            ready: 0,
        }));
        let mut subscriber = Subscriber::new(Box::new(Shared(Arc::clone(&client))));

        subscriber.subscribe("e1").unwrap();
        subscriber.unsubscribe("e1").unwrap();
        subscriber.subscribe("e1").unwrap();
        assert!(subscriber.is_pending("e1"));

        // First subscribe ack, then the unsubscribe ack
        client.lock().release(2);
        subscriber.tick();
        assert!(!subscriber.is_active("e1"));
        assert!(subscriber.is_pending("e1"));

        client.lock().release(1);
        subscriber.tick();
        assert!(subscriber.is_active("e1"));
        assert!(!subscriber.is_pending("e1"));
    }

    #[test]
    fn test_late_ack_after_release_is_ignored() {
        let store = InMemoryStore::new();
        let mut subscriber = Subscriber::new(Box::new(store.connect()));

        subscriber.subscribe("e1").unwrap();
        subscriber.unsubscribe("e1").unwrap();
        subscriber.tick();

        assert!(!subscriber.is_active("e1"));
        assert!(!subscriber.is_pending("e1"));
        assert_eq!(subscriber.refcount("e1"), 0);
    }

    #[test]
    fn test_parse_push_messages() {
        let reply = Reply::Array(Some(vec![
            Reply::bulk(&b"message"[..]),
            Reply::bulk(&b"idx"[..]),
            Reply::bulk(&b"data"[..]),
        ]));
        assert_eq!(
            PushMessage::parse(&reply),
            Some(PushMessage::Message {
                channel: "idx".into(),
                payload: Bytes::from_static(b"data"),
            })
        );
        assert_eq!(PushMessage::parse(&Reply::ok()), None);
    }
}
