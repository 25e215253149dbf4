// ── In-process transport ──
//
// A broker-less `Transport` for tests and embedded hosts. Outbound
// messages are recorded; inbound messages are injected with `inject()`
// and fanned out to registered channels when a subscription matches.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace, warn};

use crate::error::Error;
use crate::message::Message;
use crate::transport::{topic_matches, Publisher, Transport};

/// Loopback-free in-memory bus.
///
/// Cheaply cloneable; clones share state.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    started: AtomicBool,
    subscriptions: Mutex<BTreeSet<String>>,
    channels: DashMap<String, mpsc::Sender<Message>>,
    published: Mutex<Vec<Message>>,
    published_count: watch::Sender<usize>,
}

impl Default for Inner {
    fn default() -> Self {
        let (published_count, _) = watch::channel(0);
        Self {
            started: AtomicBool::new(false),
            subscriptions: Mutex::new(BTreeSet::new()),
            channels: DashMap::new(),
            published: Mutex::new(Vec::new()),
            published_count,
        }
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `message` as if it arrived from the broker.
    ///
    /// Returns the number of channels that accepted it. Messages on
    /// topics nobody subscribed to are dropped.
    pub async fn inject(&self, message: Message) -> usize {
        if !self.inner.started.load(Ordering::Acquire) {
            debug!(topic = %message.topic, "transport not started, dropping inbound message");
            return 0;
        }

        let subscribed = self
            .lock_subscriptions()
            .iter()
            .any(|filter| topic_matches(filter, &message.topic));
        if !subscribed {
            trace!(topic = %message.topic, "no subscription for inbound message");
            return 0;
        }

        let senders: Vec<(String, mpsc::Sender<Message>)> = self
            .inner
            .channels
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();

        let mut delivered = 0;
        for (id, tx) in senders {
            if tx.send(message.clone()).await.is_ok() {
                delivered += 1;
            } else {
                warn!(channel = %id, "inbound channel closed");
            }
        }
        delivered
    }

    /// Everything published so far, in publish order.
    pub fn published(&self) -> Vec<Message> {
        self.inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Published messages whose payload type equals `msg_type`.
    pub fn published_of_type(&self, msg_type: &str) -> Vec<Message> {
        self.published()
            .into_iter()
            .filter(|m| m.payload.msg_type == msg_type)
            .collect()
    }

    pub fn clear_published(&self) {
        self.inner
            .published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.inner.published_count.send_replace(0);
    }

    /// Wait until at least `count` messages have been published.
    pub async fn wait_published(&self, count: usize) {
        let mut rx = self.inner.published_count.subscribe();
        // The sender lives in `inner`, which outlives this borrow.
        let _ = rx.wait_for(|n| *n >= count).await;
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.lock_subscriptions().iter().cloned().collect()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    fn lock_subscriptions(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Publisher for MemoryTransport {
    async fn publish(&self, message: Message) -> Result<(), Error> {
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }

        trace!(topic = %message.topic, msg_type = %message.payload.msg_type, "publish");
        let count = {
            let mut published = self
                .inner
                .published
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            published.push(message);
            published.len()
        };
        self.inner.published_count.send_replace(count);
        Ok(())
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn start(&self) -> Result<(), Error> {
        self.inner.started.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.inner.started.store(false, Ordering::Release);
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<(), Error> {
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(Error::NotConnected);
        }
        self.lock_subscriptions().extend(topics.iter().cloned());
        Ok(())
    }

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), Error> {
        let mut subs = self.lock_subscriptions();
        for topic in topics {
            subs.remove(topic);
        }
        Ok(())
    }

    fn register_channel(&self, id: &str, capacity: usize) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.inner.channels.insert(id.to_owned(), tx);
        rx
    }

    fn unregister_channel(&self, id: &str) {
        self.inner.channels.remove(id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::address::{Address, MSG_TYPE_CMD, MSG_TYPE_EVT};
    use crate::message::FimpMessage;
    use tokio_test::{assert_err, assert_ok};

    fn adapter_cmd() -> Message {
        Message::new(
            Address::adapter(MSG_TYPE_CMD, "zigbee", "1"),
            FimpMessage::null("cmd.network.get_all_nodes", "zigbee"),
        )
    }

    #[tokio::test]
    async fn publish_requires_start() {
        let bus = MemoryTransport::new();
        assert_err!(bus.publish(adapter_cmd()).await);

        assert_ok!(bus.start().await);
        assert_ok!(bus.publish(adapter_cmd()).await);
        assert_eq!(bus.published().len(), 1);
    }

    #[tokio::test]
    async fn inject_delivers_only_subscribed_topics() {
        let bus = MemoryTransport::new();
        bus.start().await.unwrap();
        let mut rx = bus.register_channel("router", 4);

        assert_eq!(bus.inject(adapter_cmd()).await, 0);

        bus.subscribe(&["pt:j1/mt:cmd/rt:ad/rn:zigbee/ad:1".to_owned()])
            .await
            .unwrap();
        assert_eq!(bus.inject(adapter_cmd()).await, 1);

        let received = rx.recv().await.unwrap();
        assert_eq!(received.payload.msg_type, "cmd.network.get_all_nodes");
    }

    #[tokio::test]
    async fn published_of_type_filters() {
        let bus = MemoryTransport::new();
        bus.start().await.unwrap();
        bus.publish(adapter_cmd()).await.unwrap();
        bus.publish(Message::new(
            Address::adapter(MSG_TYPE_EVT, "zigbee", "1"),
            FimpMessage::null("evt.thing.exclusion_report", "zigbee"),
        ))
        .await
        .unwrap();

        assert_eq!(bus.published_of_type("evt.thing.exclusion_report").len(), 1);
        bus.clear_published();
        assert!(bus.published().is_empty());
    }
}
