// ── Bus transport contracts ──
//
// The MQTT client itself lives outside this workspace. Everything above
// the wire talks to it through these two traits: `Publisher` for
// outbound messages, `Transport` for the full lifecycle and inbound
// delivery on named channels.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Error;
use crate::message::Message;

/// Publish-only capability. Services and things hold this instead of
/// a reference to the whole transport.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, message: Message) -> Result<(), Error>;
}

/// A bus client: lifecycle, topic subscriptions, and inbound channels.
///
/// Implementations must be safe to share between tasks; publish and
/// subscribe may be called concurrently.
#[async_trait]
pub trait Transport: Publisher {
    async fn start(&self) -> Result<(), Error>;

    async fn stop(&self) -> Result<(), Error>;

    async fn subscribe(&self, topics: &[String]) -> Result<(), Error>;

    async fn unsubscribe(&self, topics: &[String]) -> Result<(), Error>;

    /// Register a named inbound channel. Every message received on a
    /// subscribed topic is delivered to every registered channel.
    fn register_channel(&self, id: &str, capacity: usize) -> mpsc::Receiver<Message>;

    fn unregister_channel(&self, id: &str);
}

/// MQTT-style topic filter match (`+` one level, `#` the remainder).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
