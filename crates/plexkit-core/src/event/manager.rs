// ── Event manager ──
//
// Fan-out of in-process events to filtered subscriptions. Publishing never
// blocks: a subscriber whose buffer is full loses the event.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_core::Stream;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::{Event, EventFilter};

struct Subscription {
    filter: EventFilter,
    tx: mpsc::Sender<Event>,
    handle: EventSubscription,
    /// Transient wait-for subscriptions drop surplus events quietly.
    transient: bool,
}

/// Cloneable handle to one subscription's buffer.
///
/// Clones share the same receiver; each event is received once.
#[derive(Clone)]
pub struct EventSubscription {
    id: Arc<str>,
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
}

impl EventSubscription {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next event, or `None` once the subscription is removed and drained.
    pub async fn recv(&self) -> Option<Event> {
        self.rx.lock().await.recv().await
    }

    /// Next buffered event without waiting.
    ///
    /// Also `None` while another clone is parked in [`recv`](Self::recv):
    /// that clone holds the receiver and takes the next event itself.
    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Convert into a `Stream` of events.
    pub fn into_stream(self) -> impl Stream<Item = Event> + Send + 'static {
        futures_util::stream::unfold(self, |sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}

/// Registry of event subscriptions. Cheaply cloneable; clones share state.
#[derive(Clone, Default)]
pub struct EventManager {
    subscriptions: Arc<DashMap<String, Subscription>>,
}

impl EventManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to every subscription whose filter accepts it.
    pub fn publish(&self, event: &Event) {
        let mut closed = Vec::new();

        for entry in self.subscriptions.iter() {
            let (id, sub) = entry.pair();
            if !sub.filter.matches(event) {
                continue;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) if sub.transient => {
                    trace!(subscriber = %id, "transient subscriber already satisfied");
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        subscriber = %id,
                        domain = %event.domain,
                        class = %event.class,
                        "subscriber buffer full, event dropped"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id.clone()),
            }
        }

        for id in closed {
            debug!(subscriber = %id, "removing closed subscription");
            self.subscriptions.remove(&id);
        }
    }

    /// Subscribe under `id` with a buffer of `buffer` events.
    ///
    /// Subscribing again with the same `id` returns the existing
    /// subscription; `buffer` and `filters` are ignored in that case.
    pub fn subscribe(
        &self,
        id: &str,
        buffer: usize,
        filters: impl IntoIterator<Item = EventFilter>,
    ) -> EventSubscription {
        self.subscribe_inner(id, buffer, filters, false)
    }

    /// Remove a subscription. Unknown IDs are ignored.
    pub fn unsubscribe(&self, id: &str) {
        if self.subscriptions.remove(id).is_some() {
            debug!(subscriber = %id, "unsubscribed");
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Resolve with the first matching event published after this call,
    /// or `None` once `timeout` elapses.
    ///
    /// The transient subscription is registered before this returns and
    /// is removed when the future completes or is dropped.
    pub fn wait_for(
        &self,
        timeout: Duration,
        filters: impl IntoIterator<Item = EventFilter>,
    ) -> impl Future<Output = Option<Event>> + Send + 'static {
        let id = format!("wait-for-{}", Uuid::new_v4());
        let subscription = self.subscribe_inner(&id, 1, filters, true);
        let guard = Unsubscribe {
            manager: self.clone(),
            id,
        };

        async move {
            let _guard = guard;
            tokio::time::timeout(timeout, subscription.recv())
                .await
                .ok()
                .flatten()
        }
    }

    fn subscribe_inner(
        &self,
        id: &str,
        buffer: usize,
        filters: impl IntoIterator<Item = EventFilter>,
        transient: bool,
    ) -> EventSubscription {
        self.subscriptions
            .entry(id.to_owned())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(buffer.max(1));
                debug!(subscriber = %id, buffer, "subscribed");
                Subscription {
                    filter: EventFilter::And(filters.into_iter().collect()),
                    tx,
                    handle: EventSubscription {
                        id: Arc::from(id),
                        rx: Arc::new(Mutex::new(rx)),
                    },
                    transient,
                }
            })
            .handle
            .clone()
    }
}

struct Unsubscribe {
    manager: EventManager,
    id: String,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.manager.unsubscribe(&self.id);
    }
}
