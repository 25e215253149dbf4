// ── Message router ──
//
// Receives inbound bus messages on a transport channel, picks the first
// routing whose predicates all match, and runs its handler. Replies and
// error reports go back out through the same transport. Handler errors
// never leave the router.

mod routing;

use std::sync::Arc;

use arc_swap::ArcSwap;
use plexkit_fimp::{FimpMessage, Message, Transport};
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace, warn};

use crate::config::RouterConfig;
use crate::error::CoreError;

pub use routing::{handler_fn, handler_lock, FnHandler, HandlerLock, MessageHandler, Predicate, Routing};

const COMPONENT: &str = "router";

/// Cheaply cloneable; clones share routings and lifecycle.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    config: RouterConfig,
    transport: Arc<dyn Transport>,
    routings: ArcSwap<Vec<Arc<Routing>>>,
    topics: ArcSwap<Vec<String>>,
    running: Mutex<Option<Running>>,
}

struct Running {
    cancel: CancellationToken,
    tracker: TaskTracker,
    dispatcher: JoinHandle<()>,
}

impl Router {
    pub fn new(config: RouterConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                config,
                transport,
                routings: ArcSwap::from_pointee(Vec::new()),
                topics: ArcSwap::from_pointee(Vec::new()),
                running: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.inner.config
    }

    /// Append a routing. Routings are tried in registration order.
    pub fn register_routing(&self, routing: Routing) {
        let routing = Arc::new(routing);
        self.inner.routings.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&routing));
            next
        });
    }

    pub fn register_routings(&self, routings: impl IntoIterator<Item = Routing>) {
        for routing in routings {
            self.register_routing(routing);
        }
    }

    /// Add topics subscribed on the next `start`.
    pub fn register_topics(&self, topics: impl IntoIterator<Item = String>) {
        let topics: Vec<String> = topics.into_iter().collect();
        self.inner.topics.rcu(|current| {
            let mut next = Vec::clone(current);
            for topic in &topics {
                if !next.contains(topic) {
                    next.push(topic.clone());
                }
            }
            next
        });
    }

    pub fn topics(&self) -> Vec<String> {
        self.inner.topics.load().as_ref().clone()
    }

    pub fn routing_count(&self) -> usize {
        self.inner.routings.load().len()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.running.lock().await.is_some()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Register the inbound channel, subscribe topics and begin dispatch.
    pub async fn start(&self) -> Result<(), CoreError> {
        let mut running = self.inner.running.lock().await;
        if running.is_some() {
            return Err(CoreError::AlreadyStarted {
                component: COMPONENT,
            });
        }

        let config = &self.inner.config;
        let rx = self
            .inner
            .transport
            .register_channel(&config.channel_id, config.channel_capacity);

        let topics = self.topics();
        if !topics.is_empty() {
            if let Err(e) = self.inner.transport.subscribe(&topics).await {
                self.inner.transport.unregister_channel(&config.channel_id);
                return Err(e.into());
            }
        }

        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let dispatcher = tokio::spawn(dispatch_loop(
            Arc::clone(&self.inner),
            rx,
            cancel.clone(),
            tracker.clone(),
        ));

        *running = Some(Running {
            cancel,
            tracker,
            dispatcher,
        });
        debug!(topics = topics.len(), routings = self.routing_count(), "router started");
        Ok(())
    }

    /// Unsubscribe, stop accepting messages and wait for in-flight handlers.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let Some(Running {
            cancel,
            tracker,
            dispatcher,
        }) = self.inner.running.lock().await.take()
        else {
            return Err(CoreError::NotStarted {
                component: COMPONENT,
            });
        };

        let topics = self.topics();
        if !topics.is_empty() {
            if let Err(e) = self.inner.transport.unsubscribe(&topics).await {
                warn!(error = %e, "unsubscribe failed during router stop");
            }
        }

        cancel.cancel();
        if let Err(e) = dispatcher.await {
            error!(error = %e, "router dispatcher terminated abnormally");
        }
        self.inner
            .transport
            .unregister_channel(&self.inner.config.channel_id);

        tracker.close();
        tracker.wait().await;
        debug!("router stopped");
        Ok(())
    }
}

// ── Dispatch ─────────────────────────────────────────────────────────

async fn dispatch_loop(
    inner: Arc<RouterInner>,
    mut rx: mpsc::Receiver<Message>,
    cancel: CancellationToken,
    tracker: TaskTracker,
) {
    let permits = Arc::new(Semaphore::new(inner.config.concurrency.max(1)));

    loop {
        let message = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            permit = Arc::clone(&permits).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let inner = Arc::clone(&inner);
        tracker.spawn(async move {
            dispatch(&inner, message).await;
            drop(permit);
        });
    }
}

async fn dispatch(inner: &RouterInner, message: Message) {
    let routing = {
        let routings = inner.routings.load();
        routings.iter().find(|r| r.matches(&message)).cloned()
    };
    let Some(routing) = routing else {
        trace!(
            topic = %message.topic,
            msg_type = %message.payload.msg_type,
            "no routing matched, dropping message"
        );
        return;
    };

    let result = {
        let _guard = match &routing.lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };
        routing.handler.handle(&message).await
    };

    match result {
        Ok(Some(reply)) => publish_reply(inner, &message, reply).await,
        Ok(None) => {}
        Err(e) => {
            warn!(
                topic = %message.topic,
                msg_type = %message.payload.msg_type,
                error = %e,
                "message handler failed"
            );
            match message.error_report(&e) {
                Ok(report) => publish(inner, report).await,
                Err(e) => warn!(error = %e, "cannot address error report"),
            }
        }
    }
}

async fn publish_reply(inner: &RouterInner, request: &Message, reply: FimpMessage) {
    match request.reply(reply) {
        Ok(reply) => publish(inner, reply).await,
        Err(e) => warn!(topic = %request.topic, error = %e, "cannot address reply"),
    }
}

async fn publish(inner: &RouterInner, message: Message) {
    let topic = message.topic.clone();
    if let Err(e) = inner.transport.publish(message).await {
        warn!(topic = %topic, error = %e, "publish failed");
    }
}
