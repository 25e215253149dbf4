// ── Routings ──
//
// A routing pairs a conjunction of predicates with a handler. Handlers may
// share an external lock that is held for the whole handler body.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use plexkit_fimp::{FimpMessage, Message};
use tokio::sync::Mutex;

use crate::error::CoreError;

/// Lock shared by handlers that must not run concurrently.
pub type HandlerLock = Arc<Mutex<()>>;

pub fn handler_lock() -> HandlerLock {
    Arc::new(Mutex::new(()))
}

/// Processes one inbound message. A returned payload is published as the
/// reply; an error becomes an `evt.error.report`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message) -> Result<Option<FimpMessage>, CoreError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<FimpMessage>, CoreError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<FimpMessage>, CoreError>> + Send,
{
    async fn handle(&self, message: &Message) -> Result<Option<FimpMessage>, CoreError> {
        (self.0)(message.clone()).await
    }
}

/// One condition of a routing.
pub enum Predicate {
    /// Exact topic match.
    Topic(String),
    /// Payload `serv` equals the name.
    Service(String),
    /// Payload `serv` starts with the prefix.
    ServicePrefix(String),
    /// Payload `type` equals the message type.
    Type(String),
    Custom(Box<dyn Fn(&Message) -> bool + Send + Sync>),
}

impl Predicate {
    pub fn for_topic(topic: impl Into<String>) -> Self {
        Self::Topic(topic.into())
    }

    pub fn for_service(name: impl Into<String>) -> Self {
        Self::Service(name.into())
    }

    pub fn for_service_prefix(prefix: impl Into<String>) -> Self {
        Self::ServicePrefix(prefix.into())
    }

    pub fn for_type(msg_type: impl Into<String>) -> Self {
        Self::Type(msg_type.into())
    }

    pub fn matches(&self, message: &Message) -> bool {
        match self {
            Self::Topic(t) => message.topic == *t,
            Self::Service(s) => message.payload.service == *s,
            Self::ServicePrefix(p) => message.payload.service.starts_with(p.as_str()),
            Self::Type(t) => message.payload.msg_type == *t,
            Self::Custom(f) => f(message),
        }
    }
}

impl std::fmt::Debug for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Topic(t) => f.debug_tuple("Topic").field(t).finish(),
            Self::Service(s) => f.debug_tuple("Service").field(s).finish(),
            Self::ServicePrefix(p) => f.debug_tuple("ServicePrefix").field(p).finish(),
            Self::Type(t) => f.debug_tuple("Type").field(t).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

pub struct Routing {
    predicates: Vec<Predicate>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) lock: Option<HandlerLock>,
}

impl Routing {
    pub fn new(
        handler: impl MessageHandler + 'static,
        predicates: impl IntoIterator<Item = Predicate>,
    ) -> Self {
        Self {
            predicates: predicates.into_iter().collect(),
            handler: Arc::new(handler),
            lock: None,
        }
    }

    /// Hold `lock` while the handler runs.
    pub fn with_lock(mut self, lock: HandlerLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// All predicates hold. A routing without predicates matches everything.
    pub fn matches(&self, message: &Message) -> bool {
        self.predicates.iter().all(|p| p.matches(message))
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }
}

impl std::fmt::Debug for Routing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Routing")
            .field("predicates", &self.predicates)
            .field("locked", &self.lock.is_some())
            .finish_non_exhaustive()
    }
}
