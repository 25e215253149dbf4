// ── Services ──
//
// A service is a topic-addressed capability of a thing. It holds a
// publisher for its own reports but no reference back to the thing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use plexkit_fimp::address::{MSG_TYPE_EVT, PAYLOAD_TYPE_JSON};
use plexkit_fimp::{Address, FimpMessage, Message, Publisher};

use super::report::ServiceSpecification;
use crate::error::CoreError;

pub struct Service {
    spec: ServiceSpecification,
    address: Address,
    enabled: AtomicBool,
    publisher: Arc<dyn Publisher>,
}

impl Service {
    pub fn new(spec: ServiceSpecification, publisher: Arc<dyn Publisher>) -> Result<Self, CoreError> {
        let address: Address = spec.address.parse()?;
        Ok(Self {
            enabled: AtomicBool::new(spec.enabled),
            spec,
            address,
            publisher,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// The declared bus topic.
    pub fn topic(&self) -> &str {
        &self.spec.address
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Current specification, with the live `enabled` flag.
    pub fn specification(&self) -> ServiceSpecification {
        ServiceSpecification {
            enabled: self.enabled(),
            ..self.spec.clone()
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Whether the service declares an interface for `msg_type`.
    pub fn supports(&self, msg_type: &str) -> bool {
        self.spec.interfaces.iter().any(|i| i.msg_type == msg_type)
    }

    /// Publish `payload` on this service's topic as an event.
    pub async fn send_message(&self, mut payload: FimpMessage) -> Result<(), CoreError> {
        payload.service.clone_from(&self.spec.name);
        let mut address = self.address.with_msg_type(MSG_TYPE_EVT);
        if address.payload_type.is_empty() {
            address.payload_type = PAYLOAD_TYPE_JSON.into();
        }
        let message = Message::new(address, payload);
        self.publisher.publish(message).await?;
        Ok(())
    }

    /// Topic with payload and message type removed, used for suffix
    /// matching of inbound topics.
    pub(crate) fn topic_key(&self) -> String {
        Address {
            payload_type: String::new(),
            msg_type: String::new(),
            ..self.address.clone()
        }
        .to_string()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.spec.name)
            .field("topic", &self.spec.address)
            .field("enabled", &self.enabled())
            .finish_non_exhaustive()
    }
}

/// True when `key` matches the trailing whole segments of `topic`.
pub(crate) fn topic_has_suffix(topic: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }
    match topic.strip_suffix(key) {
        Some("") => true,
        Some(head) => head.ends_with('/'),
        None => false,
    }
}
