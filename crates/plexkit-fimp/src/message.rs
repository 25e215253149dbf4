// ── FIMP messages ──
//
// `FimpMessage` is the JSON body; `Message` pairs it with the topic it
// travels on. Wire field names follow the FIMP envelope (`serv`, `val_t`,
// `resp_to`, ...).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::Address;
use crate::error::Error;
use crate::value::Value;

pub const EVT_ERROR_REPORT: &str = "evt.error.report";

/// JSON body of a FIMP message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMessage", into = "WireMessage")]
pub struct FimpMessage {
    pub msg_type: String,
    pub service: String,
    pub value: Value,
    pub props: BTreeMap<String, String>,
    pub tags: Vec<String>,
    pub uid: String,
    pub correlation_id: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub response_to: String,
    pub version: String,
}

impl FimpMessage {
    pub fn new(msg_type: impl Into<String>, service: impl Into<String>, value: Value) -> Self {
        Self {
            msg_type: msg_type.into(),
            service: service.into(),
            value,
            props: BTreeMap::new(),
            tags: Vec::new(),
            uid: Uuid::new_v4().to_string(),
            correlation_id: String::new(),
            created_at: Utc::now(),
            source: String::new(),
            response_to: String::new(),
            version: "1".into(),
        }
    }

    pub fn null(msg_type: impl Into<String>, service: impl Into<String>) -> Self {
        Self::new(msg_type, service, Value::Null)
    }

    /// Build a message carrying an `object` value.
    pub fn object<T: Serialize>(
        msg_type: impl Into<String>,
        service: impl Into<String>,
        value: &T,
    ) -> Result<Self, Error> {
        Ok(Self::new(msg_type, service, Value::object(value)?))
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn with_response_to(mut self, topic: impl Into<String>) -> Self {
        self.response_to = topic.into();
        self
    }

    /// Mark this message as the answer to `request`.
    pub fn correlated_with(mut self, request: &FimpMessage) -> Self {
        self.correlation_id.clone_from(&request.uid);
        self
    }

    pub fn property(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn from_slice(body: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(body)?)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// A FIMP message bound to its topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub address: Address,
    pub payload: FimpMessage,
}

impl Message {
    pub fn new(address: Address, payload: FimpMessage) -> Self {
        Self {
            topic: address.to_string(),
            address,
            payload,
        }
    }

    /// Decode an inbound message as received from the broker.
    pub fn from_raw(topic: &str, body: &[u8]) -> Result<Self, Error> {
        Ok(Self {
            topic: topic.to_owned(),
            address: topic.parse()?,
            payload: FimpMessage::from_slice(body)?,
        })
    }

    /// Where answers to this message go: the explicit `resp_to` topic if
    /// set, else the event variant of the source address.
    pub fn reply_address(&self) -> Result<Address, Error> {
        if self.payload.response_to.is_empty() {
            Ok(self.address.event())
        } else {
            self.payload.response_to.parse()
        }
    }

    /// Wrap `payload` as a reply to this message.
    pub fn reply(&self, payload: FimpMessage) -> Result<Self, Error> {
        let payload = payload.correlated_with(&self.payload);
        let address = self.reply_address()?;
        let topic = if self.payload.response_to.is_empty() {
            address.to_string()
        } else {
            self.payload.response_to.clone()
        };
        Ok(Self {
            topic,
            address,
            payload,
        })
    }

    /// Build the `evt.error.report` answering this message.
    pub fn error_report(&self, error: &dyn std::fmt::Display) -> Result<Self, Error> {
        let payload = FimpMessage::new(
            EVT_ERROR_REPORT,
            self.payload.service.clone(),
            Value::String(error.to_string()),
        );
        self.reply(payload)
    }
}

// ── Wire representation ──────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct WireMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(rename = "serv")]
    service: String,
    val_t: String,
    #[serde(default)]
    val: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    props: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tags: Option<Vec<String>>,
    #[serde(default)]
    uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    corid: String,
    #[serde(default = "Utc::now")]
    ctime: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    src: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    resp_to: String,
    #[serde(default)]
    ver: String,
}

impl TryFrom<WireMessage> for FimpMessage {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        Ok(Self {
            msg_type: wire.msg_type,
            service: wire.service,
            value: Value::from_wire(&wire.val_t, wire.val)?,
            props: wire.props.unwrap_or_default(),
            tags: wire.tags.unwrap_or_default(),
            uid: wire.uid,
            correlation_id: wire.corid,
            created_at: wire.ctime,
            source: wire.src,
            response_to: wire.resp_to,
            version: wire.ver,
        })
    }
}

impl From<FimpMessage> for WireMessage {
    fn from(msg: FimpMessage) -> Self {
        let (val_t, val) = msg.value.to_wire();
        Self {
            msg_type: msg.msg_type,
            service: msg.service,
            val_t: val_t.to_string(),
            val,
            props: (!msg.props.is_empty()).then_some(msg.props),
            tags: (!msg.tags.is_empty()).then_some(msg.tags),
            uid: msg.uid,
            corid: msg.correlation_id,
            ctime: msg.created_at,
            src: msg.source,
            resp_to: msg.response_to,
            ver: msg.version,
        }
    }
}
