// ── FIMP topic addressing ──
//
// A topic like `pt:j1/mt:cmd/rt:dev/rn:zigbee/ad:1/sv:out_bin_switch/ad:3_1`
// is a sequence of `key:value` segments. The first `ad` segment addresses
// the resource, the one after `sv` addresses the service.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub const PAYLOAD_TYPE_JSON: &str = "j1";

pub const MSG_TYPE_CMD: &str = "cmd";
pub const MSG_TYPE_EVT: &str = "evt";
pub const MSG_TYPE_RSP: &str = "rsp";

pub const RESOURCE_TYPE_DEVICE: &str = "dev";
pub const RESOURCE_TYPE_ADAPTER: &str = "ad";
pub const RESOURCE_TYPE_APP: &str = "app";
pub const RESOURCE_TYPE_DISCOVERY: &str = "discovery";

/// A parsed FIMP topic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Address {
    pub payload_type: String,
    pub msg_type: String,
    pub resource_type: String,
    pub resource_name: String,
    pub resource_address: String,
    pub service_name: String,
    pub service_address: String,
}

impl Address {
    /// Adapter-level address: `pt:j1/mt:<mt>/rt:ad/rn:<name>/ad:<address>`.
    pub fn adapter(msg_type: &str, name: &str, address: &str) -> Self {
        Self {
            payload_type: PAYLOAD_TYPE_JSON.into(),
            msg_type: msg_type.into(),
            resource_type: RESOURCE_TYPE_ADAPTER.into(),
            resource_name: name.into(),
            resource_address: address.into(),
            ..Self::default()
        }
    }

    /// Discovery address: `pt:j1/mt:<mt>/rt:discovery`.
    pub fn discovery(msg_type: &str) -> Self {
        Self {
            payload_type: PAYLOAD_TYPE_JSON.into(),
            msg_type: msg_type.into(),
            resource_type: RESOURCE_TYPE_DISCOVERY.into(),
            ..Self::default()
        }
    }

    /// Copy of this address with the message type switched to `evt`.
    pub fn event(&self) -> Self {
        self.with_msg_type(MSG_TYPE_EVT)
    }

    pub fn with_msg_type(&self, msg_type: &str) -> Self {
        Self {
            msg_type: msg_type.into(),
            ..self.clone()
        }
    }

    pub fn is_adapter(&self) -> bool {
        self.resource_type == RESOURCE_TYPE_ADAPTER
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut segments: Vec<String> = Vec::with_capacity(7);
        let mut push = |key: &str, value: &str| {
            if !value.is_empty() {
                segments.push(format!("{key}:{value}"));
            }
        };

        push("pt", &self.payload_type);
        push("mt", &self.msg_type);
        push("rt", &self.resource_type);
        push("rn", &self.resource_name);
        push("ad", &self.resource_address);
        push("sv", &self.service_name);
        push("ad", &self.service_address);

        write!(f, "{}", segments.join("/"))
    }
}

impl FromStr for Address {
    type Err = Error;

    /// Parse a topic. Missing `pt`/`mt` segments are allowed so that
    /// service topics declared without a prefix (`/rt:dev/rn:zw/ad:1/...`)
    /// parse as well.
    fn from_str(topic: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::InvalidAddress {
            topic: topic.to_owned(),
            reason: reason.to_owned(),
        };

        let mut address = Self::default();
        let mut seen_service = false;

        for segment in topic.split('/').filter(|s| !s.is_empty()) {
            let (key, value) = segment
                .split_once(':')
                .ok_or_else(|| invalid("segment without ':' separator"))?;

            match key {
                "pt" => address.payload_type = value.into(),
                "mt" => address.msg_type = value.into(),
                "rt" => address.resource_type = value.into(),
                "rn" => address.resource_name = value.into(),
                "sv" => {
                    address.service_name = value.into();
                    seen_service = true;
                }
                "ad" if seen_service => address.service_address = value.into(),
                "ad" => address.resource_address = value.into(),
                _ => return Err(invalid(&format!("unknown segment '{key}'"))),
            }
        }

        if address.resource_type.is_empty() && address.service_name.is_empty() {
            return Err(invalid("neither resource type nor service present"));
        }

        Ok(address)
    }
}
