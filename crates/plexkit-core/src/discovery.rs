// ── Discovery ──
//
// Answers `cmd.discovery.request` broadcasts on `pt:j1/mt:cmd/rt:discovery`
// with this runtime's resource descriptor.

use plexkit_fimp::address::MSG_TYPE_CMD;
use plexkit_fimp::{Address, FimpMessage, Message};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::router::{handler_fn, Predicate, Routing};

pub const CMD_DISCOVERY_REQUEST: &str = "cmd.discovery.request";
pub const EVT_DISCOVERY_REPORT: &str = "evt.discovery.report";
pub const SERVICE_SYSTEM: &str = "system";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterInfo {
    pub technology: String,
    pub fw_version: String,
    pub hw_dependency: String,
    pub network_management_type: String,
}

/// Self-description published in discovery reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceDescriptor {
    pub resource_name: String,
    pub resource_type: String,
    pub resource_full_name: String,
    pub description: String,
    pub author: String,
    pub version: String,
    pub is_instance_configurable: bool,
    pub instance_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adapter_info: Option<AdapterInfo>,
}

/// Topic to subscribe for discovery requests.
pub fn discovery_topic() -> String {
    Address::discovery(MSG_TYPE_CMD).to_string()
}

/// Routing replying to discovery requests with `descriptor`. The router
/// publishes the reply on `pt:j1/mt:evt/rt:discovery` unless the request
/// names a `resp_to` topic.
pub fn discovery_routing(descriptor: ResourceDescriptor) -> Routing {
    Routing::new(
        handler_fn(move |message: Message| report(descriptor.clone(), message)),
        [
            Predicate::for_topic(discovery_topic()),
            Predicate::for_type(CMD_DISCOVERY_REQUEST),
        ],
    )
}

async fn report(
    descriptor: ResourceDescriptor,
    _request: Message,
) -> Result<Option<FimpMessage>, CoreError> {
    Ok(Some(FimpMessage::object(EVT_DISCOVERY_REPORT, SERVICE_SYSTEM, &descriptor)?))
}
