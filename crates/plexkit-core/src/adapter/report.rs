// ── Thing descriptors and reports ──
//
// Payload bodies published by adapters: inclusion and exclusion reports,
// connectivity and ping reports. Field names follow the FIMP object
// conventions. Unknown or empty enum values normalize to their
// `undefined`/`unknown` variants on decode.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};

// ── Message types ────────────────────────────────────────────────────

pub const EVT_THING_INCLUSION_REPORT: &str = "evt.thing.inclusion_report";
pub const EVT_THING_EXCLUSION_REPORT: &str = "evt.thing.exclusion_report";
pub const EVT_THING_CONNECTIVITY_REPORT: &str = "evt.thing.connectivity_report";
pub const EVT_THING_PING_REPORT: &str = "evt.thing.ping_report";
pub const EVT_NETWORK_ALL_NODES_REPORT: &str = "evt.network.all_nodes_report";

pub const CMD_THING_GET_INCLUSION_REPORT: &str = "cmd.thing.get_inclusion_report";
pub const CMD_THING_DELETE: &str = "cmd.thing.delete";
pub const CMD_THING_PING: &str = "cmd.thing.ping";
pub const CMD_NETWORK_GET_ALL_NODES: &str = "cmd.network.get_all_nodes";

/// Message property carrying the first-inclusion flag.
pub const PROP_NEW: &str = "new";

// ── Connectivity ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum ConnectionStatus {
    Up,
    #[default]
    #[serde(other)]
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Operationability {
    Sleep,
    Discovery,
    Update,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionQuality {
    High,
    Medium,
    Low,
    #[default]
    #[serde(other)]
    Undefined,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionType {
    Direct,
    Indirect,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Live connectivity of one thing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityDetails {
    pub connection_status: ConnectionStatus,
    #[serde(deserialize_with = "lenient_operationability")]
    pub operationability: Vec<Operationability>,
    pub connection_quality: ConnectionQuality,
    pub connection_type: ConnectionType,
}

impl ConnectivityDetails {
    pub fn up(connection_type: ConnectionType, quality: ConnectionQuality) -> Self {
        Self {
            connection_status: ConnectionStatus::Up,
            operationability: Vec::new(),
            connection_quality: quality,
            connection_type,
        }
    }

    pub fn down() -> Self {
        Self::default()
    }

    pub fn is_up(&self) -> bool {
        self.connection_status == ConnectionStatus::Up
    }

    /// Sorted, de-duplicated operationability so that equal states
    /// compare equal.
    pub fn normalized(mut self) -> Self {
        self.operationability.sort_unstable();
        self.operationability.dedup();
        self
    }
}

/// Drops operationability entries that are empty or unknown.
fn lenient_operationability<'de, D>(deserializer: D) -> Result<Vec<Operationability>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect())
}

/// Connectivity report of one thing, as published and as aggregated into
/// the all-nodes report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityReport {
    pub address: String,
    pub hash: String,
    pub alias: String,
    pub power_source: String,
    pub wakeup_interval: String,
    pub comm_tech: String,
    #[serde(flatten)]
    pub details: ConnectivityDetails,
}

impl ConnectivityReport {
    pub(crate) fn from_inclusion(report: &InclusionReport, details: ConnectivityDetails) -> Self {
        Self {
            address: report.address.clone(),
            hash: report.product_hash.clone(),
            alias: report.alias.clone(),
            power_source: report.power_source.clone(),
            wakeup_interval: report.wakeup_interval.clone(),
            comm_tech: report.comm_tech.clone(),
            details: details.normalized(),
        }
        .sanitized()
    }

    /// Fill empty descriptive fields with their defaults.
    pub fn sanitized(mut self) -> Self {
        if self.alias.is_empty() {
            self.alias.clone_from(&self.address);
        }
        if self.power_source.is_empty() {
            self.power_source = "ac".into();
        }
        if self.wakeup_interval.is_empty() {
            self.wakeup_interval = "-1".into();
        }
        if self.comm_tech.is_empty() {
            self.comm_tech = "unknown".into();
        }
        self
    }
}

// ── Ping ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum PingStatus {
    Success,
    #[default]
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingDetails {
    pub status: PingStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_nodes: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReport {
    pub address: String,
    #[serde(flatten)]
    pub details: PingDetails,
}

// ── Inclusion / exclusion ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    #[default]
    In,
    Out,
}

/// One message a service accepts (`in`) or emits (`out`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interface {
    #[serde(rename = "intf_t")]
    pub interface_type: InterfaceType,
    #[serde(rename = "msg_t")]
    pub msg_type: String,
    #[serde(rename = "val_t")]
    pub value_type: String,
    #[serde(rename = "ver")]
    pub version: String,
}

impl Interface {
    pub fn new(interface_type: InterfaceType, msg_type: &str, value_type: &str) -> Self {
        Self {
            interface_type,
            msg_type: msg_type.into(),
            value_type: value_type.into(),
            version: "1".into(),
        }
    }
}

/// Declaration of a service inside an inclusion report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSpecification {
    pub name: String,
    pub alias: String,
    /// Full bus topic of the service.
    pub address: String,
    pub enabled: bool,
    pub groups: Vec<String>,
    pub props: BTreeMap<String, serde_json::Value>,
    pub interfaces: Vec<Interface>,
}

impl Default for ServiceSpecification {
    fn default() -> Self {
        Self {
            name: String::new(),
            alias: String::new(),
            address: String::new(),
            enabled: true,
            groups: Vec::new(),
            props: BTreeMap::new(),
            interfaces: Vec::new(),
        }
    }
}

impl ServiceSpecification {
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn with_interface(mut self, interface: Interface) -> Self {
        self.interfaces.push(interface);
        self
    }
}

/// Announcement of a thing and its services.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InclusionReport {
    pub address: String,
    pub alias: String,
    pub product_hash: String,
    pub product_name: String,
    pub manufacturer_id: String,
    pub device_id: String,
    pub hw_ver: String,
    pub sw_ver: String,
    pub comm_tech: String,
    pub power_source: String,
    pub wakeup_interval: String,
    pub services: Vec<ServiceSpecification>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionReport {
    pub address: String,
}
