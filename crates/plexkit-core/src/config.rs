// ── Runtime configuration ──
//
// Tuning for the router and identity for adapters. The host builds these
// (from its own configuration store or by hand) and hands them in; core
// never reads configuration files for itself.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Router channel and concurrency tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Name of the inbound channel registered with the transport.
    pub channel_id: String,
    /// Buffer size of the inbound channel.
    pub channel_capacity: usize,
    /// Upper bound on handlers running at once.
    pub concurrency: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            channel_id: "router".into(),
            channel_capacity: 128,
            concurrency: 16,
        }
    }
}

/// Adapter identity and state location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Resource name, e.g. `zigbee`.
    pub name: String,
    /// Resource address of this adapter instance.
    pub address: String,
    /// Directory holding `adapter.json`.
    pub data_dir: PathBuf,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            name: "adapter".into(),
            address: "1".into(),
            data_dir: PathBuf::from("data"),
        }
    }
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>, address: impl Into<String>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            data_dir: data_dir.into(),
        }
    }
}
