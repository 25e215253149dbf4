// ── In-process events ──
//
// A side channel for lifecycle and connectivity observations. Events never
// touch the bus; components publish them on the `EventManager` and
// interested parts of the host subscribe with filters.

mod filter;
mod manager;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::EnumDiscriminants;

pub use filter::EventFilter;
pub use manager::{EventManager, EventSubscription};

pub const DOMAIN_ADAPTER: &str = "adapter";
pub const DOMAIN_APP: &str = "app";

pub const CLASS_INCLUSION_REPORT_SENT: &str = "thing.inclusion_report_sent";
pub const CLASS_EXCLUSION_REPORT_SENT: &str = "thing.exclusion_report_sent";
pub const CLASS_CONNECTIVITY_CHANGED: &str = "thing.connectivity_changed";

/// Typed event body. The variant is the event's runtime kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, EnumDiscriminants)]
#[strum_discriminants(name(EventKind), derive(Hash, strum::Display))]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    InclusionReportSent { address: String, is_new: bool },
    ExclusionReportSent { address: String },
    ConnectivityChanged { address: String, status: String },
    Custom { data: serde_json::Value },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub domain: String,
    pub class: String,
    pub payload: Option<EventPayload>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn new(domain: impl Into<String>, class: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            domain: domain.into(),
            class: class.into(),
            payload: Some(payload),
            created_at: Utc::now(),
        }
    }

    /// An event without a payload.
    pub fn bare(domain: impl Into<String>, class: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            class: class.into(),
            payload: None,
            created_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> Option<EventKind> {
        self.payload.as_ref().map(EventKind::from)
    }
}
