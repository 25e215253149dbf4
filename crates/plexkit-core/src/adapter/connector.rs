// ── Device connectors ──
//
// Small capability traits a thing composes: every thing has a
// `ControllableConnector`; pinging is optional.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use super::report::{ConnectivityDetails, PingDetails};
use crate::error::CoreError;

/// Reports live connectivity of a device.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connectivity(&self) -> ConnectivityDetails;
}

/// A connector the adapter can open and close. Both calls must be
/// idempotent.
#[async_trait]
pub trait ControllableConnector: Connector {
    async fn connect(&self) -> Result<(), CoreError>;

    async fn disconnect(&self) -> Result<(), CoreError>;
}

#[async_trait]
pub trait Pinger: Send + Sync {
    async fn ping(&self) -> Result<PingDetails, CoreError>;
}

/// Connector with externally set connectivity. Useful for virtual things
/// and tests.
#[derive(Debug, Default)]
pub struct StaticConnector {
    details: Mutex<ConnectivityDetails>,
    connected: Mutex<bool>,
}

impl StaticConnector {
    pub fn new(details: ConnectivityDetails) -> Self {
        Self {
            details: Mutex::new(details),
            connected: Mutex::new(false),
        }
    }

    pub fn set(&self, details: ConnectivityDetails) {
        *self.details.lock().unwrap_or_else(PoisonError::into_inner) = details;
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Connector for StaticConnector {
    async fn connectivity(&self) -> ConnectivityDetails {
        self.details
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl ControllableConnector for StaticConnector {
    async fn connect(&self) -> Result<(), CoreError> {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        *self.connected.lock().unwrap_or_else(PoisonError::into_inner) = false;
        Ok(())
    }
}
