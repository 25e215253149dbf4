// ── Application lifecycle ──
//
// Application and bus-connection state, observable through watch
// channels. Task voters read the current state before each tick.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::info;

use crate::task::Voter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AppState {
    Starting,
    StartupError,
    NotConfigured,
    Configured,
    Running,
    Terminating,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// Shared lifecycle state. Cheaply cloneable; clones share state.
#[derive(Clone)]
pub struct Lifecycle {
    inner: Arc<LifecycleInner>,
}

struct LifecycleInner {
    app: watch::Sender<AppState>,
    connection: watch::Sender<ConnectionState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (app, _) = watch::channel(AppState::Starting);
        let (connection, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(LifecycleInner { app, connection }),
        }
    }

    pub fn app_state(&self) -> AppState {
        *self.inner.app.borrow()
    }

    pub fn set_app_state(&self, state: AppState) {
        let previous = self.inner.app.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "app state changed");
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.inner.connection.borrow()
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        let previous = self.inner.connection.send_replace(state);
        if previous != state {
            info!(from = %previous, to = %state, "connection state changed");
        }
    }

    /// Subscribe to application state changes.
    pub fn watch_app_state(&self) -> watch::Receiver<AppState> {
        self.inner.app.subscribe()
    }

    /// Application state changes as a `Stream`, starting with the current one.
    pub fn app_state_stream(&self) -> WatchStream<AppState> {
        WatchStream::new(self.inner.app.subscribe())
    }

    /// Subscribe to bus connection changes.
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection.subscribe()
    }

    /// Wait until the application reaches `state`.
    pub async fn wait_for_app_state(&self, state: AppState) {
        let mut rx = self.inner.app.subscribe();
        // The sender lives as long as `self`.
        let _ = rx.wait_for(|s| *s == state).await;
    }
}

// ── Voters ───────────────────────────────────────────────────────────

pub fn when_app_is_running(lifecycle: &Lifecycle) -> Voter {
    let lifecycle = lifecycle.clone();
    Arc::new(move || lifecycle.app_state() == AppState::Running)
}

pub fn when_app_encountered_startup_error(lifecycle: &Lifecycle) -> Voter {
    let lifecycle = lifecycle.clone();
    Arc::new(move || lifecycle.app_state() == AppState::StartupError)
}

pub fn when_app_is_connected(lifecycle: &Lifecycle) -> Voter {
    let lifecycle = lifecycle.clone();
    Arc::new(move || lifecycle.connection_state() == ConnectionState::Connected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voters_follow_state() {
        let lifecycle = Lifecycle::new();
        let running = when_app_is_running(&lifecycle);
        let startup_error = when_app_encountered_startup_error(&lifecycle);
        let connected = when_app_is_connected(&lifecycle);

        assert!(!running());
        assert!(!startup_error());
        assert!(!connected());

        lifecycle.set_app_state(AppState::Running);
        lifecycle.set_connection_state(ConnectionState::Connected);
        assert!(running());
        assert!(connected());

        lifecycle.set_app_state(AppState::StartupError);
        assert!(!running());
        assert!(startup_error());
    }

    #[test]
    fn state_names() {
        assert_eq!(AppState::NotConfigured.to_string(), "NOT_CONFIGURED");
        assert_eq!(
            serde_json::to_string(&AppState::StartupError).unwrap_or_default(),
            "\"STARTUP_ERROR\""
        );
    }

    #[tokio::test]
    async fn wait_for_app_state_sees_later_change() {
        let lifecycle = Lifecycle::new();
        let waiter = {
            let lifecycle = lifecycle.clone();
            tokio::spawn(async move { lifecycle.wait_for_app_state(AppState::Running).await })
        };
        tokio::task::yield_now().await;
        lifecycle.set_app_state(AppState::Running);
        assert!(waiter.await.is_ok());
    }
}
