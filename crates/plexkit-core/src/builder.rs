// ── Edge composition ──
//
// Wires a transport, router, topic subscriptions and background tasks
// into one start/stop unit. Start order: transport, router (which
// subscribes), tasks. Stop runs in reverse.

use std::sync::Arc;

use plexkit_fimp::Transport;
use tracing::{info, warn};

use crate::config::RouterConfig;
use crate::discovery::{discovery_routing, discovery_topic, ResourceDescriptor};
use crate::error::CoreError;
use crate::lifecycle::{AppState, ConnectionState, Lifecycle};
use crate::router::{Router, Routing};
use crate::task::{Task, TaskManager};

#[derive(Default)]
pub struct EdgeBuilder {
    transport: Option<Arc<dyn Transport>>,
    router_config: RouterConfig,
    topics: Vec<String>,
    routings: Vec<Routing>,
    tasks: Vec<Task>,
    discovery: Option<ResourceDescriptor>,
    lifecycle: Option<Lifecycle>,
}

impl EdgeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_router_config(mut self, config: RouterConfig) -> Self {
        self.router_config = config;
        self
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.topics.extend(topics);
        self
    }

    /// Routings keep the order in which they are added across calls.
    pub fn with_routings(mut self, routings: impl IntoIterator<Item = Routing>) -> Self {
        self.routings.extend(routings);
        self
    }

    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = Task>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// Answer discovery requests with `descriptor`. The discovery routing
    /// is registered after all others.
    pub fn with_discovery(mut self, descriptor: ResourceDescriptor) -> Self {
        self.discovery = Some(descriptor);
        self
    }

    /// Mirror start/stop outcomes into `lifecycle`.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn build(self) -> Result<Edge, CoreError> {
        let transport = self.transport.ok_or_else(|| CoreError::Config {
            message: "edge requires a transport".into(),
        })?;

        let router = Router::new(self.router_config, Arc::clone(&transport));
        router.register_topics(self.topics);
        router.register_routings(self.routings);
        if let Some(descriptor) = self.discovery {
            router.register_topics([discovery_topic()]);
            router.register_routing(discovery_routing(descriptor));
        }

        Ok(Edge {
            transport,
            router,
            tasks: TaskManager::new(self.tasks),
            lifecycle: self.lifecycle,
        })
    }
}

/// A composed runtime.
pub struct Edge {
    transport: Arc<dyn Transport>,
    router: Router,
    tasks: TaskManager,
    lifecycle: Option<Lifecycle>,
}

impl Edge {
    pub fn builder() -> EdgeBuilder {
        EdgeBuilder::new()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn tasks(&self) -> &TaskManager {
        &self.tasks
    }

    pub fn lifecycle(&self) -> Option<&Lifecycle> {
        self.lifecycle.as_ref()
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        match self.start_components().await {
            Ok(()) => {
                self.set_app_state(AppState::Running);
                info!(topics = self.router.topics().len(), tasks = self.tasks.len(), "edge started");
                Ok(())
            }
            Err(e) => {
                self.set_app_state(AppState::StartupError);
                Err(e)
            }
        }
    }

    /// Stop tasks, router and transport. Every stage runs even if an
    /// earlier one fails; the first failure is returned.
    pub async fn stop(&self) -> Result<(), CoreError> {
        self.set_app_state(AppState::Terminating);

        let mut first_error = None;
        if let Err(e) = self.tasks.stop().await {
            warn!(error = %e, "task manager stop failed");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.router.stop().await {
            warn!(error = %e, "router stop failed");
            first_error.get_or_insert(e);
        }
        if let Err(e) = self.transport.stop().await {
            warn!(error = %e, "transport stop failed");
            first_error.get_or_insert(e.into());
        }
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.set_connection_state(ConnectionState::Disconnected);
        }

        info!("edge stopped");
        first_error.map_or(Ok(()), Err)
    }

    async fn start_components(&self) -> Result<(), CoreError> {
        self.transport.start().await?;
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.set_connection_state(ConnectionState::Connected);
        }
        self.router.start().await?;
        self.tasks.start().await
    }

    fn set_app_state(&self, state: AppState) {
        if let Some(lifecycle) = &self.lifecycle {
            lifecycle.set_app_state(state);
        }
    }
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Edge")
            .field("router", &self.router.topics())
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
