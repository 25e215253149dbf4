// ── Background tasks ──
//
// Interval-driven jobs gated by voters. Each task runs on its own tokio
// task; consecutive runs of one task never overlap. Stopping waits for
// in-flight handlers to return.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::CoreError;

/// Predicate evaluated before each tick; any `false` skips the tick.
pub type Voter = Arc<dyn Fn() -> bool + Send + Sync>;

type Handler = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>;

pub struct Task {
    name: String,
    interval: Duration,
    handler: Handler,
    voters: Vec<Voter>,
}

impl Task {
    /// A task running `handler` every `interval`. A zero interval runs
    /// the handler once at start.
    pub fn new<F, Fut>(name: impl Into<String>, interval: Duration, handler: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), CoreError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            interval,
            handler: Arc::new(move || handler().boxed()),
            voters: Vec::new(),
        }
    }

    pub fn with_voter(mut self, voter: Voter) -> Self {
        self.voters.push(voter);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    async fn tick(&self) {
        if !self.voters.iter().all(|vote| vote()) {
            debug!(task = %self.name, "skipped by voter");
            return;
        }
        if let Err(e) = (self.handler)().await {
            warn!(task = %self.name, error = %e, "task handler failed");
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("voters", &self.voters.len())
            .finish_non_exhaustive()
    }
}

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct TaskManager {
    tasks: Vec<Arc<Task>>,
    running: Mutex<Option<Running>>,
}

impl TaskManager {
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self {
            tasks: tasks.into_iter().map(Arc::new).collect(),
            running: Mutex::new(None),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    pub async fn start(&self) -> Result<(), CoreError> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(CoreError::AlreadyStarted {
                component: "task manager",
            });
        }

        let cancel = CancellationToken::new();
        let handles = self
            .tasks
            .iter()
            .map(|task| tokio::spawn(run_task(Arc::clone(task), cancel.clone())))
            .collect();

        *running = Some(Running { cancel, handles });
        debug!(tasks = self.tasks.len(), "task manager started");
        Ok(())
    }

    /// Signal every task and wait for running handlers to return.
    pub async fn stop(&self) -> Result<(), CoreError> {
        let Some(Running { cancel, handles }) = self.running.lock().await.take() else {
            return Err(CoreError::NotStarted {
                component: "task manager",
            });
        };

        cancel.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "task terminated abnormally");
            }
        }
        debug!("task manager stopped");
        Ok(())
    }
}

async fn run_task(task: Arc<Task>, cancel: CancellationToken) {
    if task.interval.is_zero() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = task.tick() => {}
        }
        return;
    }

    let mut interval = tokio::time::interval(task.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => task.tick().await,
        }
    }
}
