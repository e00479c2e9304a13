//! Poll-loop executor for one-shot tasks on hosts without `at`.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::BridgeError;
use crate::runner::TaskRunner;
use crate::store::{self, TaskStore};
use crate::{ScheduledTask, TaskStatus};

/// Why the poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonExit {
    Stopped,
    /// Ran at least one task and nothing is left to run.
    Idle,
}

/// Periodically runs due one-shot tasks in-process.
pub struct PollDaemon {
    store: Arc<TaskStore>,
    runner: Arc<TaskRunner>,
    interval: Duration,
    exit_when_idle: bool,
}

impl PollDaemon {
    pub fn new(store: Arc<TaskStore>, runner: Arc<TaskRunner>, interval: Duration) -> Self {
        Self {
            store,
            runner,
            interval,
            exit_when_idle: false,
        }
    }

    /// Stop once a task has run and no pending one-shot task remains.
    pub fn exit_when_idle(mut self, exit_when_idle: bool) -> Self {
        self.exit_when_idle = exit_when_idle;
        self
    }

    /// Start the loop on the current runtime.
    pub fn spawn(self) -> DaemonHandle {
        self.spawn_on(&Handle::current())
    }

    pub fn spawn_on(self, runtime: &Handle) -> DaemonHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let join = runtime.spawn(async move { self.run(token).await });
        DaemonHandle { cancel, join }
    }

    /// Run until `cancel` fires or, with `exit_when_idle`, the queue drains.
    pub async fn run(&self, cancel: CancellationToken) -> DaemonExit {
        info!(interval_secs = self.interval.as_secs(), "Poll daemon started");
        let mut total_runs = 0usize;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            total_runs += self.tick().await;

            if self.exit_when_idle && total_runs > 0 {
                match store::blocking(&self.store, TaskStore::has_pending_one_shot).await {
                    Ok(false) => {
                        info!(total_runs, "No pending one-shot tasks, poll daemon exiting");
                        return DaemonExit::Idle;
                    }
                    Ok(true) => {}
                    Err(e) => warn!(error = %e, "Could not check for pending tasks"),
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Poll daemon stopped");
        DaemonExit::Stopped
    }

    /// One scan of the store. Returns how many tasks were executed.
    pub async fn tick(&self) -> usize {
        let tasks = match store::blocking(&self.store, TaskStore::list).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "Skipping poll tick, task store unreadable");
                return 0;
            }
        };

        let now = Utc::now();
        let mut ran = 0;
        for task in tasks.iter().filter(|t| is_due(t, now)) {
            debug!(task_id = %task.id, "Running due task");
            match self.runner.run(&task.id).await {
                Ok(outcome) if outcome.ran() => ran += 1,
                Ok(_) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "Task run failed to record"),
            }
        }
        ran
    }
}

/// Recurring tasks belong to the periodic host table and are never run here.
fn is_due(task: &ScheduledTask, now: DateTime<Utc>) -> bool {
    task.is_one_shot()
        && task.status == TaskStatus::Pending
        && task.scheduled_at.is_none_or(|at| at <= now)
}

/// Lifecycle handle of a spawned [`PollDaemon`].
pub struct DaemonHandle {
    cancel: CancellationToken,
    join: JoinHandle<DaemonExit>,
}

impl DaemonHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn stop(self) -> DaemonExit {
        self.cancel.cancel();
        self.wait().await
    }

    /// Wait for the loop to end on its own.
    pub async fn wait(self) -> DaemonExit {
        match self.join.await {
            Ok(exit) => exit,
            Err(e) => {
                warn!(error = %e, "Poll daemon task aborted");
                DaemonExit::Stopped
            }
        }
    }
}

/// Makes sure something polls the store for one-shot tasks.
pub trait PollerLauncher: Send + Sync {
    /// Start the poller unless it is already running.
    fn ensure_running(&self) -> Result<(), BridgeError>;
}

/// Runs the poll daemon as a task inside the current process.
pub struct InProcessPoller {
    store: Arc<TaskStore>,
    runner: Arc<TaskRunner>,
    interval: Duration,
    handle: Mutex<Option<DaemonHandle>>,
}

impl InProcessPoller {
    pub fn new(store: Arc<TaskStore>, runner: Arc<TaskRunner>, interval: Duration) -> Self {
        Self {
            store,
            runner,
            interval,
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stop the daemon if it was started.
    pub async fn shutdown(&self) -> Option<DaemonExit> {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match handle {
            Some(handle) => Some(handle.stop().await),
            None => None,
        }
    }
}

impl PollerLauncher for InProcessPoller {
    fn ensure_running(&self) -> Result<(), BridgeError> {
        let mut slot = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }
        let runtime = Handle::try_current().map_err(|e| BridgeError::Poller(e.to_string()))?;
        let daemon = PollDaemon::new(self.store.clone(), self.runner.clone(), self.interval);
        *slot = Some(daemon.spawn_on(&runtime));
        info!("Started in-process poll daemon");
        Ok(())
    }
}
