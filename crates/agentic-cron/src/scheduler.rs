//! Task scheduling service: parse, persist, register with the host.

use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};

use crate::bridge::{BridgeError, ExecutorBridge, Registration};
use crate::daemon::PollerLauncher;
use crate::store::{StatusUpdate, TaskStore};
use crate::{CronError, Result, ScheduledTask, TaskStatus, parser};

/// Provider and model stamped on tasks that do not name their own.
#[derive(Debug, Clone)]
pub struct ExecutionDefaults {
    pub provider: String,
    pub model: String,
}

/// Front door for creating, listing and cancelling scheduled tasks.
///
/// Never performs the model call itself; execution happens later in the
/// [`TaskRunner`](crate::TaskRunner) invoked by the host executor.
pub struct SchedulerService {
    store: Arc<TaskStore>,
    bridge: Arc<dyn ExecutorBridge>,
    poller: Option<Arc<dyn PollerLauncher>>,
    defaults: ExecutionDefaults,
}

impl SchedulerService {
    pub fn new(
        store: Arc<TaskStore>,
        bridge: Arc<dyn ExecutorBridge>,
        defaults: ExecutionDefaults,
    ) -> Self {
        Self {
            store,
            bridge,
            poller: None,
            defaults,
        }
    }

    /// Start this poller when the host cannot run one-shot tasks itself.
    pub fn with_poller(mut self, poller: Arc<dyn PollerLauncher>) -> Self {
        self.poller = Some(poller);
        self
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    /// Parse `schedule`, persist a pending task and register it.
    ///
    /// A parse failure leaves no trace. A registration failure removes the
    /// freshly stored row before the error is returned.
    pub fn create_task(
        &self,
        prompt: &str,
        schedule: &str,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<ScheduledTask> {
        let descriptor = parser::parse(schedule)?;
        let task = ScheduledTask::new(
            prompt,
            &descriptor,
            provider.unwrap_or(&self.defaults.provider),
            model.unwrap_or(&self.defaults.model),
            Local::now(),
        );
        self.store.insert(task.clone())?;

        if let Err(e) = self.register(&task) {
            warn!(task_id = %task.id, error = %e, "Registration failed, rolling back");
            if let Err(rollback) = self.store.remove(&task.id) {
                warn!(task_id = %task.id, error = %rollback, "Failed to roll back task");
            }
            return Err(CronError::Registration(e));
        }

        info!(
            task_id = %task.id,
            schedule = %task.display_schedule,
            kind = %task.schedule_type,
            "Scheduled task"
        );
        Ok(task)
    }

    fn register(&self, task: &ScheduledTask) -> std::result::Result<(), BridgeError> {
        match self.bridge.register(task)? {
            Registration::Installed | Registration::AlreadyInstalled => Ok(()),
            Registration::NeedsPoller => match &self.poller {
                Some(poller) => poller.ensure_running(),
                None => Err(BridgeError::Poller(
                    "no one-shot executor available on this host".to_string(),
                )),
            },
        }
    }

    /// All tasks in insertion order.
    pub fn list_tasks(&self) -> Result<Vec<ScheduledTask>> {
        Ok(self.store.list()?)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<ScheduledTask>> {
        Ok(self.store.get(id)?)
    }

    /// De-register and remove a task. Returns `false` for unknown ids.
    pub fn cancel_task(&self, id: &str) -> Result<bool> {
        let Some(task) = self.store.get(id)? else {
            return Ok(false);
        };
        if let Err(e) = self.bridge.deregister(&task) {
            warn!(task_id = %id, error = %e, "Failed to remove host registration");
        }
        let removed = self.store.remove(id)?.is_some();
        if removed {
            info!(task_id = %id, "Cancelled task");
        }
        Ok(removed)
    }

    pub fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        update: StatusUpdate,
    ) -> Result<bool> {
        Ok(self.store.update_status(id, status, update)?)
    }
}
