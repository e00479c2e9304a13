//! agentic-cron: Scheduled task management.
//!
//! Turns natural-language schedules into host executor registrations
//! (crontab for recurring tasks, `at` or the poll daemon for one-shot
//! tasks) and keeps every task's lifecycle in a single JSON store file
//! shared by all processes.

pub mod bridge;
pub mod daemon;
pub mod parser;
pub mod runner;
pub mod scheduler;
pub mod store;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use bridge::{
    BridgeError, ExecutorBridge, HostBridge, HostFacility, QueuedJob, Registration, RunnerCommand,
    SystemHost,
};
pub use daemon::{DaemonExit, DaemonHandle, InProcessPoller, PollDaemon, PollerLauncher};
pub use parser::{Schedule, ScheduleDescriptor, parse};
pub use runner::{ExecutionError, ExecutionOutput, RunOutcome, TaskExecutor, TaskRunner};
pub use scheduler::{ExecutionDefaults, SchedulerService};
pub use store::{BeginRun, StatusUpdate, StoreError, TaskStore};

#[derive(Debug, Error)]
pub enum CronError {
    #[error("Could not parse schedule: {0}")]
    UnparsableSchedule(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to register task with host executor: {0}")]
    Registration(#[from] BridgeError),
    #[error("Blocking store task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, CronError>;

/// Whether a task fires repeatedly or exactly once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    Recurring,
    OneShot,
}

impl std::fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Recurring => f.write_str("recurring"),
            Self::OneShot => f.write_str("one_shot"),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A scheduled prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledTask {
    /// Unique task ID.
    pub id: String,
    /// Instruction executed at fire time.
    pub prompt: String,
    pub schedule_type: ScheduleType,
    /// Cron expression for recurring tasks, `now + N minutes` for one-shot tasks.
    pub schedule_expr: String,
    /// Normalized rendering of the requested schedule (e.g. "at 17:00").
    pub display_schedule: String,
    /// Advisory next fire time. The host executor owns the real timing.
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_result: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub llm_provider: String,
    pub llm_model: String,
}

impl ScheduledTask {
    /// Build a fresh pending task for a parsed schedule.
    pub fn new(
        prompt: impl Into<String>,
        descriptor: &ScheduleDescriptor,
        llm_provider: impl Into<String>,
        llm_model: impl Into<String>,
        now: DateTime<Local>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            schedule_type: descriptor.schedule_type(),
            schedule_expr: descriptor.host_expression(),
            display_schedule: descriptor.display.clone(),
            scheduled_at: descriptor.next_fire_at(now),
            status: TaskStatus::Pending,
            last_run: None,
            last_result: None,
            last_error: None,
            exit_code: None,
            duration_seconds: None,
            created_at: now.with_timezone(&Utc),
            llm_provider: llm_provider.into(),
            llm_model: llm_model.into(),
        }
    }

    pub fn is_one_shot(&self) -> bool {
        self.schedule_type == ScheduleType::OneShot
    }
}
