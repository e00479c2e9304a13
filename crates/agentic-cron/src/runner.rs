//! Fire-time execution of a single task.

use std::sync::Arc;
use std::time::Instant;

use agentic_types::ToolOutcome;
use async_trait::async_trait;
use chrono::{Duration, Local, Utc};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::store::{self, BeginRun, StatusUpdate, TaskStore};
use crate::{Result, ScheduledTask, TaskStatus, parser};

/// Text and tool results produced by one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutput {
    pub text: String,
    pub tool_outcomes: Vec<ToolOutcome>,
}

impl ExecutionOutput {
    /// Text recorded as the task's `last_result`.
    pub fn summary(&self) -> String {
        if self.tool_outcomes.is_empty() {
            return self.text.clone();
        }
        let mut summary = format!("{}\n\nTool results:", self.text);
        for outcome in &self.tool_outcomes {
            summary.push_str(&format!("\n- {}: {}", outcome.tool, outcome.success));
        }
        summary
    }
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ExecutionError(pub String);

/// Runs a task's prompt against a model and its tools.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        prompt: &str,
        provider: &str,
        model: &str,
    ) -> std::result::Result<ExecutionOutput, ExecutionError>;
}

/// What a call to [`TaskRunner::run`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    NotFound,
    AlreadyRunning,
    Completed {
        summary: String,
        duration_seconds: f64,
    },
    Failed {
        error: String,
        duration_seconds: f64,
    },
}

impl RunOutcome {
    /// Process exit code for the runner entry point.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Failed { .. } => 1,
            _ => 0,
        }
    }

    /// Whether the executor was actually invoked.
    pub fn ran(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Loads a task by id, executes it and records the outcome.
pub struct TaskRunner {
    store: Arc<TaskStore>,
    executor: Arc<dyn TaskExecutor>,
    stale_after: Duration,
}

impl TaskRunner {
    pub fn new(store: Arc<TaskStore>, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            store,
            executor,
            stale_after: Duration::hours(1),
        }
    }

    /// Age after which a `running` task is considered crashed.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    pub async fn run(&self, task_id: &str) -> Result<RunOutcome> {
        let id = task_id.to_string();
        let stale_after = self.stale_after;
        let begin = store::blocking(&self.store, move |store| {
            store.begin_run(&id, stale_after, Utc::now())
        })
        .await?;
        let task = match begin {
            BeginRun::Started(task) => task,
            BeginRun::NotFound => {
                warn!(task_id, "Task not found, nothing to run");
                return Ok(RunOutcome::NotFound);
            }
            BeginRun::AlreadyRunning { since } => {
                warn!(task_id, ?since, "Task is already running, skipping");
                return Ok(RunOutcome::AlreadyRunning);
            }
        };
        info!(task_id, prompt = %task.prompt, "Running task");

        let started = Instant::now();
        let result = self
            .executor
            .execute(&task.prompt, &task.llm_provider, &task.llm_model)
            .await;
        let duration_seconds = started.elapsed().as_secs_f64();

        let scheduled_at = if task.is_one_shot() {
            None
        } else {
            next_occurrence(&task)
        };

        let (status, update, outcome) = match result {
            Ok(output) => {
                let summary = output.summary();
                info!(task_id, duration_seconds, "Task completed");
                (
                    TaskStatus::Completed,
                    StatusUpdate {
                        result: Some(summary.clone()),
                        exit_code: Some(0),
                        duration_seconds: Some(duration_seconds),
                        scheduled_at,
                        ..Default::default()
                    },
                    RunOutcome::Completed {
                        summary,
                        duration_seconds,
                    },
                )
            }
            Err(ExecutionError(message)) => {
                error!(task_id, duration_seconds, error = %message, "Task failed");
                (
                    TaskStatus::Failed,
                    StatusUpdate {
                        error: Some(message.clone()),
                        exit_code: Some(1),
                        duration_seconds: Some(duration_seconds),
                        scheduled_at,
                        ..Default::default()
                    },
                    RunOutcome::Failed {
                        error: message,
                        duration_seconds,
                    },
                )
            }
        };

        let id = task_id.to_string();
        store::blocking(&self.store, move |store| {
            store.update_status(&id, status, update)
        })
        .await?;
        if task.is_one_shot() {
            info!(task_id, "One-shot task fired and was removed");
        }
        Ok(outcome)
    }
}

fn next_occurrence(task: &ScheduledTask) -> Option<chrono::DateTime<Utc>> {
    match parser::parse(&task.display_schedule) {
        Ok(descriptor) => descriptor.next_fire_at(Local::now()),
        Err(e) => {
            warn!(task_id = %task.id, error = %e, "Could not refresh next fire time");
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{ScheduleType, parse};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor returning a fixed result and recording its calls.
    pub(crate) struct ScriptedExecutor {
        pub result: std::result::Result<ExecutionOutput, ExecutionError>,
        pub calls: AtomicUsize,
        pub seen: Mutex<Vec<(String, String, String)>>,
    }

    impl ScriptedExecutor {
        pub fn ok(text: &str) -> Self {
            Self {
                result: Ok(ExecutionOutput {
                    text: text.to_string(),
                    tool_outcomes: Vec::new(),
                }),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(message: &str) -> Self {
            Self {
                result: Err(ExecutionError(message.to_string())),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TaskExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            prompt: &str,
            provider: &str,
            model: &str,
        ) -> std::result::Result<ExecutionOutput, ExecutionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((
                prompt.to_string(),
                provider.to_string(),
                model.to_string(),
            ));
            self.result.clone()
        }
    }

    fn setup(
        schedule: &str,
        executor: ScriptedExecutor,
    ) -> (tempfile::TempDir, Arc<TaskStore>, Arc<ScriptedExecutor>, TaskRunner, ScheduledTask) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open(dir.path().join("tasks.json")).unwrap());
        let task = ScheduledTask::new(
            "water the plants",
            &parse(schedule).unwrap(),
            "ollama",
            "qwen3:30b-a3b",
            Local::now(),
        );
        store.insert(task.clone()).unwrap();
        let executor = Arc::new(executor);
        let runner = TaskRunner::new(store.clone(), executor.clone());
        (dir, store, executor, runner, task)
    }

    #[test]
    fn test_summary_lists_tool_results() {
        let output = ExecutionOutput {
            text: "Sent the reminder.".into(),
            tool_outcomes: vec![
                ToolOutcome {
                    tool: "shell".into(),
                    success: true,
                    output: "ok".into(),
                },
                ToolOutcome {
                    tool: "scheduler".into(),
                    success: false,
                    output: "bad schedule".into(),
                },
            ],
        };
        assert_eq!(
            output.summary(),
            "Sent the reminder.\n\nTool results:\n- shell: true\n- scheduler: false"
        );
    }

    #[test]
    fn test_summary_without_tools_is_text() {
        let output = ExecutionOutput {
            text: "hello".into(),
            tool_outcomes: Vec::new(),
        };
        assert_eq!(output.summary(), "hello");
    }

    #[tokio::test]
    async fn test_recurring_success_keeps_row() {
        let (_dir, store, executor, runner, task) = setup("every hour", ScriptedExecutor::ok("done"));

        let outcome = runner.run(&task.id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
        assert_eq!(outcome.exit_code(), 0);

        let stored = store.get(&task.id).unwrap().unwrap();
        assert_eq!(stored.schedule_type, ScheduleType::Recurring);
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(stored.exit_code, Some(0));
        assert_eq!(stored.last_result.as_deref(), Some("done"));
        assert!(stored.last_run.is_some());
        assert!(stored.duration_seconds.is_some());
        assert!(stored.scheduled_at.unwrap() > Utc::now());

        let seen = executor.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![(
                "water the plants".to_string(),
                "ollama".to_string(),
                "qwen3:30b-a3b".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_recurring_failure_records_error() {
        let (_dir, store, _executor, runner, task) =
            setup("at 5pm", ScriptedExecutor::failing("connection refused"));

        let outcome = runner.run(&task.id).await.unwrap();
        assert_eq!(outcome.exit_code(), 1);

        let stored = store.get(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.exit_code, Some(1));
        assert_eq!(stored.last_error.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn test_one_shot_removed_after_success() {
        let (_dir, store, executor, runner, task) = setup("in 5 minutes", ScriptedExecutor::ok("hi"));
        runner.run(&task.id).await.unwrap();
        assert!(store.get(&task.id).unwrap().is_none());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_one_shot_removed_after_failure() {
        let (_dir, store, _executor, runner, task) =
            setup("in 5 minutes", ScriptedExecutor::failing("boom"));
        let outcome = runner.run(&task.id).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert!(store.get(&task.id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_waiting_on_store_lock_leaves_runtime_free() {
        use fs2::FileExt;
        use std::sync::atomic::AtomicBool;

        let (_dir, store, _executor, runner, task) = setup("every hour", ScriptedExecutor::ok("x"));
        let lock = crate::store::open_lock(&store).unwrap();
        lock.lock_exclusive().unwrap();
        let release = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(300));
            drop(lock);
        });

        let ticked = Arc::new(AtomicBool::new(false));
        let flag = ticked.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let outcome = runner.run(&task.id).await.unwrap();
        assert!(outcome.ran());
        // Only observable if the lock wait happened off the runtime thread.
        assert!(ticked.load(Ordering::SeqCst));
        release.join().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_task_is_noop() {
        let (_dir, store, executor, runner, _task) = setup("every hour", ScriptedExecutor::ok("x"));
        let outcome = runner.run("missing").await.unwrap();
        assert_eq!(outcome, RunOutcome::NotFound);
        assert_eq!(outcome.exit_code(), 0);
        assert!(!outcome.ran());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_running_task_is_not_started_twice() {
        let (_dir, store, executor, runner, task) = setup("every hour", ScriptedExecutor::ok("x"));
        store
            .begin_run(&task.id, Duration::hours(1), Utc::now())
            .unwrap();

        let outcome = runner.run(&task.id).await.unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyRunning);
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_running_task_is_taken_over() {
        let (_dir, store, executor, runner, task) = setup("every hour", ScriptedExecutor::ok("x"));
        store
            .begin_run(&task.id, Duration::hours(1), Utc::now() - Duration::hours(3))
            .unwrap();

        let outcome = runner.run(&task.id).await.unwrap();
        assert!(outcome.ran());
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
    }
}
