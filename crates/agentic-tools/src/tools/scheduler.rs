//! `scheduler` tool: schedule, list and cancel tasks.

use std::fmt::Write as _;
use std::sync::Arc;

use agentic_cron::SchedulerService;
use agentic_types::ToolSchema;
use serde::Deserialize;
use serde_json::json;

use crate::{Result, ToolError, ToolOutput};

pub const NAME: &str = "scheduler";

const DESCRIPTION: &str = "\
Schedule tasks to run at specific times. Use this tool to schedule prompts to run later.

IMPORTANT: When scheduling tasks, preserve ALL contextual information in the prompt including:
- Recipients (e.g., email addresses, JIDs, phone numbers)
- Message content or task details
- Any specific instructions

Do NOT decontextualize or simplify the prompt. For example:
- If user says \"remind me to call mom at 5pm\", use prompt=\"Call mom\"

You can schedule tasks using natural language like:
- \"at 5pm\" - Run daily at 5pm
- \"every day at noon\" - Run daily at noon
- \"every monday at 9am\" - Run every Monday at 9am
- \"every hour\" - Run every hour
- \"in 30 minutes\" - Run once in 30 minutes
- \"in 2 hours\" - Run once in 2 hours";

/// Arguments of a `scheduler` call, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum SchedulerAction {
    Schedule {
        #[serde(default)]
        prompt: Option<String>,
        /// Accepted in place of `prompt`.
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        schedule: Option<String>,
        #[serde(default)]
        llm_provider: Option<String>,
        #[serde(default)]
        llm_model: Option<String>,
    },
    List,
    Cancel {
        #[serde(default)]
        task_id: Option<String>,
    },
}

#[derive(Clone)]
pub struct SchedulerTool {
    service: Arc<SchedulerService>,
}

impl SchedulerTool {
    pub fn new(service: Arc<SchedulerService>) -> Self {
        Self { service }
    }

    pub fn schema() -> ToolSchema {
        ToolSchema {
            name: NAME.to_string(),
            description: DESCRIPTION.to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "description": "Action to perform: schedule, list, or cancel",
                        "enum": ["schedule", "list", "cancel"]
                    },
                    "prompt": {
                        "type": "string",
                        "description": "The prompt or message to execute (required for schedule action)"
                    },
                    "message": {
                        "type": "string",
                        "description": "Alias for prompt - the message to send (required for schedule action)"
                    },
                    "schedule": {
                        "type": "string",
                        "description": "When to run (e.g., 'at 5pm', 'every monday at 9am', 'in 30 minutes')"
                    },
                    "task_id": {
                        "type": "string",
                        "description": "The task ID to cancel (required for cancel action)"
                    },
                    "llm_provider": {
                        "type": "string",
                        "description": "Optional LLM provider to use for this task"
                    },
                    "llm_model": {
                        "type": "string",
                        "description": "Optional LLM model to use for this task"
                    }
                },
                "required": ["action"]
            }),
        }
    }

    /// [`execute`](Self::execute) on the blocking pool. Scheduler actions
    /// lock the task store and run `crontab`/`at`.
    pub async fn run(&self, action: &SchedulerAction) -> Result<ToolOutput> {
        let tool = self.clone();
        let action = action.clone();
        tokio::task::spawn_blocking(move || tool.execute(&action)).await?
    }

    pub fn execute(&self, action: &SchedulerAction) -> Result<ToolOutput> {
        match action {
            SchedulerAction::Schedule {
                prompt,
                message,
                schedule,
                llm_provider,
                llm_model,
            } => {
                let prompt = non_empty(prompt)
                    .or_else(|| non_empty(message))
                    .ok_or_else(|| missing("prompt is required for schedule action"))?;
                let schedule = non_empty(schedule)
                    .ok_or_else(|| missing("schedule is required for schedule action"))?;

                let task = self.service.create_task(
                    prompt,
                    schedule,
                    llm_provider.as_deref(),
                    llm_model.as_deref(),
                )?;
                Ok(ToolOutput::ok(format!(
                    "Task scheduled successfully!\n  ID: {}\n  Prompt: {}\n  Schedule: {}\n  Type: {}\n  Status: {}",
                    task.id, task.prompt, task.display_schedule, task.schedule_type, task.status
                )))
            }
            SchedulerAction::List => {
                let tasks = self.service.list_tasks()?;
                if tasks.is_empty() {
                    return Ok(ToolOutput::ok("No scheduled tasks."));
                }

                let mut out = String::from("Scheduled Tasks:\n\n");
                for task in &tasks {
                    let last_run = task
                        .last_run
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "Never".to_string());
                    let _ = writeln!(out, "ID: {}", task.id);
                    let _ = writeln!(out, "  Prompt: {}", task.prompt);
                    let _ = writeln!(out, "  Schedule: {}", task.display_schedule);
                    let _ = writeln!(out, "  Type: {}", task.schedule_type);
                    let _ = writeln!(out, "  Status: {}", task.status);
                    let _ = writeln!(out, "  Last Run: {last_run}");
                    if let Some(error) = &task.last_error {
                        let _ = writeln!(out, "  Last Error: {error}");
                    }
                    out.push('\n');
                }
                Ok(ToolOutput::ok(out))
            }
            SchedulerAction::Cancel { task_id } => {
                let task_id = non_empty(task_id)
                    .ok_or_else(|| missing("task_id is required for cancel action"))?;
                if self.service.cancel_task(task_id)? {
                    Ok(ToolOutput::ok(format!("Task {task_id} cancelled successfully.")))
                } else {
                    Ok(ToolOutput::failed(format!("Task {task_id} not found")))
                }
            }
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn missing(message: &str) -> ToolError {
    ToolError::MissingArgument(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentic_cron::{
        BridgeError, ExecutionDefaults, ExecutorBridge, Registration, ScheduledTask, TaskStore,
    };

    /// Bridge that accepts everything without touching the host.
    struct NoopBridge;

    impl ExecutorBridge for NoopBridge {
        fn register(&self, _task: &ScheduledTask) -> std::result::Result<Registration, BridgeError> {
            Ok(Registration::Installed)
        }

        fn deregister(&self, _task: &ScheduledTask) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
    }

    fn tool() -> (tempfile::TempDir, SchedulerTool) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TaskStore::open(dir.path().join("tasks.json")).unwrap());
        let service = SchedulerService::new(
            store,
            Arc::new(NoopBridge),
            ExecutionDefaults {
                provider: "ollama".into(),
                model: "qwen3:30b-a3b".into(),
            },
        );
        (dir, SchedulerTool::new(Arc::new(service)))
    }

    fn schedule(prompt: Option<&str>, message: Option<&str>, when: Option<&str>) -> SchedulerAction {
        SchedulerAction::Schedule {
            prompt: prompt.map(String::from),
            message: message.map(String::from),
            schedule: when.map(String::from),
            llm_provider: None,
            llm_model: None,
        }
    }

    #[test]
    fn test_schedule_and_list() {
        let (_dir, tool) = tool();
        let out = tool
            .execute(&schedule(Some("Call mom"), None, Some("at 5pm")))
            .unwrap();
        assert!(out.success);
        assert!(out.text.starts_with("Task scheduled successfully!"));
        assert!(out.text.contains("  Schedule: at 17:00"));
        assert!(out.text.contains("  Type: recurring"));
        assert!(out.text.contains("  Status: pending"));

        let listed = tool.execute(&SchedulerAction::List).unwrap();
        assert!(listed.text.starts_with("Scheduled Tasks:\n\n"));
        assert!(listed.text.contains("  Prompt: Call mom"));
        assert!(listed.text.contains("  Last Run: Never"));
    }

    #[test]
    fn test_message_alias() {
        let (_dir, tool) = tool();
        let out = tool
            .execute(&schedule(None, Some("Send hello to joe"), Some("in 2 minutes")))
            .unwrap();
        assert!(out.text.contains("  Prompt: Send hello to joe"));
        assert!(out.text.contains("  Type: one_shot"));
    }

    #[test]
    fn test_schedule_requires_prompt_and_schedule() {
        let (_dir, tool) = tool();
        let err = tool.execute(&schedule(None, None, Some("at 5pm"))).unwrap_err();
        assert_eq!(err.to_string(), "prompt is required for schedule action");

        let err = tool.execute(&schedule(Some("x"), None, None)).unwrap_err();
        assert_eq!(err.to_string(), "schedule is required for schedule action");
    }

    #[test]
    fn test_bad_schedule_surfaces_parse_error() {
        let (_dir, tool) = tool();
        let err = tool
            .execute(&schedule(Some("x"), None, Some("whenever")))
            .unwrap_err();
        assert_eq!(err.to_string(), "Could not parse schedule: whenever");
    }

    #[test]
    fn test_list_empty() {
        let (_dir, tool) = tool();
        let out = tool.execute(&SchedulerAction::List).unwrap();
        assert_eq!(out.text, "No scheduled tasks.");
    }

    #[test]
    fn test_cancel() {
        let (_dir, tool) = tool();
        tool.execute(&schedule(Some("x"), None, Some("every hour")))
            .unwrap();
        let id = tool.service.list_tasks().unwrap()[0].id.clone();

        let out = tool
            .execute(&SchedulerAction::Cancel {
                task_id: Some(id.clone()),
            })
            .unwrap();
        assert!(out.success);
        assert_eq!(out.text, format!("Task {id} cancelled successfully."));

        let out = tool
            .execute(&SchedulerAction::Cancel {
                task_id: Some(id.clone()),
            })
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.text, format!("Task {id} not found"));
    }

    #[tokio::test]
    async fn test_run_from_async_context() {
        let (_dir, tool) = tool();
        let out = tool
            .run(&schedule(Some("stretch"), None, Some("every hour")))
            .await
            .unwrap();
        assert!(out.success);

        let listed = tool.run(&SchedulerAction::List).await.unwrap();
        assert!(listed.text.contains("  Prompt: stretch"));
    }

    #[test]
    fn test_action_deserialization() {
        let action: SchedulerAction = serde_json::from_value(json!({
            "action": "schedule",
            "message": "hi",
            "schedule": "every hour",
            "llm_model": "big-pickle"
        }))
        .unwrap();
        assert_eq!(
            action,
            SchedulerAction::Schedule {
                prompt: None,
                message: Some("hi".into()),
                schedule: Some("every hour".into()),
                llm_provider: None,
                llm_model: Some("big-pickle".into()),
            }
        );
        let action: SchedulerAction = serde_json::from_value(json!({"action": "list"})).unwrap();
        assert_eq!(action, SchedulerAction::List);
    }
}
