//! agentic-tools: Local tools the model may call.
//!
//! Provides:
//! - `shell`: run a command under the configured allow/forbid lists
//! - `scheduler`: schedule, list and cancel tasks
//! - [`ToolInvocation`]: model tool calls validated into typed variants
//! - [`ToolDispatcher`]: routes invocations and reports [`ToolOutcome`]s

pub mod dispatch;
pub mod tools;

use agentic_types::ToolCall;
use serde::Deserialize;
use thiserror::Error;

pub use agentic_types::ToolOutcome;
pub use dispatch::ToolDispatcher;
pub use tools::scheduler::{SchedulerAction, SchedulerTool};
pub use tools::shell::{ShellArgs, ShellTool};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}: {source}")]
    InvalidArguments {
        tool: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    MissingArgument(String),
    #[error("Command is not allowed")]
    NotAllowed,
    #[error("Command timed out after {0} seconds")]
    Timeout(u64),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Scheduler(#[from] agentic_cron::CronError),
    #[error("{0} is not available here")]
    Unavailable(String),
    #[error("Tool task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, ToolError>;

/// Text produced by a tool, with whether the tool considers it a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub text: String,
}

impl ToolOutput {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
        }
    }

    pub fn failed(text: impl Into<String>) -> Self {
        Self {
            success: false,
            text: text.into(),
        }
    }
}

/// A model tool call validated against the known tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    Shell(ShellArgs),
    Scheduler(SchedulerAction),
}

impl ToolInvocation {
    pub fn from_call(call: &ToolCall) -> Result<Self> {
        match call.name.as_str() {
            tools::shell::NAME => Ok(Self::Shell(arguments(call)?)),
            tools::scheduler::NAME => Ok(Self::Scheduler(arguments(call)?)),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Shell(_) => tools::shell::NAME,
            Self::Scheduler(_) => tools::scheduler::NAME,
        }
    }
}

fn arguments<T: for<'de> Deserialize<'de>>(call: &ToolCall) -> Result<T> {
    let args = if call.arguments.is_null() {
        serde_json::json!({})
    } else {
        call.arguments.clone()
    };
    serde_json::from_value(args).map_err(|source| ToolError::InvalidArguments {
        tool: call.name.clone(),
        source,
    })
}
