//! Routing of model tool calls to tool implementations.

use agentic_types::{ToolCall, ToolOutcome, ToolSchema};
use tracing::{info, warn};

use crate::tools::scheduler::SchedulerTool;
use crate::tools::shell::ShellTool;
use crate::{Result, ToolError, ToolInvocation, ToolOutput};

/// Owns the enabled tools and executes validated invocations.
pub struct ToolDispatcher {
    shell: ShellTool,
    scheduler: Option<SchedulerTool>,
}

impl ToolDispatcher {
    pub fn new(shell: ShellTool) -> Self {
        Self {
            shell,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerTool) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Schemas of every enabled tool, offered to the model.
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas = vec![ShellTool::schema()];
        if self.scheduler.is_some() {
            schemas.push(SchedulerTool::schema());
        }
        schemas
    }

    pub async fn invoke(&self, invocation: &ToolInvocation) -> Result<ToolOutput> {
        match invocation {
            ToolInvocation::Shell(args) => self.shell.run(args).await,
            ToolInvocation::Scheduler(action) => match &self.scheduler {
                Some(tool) => tool.run(action).await,
                None => Err(ToolError::Unavailable(invocation.tool_name().to_string())),
            },
        }
    }

    /// Validate and run one raw tool call. Failures become unsuccessful
    /// outcomes carrying the error text.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let result = match ToolInvocation::from_call(call) {
            Ok(invocation) => self.invoke(&invocation).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(output) => {
                info!(tool = %call.name, success = output.success, "Tool executed");
                ToolOutcome {
                    tool: call.name.clone(),
                    success: output.success,
                    output: output.text,
                }
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                ToolOutcome {
                    tool: call.name.clone(),
                    success: false,
                    output: e.to_string(),
                }
            }
        }
    }

    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        let mut outcomes = Vec::with_capacity(calls.len());
        for call in calls {
            outcomes.push(self.dispatch(call).await);
        }
        outcomes
    }
}
