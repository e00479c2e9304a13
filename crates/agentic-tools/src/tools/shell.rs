//! `shell` tool: run a command line under allow/forbid lists.

use std::process::Stdio;
use std::time::Duration;

use agentic_config::ToolConfig;
use agentic_types::ToolSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::{Result, ToolError, ToolOutput};

pub const NAME: &str = "shell";

/// Maximum output size in bytes before truncation.
const MAX_OUTPUT_BYTES: usize = 200_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShellArgs {
    pub command: String,
}

pub struct ShellTool {
    allowed: Option<Vec<String>>,
    forbidden: Vec<String>,
    timeout_secs: u64,
}

impl ShellTool {
    pub fn new(config: &ToolConfig) -> Self {
        Self {
            allowed: config.allowed_commands.clone(),
            forbidden: config.forbidden_commands.clone(),
            timeout_secs: config.shell_timeout_secs,
        }
    }

    pub fn schema() -> ToolSchema {
        ToolSchema {
            name: NAME.to_string(),
            description: "Execute a shell command and return its output. Use for running \
                          programs, file operations, system info, and any command-line tasks."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The shell command to execute"
                    }
                },
                "required": ["command"]
            }),
        }
    }

    /// Forbidden fragments are rejected anywhere in the command. When an
    /// allow-list is configured the command must also start with one of its
    /// entries. Both checks ignore case.
    pub fn is_allowed(&self, command: &str) -> bool {
        let command = command.trim().to_lowercase();
        if self
            .forbidden
            .iter()
            .any(|f| command.contains(&f.to_lowercase()))
        {
            return false;
        }
        match &self.allowed {
            Some(allowed) => allowed
                .iter()
                .any(|prefix| command.starts_with(&prefix.to_lowercase())),
            None => true,
        }
    }

    pub async fn run(&self, args: &ShellArgs) -> Result<ToolOutput> {
        if !self.is_allowed(&args.command) {
            warn!(command = %args.command, "Rejected shell command");
            return Err(ToolError::NotAllowed);
        }
        debug!(command = %args.command, "Running shell command");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(&args.command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let timeout = Duration::from_secs(self.timeout_secs);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => return Err(ToolError::Timeout(self.timeout_secs)),
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            text.push_str(&format!("\nStderr: {stderr}"));
        }
        truncate_output(&mut text);

        if output.status.success() {
            if text.is_empty() {
                text = format!("Command completed with exit code {exit_code}");
            }
            Ok(ToolOutput::ok(text))
        } else {
            Ok(ToolOutput::failed(format!("Exit code: {exit_code}\n{text}")))
        }
    }
}

fn truncate_output(text: &mut String) {
    if text.len() <= MAX_OUTPUT_BYTES {
        return;
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("\n... [output truncated]");
}
