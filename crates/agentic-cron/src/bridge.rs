//! Hand-off of scheduled tasks to the host's time-based executors.
//!
//! Recurring tasks become crontab lines; one-shot tasks are queued with
//! `at`. The host table only ever carries the runner command line with the
//! task id, the store stays the source of truth.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{ScheduleType, ScheduledTask};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("`{command}` failed: {detail}")]
    Command { command: String, detail: String },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Poll daemon unavailable: {0}")]
    Poller(String),
}

/// Result of registering a task with the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    Installed,
    /// The host table already references the task id.
    AlreadyInstalled,
    /// No native one-shot facility; the poll daemon has to serve the task.
    NeedsPoller,
}

/// Registers and de-registers tasks with whatever fires them.
pub trait ExecutorBridge: Send + Sync {
    fn register(&self, task: &ScheduledTask) -> Result<Registration, BridgeError>;

    /// Remove every host registration for the task. One-shot removal is
    /// best-effort and never fails the caller.
    fn deregister(&self, task: &ScheduledTask) -> Result<(), BridgeError>;
}

/// Command line the host executor invokes at fire time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl RunnerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Shell-ready command line ending in `--task-id=<id>`.
    pub fn command_line(&self, task_id: &str) -> String {
        let mut parts = vec![shell_quote(&self.program.to_string_lossy())];
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.push(shell_quote(&format!("--task-id={task_id}")));
        parts.join(" ")
    }
}

fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_/.:=@+-".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

// ──── Host facility ────

/// A job sitting in the host's one-shot queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedJob {
    pub id: String,
    pub script: String,
}

/// Raw access to the host's periodic table and one-shot queue.
pub trait HostFacility: Send + Sync {
    fn read_crontab(&self) -> Result<String, BridgeError>;
    fn write_crontab(&self, content: &str) -> Result<(), BridgeError>;
    fn supports_one_shot(&self) -> bool;
    /// Queue `command` to run at `when` (an `at` time spec such as
    /// `now + 30 minutes`).
    fn submit_one_shot(&self, when: &str, command: &str) -> Result<(), BridgeError>;
    fn queued_one_shots(&self) -> Result<Vec<QueuedJob>, BridgeError>;
    fn remove_one_shot(&self, job_id: &str) -> Result<(), BridgeError>;
}

/// `crontab` and `at` on the local machine.
#[derive(Debug, Clone)]
pub struct SystemHost {
    one_shot: bool,
}

impl SystemHost {
    /// Use `at` only when it is found on `PATH`.
    pub fn detect() -> Self {
        let one_shot = binary_on_path("at");
        debug!(at_available = one_shot, "Detected host one-shot facility");
        Self { one_shot }
    }

    /// Force one-shot support on or off.
    pub fn with_one_shot(one_shot: bool) -> Self {
        Self { one_shot }
    }
}

fn binary_on_path(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(name).is_file()))
        .unwrap_or(false)
}

fn run(command: &mut Command, stdin: Option<&str>) -> Result<Output, BridgeError> {
    command
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = command.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input.as_bytes())?;
    }
    Ok(child.wait_with_output()?)
}

fn checked(name: &str, output: Output) -> Result<Output, BridgeError> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(BridgeError::Command {
            command: name.to_string(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl HostFacility for SystemHost {
    fn read_crontab(&self) -> Result<String, BridgeError> {
        let output = run(Command::new("crontab").arg("-l"), None)?;
        // `crontab -l` exits non-zero when the user has no table yet.
        if !output.status.success() {
            return Ok(String::new());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn write_crontab(&self, content: &str) -> Result<(), BridgeError> {
        let output = run(Command::new("crontab").arg("-"), Some(content))?;
        checked("crontab -", output).map(|_| ())
    }

    fn supports_one_shot(&self) -> bool {
        self.one_shot
    }

    fn submit_one_shot(&self, when: &str, command: &str) -> Result<(), BridgeError> {
        let output = run(
            Command::new("at").args(when.split_whitespace()),
            Some(&format!("{command}\n")),
        )?;
        checked("at", output).map(|_| ())
    }

    fn queued_one_shots(&self) -> Result<Vec<QueuedJob>, BridgeError> {
        let output = checked("atq", run(&mut Command::new("atq"), None)?)?;
        let listing = String::from_utf8_lossy(&output.stdout);

        let mut jobs = Vec::new();
        for id in listing.lines().filter_map(|l| l.split_whitespace().next()) {
            let script = checked("at -c", run(Command::new("at").args(["-c", id]), None)?)?;
            jobs.push(QueuedJob {
                id: id.to_string(),
                script: String::from_utf8_lossy(&script.stdout).into_owned(),
            });
        }
        Ok(jobs)
    }

    fn remove_one_shot(&self, job_id: &str) -> Result<(), BridgeError> {
        let output = run(Command::new("atrm").arg(job_id), None)?;
        checked("atrm", output).map(|_| ())
    }
}

// ──── Bridge ────

/// [`ExecutorBridge`] backed by a crontab + `at` style host.
pub struct HostBridge<H> {
    host: H,
    runner: RunnerCommand,
}

impl<H: HostFacility> HostBridge<H> {
    pub fn new(host: H, runner: RunnerCommand) -> Self {
        Self { host, runner }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn cron_line(&self, task: &ScheduledTask) -> String {
        // cron treats a bare `%` as a newline.
        let command = self.runner.command_line(&task.id).replace('%', r"\%");
        format!("{} {}", task.schedule_expr, command)
    }

    fn register_recurring(&self, task: &ScheduledTask) -> Result<Registration, BridgeError> {
        let current = self.host.read_crontab()?;
        if current.contains(&task.id) {
            debug!(task_id = %task.id, "Crontab entry already present");
            return Ok(Registration::AlreadyInstalled);
        }

        let mut table = current.trim_end().to_string();
        if !table.is_empty() {
            table.push('\n');
        }
        table.push_str(&self.cron_line(task));
        table.push('\n');
        self.host.write_crontab(&table)?;
        info!(task_id = %task.id, expr = %task.schedule_expr, "Installed crontab entry");
        Ok(Registration::Installed)
    }

    fn register_one_shot(&self, task: &ScheduledTask) -> Result<Registration, BridgeError> {
        if !self.host.supports_one_shot() {
            return Ok(Registration::NeedsPoller);
        }
        let queued = self.host.queued_one_shots().unwrap_or_else(|e| {
            warn!(error = %e, "Could not list queued one-shot jobs");
            Vec::new()
        });
        if queued.iter().any(|job| job.script.contains(&task.id)) {
            return Ok(Registration::AlreadyInstalled);
        }

        self.host
            .submit_one_shot(&task.schedule_expr, &self.runner.command_line(&task.id))?;
        info!(task_id = %task.id, when = %task.schedule_expr, "Queued one-shot job");
        Ok(Registration::Installed)
    }

    fn deregister_recurring(&self, task: &ScheduledTask) -> Result<(), BridgeError> {
        let current = self.host.read_crontab()?;
        if !current.contains(&task.id) {
            return Ok(());
        }
        let mut table: String = current
            .lines()
            .filter(|line| !line.contains(&task.id))
            .collect::<Vec<_>>()
            .join("\n");
        if !table.is_empty() {
            table.push('\n');
        }
        self.host.write_crontab(&table)?;
        info!(task_id = %task.id, "Removed crontab entry");
        Ok(())
    }

    fn deregister_one_shot(&self, task: &ScheduledTask) {
        if !self.host.supports_one_shot() {
            return;
        }
        let jobs = match self.host.queued_one_shots() {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "Could not list queued one-shot jobs");
                return;
            }
        };
        for job in jobs.iter().filter(|job| job.script.contains(&task.id)) {
            match self.host.remove_one_shot(&job.id) {
                Ok(()) => info!(task_id = %task.id, job = %job.id, "Removed one-shot job"),
                Err(e) => warn!(task_id = %task.id, job = %job.id, error = %e, "Failed to remove one-shot job"),
            }
        }
    }
}

impl<H: HostFacility> ExecutorBridge for HostBridge<H> {
    fn register(&self, task: &ScheduledTask) -> Result<Registration, BridgeError> {
        match task.schedule_type {
            ScheduleType::Recurring => self.register_recurring(task),
            ScheduleType::OneShot => self.register_one_shot(task),
        }
    }

    fn deregister(&self, task: &ScheduledTask) -> Result<(), BridgeError> {
        match task.schedule_type {
            ScheduleType::Recurring => self.deregister_recurring(task),
            ScheduleType::OneShot => {
                self.deregister_one_shot(task);
                Ok(())
            }
        }
    }
}
