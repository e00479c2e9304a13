//! Wiring of configuration, store, host bridge and executors.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agentic_config::{AgenticConfig, OneShotBackend};
use agentic_cron::{
    ExecutionDefaults, HostBridge, HostFacility, RunnerCommand, SchedulerService, SystemHost,
    TaskRunner, TaskStore,
};
use agentic_tools::{SchedulerTool, ShellTool, ToolDispatcher};
use anyhow::{Context, Result};

use crate::executor::LlmTaskExecutor;
use crate::launcher::DetachedDaemonLauncher;

/// Everything a command needs, resolved once from flags and config.
pub struct App {
    pub config: AgenticConfig,
    pub config_path: Option<PathBuf>,
    pub store: Arc<TaskStore>,
}

impl App {
    pub fn load(config_path: Option<PathBuf>, store_path: Option<PathBuf>) -> Result<Self> {
        let config = match &config_path {
            Some(path) => agentic_config::load_config_from(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => agentic_config::load_config().context("Failed to load config")?,
        };

        let store_path = match store_path {
            Some(path) => path,
            None => config
                .scheduler
                .data_file_path()
                .context("Failed to resolve task store path")?,
        };
        // The host executor runs the stored command line from another
        // working directory.
        let store_path = std::path::absolute(&store_path)
            .with_context(|| format!("Invalid store path {}", store_path.display()))?;
        let config_path = config_path
            .map(|p| std::path::absolute(&p).unwrap_or(p));

        let store = TaskStore::open(&store_path)
            .with_context(|| format!("Failed to open task store {}", store_path.display()))?;

        Ok(Self {
            config,
            config_path,
            store: Arc::new(store),
        })
    }

    pub fn store_path(&self) -> &Path {
        self.store.path()
    }

    /// `agentic [--config ..] --store ..` prefix shared by every command the
    /// host or the launcher starts.
    fn self_command(&self) -> Result<RunnerCommand> {
        let exe = std::env::current_exe().context("Failed to locate the agentic executable")?;
        let mut command = RunnerCommand::new(exe);
        if let Some(path) = &self.config_path {
            command = command.arg("--config").arg(path.to_string_lossy());
        }
        Ok(command
            .arg("--store")
            .arg(self.store_path().to_string_lossy()))
    }

    pub fn host(&self) -> SystemHost {
        match self.config.scheduler.backend {
            OneShotBackend::Auto => SystemHost::detect(),
            OneShotBackend::At => SystemHost::with_one_shot(true),
            OneShotBackend::Poll => SystemHost::with_one_shot(false),
        }
    }

    pub fn one_shot_available(&self) -> bool {
        self.host().supports_one_shot()
    }

    pub fn launcher(&self) -> Result<DetachedDaemonLauncher> {
        Ok(DetachedDaemonLauncher::new(
            self.self_command()?,
            self.config.scheduler.poll_interval_secs,
            self.store_path(),
        ))
    }

    pub fn service(&self) -> Result<SchedulerService> {
        let bridge = HostBridge::new(self.host(), self.self_command()?.arg("run"));
        let defaults = ExecutionDefaults {
            provider: self.config.llm.provider.clone(),
            model: self.config.llm.model.clone(),
        };
        Ok(
            SchedulerService::new(self.store.clone(), Arc::new(bridge), defaults)
                .with_poller(Arc::new(self.launcher()?)),
        )
    }

    pub fn runner(&self) -> Result<TaskRunner> {
        let dispatcher = ToolDispatcher::new(ShellTool::new(&self.config.tools))
            .with_scheduler(SchedulerTool::new(Arc::new(self.service()?)));
        let executor = LlmTaskExecutor::new(self.config.llm.clone(), dispatcher);
        Ok(TaskRunner::new(self.store.clone(), Arc::new(executor))
            .with_stale_after(stale_window(self.config.scheduler.running_stale_secs)))
    }
}

fn stale_window(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}
