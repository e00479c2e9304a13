mod app;
mod executor;
mod launcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use agentic_cron::{PollDaemon, RunOutcome};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::App;
use crate::launcher::{daemon_lock_path, daemon_running, serve_locked};

#[derive(Parser)]
#[command(name = "agentic", about = "Personal automation agent task scheduler")]
struct Cli {
    /// Config file (defaults to ~/.agentic/config.json5)
    #[arg(long, global = true, env = "AGENTIC_CONFIG")]
    config: Option<PathBuf>,

    /// Task store file (overrides scheduler.data_file)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Schedule a prompt using a natural-language time expression
    Schedule {
        /// Instruction to execute at fire time
        prompt: String,

        /// When to run (e.g. "at 5pm", "every monday at 9am", "in 30 minutes")
        #[arg(short, long)]
        when: String,

        /// LLM provider for this task
        #[arg(long)]
        provider: Option<String>,

        /// LLM model for this task
        #[arg(long)]
        model: Option<String>,
    },
    /// List scheduled tasks
    List,
    /// Cancel a scheduled task
    Cancel {
        task_id: String,
    },
    /// Execute one scheduled task now (invoked by the host executor)
    Run {
        #[arg(long, env = "AGENTIC_TASK_ID")]
        task_id: String,
    },
    /// Serve one-shot tasks from the poll loop
    Daemon {
        /// Seconds between store scans (overrides scheduler.poll_interval_secs)
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Keep running after the queue drains
        #[arg(long)]
        stay_alive: bool,
    },
    /// Show configuration and scheduler backend status
    Status,
    /// List models available from the configured provider
    Models {
        #[arg(long)]
        provider: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let app = App::load(cli.config, cli.store)?;

    match cli.command {
        Commands::Schedule {
            prompt,
            when,
            provider,
            model,
        } => {
            let task = app.service()?.create_task(
                &prompt,
                &when,
                provider.as_deref(),
                model.as_deref(),
            )?;
            println!("Task scheduled successfully!");
            println!("  ID: {}", task.id);
            println!("  Prompt: {}", task.prompt);
            println!("  Schedule: {}", task.display_schedule);
            println!("  Type: {}", task.schedule_type);
            if let Some(at) = task.scheduled_at {
                println!("  Next run: {}", at.with_timezone(&chrono::Local).to_rfc3339());
            }
        }
        Commands::List => {
            let tasks = app.store.list()?;
            if tasks.is_empty() {
                println!("No scheduled tasks.");
            }
            for task in &tasks {
                println!("{}  [{}] {}", task.id, task.status, task.display_schedule);
                println!("    Prompt: {}", task.prompt);
                println!("    Model: {}/{}", task.llm_provider, task.llm_model);
                if let Some(last_run) = task.last_run {
                    println!(
                        "    Last run: {}",
                        last_run.with_timezone(&chrono::Local).to_rfc3339()
                    );
                }
                if let Some(error) = &task.last_error {
                    println!("    Last error: {error}");
                }
            }
        }
        Commands::Cancel { task_id } => {
            if !app.service()?.cancel_task(&task_id)? {
                bail!("Task {task_id} not found");
            }
            println!("Task {task_id} cancelled successfully.");
        }
        Commands::Run { task_id } => {
            let rt = tokio::runtime::Runtime::new()?;
            let runner = app.runner()?;
            let outcome = rt.block_on(runner.run(&task_id))?;
            match &outcome {
                RunOutcome::NotFound => println!("Task {task_id} not found, nothing to run."),
                RunOutcome::AlreadyRunning => println!("Task {task_id} is already running."),
                RunOutcome::Completed {
                    summary,
                    duration_seconds,
                } => {
                    println!("{summary}");
                    println!("Task {task_id} completed in {duration_seconds:.1}s.");
                }
                RunOutcome::Failed {
                    error,
                    duration_seconds,
                } => println!("Task {task_id} failed after {duration_seconds:.1}s: {error}"),
            }
            std::process::exit(outcome.exit_code());
        }
        Commands::Daemon {
            poll_interval,
            stay_alive,
        } => {
            let interval = poll_interval.unwrap_or(app.config.scheduler.poll_interval_secs);
            let daemon = PollDaemon::new(
                app.store.clone(),
                Arc::new(app.runner()?),
                Duration::from_secs(interval.max(1)),
            )
            .exit_when_idle(!stay_alive);

            let rt = tokio::runtime::Runtime::new()?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            rt.spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Interrupt received, stopping poll daemon");
                    on_signal.cancel();
                }
            });
            let lock_path = daemon_lock_path(app.store_path());
            serve_locked(&lock_path, &app.store, || {
                rt.block_on(daemon.run(cancel.clone()))
            })?;
        }
        Commands::Status => {
            let config_path = match &app.config_path {
                Some(path) => path.clone(),
                None => agentic_config::config_file_path()?,
            };
            let tasks = app.store.list()?;
            let pending = tasks
                .iter()
                .filter(|t| !t.status.is_terminal())
                .count();
            let one_shot = if app.one_shot_available() {
                "at"
            } else {
                "poll daemon"
            };

            println!("agentic scheduler");
            println!("  config: {}", config_path.display());
            println!("  store: {}", app.store_path().display());
            println!("  tasks: {} ({} active)", tasks.len(), pending);
            println!(
                "  llm: {} {} ({})",
                app.config.llm.provider, app.config.llm.model, app.config.llm.base_url
            );
            println!("  recurring backend: crontab");
            println!("  one-shot backend: {one_shot}");
            println!(
                "  poll daemon: {}",
                if daemon_running(&daemon_lock_path(app.store_path())) {
                    "running"
                } else {
                    "stopped"
                }
            );
        }
        Commands::Models { provider } => {
            let provider = provider.unwrap_or_else(|| app.config.llm.provider.clone());
            let client = agentic_llm::client_for(&provider, &app.config.llm, &app.config.llm.model)?;
            let rt = tokio::runtime::Runtime::new()?;
            let models = rt
                .block_on(client.available_models())
                .with_context(|| format!("Failed to list models for {provider}"))?;
            if models.is_empty() {
                println!("No models reported by {provider}.");
            }
            for model in models {
                println!("{model}");
            }
        }
    }

    Ok(())
}
