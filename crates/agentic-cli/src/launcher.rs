//! Detached `agentic daemon` process management.
//!
//! A running daemon holds an exclusive lock on `<store>.daemon.lock` for its
//! whole lifetime, with its PID written inside. The launcher probes that lock
//! instead of looking at process names.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use agentic_cron::{BridgeError, DaemonExit, PollerLauncher, RunnerCommand, TaskStore};
use anyhow::{Context, Result};
use fs2::FileExt;
use tracing::{debug, info};

/// Lock file guarding the single poll daemon of a store.
pub fn daemon_lock_path(store_path: &Path) -> PathBuf {
    let mut name = store_path.file_name().unwrap_or_default().to_os_string();
    name.push(".daemon.lock");
    store_path.with_file_name(name)
}

/// Held by the daemon process while it runs.
pub struct DaemonLock {
    _file: File,
}

impl DaemonLock {
    /// Take the daemon lock, or `None` if another daemon already holds it.
    pub fn try_acquire(path: &Path) -> io::Result<Option<Self>> {
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;
        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Some(Self { _file: file }))
    }
}

/// Whether some process currently holds the daemon lock. Leaves the file
/// contents alone.
pub fn daemon_running(lock_path: &Path) -> bool {
    let file = match OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)
    {
        Ok(file) => file,
        Err(e) => {
            debug!(lock = %lock_path.display(), error = %e, "Cannot open daemon lock");
            return false;
        }
    };
    match file.try_lock_exclusive() {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => true,
    }
}

/// Serve the store with `run` while holding the daemon lock.
///
/// After an idle exit the lock is released and the store checked once more:
/// a one-shot task created while the daemon was shutting down found the lock
/// still held and started nothing, so serving resumes. Returns `None` when
/// another daemon already holds the lock.
pub fn serve_locked(
    lock_path: &Path,
    store: &TaskStore,
    mut run: impl FnMut() -> DaemonExit,
) -> Result<Option<DaemonExit>> {
    let mut last = None;
    loop {
        let Some(lock) = DaemonLock::try_acquire(lock_path)
            .with_context(|| format!("Failed to open {}", lock_path.display()))?
        else {
            info!(lock = %lock_path.display(), "Poll daemon already running");
            return Ok(last);
        };
        let exit = run();
        drop(lock);
        last = Some(exit);

        if exit == DaemonExit::Stopped || !store.has_pending_one_shot()? {
            return Ok(last);
        }
        info!("One-shot task queued during shutdown, resuming poll daemon");
    }
}

/// Starts `agentic daemon` as a detached background process.
pub struct DetachedDaemonLauncher {
    command: RunnerCommand,
    poll_interval_secs: u64,
    lock_path: PathBuf,
}

impl DetachedDaemonLauncher {
    pub fn new(command: RunnerCommand, poll_interval_secs: u64, store_path: &Path) -> Self {
        Self {
            command,
            poll_interval_secs,
            lock_path: daemon_lock_path(store_path),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    fn spawn(&self) -> io::Result<u32> {
        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .arg("daemon")
            .arg("--poll-interval")
            .arg(self.poll_interval_secs.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        Ok(cmd.spawn()?.id())
    }
}

impl PollerLauncher for DetachedDaemonLauncher {
    fn ensure_running(&self) -> Result<(), BridgeError> {
        if daemon_running(self.lock_path()) {
            debug!(lock = %self.lock_path.display(), "Poll daemon already running");
            return Ok(());
        }
        let pid = self
            .spawn()
            .map_err(|e| BridgeError::Poller(format!("failed to start daemon: {e}")))?;
        info!(pid, "Started poll daemon");
        Ok(())
    }
}
