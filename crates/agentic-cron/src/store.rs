//! File-backed task storage.
//!
//! All tasks live in one JSON document (`{ "tasks": [...] }`). Every
//! mutation takes an exclusive advisory lock on `<store>.lock`, re-reads the
//! whole file, applies the change and atomically replaces the file, so
//! independent processes can share the store safely.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{ScheduledTask, TaskStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Task store IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to read task store: {0}")]
    Read(#[source] serde_json::Error),
    #[error("Failed to encode task store: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("Task {0} already exists")]
    DuplicateId(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    tasks: Vec<ScheduledTask>,
}

/// Optional fields merged by [`TaskStore::update_status`]. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub result: Option<String>,
    pub error: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_seconds: Option<f64>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Outcome of [`TaskStore::begin_run`].
#[derive(Debug, Clone, PartialEq)]
pub enum BeginRun {
    /// The task is now `running`; carries the updated record.
    Started(ScheduledTask),
    NotFound,
    /// Another run is in progress and has not gone stale.
    AlreadyRunning { since: Option<DateTime<Utc>> },
}

/// Persistent storage for scheduled tasks.
#[derive(Debug, Clone)]
pub struct TaskStore {
    path: PathBuf,
    lock_path: PathBuf,
}

impl TaskStore {
    /// Open or create a task store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let dir = parent_dir(&path);
        std::fs::create_dir_all(dir)?;

        let mut lock_name = path.file_name().unwrap_or_default().to_os_string();
        lock_name.push(".lock");
        let store = Self {
            lock_path: dir.join(lock_name),
            path,
        };

        if !store.path.exists() {
            store.with_lock(|tasks| Ok(((), tasks.is_empty())))?;
            debug!(path = %store.path.display(), "Initialized task store");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All tasks in insertion order.
    pub fn list(&self) -> Result<Vec<ScheduledTask>> {
        read_tasks(&self.path)
    }

    pub fn get(&self, id: &str) -> Result<Option<ScheduledTask>> {
        Ok(self.list()?.into_iter().find(|t| t.id == id))
    }

    /// Append a task. Fails if a task with the same id is already stored.
    pub fn insert(&self, task: ScheduledTask) -> Result<()> {
        self.with_lock(|tasks| {
            if tasks.iter().any(|t| t.id == task.id) {
                return Err(StoreError::DuplicateId(task.id.clone()));
            }
            tasks.push(task);
            Ok(((), true))
        })
    }

    /// Remove a task, returning it if it existed.
    pub fn remove(&self, id: &str) -> Result<Option<ScheduledTask>> {
        self.with_lock(|tasks| match tasks.iter().position(|t| t.id == id) {
            Some(index) => Ok((Some(tasks.remove(index)), true)),
            None => Ok((None, false)),
        })
    }

    /// Record a status transition. Sets `last_run` to now and merges only the
    /// fields present in `update`. Returns `false` for unknown ids.
    ///
    /// A one-shot task reaching a terminal status has fired for good and is
    /// removed in the same write.
    pub fn update_status(&self, id: &str, status: TaskStatus, update: StatusUpdate) -> Result<bool> {
        let now = Utc::now();
        self.with_lock(|tasks| {
            let Some(index) = tasks.iter().position(|t| t.id == id) else {
                return Ok((false, false));
            };
            if status.is_terminal() && tasks[index].is_one_shot() {
                tasks.remove(index);
                debug!(task_id = id, %status, "Removed finished one-shot task");
                return Ok((true, true));
            }
            let task = &mut tasks[index];
            task.status = status;
            task.last_run = Some(now);
            if let Some(result) = update.result {
                task.last_result = Some(result);
            }
            if let Some(error) = update.error {
                task.last_error = Some(error);
            }
            if let Some(code) = update.exit_code {
                task.exit_code = Some(code);
            }
            if let Some(duration) = update.duration_seconds {
                task.duration_seconds = Some(duration);
            }
            if let Some(at) = update.scheduled_at {
                task.scheduled_at = Some(at);
            }
            Ok((true, true))
        })
    }

    /// Load a task and move it to `running` under one lock.
    ///
    /// A task already `running` whose `last_run` is within `stale_after` of
    /// `now` is left alone. Older `running` states are treated as crashed
    /// runs and taken over.
    pub fn begin_run(&self, id: &str, stale_after: Duration, now: DateTime<Utc>) -> Result<BeginRun> {
        self.with_lock(|tasks| {
            let Some(task) = tasks.iter_mut().find(|t| t.id == id) else {
                return Ok((BeginRun::NotFound, false));
            };
            if task.status == TaskStatus::Running {
                let fresh = task.last_run.is_some_and(|since| now - since < stale_after);
                if fresh {
                    return Ok((BeginRun::AlreadyRunning { since: task.last_run }, false));
                }
            }
            task.status = TaskStatus::Running;
            task.last_run = Some(now);
            Ok((BeginRun::Started(task.clone()), true))
        })
    }

    /// Whether any one-shot task is still waiting to fire.
    pub fn has_pending_one_shot(&self) -> Result<bool> {
        Ok(self
            .list()?
            .iter()
            .any(|t| t.is_one_shot() && t.status == TaskStatus::Pending))
    }

    /// Run `f` against the current task list while holding the store lock.
    /// The file is rewritten only when `f` reports a change.
    fn with_lock<T>(
        &self,
        f: impl FnOnce(&mut Vec<ScheduledTask>) -> Result<(T, bool)>,
    ) -> Result<T> {
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)?;
        lock.lock_exclusive()?;

        let mut tasks = read_tasks(&self.path)?;
        let (value, changed) = f(&mut tasks)?;
        if changed {
            write_tasks(&self.path, tasks)?;
        }
        drop(lock);
        Ok(value)
    }
}

/// Run a store call on tokio's blocking pool. Store calls wait on file locks.
pub(crate) async fn blocking<T, F>(store: &Arc<TaskStore>, f: F) -> crate::Result<T>
where
    T: Send + 'static,
    F: FnOnce(&TaskStore) -> Result<T> + Send + 'static,
{
    let store = Arc::clone(store);
    Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn read_tasks(path: &Path) -> Result<Vec<ScheduledTask>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: TaskFile = serde_json::from_str(&content).map_err(StoreError::Read)?;
    Ok(file.tasks)
}

fn write_tasks(path: &Path, tasks: Vec<ScheduledTask>) -> Result<()> {
    let body = serde_json::to_vec_pretty(&TaskFile { tasks }).map_err(StoreError::Encode)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent_dir(path))?;
    tmp.write_all(&body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn open_lock(store: &TaskStore) -> io::Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&store.lock_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use chrono::Local;

    fn task(prompt: &str, schedule: &str) -> ScheduledTask {
        let descriptor = parse(schedule).unwrap();
        ScheduledTask::new(prompt, &descriptor, "ollama", "qwen3:30b-a3b", Local::now())
    }

    fn temp_store() -> (tempfile::TempDir, TaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TaskStore::open(dir.path().join("scheduled_tasks.json")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_open_creates_empty_document() {
        let (_dir, store) = temp_store();
        let content = std::fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(value["tasks"], serde_json::json!([]));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_insert_and_get_round_trip() {
        let (_dir, store) = temp_store();
        let t = task("check the weather", "at 5pm");
        store.insert(t.clone()).unwrap();

        let loaded = store.get(&t.id).unwrap().unwrap();
        assert_eq!(loaded.prompt, "check the weather");
        assert_eq!(loaded.schedule_type, crate::ScheduleType::Recurring);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded, t);
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let (_dir, store) = temp_store();
        let ids: Vec<String> = ["a", "b", "c"]
            .iter()
            .map(|p| {
                let t = task(p, "every hour");
                store.insert(t.clone()).unwrap();
                t.id
            })
            .collect();

        let listed: Vec<String> = store.list().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(listed, ids);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let (_dir, store) = temp_store();
        let t = task("a", "every hour");
        store.insert(t.clone()).unwrap();
        assert!(matches!(store.insert(t), Err(StoreError::DuplicateId(_))));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_unknown_leaves_store_unchanged() {
        let (_dir, store) = temp_store();
        store.insert(task("a", "every hour")).unwrap();
        let before = std::fs::read_to_string(store.path()).unwrap();

        assert!(store.remove("no-such-id").unwrap().is_none());
        assert_eq!(store.list().unwrap().len(), 1);
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), before);
    }

    #[test]
    fn test_remove_existing() {
        let (_dir, store) = temp_store();
        let t = task("a", "in 5 minutes");
        store.insert(t.clone()).unwrap();
        let removed = store.remove(&t.id).unwrap().unwrap();
        assert_eq!(removed.id, t.id);
        assert!(store.get(&t.id).unwrap().is_none());
    }

    #[test]
    fn test_update_status_merges_supplied_fields() {
        let (_dir, store) = temp_store();
        let t = task("a", "every day at 6am");
        store.insert(t.clone()).unwrap();

        let updated = store
            .update_status(
                &t.id,
                TaskStatus::Failed,
                StatusUpdate {
                    error: Some("backend down".into()),
                    exit_code: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(updated);

        store
            .update_status(
                &t.id,
                TaskStatus::Completed,
                StatusUpdate {
                    result: Some("done".into()),
                    exit_code: Some(0),
                    duration_seconds: Some(1.5),
                    ..Default::default()
                },
            )
            .unwrap();

        let loaded = store.get(&t.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert!(loaded.last_run.is_some());
        assert_eq!(loaded.last_result.as_deref(), Some("done"));
        // Not supplied in the second update, so the earlier error survives.
        assert_eq!(loaded.last_error.as_deref(), Some("backend down"));
        assert_eq!(loaded.exit_code, Some(0));
        assert_eq!(loaded.duration_seconds, Some(1.5));
    }

    #[test]
    fn test_terminal_status_removes_one_shot() {
        let (_dir, store) = temp_store();
        let done = task("a", "in 5 minutes");
        let broken = task("b", "in 5 minutes");
        let recurring = task("c", "every hour");
        for t in [&done, &broken, &recurring] {
            store.insert(t.clone()).unwrap();
        }

        let completed = StatusUpdate {
            result: Some("ok".into()),
            exit_code: Some(0),
            ..Default::default()
        };
        assert!(store.update_status(&done.id, TaskStatus::Completed, completed.clone()).unwrap());
        assert!(store.update_status(&broken.id, TaskStatus::Failed, StatusUpdate::default()).unwrap());
        store.update_status(&recurring.id, TaskStatus::Completed, completed).unwrap();

        let ids: Vec<String> = store.list().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![recurring.id]);
    }

    #[test]
    fn test_running_one_shot_stays_in_store() {
        let (_dir, store) = temp_store();
        let t = task("a", "in 5 minutes");
        store.insert(t.clone()).unwrap();
        store.update_status(&t.id, TaskStatus::Running, StatusUpdate::default()).unwrap();
        assert_eq!(store.get(&t.id).unwrap().unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn test_update_status_unknown_id_is_noop() {
        let (_dir, store) = temp_store();
        let updated = store
            .update_status("missing", TaskStatus::Completed, StatusUpdate::default())
            .unwrap();
        assert!(!updated);
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_empty_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "  \n").unwrap();

        let store = TaskStore::open(&path).unwrap();
        assert!(store.list().unwrap().is_empty());
        store.insert(task("a", "every hour")).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_file_is_reported_and_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tasks.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = TaskStore::open(&path).unwrap();
        assert!(matches!(store.list(), Err(StoreError::Read(_))));
        assert!(matches!(
            store.insert(task("a", "every hour")),
            Err(StoreError::Read(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[test]
    fn test_parent_dir_of_bare_file_name() {
        assert_eq!(parent_dir(Path::new("tasks.json")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/tmp/tasks.json")), Path::new("/tmp"));
    }

    #[test]
    fn test_concurrent_inserts_from_independent_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = Arc::new(dir.path().join("tasks.json"));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let path = Arc::clone(&path);
                std::thread::spawn(move || {
                    // Separate handles stand in for separate processes.
                    let store = TaskStore::open(path.as_path()).unwrap();
                    let t = task(&format!("job {i}"), "every hour");
                    store.insert(t.clone()).unwrap();
                    t.id
                })
            })
            .collect();
        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let store = TaskStore::open(path.as_path()).unwrap();
        let tasks = store.list().unwrap();
        assert_eq!(tasks.len(), 8);
        for id in ids {
            assert!(store.get(&id).unwrap().is_some());
        }
    }

    #[test]
    fn test_begin_run_marks_running() {
        let (_dir, store) = temp_store();
        let t = task("a", "in 5 minutes");
        store.insert(t.clone()).unwrap();

        let now = Utc::now();
        match store.begin_run(&t.id, Duration::hours(1), now).unwrap() {
            BeginRun::Started(started) => {
                assert_eq!(started.status, TaskStatus::Running);
                assert_eq!(started.last_run, Some(now));
            }
            other => panic!("expected Started, got {other:?}"),
        }
        assert_eq!(
            store.get(&t.id).unwrap().unwrap().status,
            TaskStatus::Running
        );
    }

    #[test]
    fn test_begin_run_guards_fresh_running_task() {
        let (_dir, store) = temp_store();
        let t = task("a", "every hour");
        store.insert(t.clone()).unwrap();

        let now = Utc::now();
        store.begin_run(&t.id, Duration::hours(1), now).unwrap();
        let second = store
            .begin_run(&t.id, Duration::hours(1), now + Duration::minutes(5))
            .unwrap();
        assert_eq!(second, BeginRun::AlreadyRunning { since: Some(now) });
    }

    #[test]
    fn test_begin_run_overrides_stale_running_task() {
        let (_dir, store) = temp_store();
        let t = task("a", "every hour");
        store.insert(t.clone()).unwrap();

        let now = Utc::now();
        store.begin_run(&t.id, Duration::hours(1), now).unwrap();
        let later = now + Duration::hours(2);
        match store.begin_run(&t.id, Duration::hours(1), later).unwrap() {
            BeginRun::Started(started) => assert_eq!(started.last_run, Some(later)),
            other => panic!("expected Started, got {other:?}"),
        }
    }

    #[test]
    fn test_begin_run_unknown_id() {
        let (_dir, store) = temp_store();
        assert_eq!(
            store.begin_run("nope", Duration::hours(1), Utc::now()).unwrap(),
            BeginRun::NotFound
        );
    }

    #[test]
    fn test_has_pending_one_shot() {
        let (_dir, store) = temp_store();
        store.insert(task("a", "every hour")).unwrap();
        assert!(!store.has_pending_one_shot().unwrap());

        let one_shot = task("b", "in 10 minutes");
        store.insert(one_shot.clone()).unwrap();
        assert!(store.has_pending_one_shot().unwrap());

        store.remove(&one_shot.id).unwrap();
        assert!(!store.has_pending_one_shot().unwrap());
    }

    #[test]
    fn test_mutation_waits_for_external_lock() {
        let (_dir, store) = temp_store();
        let lock = open_lock(&store).unwrap();
        lock.lock_exclusive().unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || store.insert(task("late", "every hour")).unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(store.list().unwrap().is_empty());

        drop(lock);
        writer.join().unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
