use crate::core::error::SchedulerError;
use crate::core::probe::{GpuProbe, GpuRecord};
use crate::core::store::TaskStore;
use crate::core::task::{SubmitRequest, Task, TaskStatus};
use crate::core::worktree;
use crate::tmux::SessionRunner;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A probe record augmented with scheduler-side occupancy.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpuView {
    #[serde(flatten)]
    pub gpu: GpuRecord,
    pub assigned_task_id: Option<i64>,
    pub is_free: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogTail {
    pub task_id: i64,
    pub lines: Vec<String>,
    pub truncated: bool,
}

enum LaunchOutcome {
    Started(Task),
    /// Marked failed and persisted; admission continues with the next task.
    Failed,
    /// Could not persist the launch; the task must stay queued.
    StoreUnavailable,
}

/// The scheduler core: owns the in-memory queue and running set, and is the
/// only writer of task state. All public operations and the periodic tick
/// run under one exclusive lock held by the caller.
pub struct Scheduler {
    store: TaskStore,
    probe: Arc<dyn GpuProbe>,
    runner: Arc<dyn SessionRunner>,
    runtime_dir: PathBuf,
    setup_script: Option<PathBuf>,
    log_tail_default: usize,
    log_tail_max: usize,
    /// Queued task ids in submission order.
    queue: VecDeque<i64>,
    /// Running tasks by id; the authority for GPU occupancy.
    running: HashMap<i64, Task>,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Rebuild in-memory state from the store after a restart.
    ///
    /// Running tasks whose session is still alive are adopted; the rest are
    /// resolved through their `exit_code` file. Queued tasks re-enter the
    /// queue in id order.
    fn recover(&mut self) -> anyhow::Result<()> {
        for mut task in self.store.load_running()? {
            if self.runner.exists(&task.session_name) {
                tracing::info!(
                    task_id = task.id,
                    session = %task.session_name,
                    "adopted live session from previous run"
                );
                self.running.insert(task.id, task);
                continue;
            }

            let dir = worktree::task_dir(&self.runtime_dir, task.id);
            if !resolve_exited(&mut task, &dir, "session lost across restart") {
                continue;
            }
            tracing::warn!(
                task_id = task.id,
                status = %task.status,
                "resolved orphaned task from previous run"
            );
            self.store.update(&task)?;
        }

        for task in self.store.list_by_status(TaskStatus::Queued)? {
            self.queue.push_back(task.id);
        }
        if !self.queue.is_empty() {
            tracing::info!(count = self.queue.len(), "restored queued tasks");
        }
        Ok(())
    }

    /// Validate and enqueue a task. The task is not launched here; it waits
    /// for the next scheduling tick.
    pub fn submit(&mut self, request: SubmitRequest) -> Result<Task, SchedulerError> {
        if request.gpu_count < 1 {
            return Err(SchedulerError::Validation(
                "gpu_count must be at least 1".to_string(),
            ));
        }
        if request.command.trim().is_empty() {
            return Err(SchedulerError::Validation(
                "command must not be empty".to_string(),
            ));
        }

        let snapshot = self
            .probe
            .snapshot()
            .map_err(|_| SchedulerError::Validation("GPU inventory unavailable".to_string()))?;
        let known_model = snapshot
            .iter()
            .any(|gpu| gpu.name.as_deref() == Some(request.gpu_type.as_str()));
        if !known_model {
            return Err(SchedulerError::Validation(format!(
                "no GPU with model '{}' is present",
                request.gpu_type
            )));
        }

        let mut task = Task::new(
            request.name,
            request.gpu_type,
            request.gpu_count,
            request.command,
        );
        task.id = self.store.insert(&task).map_err(internal)?;
        self.queue.push_back(task.id);
        tracing::info!(
            task_id = task.id,
            gpu_type = %task.gpu_type,
            gpu_count = task.gpu_count,
            "task queued"
        );
        Ok(task)
    }

    /// All tasks, newest first.
    pub fn list(&self) -> Result<Vec<Task>, SchedulerError> {
        self.store.list_all().map_err(internal)
    }

    pub fn get(&self, id: i64) -> Result<Task, SchedulerError> {
        self.store
            .get(id)
            .map_err(internal)?
            .ok_or(SchedulerError::NotFound(id))
    }

    /// Fresh probe snapshot joined with the running set's GPU assignments.
    pub fn gpu_status(&self) -> Result<Vec<GpuView>, SchedulerError> {
        let snapshot = self.probe.snapshot().map_err(|e| {
            tracing::warn!("GPU probe failed during status read: {e:#}");
            SchedulerError::ProbeUnavailable(e.to_string())
        })?;

        let holders: HashMap<u32, i64> = self
            .running
            .values()
            .flat_map(|task| task.assigned_gpus.iter().map(move |&gpu| (gpu, task.id)))
            .collect();

        Ok(snapshot
            .into_iter()
            .map(|gpu| {
                let assigned_task_id = holders.get(&gpu.index).copied();
                GpuView {
                    is_free: assigned_task_id.is_none(),
                    assigned_task_id,
                    gpu,
                }
            })
            .collect())
    }

    /// Tail of a task's log file. A task that has not produced a log yet
    /// yields an empty, non-truncated result.
    pub fn logs(&self, id: i64, tail: Option<usize>) -> Result<LogTail, SchedulerError> {
        let task = self.get(id)?;
        let limit = tail.unwrap_or(self.log_tail_default).min(self.log_tail_max);

        let empty = LogTail {
            task_id: id,
            lines: Vec::new(),
            truncated: false,
        };
        let Some(path) = task.log_path else {
            return Ok(empty);
        };

        match crate::utils::tail_lines(&path, limit) {
            Ok((lines, truncated)) => Ok(LogTail {
                task_id: id,
                lines,
                truncated,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(empty),
            Err(e) => {
                tracing::warn!(task_id = id, "failed to read log file: {e}");
                Ok(empty)
            }
        }
    }

    /// Cancel a queued or running task. Terminal tasks are rejected.
    pub fn cancel(&mut self, id: i64) -> Result<Task, SchedulerError> {
        let mut task = self.get(id)?;
        match task.status {
            TaskStatus::Queued => {
                self.queue.retain(|&queued| queued != id);
                if !task.try_transition(TaskStatus::Cancelled) {
                    return Err(SchedulerError::IllegalState {
                        id,
                        status: task.status,
                    });
                }
                task.completed_at = Some(Utc::now());
                task.error = Some("cancelled before start".to_string());
                self.store.update(&task).map_err(internal)?;
                tracing::info!(task_id = id, "cancelled queued task");
                Ok(task)
            }
            TaskStatus::Running => {
                if let Err(e) = self.runner.kill(&task.session_name) {
                    tracing::warn!(
                        task_id = id,
                        session = %task.session_name,
                        "failed to kill session: {e}"
                    );
                }
                self.running.remove(&id);
                if !task.try_transition(TaskStatus::Cancelled) {
                    return Err(SchedulerError::IllegalState {
                        id,
                        status: task.status,
                    });
                }
                task.completed_at = Some(Utc::now());
                task.error = Some("cancelled while running".to_string());
                self.store.update(&task).map_err(internal)?;
                tracing::info!(task_id = id, "cancelled running task");
                Ok(task)
            }
            status => Err(SchedulerError::IllegalState { id, status }),
        }
    }

    /// One scheduler iteration: snapshot the GPU inventory, admit from the
    /// queue head, then reconcile the running set. A failed snapshot makes
    /// the whole tick a no-op.
    pub fn scheduling_tick(&mut self) {
        let snapshot = match self.probe.snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::debug!("skipping scheduling tick, probe failed: {e:#}");
                return;
            }
        };

        self.admit(&snapshot);
        self.reconcile();
    }

    /// Unheld GPU indices grouped by model, in probe order.
    fn free_pool(&self, snapshot: &[GpuRecord]) -> HashMap<String, Vec<u32>> {
        let held: HashSet<u32> = self
            .running
            .values()
            .flat_map(|task| task.assigned_gpus.iter().copied())
            .collect();

        let mut free: HashMap<String, Vec<u32>> = HashMap::new();
        for gpu in snapshot {
            let Some(name) = &gpu.name else { continue };
            if held.contains(&gpu.index) {
                continue;
            }
            free.entry(name.clone()).or_default().push(gpu.index);
        }
        free
    }

    /// FIFO admission with head-of-line blocking: the queue head either
    /// launches or blocks everything behind it.
    fn admit(&mut self, snapshot: &[GpuRecord]) {
        let mut free = self.free_pool(snapshot);

        loop {
            let Some(&head) = self.queue.front() else {
                break;
            };

            let task = match self.store.get(head) {
                Ok(Some(task)) => task,
                Ok(None) => {
                    tracing::error!(task_id = head, "queued task missing from store, dropping");
                    self.queue.pop_front();
                    continue;
                }
                Err(e) => {
                    tracing::error!("task store read failed during admission: {e:#}");
                    return;
                }
            };
            if task.status != TaskStatus::Queued {
                self.queue.pop_front();
                continue;
            }

            let needed = task.gpu_count as usize;
            let gpu_type = task.gpu_type.clone();
            let Some(pool) = free.get_mut(&gpu_type) else {
                break;
            };
            if pool.len() < needed {
                break;
            }

            let assigned: Vec<u32> = pool.drain(..needed).collect();
            self.queue.pop_front();

            match self.launch(task, assigned.clone()) {
                LaunchOutcome::Started(task) => {
                    self.running.insert(task.id, task);
                }
                LaunchOutcome::Failed => {
                    // The GPUs were never used; hand them to the next task,
                    // keeping probe order.
                    if let Some(pool) = free.get_mut(&gpu_type) {
                        let mut restored = assigned;
                        restored.extend(pool.drain(..));
                        *pool = restored;
                    }
                }
                LaunchOutcome::StoreUnavailable => {
                    self.queue.push_front(head);
                    return;
                }
            }
        }
    }

    /// Materialize the work tree, persist the running record, then start the
    /// session. Persisting first means a crash between the two steps leaves
    /// an orphan that startup reconciliation resolves, never a lost session.
    fn launch(&mut self, mut task: Task, assigned: Vec<u32>) -> LaunchOutcome {
        let id = task.id;
        if !task.try_transition(TaskStatus::Running) {
            return LaunchOutcome::Failed;
        }
        task.started_at = Some(Utc::now());
        task.assigned_gpus = assigned;
        task.session_name = Task::session_name_for(id);

        let tree = match worktree::materialize(
            &self.runtime_dir,
            &task,
            self.setup_script.as_deref(),
        ) {
            Ok(tree) => tree,
            Err(e) => {
                return self.fail_launch(task, format!("failed to prepare work tree: {e:#}"));
            }
        };
        task.log_path = Some(tree.log_file.clone());

        if let Err(e) = self.store.update(&task) {
            tracing::error!(
                task_id = id,
                "could not persist launch, leaving task queued: {e:#}"
            );
            return LaunchOutcome::StoreUnavailable;
        }

        if let Err(e) = self.runner.start(&task.session_name, &tree.run_script) {
            return self.fail_launch(task, format!("failed to start session: {e:#}"));
        }

        tracing::info!(
            task_id = id,
            session = %task.session_name,
            gpus = ?task.assigned_gpus,
            "task launched"
        );
        LaunchOutcome::Started(task)
    }

    fn fail_launch(&mut self, mut task: Task, reason: String) -> LaunchOutcome {
        tracing::error!(task_id = task.id, "{reason}");
        if task.try_transition(TaskStatus::Failed) {
            task.completed_at = Some(Utc::now());
            task.error = Some(reason);
            if let Err(e) = self.store.update(&task) {
                tracing::error!(task_id = task.id, "failed to persist launch failure: {e:#}");
            }
        }
        LaunchOutcome::Failed
    }

    /// Record terminal states for running tasks whose session is gone. The
    /// `exit_code` file decides the outcome; a vanished session without one
    /// is a failure.
    fn reconcile(&mut self) {
        let mut ids: Vec<i64> = self.running.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let session_alive = self
                .running
                .get(&id)
                .is_some_and(|task| self.runner.exists(&task.session_name));
            if session_alive {
                continue;
            }
            let Some(mut task) = self.running.remove(&id) else {
                continue;
            };

            let dir = worktree::task_dir(&self.runtime_dir, id);
            if !resolve_exited(&mut task, &dir, "session ended without recording exit code") {
                continue;
            }
            match task.status {
                TaskStatus::Completed => tracing::info!(task_id = id, "task completed"),
                _ => tracing::warn!(task_id = id, exit_code = ?task.exit_code, "task failed"),
            }

            if let Err(e) = self.store.update(&task) {
                // The store still says running; the next startup
                // reconciliation repairs it from the exit_code file.
                tracing::error!(task_id = id, "failed to persist reconciled task: {e:#}");
            }
        }
    }
}

fn internal(e: anyhow::Error) -> SchedulerError {
    SchedulerError::Internal(e.to_string())
}

/// Resolve a running task whose session is gone, using the recorded exit
/// status. Returns false if the status change was refused.
fn resolve_exited(task: &mut Task, dir: &Path, missing_exit_error: &str) -> bool {
    let (next, exit_code, error) = match worktree::read_exit_code(dir) {
        Some(0) => (TaskStatus::Completed, Some(0), None),
        Some(code) => (
            TaskStatus::Failed,
            Some(code),
            Some(format!("exit code {code}")),
        ),
        None => (TaskStatus::Failed, None, Some(missing_exit_error.to_string())),
    };
    if !task.try_transition(next) {
        return false;
    }
    task.exit_code = exit_code;
    task.error = error;
    task.completed_at = Some(Utc::now());
    true
}

/// Builder wiring the scheduler's collaborators; `build` runs startup
/// reconciliation against the store.
pub struct SchedulerBuilder {
    store: Option<TaskStore>,
    probe: Option<Arc<dyn GpuProbe>>,
    runner: Option<Arc<dyn SessionRunner>>,
    runtime_dir: PathBuf,
    setup_script: Option<PathBuf>,
    log_tail_default: usize,
    log_tail_max: usize,
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            probe: None,
            runner: None,
            runtime_dir: PathBuf::from("."),
            setup_script: None,
            log_tail_default: 100,
            log_tail_max: 10_000,
        }
    }

    pub fn with_store(mut self, store: TaskStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn GpuProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_runner(mut self, runner: Arc<dyn SessionRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_runtime_dir(mut self, dir: PathBuf) -> Self {
        self.runtime_dir = dir;
        self
    }

    pub fn with_setup_script(mut self, script: Option<PathBuf>) -> Self {
        self.setup_script = script;
        self
    }

    pub fn with_log_tail(mut self, default: usize, max: usize) -> Self {
        self.log_tail_default = default;
        self.log_tail_max = max;
        self
    }

    pub fn build(self) -> anyhow::Result<Scheduler> {
        let mut scheduler = Scheduler {
            store: self.store.ok_or_else(|| anyhow::anyhow!("missing store"))?,
            probe: self.probe.ok_or_else(|| anyhow::anyhow!("missing probe"))?,
            runner: self
                .runner
                .ok_or_else(|| anyhow::anyhow!("missing session runner"))?,
            runtime_dir: self.runtime_dir,
            setup_script: self.setup_script,
            log_tail_default: self.log_tail_default,
            log_tail_max: self.log_tail_max,
            queue: VecDeque::new(),
            running: HashMap::new(),
        };
        scheduler.recover()?;
        Ok(scheduler)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct FakeProbe {
        gpus: Mutex<Vec<GpuRecord>>,
        online: Mutex<bool>,
    }

    impl FakeProbe {
        fn with_gpus(specs: &[(u32, &str)]) -> Arc<Self> {
            Arc::new(Self {
                gpus: Mutex::new(specs.iter().map(|&(index, name)| gpu(index, name)).collect()),
                online: Mutex::new(true),
            })
        }

        fn set_online(&self, online: bool) {
            *self.online.lock().unwrap() = online;
        }
    }

    impl GpuProbe for FakeProbe {
        fn snapshot(&self) -> anyhow::Result<Vec<GpuRecord>> {
            if !*self.online.lock().unwrap() {
                anyhow::bail!("probe offline");
            }
            Ok(self.gpus.lock().unwrap().clone())
        }
    }

    fn gpu(index: u32, name: &str) -> GpuRecord {
        GpuRecord {
            index,
            uuid: Some(format!("GPU-{index:04}")),
            name: Some(name.to_string()),
            memory_total_mib: Some(81920),
            memory_used_mib: Some(0),
            utilization_pct: Some(0),
        }
    }

    #[derive(Default)]
    struct FakeRunner {
        sessions: Mutex<HashSet<String>>,
        killed: Mutex<Vec<String>>,
        fail_starts: Mutex<u32>,
    }

    impl FakeRunner {
        fn fail_next_starts(&self, count: u32) {
            *self.fail_starts.lock().unwrap() = count;
        }

        fn end_session(&self, name: &str) {
            self.sessions.lock().unwrap().remove(name);
        }
    }

    impl SessionRunner for FakeRunner {
        fn start(&self, name: &str, script: &Path) -> anyhow::Result<()> {
            let mut failures = self.fail_starts.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                anyhow::bail!("multiplexer unavailable");
            }
            anyhow::ensure!(script.exists(), "session script does not exist");
            self.sessions.lock().unwrap().insert(name.to_string());
            Ok(())
        }

        fn exists(&self, name: &str) -> bool {
            self.sessions.lock().unwrap().contains(name)
        }

        fn kill(&self, name: &str) -> anyhow::Result<()> {
            self.sessions.lock().unwrap().remove(name);
            self.killed.lock().unwrap().push(name.to_string());
            Ok(())
        }
    }

    struct Harness {
        temp: TempDir,
        store: TaskStore,
        probe: Arc<FakeProbe>,
        runner: Arc<FakeRunner>,
        scheduler: Scheduler,
    }

    fn harness(gpus: &[(u32, &str)]) -> Harness {
        let temp = TempDir::new().unwrap();
        let store = TaskStore::open(&temp.path().join("tasks.db")).unwrap();
        let probe = FakeProbe::with_gpus(gpus);
        let runner = Arc::new(FakeRunner::default());
        let scheduler = build_scheduler(&temp, store.clone(), probe.clone(), runner.clone());
        Harness {
            temp,
            store,
            probe,
            runner,
            scheduler,
        }
    }

    fn build_scheduler(
        temp: &TempDir,
        store: TaskStore,
        probe: Arc<FakeProbe>,
        runner: Arc<FakeRunner>,
    ) -> Scheduler {
        Scheduler::builder()
            .with_store(store)
            .with_probe(probe)
            .with_runner(runner)
            .with_runtime_dir(temp.path().to_path_buf())
            .build()
            .unwrap()
    }

    fn submit(harness: &mut Harness, name: &str, gpu_type: &str, gpu_count: u32) -> i64 {
        harness
            .scheduler
            .submit(SubmitRequest {
                name: name.to_string(),
                gpu_type: gpu_type.to_string(),
                gpu_count,
                command: "echo hello".to_string(),
            })
            .unwrap()
            .id
    }

    fn status_of(harness: &Harness, id: i64) -> TaskStatus {
        harness.store.get(id).unwrap().unwrap().status
    }

    fn write_exit_code(harness: &Harness, id: i64, code: i32) {
        let dir = worktree::task_dir(harness.temp.path(), id);
        fs::write(dir.join(worktree::EXIT_CODE_FILE), format!("{code}\n")).unwrap();
    }

    #[test]
    fn test_head_of_line_blocking() {
        let mut h = harness(&[(0, "A100"), (1, "A100")]);
        let t1 = submit(&mut h, "big", "A100", 2);
        let t2 = submit(&mut h, "small", "A100", 1);

        h.scheduler.scheduling_tick();

        assert_eq!(status_of(&h, t1), TaskStatus::Running);
        assert_eq!(status_of(&h, t2), TaskStatus::Queued);
        let running = h.store.get(t1).unwrap().unwrap();
        assert_eq!(running.assigned_gpus, vec![0, 1]);

        // With the head launched, the next tick admits the smaller task only
        // if a GPU is free, which it is not.
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t2), TaskStatus::Queued);
    }

    #[test]
    fn test_head_blocks_even_when_tail_would_fit() {
        let mut h = harness(&[(0, "A100"), (1, "A100")]);
        let t1 = submit(&mut h, "one", "A100", 1);
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t1), TaskStatus::Running);

        // Head needs two GPUs but only one is free; the one-GPU task behind
        // it must not skip ahead.
        let t2 = submit(&mut h, "big", "A100", 2);
        let t3 = submit(&mut h, "small", "A100", 1);
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t2), TaskStatus::Queued);
        assert_eq!(status_of(&h, t3), TaskStatus::Queued);
    }

    #[test]
    fn test_fifo_within_model() {
        let mut h = harness(&[(0, "A100"), (1, "A100")]);
        let t1 = submit(&mut h, "first", "A100", 1);
        let t2 = submit(&mut h, "second", "A100", 1);
        let t3 = submit(&mut h, "third", "A100", 1);

        h.scheduler.scheduling_tick();

        let first = h.store.get(t1).unwrap().unwrap();
        let second = h.store.get(t2).unwrap().unwrap();
        assert_eq!(first.status, TaskStatus::Running);
        assert_eq!(second.status, TaskStatus::Running);
        assert_eq!(status_of(&h, t3), TaskStatus::Queued);

        // Submission order maps onto probe order, with no index shared.
        assert_eq!(first.assigned_gpus, vec![0]);
        assert_eq!(second.assigned_gpus, vec![1]);
    }

    #[test]
    fn test_admission_is_per_model() {
        let mut h = harness(&[(0, "A100"), (1, "V100")]);
        let t1 = submit(&mut h, "a", "A100", 1);
        let t2 = submit(&mut h, "v", "V100", 1);

        h.scheduler.scheduling_tick();

        assert_eq!(status_of(&h, t1), TaskStatus::Running);
        assert_eq!(status_of(&h, t2), TaskStatus::Running);
        assert_eq!(h.store.get(t1).unwrap().unwrap().assigned_gpus, vec![0]);
        assert_eq!(h.store.get(t2).unwrap().unwrap().assigned_gpus, vec![1]);
    }

    #[test]
    fn test_completion_on_exit_zero() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "ok", "A100", 1);
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t1), TaskStatus::Running);

        write_exit_code(&h, t1, 0);
        h.runner.end_session(&Task::session_name_for(t1));
        h.scheduler.scheduling_tick();

        let task = h.store.get(t1).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.exit_code, Some(0));
        assert!(task.error.is_none());
        assert!(task.completed_at.is_some());
        assert!(task.completed_at.unwrap() >= task.started_at.unwrap());

        // The GPU is free again for the next submission.
        let t2 = submit(&mut h, "next", "A100", 1);
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t2), TaskStatus::Running);
    }

    #[test]
    fn test_nonzero_exit_fails() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "bad", "A100", 1);
        h.scheduler.scheduling_tick();

        write_exit_code(&h, t1, 3);
        h.runner.end_session(&Task::session_name_for(t1));
        h.scheduler.scheduling_tick();

        let task = h.store.get(t1).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, Some(3));
        assert_eq!(task.error.as_deref(), Some("exit code 3"));
    }

    #[test]
    fn test_session_lost_without_exit_code() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "lost", "A100", 1);
        h.scheduler.scheduling_tick();

        h.runner.end_session(&Task::session_name_for(t1));
        h.scheduler.scheduling_tick();

        let task = h.store.get(t1).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, None);
        assert_eq!(
            task.error.as_deref(),
            Some("session ended without recording exit code")
        );
    }

    #[test]
    fn test_cancel_queued_then_cancel_running() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "first", "A100", 1);
        let t2 = submit(&mut h, "second", "A100", 1);
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t1), TaskStatus::Running);
        assert_eq!(status_of(&h, t2), TaskStatus::Queued);

        // Cancelling the queued task never touches the runner.
        let cancelled = h.scheduler.cancel(t2).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(cancelled.error.as_deref(), Some("cancelled before start"));
        assert!(h.runner.killed.lock().unwrap().is_empty());

        // Cancelling the running task kills its session and frees the GPU.
        let cancelled = h.scheduler.cancel(t1).unwrap();
        assert_eq!(cancelled.status, TaskStatus::Cancelled);
        assert_eq!(
            h.runner.killed.lock().unwrap().as_slice(),
            [Task::session_name_for(t1)]
        );

        // Queue drained, nothing to do.
        h.scheduler.scheduling_tick();
        let gpus = h.scheduler.gpu_status().unwrap();
        assert!(gpus[0].is_free);

        // A second cancel is rejected.
        match h.scheduler.cancel(t1) {
            Err(SchedulerError::IllegalState { id, status }) => {
                assert_eq!(id, t1);
                assert_eq!(status, TaskStatus::Cancelled);
            }
            other => panic!("expected IllegalState, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_unknown_task() {
        let mut h = harness(&[(0, "A100")]);
        assert!(matches!(
            h.scheduler.cancel(42),
            Err(SchedulerError::NotFound(42))
        ));
    }

    #[test]
    fn test_restart_adoption() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "survivor", "A100", 1);
        h.scheduler.scheduling_tick();
        assert!(h.runner.exists(&Task::session_name_for(t1)));

        // Simulate a daemon restart while the session is still alive.
        let scheduler = build_scheduler(&h.temp, h.store.clone(), h.probe.clone(), h.runner.clone());
        h.scheduler = scheduler;

        assert_eq!(status_of(&h, t1), TaskStatus::Running);
        let gpus = h.scheduler.gpu_status().unwrap();
        assert_eq!(gpus[0].assigned_task_id, Some(t1));
        assert!(!gpus[0].is_free);

        // The adopted task still reconciles normally.
        write_exit_code(&h, t1, 0);
        h.runner.end_session(&Task::session_name_for(t1));
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t1), TaskStatus::Completed);
    }

    #[test]
    fn test_restart_orphan_with_exit_code_completes() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "orphan", "A100", 1);
        h.scheduler.scheduling_tick();

        write_exit_code(&h, t1, 0);
        h.runner.end_session(&Task::session_name_for(t1));

        let scheduler = build_scheduler(&h.temp, h.store.clone(), h.probe.clone(), h.runner.clone());
        h.scheduler = scheduler;

        let task = h.store.get(t1).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.exit_code, Some(0));
    }

    #[test]
    fn test_restart_orphan_without_exit_code_fails() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "orphan", "A100", 1);
        h.scheduler.scheduling_tick();

        h.runner.end_session(&Task::session_name_for(t1));

        let scheduler = build_scheduler(&h.temp, h.store.clone(), h.probe.clone(), h.runner.clone());
        h.scheduler = scheduler;

        let task = h.store.get(t1).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.exit_code, None);
        assert_eq!(task.error.as_deref(), Some("session lost across restart"));
    }

    #[test]
    fn test_restart_restores_queue_order() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "first", "A100", 1);
        let t2 = submit(&mut h, "second", "A100", 1);

        let scheduler = build_scheduler(&h.temp, h.store.clone(), h.probe.clone(), h.runner.clone());
        h.scheduler = scheduler;

        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t1), TaskStatus::Running);
        assert_eq!(status_of(&h, t2), TaskStatus::Queued);
    }

    #[test]
    fn test_consecutive_ticks_are_idempotent() {
        let mut h = harness(&[(0, "A100"), (1, "A100")]);
        submit(&mut h, "one", "A100", 1);
        submit(&mut h, "two", "A100", 2);

        h.scheduler.scheduling_tick();
        let before: Vec<(i64, TaskStatus, Vec<u32>)> = h
            .store
            .list_all()
            .unwrap()
            .iter()
            .map(|t| (t.id, t.status, t.assigned_gpus.clone()))
            .collect();

        h.scheduler.scheduling_tick();
        let after: Vec<(i64, TaskStatus, Vec<u32>)> = h
            .store
            .list_all()
            .unwrap()
            .iter()
            .map(|t| (t.id, t.status, t.assigned_gpus.clone()))
            .collect();

        assert_eq!(before, after);
    }

    #[test]
    fn test_no_gpu_assigned_twice() {
        let mut h = harness(&[(0, "A100"), (1, "A100"), (2, "A100")]);
        for n in 0..3 {
            submit(&mut h, &format!("t{n}"), "A100", 1);
        }
        h.scheduler.scheduling_tick();

        let mut seen = HashSet::new();
        for task in h.store.list_by_status(TaskStatus::Running).unwrap() {
            for gpu in task.assigned_gpus {
                assert!(seen.insert(gpu), "GPU {gpu} assigned twice");
            }
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_launch_failure_marks_failed_and_continues() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "doomed", "A100", 1);
        let t2 = submit(&mut h, "fine", "A100", 1);

        h.runner.fail_next_starts(1);
        h.scheduler.scheduling_tick();

        let failed = h.store.get(t1).unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert!(failed
            .error
            .as_deref()
            .unwrap()
            .contains("failed to start session"));

        // The released GPU let the next queued task launch in the same tick.
        assert_eq!(status_of(&h, t2), TaskStatus::Running);
        assert_eq!(h.store.get(t2).unwrap().unwrap().assigned_gpus, vec![0]);
    }

    #[test]
    fn test_probe_failure_skips_tick() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "waiting", "A100", 1);

        h.probe.set_online(false);
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t1), TaskStatus::Queued);

        h.probe.set_online(true);
        h.scheduler.scheduling_tick();
        assert_eq!(status_of(&h, t1), TaskStatus::Running);
    }

    #[test]
    fn test_submit_validation() {
        let mut h = harness(&[(0, "A100")]);

        let request = |gpu_type: &str, gpu_count: u32, command: &str| SubmitRequest {
            name: "t".to_string(),
            gpu_type: gpu_type.to_string(),
            gpu_count,
            command: command.to_string(),
        };

        assert!(matches!(
            h.scheduler.submit(request("A100", 0, "true")),
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            h.scheduler.submit(request("A100", 1, "   \n")),
            Err(SchedulerError::Validation(_))
        ));
        assert!(matches!(
            h.scheduler.submit(request("H100", 1, "true")),
            Err(SchedulerError::Validation(_))
        ));

        h.probe.set_online(false);
        match h.scheduler.submit(request("A100", 1, "true")) {
            Err(SchedulerError::Validation(msg)) => {
                assert_eq!(msg, "GPU inventory unavailable");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_gpu_status_during_probe_failure() {
        let h = harness(&[(0, "A100")]);
        h.probe.set_online(false);
        match h.scheduler.gpu_status() {
            Err(SchedulerError::ProbeUnavailable(_)) => {}
            other => panic!("expected ProbeUnavailable, got {other:?}"),
        }
    }

    #[test]
    fn test_logs_before_and_after_launch() {
        let mut h = harness(&[(0, "A100")]);
        let t1 = submit(&mut h, "logged", "A100", 1);

        // Queued task has no log path yet.
        let tail = h.scheduler.logs(t1, None).unwrap();
        assert!(tail.lines.is_empty());
        assert!(!tail.truncated);

        h.scheduler.scheduling_tick();
        let task = h.store.get(t1).unwrap().unwrap();
        let log_path = task.log_path.unwrap();
        fs::write(&log_path, "one\ntwo\nthree\n").unwrap();

        let tail = h.scheduler.logs(t1, Some(2)).unwrap();
        assert_eq!(tail.lines, vec!["two", "three"]);
        assert!(tail.truncated);

        assert!(matches!(
            h.scheduler.logs(999, None),
            Err(SchedulerError::NotFound(999))
        ));
    }

    #[test]
    fn test_gpu_without_name_is_not_schedulable() {
        let mut h = harness(&[(0, "A100")]);
        {
            let mut gpus = h.probe.gpus.lock().unwrap();
            gpus.push(GpuRecord {
                index: 1,
                uuid: None,
                name: None,
                memory_total_mib: None,
                memory_used_mib: None,
                utilization_pct: None,
            });
        }

        let t1 = submit(&mut h, "a", "A100", 1);
        let t2 = submit(&mut h, "b", "A100", 1);
        h.scheduler.scheduling_tick();

        assert_eq!(status_of(&h, t1), TaskStatus::Running);
        assert_eq!(status_of(&h, t2), TaskStatus::Queued);
        // The nameless GPU still shows up in status output.
        assert_eq!(h.scheduler.gpu_status().unwrap().len(), 2);
    }
}
