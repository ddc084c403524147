use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use strum::{Display, EnumString};

#[derive(
    Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy, Display, EnumString, Hash,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[strum(to_string = "queued")]
    Queued,
    #[strum(to_string = "running")]
    Running,
    #[strum(to_string = "completed")]
    Completed,
    #[strum(to_string = "failed")]
    Failed,
    #[strum(to_string = "cancelled")]
    Cancelled,
}

impl TaskStatus {
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        // queued ──> running ──> completed
        //   │           ├─────> failed
        //   └───────────┴─────> cancelled
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

/// A scheduled unit of work: one shell command bound to `gpu_count` GPUs of
/// one model, executed inside a detached tmux session.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Task {
    pub id: i64,
    pub name: String,
    /// GPU model name, matched verbatim against the probe's `name` column.
    pub gpu_type: String,
    pub gpu_count: u32,
    /// The user command, stored verbatim and executed by a POSIX shell.
    pub command: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// GPU indices held by this task; empty unless running (or kept as
    /// history once terminal).
    #[serde(default)]
    pub assigned_gpus: Vec<u32>,
    /// tmux session name (`task_<id>`); empty until launch, stable after.
    #[serde(default)]
    pub session_name: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub log_path: Option<PathBuf>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        gpu_type: impl Into<String>,
        gpu_count: u32,
        command: impl Into<String>,
    ) -> Self {
        Self {
            id: 0,
            name: name.into(),
            gpu_type: gpu_type.into(),
            gpu_count,
            command: command.into(),
            status: TaskStatus::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            assigned_gpus: Vec::new(),
            session_name: String::new(),
            exit_code: None,
            error: None,
            log_path: None,
        }
    }

    pub fn session_name_for(id: i64) -> String {
        format!("task_{id}")
    }

    /// Apply a status change, refusing moves the state machine forbids.
    pub fn try_transition(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::warn!(
                task_id = self.id,
                from = %self.status,
                to = %next,
                "refused illegal status transition"
            );
            return false;
        }
        self.status = next;
        true
    }
}

/// Submission payload for `POST /api/tasks`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SubmitRequest {
    pub name: String,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub command: String,
}

/// Condensed task view returned by `GET /api/tasks`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskSummary {
    pub id: i64,
    pub name: String,
    pub status: TaskStatus,
    pub gpu_type: String,
    pub gpu_count: u32,
    pub created_at: DateTime<Utc>,
}

impl From<&Task> for TaskSummary {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            name: task.name.clone(),
            status: task.status,
            gpu_type: task.gpu_type.clone(),
            gpu_count: task.gpu_count,
            created_at: task.created_at,
        }
    }
}
