use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::task::{Task, TaskStatus};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tasks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    gpu_type TEXT NOT NULL,
    gpu_count INTEGER NOT NULL,
    command TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'queued',
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    assigned_gpus TEXT NOT NULL DEFAULT '',
    session_name TEXT NOT NULL DEFAULT '',
    exit_code INTEGER,
    error TEXT,
    log_path TEXT,
    CHECK (status IN ('queued', 'running', 'completed', 'failed', 'cancelled'))
);

CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at DESC);
"#;

/// Durable task store over SQLite with connection pooling.
///
/// Task ids come from the AUTOINCREMENT primary key, so they are strictly
/// increasing in submission order and never reused.
#[derive(Clone)]
pub struct TaskStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl TaskStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA busy_timeout = 5000;",
            )
        });

        let pool = Pool::builder()
            .max_size(4)
            .build(manager)
            .context("Failed to create connection pool")?;

        let store = Self {
            pool: Arc::new(pool),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .context("Failed to get connection from pool")
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn()?
            .execute_batch(SCHEMA_SQL)
            .context("Failed to initialize task store schema")?;
        Ok(())
    }

    pub fn health_check(&self) -> Result<()> {
        self.conn()?
            .query_row("SELECT 1", [], |_| Ok(()))
            .context("Task store health check failed")?;
        Ok(())
    }

    /// Insert a task and return its assigned id.
    pub fn insert(&self, task: &Task) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tasks (
                name, gpu_type, gpu_count, command, status, created_at,
                started_at, completed_at, assigned_gpus, session_name,
                exit_code, error, log_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                task.name,
                task.gpu_type,
                task.gpu_count,
                task.command,
                task.status.to_string(),
                task.created_at.to_rfc3339(),
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                join_gpu_indices(&task.assigned_gpus),
                task.session_name,
                task.exit_code,
                task.error,
                task.log_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            ],
        )
        .context("Failed to insert task")?;
        Ok(conn.last_insert_rowid())
    }

    pub fn update(&self, task: &Task) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE tasks SET
                    name = ?2, gpu_type = ?3, gpu_count = ?4, command = ?5,
                    status = ?6, created_at = ?7, started_at = ?8,
                    completed_at = ?9, assigned_gpus = ?10, session_name = ?11,
                    exit_code = ?12, error = ?13, log_path = ?14
                 WHERE id = ?1",
                params![
                    task.id,
                    task.name,
                    task.gpu_type,
                    task.gpu_count,
                    task.command,
                    task.status.to_string(),
                    task.created_at.to_rfc3339(),
                    task.started_at.map(|t| t.to_rfc3339()),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    join_gpu_indices(&task.assigned_gpus),
                    task.session_name,
                    task.exit_code,
                    task.error,
                    task.log_path.as_ref().map(|p| p.to_string_lossy().to_string()),
                ],
            )
            .context("Failed to update task")?;
        if updated == 0 {
            anyhow::bail!("Task {} does not exist in the store", task.id);
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> Result<Option<Task>> {
        let conn = self.conn()?;
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], |row| {
            row_to_task(row)
        })
        .optional()
        .context("Failed to get task")
    }

    /// All tasks, newest first.
    pub fn list_all(&self) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM tasks ORDER BY id DESC")
            .context("Failed to prepare task list query")?;
        let tasks = stmt
            .query_map([], |row| row_to_task(row))
            .context("Failed to query tasks")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect tasks")?;
        Ok(tasks)
    }

    /// Tasks in one status, oldest first (submission order).
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT * FROM tasks WHERE status = ?1 ORDER BY id ASC")
            .context("Failed to prepare status query")?;
        let tasks = stmt
            .query_map(params![status.to_string()], |row| row_to_task(row))
            .context("Failed to query tasks by status")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("Failed to collect tasks by status")?;
        Ok(tasks)
    }

    /// Tasks persisted as running, for startup reconciliation.
    pub fn load_running(&self) -> Result<Vec<Task>> {
        self.list_by_status(TaskStatus::Running)
    }
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    let status_str: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let assigned_gpus: String = row.get("assigned_gpus")?;
    let log_path: Option<String> = row.get("log_path")?;

    Ok(Task {
        id: row.get("id")?,
        name: row.get("name")?,
        gpu_type: row.get("gpu_type")?,
        gpu_count: row.get("gpu_count")?,
        command: row.get("command")?,
        status: status_str.parse::<TaskStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?,
        created_at: parse_timestamp(&created_at)?,
        started_at: started_at.as_deref().map(parse_timestamp).transpose()?,
        completed_at: completed_at.as_deref().map(parse_timestamp).transpose()?,
        assigned_gpus: parse_gpu_indices(&assigned_gpus),
        session_name: row.get("session_name")?,
        exit_code: row.get("exit_code")?,
        error: row.get("error")?,
        log_path: log_path.map(PathBuf::from),
    })
}

fn parse_timestamp(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn join_gpu_indices(indices: &[u32]) -> String {
    indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

fn parse_gpu_indices(raw: &str) -> Vec<u32> {
    raw.split(',')
        .filter_map(|part| part.trim().parse().ok())
        .collect()
}
