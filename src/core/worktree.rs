use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::task::Task;

pub const COMMAND_SCRIPT: &str = "command.sh";
pub const RUN_SCRIPT: &str = "run.sh";
pub const LOG_FILE: &str = "tmux.log";
pub const EXIT_CODE_FILE: &str = "exit_code";

/// Paths of a materialized per-task directory.
pub struct WorkTree {
    pub dir: PathBuf,
    pub run_script: PathBuf,
    pub log_file: PathBuf,
}

pub fn task_dir(runtime_dir: &Path, task_id: i64) -> PathBuf {
    runtime_dir.join("tasks").join(format!("task_{task_id}"))
}

/// Create `<runtime>/tasks/task_<id>/` and write the executable script pair.
///
/// `command.sh` carries the user command verbatim inside diagnostic framing;
/// `run.sh` is the session entry point that tees output to the log and
/// records the command's exit status in the `exit_code` file.
pub fn materialize(
    runtime_dir: &Path,
    task: &Task,
    setup_script: Option<&Path>,
) -> Result<WorkTree> {
    let dir = task_dir(runtime_dir, task.id);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create task directory {}", dir.display()))?;

    let log_file = dir.join(LOG_FILE);

    let command_script = dir.join(COMMAND_SCRIPT);
    write_executable(&command_script, &render_command_script(task))?;

    let run_script = dir.join(RUN_SCRIPT);
    write_executable(&run_script, &render_run_script(&dir, &log_file, setup_script))?;

    Ok(WorkTree {
        dir,
        run_script,
        log_file,
    })
}

/// Read back the exit status recorded by `run.sh`, if any. This file is the
/// sole source of truth for reconciliation; the log is informational.
pub fn read_exit_code(task_dir: &Path) -> Option<i32> {
    let raw = fs::read_to_string(task_dir.join(EXIT_CODE_FILE)).ok()?;
    raw.lines().next()?.trim().parse().ok()
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    let mut permissions = fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?
        .permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions)
        .with_context(|| format!("failed to mark {} executable", path.display()))?;
    Ok(())
}

fn render_command_script(task: &Task) -> String {
    format!(
        r#"#!/usr/bin/env bash
echo "=== task {id}: {name} ==="
echo "PATH=$PATH"
echo "python: $(command -v python || echo not found)"
echo "conda: $(command -v conda || echo not found)"
echo "--- command start: $(date -u '+%Y-%m-%dT%H:%M:%SZ') ---"
{command}
__status=$?
echo "--- command end: $(date -u '+%Y-%m-%dT%H:%M:%SZ') status=${{__status}} ---"
exit "${{__status}}"
"#,
        id = task.id,
        name = task.name,
        command = task.command,
    )
}

fn render_run_script(dir: &Path, log_file: &Path, setup_script: Option<&Path>) -> String {
    let setup = match setup_script {
        Some(path) => format!("source \"{}\"\n\n", path.display()),
        None => String::new(),
    };
    format!(
        r#"#!/usr/bin/env bash
set -eo pipefail

TASK_DIR="{dir}"
LOG_FILE="{log}"
export LOG_FILE
export PYTHONUNBUFFERED=1

# Drop in-tree virtualenv bin entries so `conda activate` resolves cleanly.
PATH="$(python3 -c 'import os; print(os.pathsep.join(p for p in os.environ.get("PATH", "").split(os.pathsep) if not p.rstrip("/").endswith("venv/bin")))')"
export PATH

{setup}{{
    echo "=== run.sh started: $(date -u '+%Y-%m-%dT%H:%M:%SZ') ==="
    echo "PATH=$PATH"
    echo "interpreter: $(command -v python3 || echo not found)"
}} >> "$LOG_FILE"

set +e
bash "$TASK_DIR/command.sh" 2>&1 | tee -a "$LOG_FILE"
__status=${{PIPESTATUS[0]}}
set -e

echo "$__status" > "$TASK_DIR/exit_code"
exit "$__status"
"#,
        dir = dir.display(),
        log = log_file.display(),
        setup = setup,
    )
}
