use anyhow::{anyhow, Result};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tmux_interface::{HasSession, KillSession, NewSession, Tmux};

/// Minimal contract over the terminal multiplexer, kept to three primitives
/// so tests can substitute an in-memory implementation.
pub trait SessionRunner: Send + Sync {
    /// Launch a detached session named `name` running `bash <script>`.
    /// Fails if the session already exists or the script is not executable.
    fn start(&self, name: &str, script: &Path) -> Result<()>;
    /// Cheap liveness probe.
    fn exists(&self, name: &str) -> bool;
    /// Terminate the session and all its processes.
    fn kill(&self, name: &str) -> Result<()>;
}

/// The production runner, backed by tmux.
pub struct TmuxRunner;

impl SessionRunner for TmuxRunner {
    fn start(&self, name: &str, script: &Path) -> Result<()> {
        if self.exists(name) {
            return Err(anyhow!("tmux session '{name}' already exists"));
        }

        let metadata = std::fs::metadata(script)
            .map_err(|e| anyhow!("session script {} is not accessible: {e}", script.display()))?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(anyhow!(
                "session script {} is not executable",
                script.display()
            ));
        }
        let script_str = script
            .to_str()
            .ok_or_else(|| anyhow!("session script path is not valid UTF-8"))?;

        let output = Tmux::with_command(
            NewSession::new()
                .detached()
                .session_name(name)
                .shell_command(format!("bash {script_str}")),
        )
        .output()
        .map_err(|e| anyhow!("failed to start tmux session '{name}': {e}"))?;

        if !output.success() {
            return Err(anyhow!("tmux refused to start session '{name}'"));
        }
        Ok(())
    }

    fn exists(&self, name: &str) -> bool {
        Tmux::with_command(HasSession::new().target_session(name))
            .output()
            .map(|output| output.success())
            .unwrap_or(false)
    }

    fn kill(&self, name: &str) -> Result<()> {
        Tmux::with_command(KillSession::new().target_session(name))
            .output()
            .map(|_| ())
            .map_err(|e| anyhow!("failed to kill tmux session '{name}': {e}"))
    }
}
