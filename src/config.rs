use crate::core::get_config_dir;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Deserialize, Debug, Default, Clone)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DaemonConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Deserialize, Debug, Clone)]
pub struct SchedulerConfig {
    /// Root of the on-disk runtime layout (`tasks.db`, `tasks/task_<id>/`).
    /// Defaults to the per-user data directory.
    #[serde(default)]
    pub runtime_dir: Option<PathBuf>,
    /// Task store path; defaults to `<runtime_dir>/tasks.db`.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Log lines returned when a request does not say how many it wants.
    #[serde(default = "default_log_tail")]
    pub log_tail_default: usize,
    /// Hard cap on requested log tails.
    #[serde(default = "default_log_tail_max")]
    pub log_tail_max: usize,
    /// Shell initializer sourced by `run.sh` before the user command.
    /// Overridden by the `GPUQ_SETUP` environment variable.
    #[serde(default)]
    pub setup_script: Option<PathBuf>,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    59090
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_log_tail() -> usize {
    100
}

fn default_log_tail_max() -> usize {
    10_000
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            runtime_dir: None,
            store_path: None,
            poll_interval_secs: default_poll_interval_secs(),
            log_tail_default: default_log_tail(),
            log_tail_max: default_log_tail_max(),
            setup_script: None,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn resolve_runtime_dir(&self) -> anyhow::Result<PathBuf> {
        match &self.runtime_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::core::get_data_dir(),
        }
    }

    pub fn resolve_store_path(&self, runtime_dir: &Path) -> PathBuf {
        self.store_path
            .clone()
            .unwrap_or_else(|| runtime_dir.join("tasks.db"))
    }
}

pub fn load_config(config_path: Option<&PathBuf>) -> Result<Config, config::ConfigError> {
    let mut config_vec = vec![];

    // User-provided config file
    if let Some(config_path) = config_path {
        if config_path.exists() {
            config_vec.push(config_path.clone());
        } else {
            eprintln!("Warning: Config file {config_path:?} not found.");
        }
    }

    // Default config file
    if let Ok(default_config_path) = get_config_dir().map(|d| d.join("gpuq.toml")) {
        if default_config_path.exists() {
            config_vec.push(default_config_path);
        }
    }

    let settings = config::Config::builder();
    let settings = config_vec.iter().fold(settings, |s, path| {
        s.add_source(config::File::from(path.as_path()))
    });

    let mut config: Config = settings
        .add_source(
            config::Environment::with_prefix("GPUQ")
                .separator("_")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    if let Ok(setup) = std::env::var("GPUQ_SETUP") {
        if !setup.is_empty() {
            config.scheduler.setup_script = Some(PathBuf::from(setup));
        }
    }

    Ok(config)
}
