use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "gpuq",
    author,
    version,
    about = "Command-line client for the gpuq scheduler."
)]
pub struct Gpuq {
    #[arg(long, global = true, help = "Path to the config file", hide = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub verbosity: clap_verbosity_flag::Verbosity,
}

#[derive(Debug, Parser)]
pub enum Commands {
    /// Submit a new task to the scheduler
    Submit(SubmitArgs),
    /// List tasks, newest first
    List,
    /// Show the full record of a task
    Show(ShowArgs),
    /// Print the tail of a task's log
    Logs(LogsArgs),
    /// Cancel one or more tasks
    Cancel(CancelArgs),
    /// Show GPU occupancy
    Gpus,
    /// Check that the daemon is up
    Health,
    /// Generate tab-completion scripts for your shell
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct SubmitArgs {
    /// A label for the task
    #[arg(short, long, default_value = "task")]
    pub name: String,

    /// GPU model to run on, exactly as the probe reports it
    #[arg(short = 't', long = "gpu-type")]
    pub gpu_type: String,

    /// Number of GPUs to reserve
    #[arg(short = 'g', long = "gpus", default_value = "1")]
    pub gpu_count: u32,

    /// The shell command to execute
    #[arg(trailing_var_arg = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Parser)]
pub struct ShowArgs {
    /// Task ID
    pub id: i64,
}

#[derive(Debug, Parser)]
pub struct LogsArgs {
    /// Task ID
    pub id: i64,

    /// Number of trailing lines to fetch
    #[arg(long)]
    pub tail: Option<usize>,
}

#[derive(Debug, Parser)]
pub struct CancelArgs {
    /// Task ID(s) to cancel. Supports ranges like "1-3" or lists like "1,2,3"
    pub ids: String,
}

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// The shell to generate the completions for
    pub shell: clap_complete::Shell,
}
