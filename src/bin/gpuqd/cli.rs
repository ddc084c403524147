use clap::Parser;
use clap_verbosity_flag::{InfoLevel, Verbosity};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "gpuqd",
    author,
    version,
    about = "The gpuq scheduler daemon."
)]
pub struct GpuqD {
    /// Path to the config file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub verbosity: Verbosity<InfoLevel>,
}
