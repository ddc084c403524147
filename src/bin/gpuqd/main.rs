mod cli;
mod server;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let gpuqd = cli::GpuqD::parse();

    tracing_subscriber::fmt()
        .with_max_level(gpuqd.verbosity)
        .init();

    let config = gpuq::config::load_config(gpuqd.config.as_ref())?;
    server::run(config).await
}
