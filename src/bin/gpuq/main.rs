mod cli;
mod commands;

use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let gpuq = cli::Gpuq::parse();

    tracing_subscriber::fmt()
        .with_max_level(gpuq.verbosity)
        .without_time()
        .init();

    let config = gpuq::config::load_config(gpuq.config.as_ref())?;
    let client = gpuq::client::Client::build(&config)?;

    commands::handle_commands(&client, gpuq.command).await
}
