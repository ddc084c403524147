use crate::cli::LogsArgs;
use anyhow::Result;
use gpuq::client::Client;

pub(crate) async fn handle_logs(client: &Client, logs_args: LogsArgs) -> Result<()> {
    let tail = client.task_logs(logs_args.id, logs_args.tail).await?;
    for line in &tail.lines {
        println!("{line}");
    }
    if tail.truncated {
        eprintln!("(older lines truncated; use --tail to fetch more)");
    }
    Ok(())
}
