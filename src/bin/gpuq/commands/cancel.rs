use crate::cli::CancelArgs;
use anyhow::Result;
use gpuq::client::Client;

pub(crate) async fn handle_cancel(client: &Client, cancel_args: CancelArgs) -> Result<()> {
    let ids = gpuq::utils::parse_task_ids(&cancel_args.ids)?;

    let mut failures = 0;
    for id in ids {
        match client.cancel_task(id).await {
            Ok(task) => println!("Task {} cancelled.", task.id),
            Err(e) => {
                eprintln!("Failed to cancel task {id}: {e}");
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} task(s) could not be cancelled");
    }
    Ok(())
}
