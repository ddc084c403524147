use crate::cli::SubmitArgs;
use anyhow::Result;
use gpuq::client::Client;
use gpuq::core::task::SubmitRequest;

pub(crate) async fn handle_submit(client: &Client, submit_args: SubmitArgs) -> Result<()> {
    let request = SubmitRequest {
        name: submit_args.name,
        gpu_type: submit_args.gpu_type,
        gpu_count: submit_args.gpu_count,
        command: submit_args.command.join(" "),
    };

    let task = client.submit_task(&request).await?;
    println!(
        "Submitted task {} ({}) for {}x {}.",
        task.id, task.name, task.gpu_count, task.gpu_type
    );
    Ok(())
}
