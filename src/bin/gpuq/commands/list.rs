use anyhow::Result;
use gpuq::client::Client;
use gpuq::core::task::TaskStatus;
use owo_colors::OwoColorize;
use tabled::{builder::Builder, settings::style::Style};

pub(crate) async fn handle_list(client: &Client) -> Result<()> {
    let tasks = client.list_tasks().await?;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    let mut builder = Builder::default();
    builder.push_record(["ID", "NAME", "STATUS", "GPU TYPE", "GPUS", "CREATED"]);
    for task in &tasks {
        builder.push_record([
            task.id.to_string(),
            task.name.clone(),
            render_status(task.status),
            task.gpu_type.clone(),
            task.gpu_count.to_string(),
            task.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        ]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}

pub(crate) fn render_status(status: TaskStatus) -> String {
    match status {
        TaskStatus::Queued => status.yellow().to_string(),
        TaskStatus::Running => status.green().to_string(),
        TaskStatus::Completed => status.cyan().to_string(),
        TaskStatus::Failed => status.red().to_string(),
        TaskStatus::Cancelled => status.dimmed().to_string(),
    }
}
