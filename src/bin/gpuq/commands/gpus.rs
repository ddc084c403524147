use anyhow::Result;
use gpuq::client::Client;
use owo_colors::OwoColorize;
use tabled::{builder::Builder, settings::style::Style};

pub(crate) async fn handle_gpus(client: &Client) -> Result<()> {
    let gpus = client.gpu_status().await?;

    if gpus.is_empty() {
        println!("No GPUs reported.");
        return Ok(());
    }

    let mut builder = Builder::default();
    builder.push_record(["INDEX", "MODEL", "MEMORY (MiB)", "UTIL %", "TASK", "STATE"]);
    for view in &gpus {
        let memory = match (view.gpu.memory_used_mib, view.gpu.memory_total_mib) {
            (Some(used), Some(total)) => format!("{used}/{total}"),
            _ => "-".to_string(),
        };
        builder.push_record([
            view.gpu.index.to_string(),
            view.gpu.name.clone().unwrap_or_else(|| "-".to_string()),
            memory,
            view.gpu
                .utilization_pct
                .map(|u| u.to_string())
                .unwrap_or_else(|| "-".to_string()),
            view.assigned_task_id
                .map(|id| id.to_string())
                .unwrap_or_else(|| "-".to_string()),
            if view.is_free {
                "free".green().to_string()
            } else {
                "busy".yellow().to_string()
            },
        ]);
    }

    let mut table = builder.build();
    table.with(Style::rounded());
    println!("{table}");
    Ok(())
}
