use crate::cli::ShowArgs;
use anyhow::Result;
use gpuq::client::Client;

pub(crate) async fn handle_show(client: &Client, show_args: ShowArgs) -> Result<()> {
    let task = client.get_task(show_args.id).await?;
    println!("{}", serde_json::to_string_pretty(&task)?);
    Ok(())
}
