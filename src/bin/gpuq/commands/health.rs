use anyhow::Result;
use gpuq::client::Client;

pub(crate) async fn handle_health(client: &Client) -> Result<()> {
    let health = client.health().await?;
    println!("Daemon is {} (pid {}).", health.status, health.pid);
    Ok(())
}
