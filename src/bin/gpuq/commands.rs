use crate::cli::Commands;
use gpuq::client::Client;

mod cancel;
mod completions;
mod gpus;
mod health;
mod list;
mod logs;
mod show;
mod submit;

pub async fn handle_commands(client: &Client, commands: Commands) -> anyhow::Result<()> {
    match commands {
        Commands::Submit(submit_args) => submit::handle_submit(client, submit_args).await,
        Commands::List => list::handle_list(client).await,
        Commands::Show(show_args) => show::handle_show(client, show_args).await,
        Commands::Logs(logs_args) => logs::handle_logs(client, logs_args).await,
        Commands::Cancel(cancel_args) => cancel::handle_cancel(client, cancel_args).await,
        Commands::Gpus => gpus::handle_gpus(client).await,
        Commands::Health => health::handle_health(client).await,
        Commands::Completions(completions_args) => {
            completions::handle_completions(completions_args)
        }
    }
}
