mod args;
mod commands;

use altair_db::clienv;
use args::{Cli, Commands};
use clap::Parser;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status { json } => commands::service::cmd_status(json).await?,
        Commands::Start => commands::service::cmd_start().await?,
        Commands::Stop => commands::service::cmd_stop().await?,
        Commands::Restart => commands::service::cmd_restart().await?,
        Commands::Install => commands::service::cmd_install().await?,
        Commands::Uninstall => commands::service::cmd_uninstall().await?,
        Commands::Enable => commands::service::cmd_enable().await?,
        Commands::Disable => commands::service::cmd_disable().await?,
        Commands::Credentials { command } => commands::credentials::cmd_credentials(command).await?,
        Commands::Search { query, limit } => commands::search::cmd_search(&query, limit).await?,
        Commands::Link { command } => commands::link::cmd_link(command).await?,
        Commands::Completions { shell } => commands::completions::cmd_completions(shell),
    }

    Ok(())
}

/// Logs go to stderr so `status --json` stays parseable.
fn init_tracing() {
    let directive = clienv::log_filter().unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
