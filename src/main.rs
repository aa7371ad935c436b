use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dispatch::commands;
use dispatch::config::Settings;

#[derive(Parser)]
#[command(name = "dispatch", version, about = "Geographic matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (and the nightly scheduler when enabled)
    Serve {
        /// Override the configured port
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one matching pass and print the summary
    RunMatching,
    /// Run one CRM client sync and print the report
    SyncClients,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = Settings::from_env()?;

    match cli.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                settings.port = port;
            }
            commands::handle_serve(settings).await
        }
        Commands::RunMatching => commands::handle_run_matching(settings).await,
        Commands::SyncClients => commands::handle_sync_clients(settings).await,
    }
}
