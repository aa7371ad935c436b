//! The `run-matching` command: one matching pass from the CLI.

use anyhow::{Context, Result, anyhow};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Settings;
use crate::scheduling_meta_repo::SchedulingMetaRepository;
use crate::web;

pub async fn handle_run_matching(settings: Settings) -> Result<()> {
    let pool = web::create_pool(&settings.database_url)
        .context("Failed to create database pool")?;
    let state = web::build_state(pool.clone(), settings.clone());

    SchedulingMetaRepository::new(pool)
        .validate_project(&settings.expected_project_name)
        .await
        .context("Store validation failed")?;

    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Cancellation requested; finishing current client");
            cancel_on_signal.cancel();
        }
    });

    let summary = state
        .match_service
        .run_matching(&cancel)
        .await
        .map_err(|e| anyhow!("match run failed: {e}"))?;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
