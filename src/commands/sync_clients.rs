//! The `sync-clients` command: one CRM sync pass from the CLI.

use anyhow::{Context, Result};

use crate::config::Settings;
use crate::scheduling_meta_repo::SchedulingMetaRepository;
use crate::sync_runs_repo::SyncRunStatus;
use crate::web;

pub async fn handle_sync_clients(settings: Settings) -> Result<()> {
    let pool = web::create_pool(&settings.database_url)
        .context("Failed to create database pool")?;
    let state = web::build_state(pool.clone(), settings.clone());

    SchedulingMetaRepository::new(pool)
        .validate_project(&settings.expected_project_name)
        .await
        .context("Store validation failed")?;

    let run = state.sync.sync_clients().await?;
    println!("{}", serde_json::to_string_pretty(&run)?);

    if run.status == SyncRunStatus::Failed {
        anyhow::bail!("sync run failed: {}", run.errors.join("; "));
    }
    Ok(())
}
