//! The `serve` command: validate the store, start the scheduler and run the
//! HTTP server until shutdown.

use anyhow::{Context, Result};
use std::sync::atomic::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Settings;
use crate::instance_lock::InstanceLock;
use crate::scheduler::Scheduler;
use crate::scheduling_meta_repo::SchedulingMetaRepository;
use crate::travel_time_repo::TravelTimeRepository;
use crate::web;

pub async fn handle_serve(settings: Settings) -> Result<()> {
    // One serve process per host: the scheduler must not double-fire.
    let _instance_lock = InstanceLock::new("serve")?;

    let pool = web::create_pool(&settings.database_url)
        .context("Failed to create database pool")?;
    let state = web::build_state(pool.clone(), settings.clone());

    // No queries are served until the sentinel row names our project.
    SchedulingMetaRepository::new(pool.clone())
        .validate_project(&settings.expected_project_name)
        .await
        .context("Startup store validation failed")?;
    state.store_validated.store(true, Ordering::SeqCst);
    info!(
        "Store validated for project {:?}",
        settings.expected_project_name
    );

    let cancel = CancellationToken::new();

    if settings.scheduler_enabled {
        let scheduler = Scheduler::new(
            settings.clone(),
            state.match_service.clone(),
            TravelTimeRepository::new(pool),
        );
        let scheduler_cancel = cancel.clone();
        tokio::spawn(async move {
            scheduler.run(scheduler_cancel).await;
        });
    } else {
        info!("Scheduler disabled");
    }

    let server = web::start_web_server(state);
    tokio::select! {
        result = server => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            cancel.cancel();
            Ok(())
        }
    }
}
