//! Nightly auto-match scheduler.
//!
//! A one-minute tick compares local time (configured UTC offset) against
//! `SCHEDULER_CRON_LOCAL`. Double starts are prevented per process by the
//! match service's in-progress flag plus a fired-today marker; multi-host
//! deployments need an external lock and are out of scope.

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::match_service::MatchService;
use crate::matching::MatchRunError;
use crate::travel_time_repo::TravelTimeRepository;

pub struct Scheduler {
    settings: Settings,
    match_service: Arc<MatchService>,
    travel_time_repo: TravelTimeRepository,
}

impl Scheduler {
    pub fn new(
        settings: Settings,
        match_service: Arc<MatchService>,
        travel_time_repo: TravelTimeRepository,
    ) -> Self {
        Self {
            settings,
            match_service,
            travel_time_repo,
        }
    }

    /// Tick loop. Returns when the cancellation token fires.
    pub async fn run(self, cancel: CancellationToken) {
        let Some(cron) = self.settings.scheduler_cron_local else {
            warn!("Scheduler enabled but SCHEDULER_CRON_LOCAL not set; scheduler idle");
            return;
        };
        info!(
            "Scheduler armed for {:02}:{:02} local (offset {})",
            cron.hour, cron.minute, self.settings.utc_offset
        );

        let mut interval = tokio::time::interval(Duration::from_secs(60));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut fired_on: Option<NaiveDate> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler stopping");
                    return;
                }
                _ = interval.tick() => {}
            }

            let local_now = Utc::now().with_timezone(&self.settings.utc_offset);
            let today = local_now.date_naive();
            let time = local_now.time();
            let due = time.format("%H:%M").to_string()
                == format!("{:02}:{:02}", cron.hour, cron.minute);

            if !due || fired_on == Some(today) {
                continue;
            }
            fired_on = Some(today);

            info!("Scheduler firing nightly match run");
            let run_cancel = cancel.child_token();
            match self.match_service.run_matching(&run_cancel).await {
                Ok(summary) => info!(
                    "Nightly run complete: {} matched of {} clients",
                    summary.matched, summary.client_count
                ),
                Err(MatchRunError::AlreadyRunning) => {
                    warn!("Nightly run skipped: a match run is already in progress");
                }
                Err(MatchRunError::NoClients) | Err(MatchRunError::NoTechnicians) => {
                    warn!("Nightly run skipped: nothing to match");
                }
                Err(e) => error!("Nightly run failed: {e}"),
            }

            match self.travel_time_repo.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!("Purged {purged} expired travel-time rows"),
                Err(e) => warn!("Travel-time purge failed: {e}"),
            }
        }
    }
}
