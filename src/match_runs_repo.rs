//! Repository for the match run ledger and per-run suggestions.

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::match_runs::{MatchRun, MatchRunModel, MatchSuggestionModel};
use crate::matching::Suggestion;
use crate::web::PgPool;

#[derive(Clone)]
pub struct MatchRunsRepository {
    pool: PgPool,
}

impl MatchRunsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, run: MatchRun) -> Result<()> {
        use crate::schema::match_runs::dsl::*;

        let pool = self.pool.clone();
        let model: MatchRunModel = run.into();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(match_runs)
                .values(&model)
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn insert_suggestions(
        &self,
        run_id: Uuid,
        suggestions: &[Suggestion],
    ) -> Result<()> {
        use crate::schema::match_suggestions::dsl::*;

        if suggestions.is_empty() {
            return Ok(());
        }

        let pool = self.pool.clone();
        let now = Utc::now();
        let models: Vec<MatchSuggestionModel> = suggestions
            .iter()
            .map(|s| MatchSuggestionModel {
                id: Uuid::new_v4(),
                match_run_id: run_id,
                client_id: s.client_id,
                technician_id: s.technician_id,
                rank: s.rank,
                duration_sec: s.duration_sec as i32,
                mode: s.mode.as_str().to_string(),
                created_at: now,
            })
            .collect();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(match_suggestions)
                .values(&models)
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn latest(&self) -> Result<Option<MatchRun>> {
        use crate::schema::match_runs::dsl::*;

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = match_runs
                .order(started_at.desc())
                .select(MatchRunModel::as_select())
                .first::<MatchRunModel>(&mut conn)
                .optional()?;

            Ok::<Option<MatchRunModel>, anyhow::Error>(model)
        })
        .await??;

        Ok(model.map(Into::into))
    }

    pub async fn get_by_id(&self, run_id: Uuid) -> Result<Option<MatchRun>> {
        use crate::schema::match_runs::dsl::*;

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = match_runs
                .filter(id.eq(run_id))
                .select(MatchRunModel::as_select())
                .first::<MatchRunModel>(&mut conn)
                .optional()?;

            Ok::<Option<MatchRunModel>, anyhow::Error>(model)
        })
        .await??;

        Ok(model.map(Into::into))
    }
}
