//! Repository for client sync runs.

use anyhow::Result;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::web::PgPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Succeeded,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Succeeded => "succeeded",
            SyncRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(SyncRunStatus::Running),
            "succeeded" => Some(SyncRunStatus::Succeeded),
            "failed" => Some(SyncRunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRun {
    pub id: Uuid,
    pub status: SyncRunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub upserted: i32,
    pub skipped: i32,
    pub failed: i32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = crate::schema::client_sync_runs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct SyncRunModel {
    id: Uuid,
    status: String,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    upserted: i32,
    skipped: i32,
    failed: i32,
    errors: serde_json::Value,
}

impl From<SyncRunModel> for SyncRun {
    fn from(m: SyncRunModel) -> Self {
        Self {
            id: m.id,
            status: SyncRunStatus::parse(&m.status).unwrap_or(SyncRunStatus::Failed),
            started_at: m.started_at,
            ended_at: m.ended_at,
            upserted: m.upserted,
            skipped: m.skipped,
            failed: m.failed,
            errors: serde_json::from_value(m.errors).unwrap_or_default(),
        }
    }
}

#[derive(Clone)]
pub struct SyncRunsRepository {
    pool: PgPool,
}

impl SyncRunsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a new run in `running` state and return its id.
    pub async fn open(&self) -> Result<Uuid> {
        use crate::schema::client_sync_runs::dsl::*;

        let pool = self.pool.clone();
        let run_id = Uuid::new_v4();
        let model = SyncRunModel {
            id: run_id,
            status: SyncRunStatus::Running.as_str().to_string(),
            started_at: Utc::now(),
            ended_at: None,
            upserted: 0,
            skipped: 0,
            failed: 0,
            errors: serde_json::Value::Array(Vec::new()),
        };

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(client_sync_runs)
                .values(&model)
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(run_id)
    }

    /// Close a run with its final status and counters.
    pub async fn close(
        &self,
        run_id: Uuid,
        final_status: SyncRunStatus,
        counters: (i32, i32, i32),
        error_messages: &[String],
    ) -> Result<()> {
        use crate::schema::client_sync_runs::dsl::*;

        let pool = self.pool.clone();
        let (n_upserted, n_skipped, n_failed) = counters;
        let errors_json =
            serde_json::to_value(error_messages).unwrap_or(serde_json::Value::Null);

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::update(client_sync_runs.filter(id.eq(run_id)))
                .set((
                    status.eq(final_status.as_str()),
                    ended_at.eq(Some(Utc::now())),
                    upserted.eq(n_upserted),
                    skipped.eq(n_skipped),
                    failed.eq(n_failed),
                    errors.eq(errors_json),
                ))
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    pub async fn latest(&self) -> Result<Option<SyncRun>> {
        use crate::schema::client_sync_runs::dsl::*;

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = client_sync_runs
                .order(started_at.desc())
                .select(SyncRunModel::as_select())
                .first::<SyncRunModel>(&mut conn)
                .optional()?;

            Ok::<Option<SyncRunModel>, anyhow::Error>(model)
        })
        .await??;

        Ok(model.map(Into::into))
    }
}
