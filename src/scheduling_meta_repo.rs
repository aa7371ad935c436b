//! Repository for the scheduling_meta sentinel row.
//!
//! The singleton row (id = 1) names the project the store belongs to and
//! carries the last matching-run summary. Startup validation refuses to
//! serve against a store whose project name does not match configuration.

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use crate::web::PgPool;

const META_ROW_ID: i32 = 1;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::scheduling_meta)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SchedulingMeta {
    pub id: i32,
    pub project_name: String,
    pub last_matching_run_at: Option<DateTime<Utc>>,
    pub last_matching_summary: Option<serde_json::Value>,
}

#[derive(Clone)]
pub struct SchedulingMetaRepository {
    pool: PgPool,
}

impl SchedulingMetaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self) -> Result<Option<SchedulingMeta>> {
        use crate::schema::scheduling_meta::dsl::*;

        let pool = self.pool.clone();

        let row = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let row = scheduling_meta
                .filter(id.eq(META_ROW_ID))
                .select(SchedulingMeta::as_select())
                .first::<SchedulingMeta>(&mut conn)
                .optional()?;

            Ok::<Option<SchedulingMeta>, anyhow::Error>(row)
        })
        .await??;

        Ok(row)
    }

    /// Verify the sentinel row names the expected project. Callers must
    /// treat an error as fatal: no other queries may run before this passes.
    pub async fn validate_project(&self, expected: &str) -> Result<()> {
        match self.get().await? {
            None => bail!("scheduling_meta sentinel row is missing; refusing to start"),
            Some(meta) if meta.project_name != expected => bail!(
                "store belongs to project {:?}, expected {:?}; refusing to start",
                meta.project_name,
                expected
            ),
            Some(_) => Ok(()),
        }
    }

    pub async fn record_matching_run(
        &self,
        run_at: DateTime<Utc>,
        summary: serde_json::Value,
    ) -> Result<()> {
        use crate::schema::scheduling_meta::dsl::*;

        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::update(scheduling_meta.filter(id.eq(META_ROW_ID)))
                .set((
                    last_matching_run_at.eq(Some(run_at)),
                    last_matching_summary.eq(Some(summary)),
                ))
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }
}
