//! Repository for match overrides.

use anyhow::Result;
use diesel::prelude::*;
use uuid::Uuid;

use crate::overrides::{Override, OverrideModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct OverridesRepository {
    pool: PgPool,
}

impl OverridesRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self) -> Result<Vec<Override>> {
        use crate::schema::match_overrides::dsl::*;

        let pool = self.pool.clone();

        let models = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let models = match_overrides
                .order(created_at.asc())
                .select(OverrideModel::as_select())
                .load::<OverrideModel>(&mut conn)?;

            Ok::<Vec<OverrideModel>, anyhow::Error>(models)
        })
        .await??;

        models.into_iter().map(Override::try_from).collect()
    }

    pub async fn get_by_id(&self, override_id: Uuid) -> Result<Option<Override>> {
        use crate::schema::match_overrides::dsl::*;

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = match_overrides
                .filter(id.eq(override_id))
                .select(OverrideModel::as_select())
                .first::<OverrideModel>(&mut conn)
                .optional()?;

            Ok::<Option<OverrideModel>, anyhow::Error>(model)
        })
        .await??;

        model.map(Override::try_from).transpose()
    }

    /// Create or replace the override for a (client, technician) pair. The
    /// pair is unique, so a re-submit updates type, window and notes.
    pub async fn upsert(&self, value: Override) -> Result<Override> {
        use crate::schema::match_overrides::dsl::*;

        let pool = self.pool.clone();
        let model: OverrideModel = value.clone().into();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(match_overrides)
                .values(&model)
                .on_conflict((client_id, technician_id))
                .do_update()
                .set((
                    override_type.eq(model.override_type.clone()),
                    effective_from.eq(model.effective_from),
                    effective_to.eq(model.effective_to),
                    notes.eq(model.notes.clone()),
                ))
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(value)
    }

    pub async fn delete_by_id(&self, override_id: Uuid) -> Result<bool> {
        use crate::schema::match_overrides::dsl::*;

        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::delete(match_overrides.filter(id.eq(override_id)))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows > 0)
    }

    pub async fn delete_by_pair(&self, client: Uuid, technician: Uuid) -> Result<bool> {
        use crate::schema::match_overrides::dsl::*;

        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::delete(
                match_overrides
                    .filter(client_id.eq(client))
                    .filter(technician_id.eq(technician)),
            )
            .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows > 0)
    }
}
