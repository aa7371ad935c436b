//! Repository for technician rows.

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::geocodes::Geocode;
use crate::technicians::{AvailabilityStatus, Technician, TechnicianModel};
use crate::web::PgPool;

#[derive(Clone)]
pub struct TechniciansRepository {
    pool: PgPool,
}

impl TechniciansRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, technician_id: Uuid) -> Result<Option<Technician>> {
        use crate::schema::technicians::dsl::*;

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = technicians
                .filter(id.eq(technician_id))
                .select(TechnicianModel::as_select())
                .first::<TechnicianModel>(&mut conn)
                .optional()?;

            Ok::<Option<TechnicianModel>, anyhow::Error>(model)
        })
        .await??;

        Ok(model.map(Into::into))
    }

    /// Active technicians in creation order: the matcher's candidate pool.
    pub async fn active(&self) -> Result<Vec<Technician>> {
        use crate::schema::technicians::dsl::*;

        let pool = self.pool.clone();

        let models = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let models = technicians
                .filter(is_active.eq(true))
                .order(created_at.asc())
                .select(TechnicianModel::as_select())
                .load::<TechnicianModel>(&mut conn)?;

            Ok::<Vec<TechnicianModel>, anyhow::Error>(models)
        })
        .await??;

        Ok(models.into_iter().map(Into::into).collect())
    }

    /// Available technicians with coordinates and a non-empty zip, for
    /// simulation runs.
    pub async fn available_with_coords(&self) -> Result<Vec<Technician>> {
        use crate::schema::technicians::dsl::*;

        let pool = self.pool.clone();

        let models = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let models = technicians
                .filter(is_active.eq(true))
                .filter(availability_status.eq(AvailabilityStatus::Available.as_str()))
                .filter(geocode_lat.is_not_null())
                .filter(geocode_lng.is_not_null())
                .filter(zip_code.is_not_null())
                .filter(zip_code.ne(Some("")))
                .order(created_at.asc())
                .select(TechnicianModel::as_select())
                .load::<TechnicianModel>(&mut conn)?;

            Ok::<Vec<TechnicianModel>, anyhow::Error>(models)
        })
        .await??;

        Ok(models.into_iter().map(Into::into).collect())
    }

    pub async fn insert(&self, technician: Technician) -> Result<Technician> {
        use crate::schema::technicians::dsl::*;

        let pool = self.pool.clone();
        let model: TechnicianModel = technician.clone().into();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(technicians)
                .values(&model)
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(technician)
    }

    pub async fn update_geocode(&self, technician_id: Uuid, geocode: Geocode) -> Result<bool> {
        use crate::schema::technicians::dsl::*;

        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::update(technicians.filter(id.eq(technician_id)))
                .set((
                    geocode_lat.eq(Some(geocode.point.latitude)),
                    geocode_lng.eq(Some(geocode.point.longitude)),
                    geocode_precision.eq(Some(geocode.precision.as_str().to_string())),
                    geocode_confidence.eq(Some(geocode.confidence)),
                    geocode_source.eq(Some(geocode.source.as_str().to_string())),
                    geocode_address_used.eq(geocode.address_used.clone()),
                    geocode_updated_at.eq(Some(geocode.updated_at)),
                    updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows > 0)
    }
}
