//! Repository for client rows.

use anyhow::Result;
use chrono::Utc;
use diesel::prelude::*;
use uuid::Uuid;

use crate::clients::{Client, ClientModel, PairingStatus};
use crate::geocodes::Geocode;
use crate::web::PgPool;

#[derive(Clone)]
pub struct ClientsRepository {
    pool: PgPool,
}

impl ClientsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_by_id(&self, client_id: Uuid) -> Result<Option<Client>> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = clients
                .filter(id.eq(client_id))
                .select(ClientModel::as_select())
                .first::<ClientModel>(&mut conn)
                .optional()?;

            Ok::<Option<ClientModel>, anyhow::Error>(model)
        })
        .await??;

        Ok(model.map(Into::into))
    }

    pub async fn get_by_crm_id(&self, crm: &str) -> Result<Option<Client>> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();
        let crm = crm.to_string();

        let model = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = clients
                .filter(crm_id.eq(&crm))
                .select(ClientModel::as_select())
                .first::<ClientModel>(&mut conn)
                .optional()?;

            Ok::<Option<ClientModel>, anyhow::Error>(model)
        })
        .await??;

        Ok(model.map(Into::into))
    }

    /// Unpaired clients in creation order: the matcher's input order.
    pub async fn unpaired(&self) -> Result<Vec<Client>> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();

        let models = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let models = clients
                .filter(pairing_status.eq(PairingStatus::Unpaired.as_str()))
                .order(created_at.asc())
                .select(ClientModel::as_select())
                .load::<ClientModel>(&mut conn)?;

            Ok::<Vec<ClientModel>, anyhow::Error>(models)
        })
        .await??;

        Ok(models.into_iter().map(Into::into).collect())
    }

    /// Unpaired clients that already have coordinates, for simulation runs.
    pub async fn unpaired_with_coords(&self) -> Result<Vec<Client>> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();

        let models = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let models = clients
                .filter(pairing_status.eq(PairingStatus::Unpaired.as_str()))
                .filter(geocode_lat.is_not_null())
                .filter(geocode_lng.is_not_null())
                .order(created_at.asc())
                .select(ClientModel::as_select())
                .load::<ClientModel>(&mut conn)?;

            Ok::<Vec<ClientModel>, anyhow::Error>(models)
        })
        .await??;

        Ok(models.into_iter().map(Into::into).collect())
    }

    pub async fn insert(&self, client: Client) -> Result<Client> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();
        let model: ClientModel = client.clone().into();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(clients)
                .values(&model)
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(client)
    }

    /// Full-row update keyed by id.
    pub async fn update(&self, client: Client) -> Result<bool> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();
        let mut model: ClientModel = client.into();
        model.updated_at = Utc::now();
        let target = model.id;

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::update(clients.filter(id.eq(target)))
                .set(&model)
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows > 0)
    }

    /// Store a fresh geocode. Clears `coords_stale` and derives the
    /// verification flag from the geocode itself.
    pub async fn update_geocode(&self, client_id: Uuid, geocode: Geocode) -> Result<bool> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();
        let needs_verification = geocode.needs_verification();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::update(clients.filter(id.eq(client_id)))
                .set((
                    geocode_lat.eq(Some(geocode.point.latitude)),
                    geocode_lng.eq(Some(geocode.point.longitude)),
                    geocode_precision.eq(Some(geocode.precision.as_str().to_string())),
                    geocode_confidence.eq(Some(geocode.confidence)),
                    geocode_source.eq(Some(geocode.source.as_str().to_string())),
                    geocode_address_used.eq(geocode.address_used.clone()),
                    geocode_updated_at.eq(Some(geocode.updated_at)),
                    needs_location_verification.eq(needs_verification),
                    coords_stale.eq(false),
                    updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows > 0)
    }

    pub async fn set_needs_location_verification(
        &self,
        client_id: Uuid,
        flag: bool,
    ) -> Result<bool> {
        use crate::schema::clients::dsl::*;

        let pool = self.pool.clone();

        let rows = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::update(clients.filter(id.eq(client_id)))
                .set((
                    needs_location_verification.eq(flag),
                    updated_at.eq(Utc::now()),
                ))
                .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(rows > 0)
    }
}
