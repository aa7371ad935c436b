//! Repository for the travel-time cache table.

use anyhow::Result;
use diesel::prelude::*;

use crate::travel_time::{EntityKind, TravelMode, TravelTimeCacheModel, TravelTimeEntry};
use crate::web::PgPool;

#[derive(Clone)]
pub struct TravelTimeRepository {
    pool: PgPool,
}

impl TravelTimeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Look up the row for one composite key. Freshness is the caller's
    /// concern; expired rows are returned so the service can decide.
    pub async fn find(
        &self,
        origin: &str,
        dest: &str,
        origin_kind: EntityKind,
        dest_kind: EntityKind,
        travel_mode: TravelMode,
        bucket_name: &str,
    ) -> Result<Option<TravelTimeEntry>> {
        use crate::schema::travel_time_cache::dsl::*;

        let pool = self.pool.clone();
        let origin = origin.to_string();
        let dest = dest.to_string();
        let bucket_name = bucket_name.to_string();

        let row = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let model = travel_time_cache
                .filter(origin_hash.eq(&origin))
                .filter(dest_hash.eq(&dest))
                .filter(origin_type.eq(origin_kind.as_str()))
                .filter(dest_type.eq(dest_kind.as_str()))
                .filter(mode.eq(travel_mode.as_str()))
                .filter(bucket.eq(&bucket_name))
                .select(TravelTimeCacheModel::as_select())
                .first::<TravelTimeCacheModel>(&mut conn)
                .optional()?;

            Ok::<Option<TravelTimeCacheModel>, anyhow::Error>(model)
        })
        .await??;

        row.map(TravelTimeEntry::try_from).transpose()
    }

    /// Insert or refresh a cache row. Last writer wins on the composite key;
    /// samples are statistical estimates so racing writers are acceptable.
    pub async fn upsert(&self, entry: TravelTimeEntry) -> Result<()> {
        use crate::schema::travel_time_cache::dsl::*;

        let pool = self.pool.clone();
        let model: TravelTimeCacheModel = entry.into();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            diesel::insert_into(travel_time_cache)
                .values(&model)
                .on_conflict((origin_hash, dest_hash, origin_type, dest_type, mode, bucket))
                .do_update()
                .set((
                    duration_sec_avg.eq(model.duration_sec_avg),
                    duration_sec_median.eq(model.duration_sec_median),
                    duration_sec_pessimistic.eq(model.duration_sec_pessimistic),
                    distance_meters.eq(model.distance_meters),
                    sample_times.eq(model.sample_times.clone()),
                    sample_durations.eq(model.sample_durations.clone()),
                    computed_at.eq(model.computed_at),
                    expires_at.eq(model.expires_at),
                ))
                .execute(&mut conn)?;

            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    /// Delete every row where the hash appears on either side, regardless of
    /// entity kind. Used for bulk location edits with no entity id.
    pub async fn invalidate_hash(&self, hash: &str) -> Result<u64> {
        use crate::schema::travel_time_cache::dsl::*;

        let pool = self.pool.clone();
        let hash = hash.to_string();

        let deleted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::delete(
                travel_time_cache.filter(origin_hash.eq(&hash).or(dest_hash.eq(&hash))),
            )
            .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(deleted as u64)
    }

    /// Delete every row where the hash appears on either side in the given
    /// id space.
    pub async fn invalidate_entity_hash(&self, kind: EntityKind, hash: &str) -> Result<u64> {
        use crate::schema::travel_time_cache::dsl::*;

        let pool = self.pool.clone();
        let hash = hash.to_string();

        let deleted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows = diesel::delete(
                travel_time_cache.filter(
                    origin_hash
                        .eq(&hash)
                        .and(origin_type.eq(kind.as_str()))
                        .or(dest_hash.eq(&hash).and(dest_type.eq(kind.as_str()))),
                ),
            )
            .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(deleted as u64)
    }

    /// Drop rows past their expiry. Called opportunistically by the nightly
    /// scheduler.
    pub async fn purge_expired(&self) -> Result<u64> {
        use crate::schema::travel_time_cache::dsl::*;

        let pool = self.pool.clone();

        let deleted = tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;

            let rows =
                diesel::delete(travel_time_cache.filter(expires_at.lt(chrono::Utc::now())))
                    .execute(&mut conn)?;

            Ok::<usize, anyhow::Error>(rows)
        })
        .await??;

        Ok(deleted as u64)
    }
}
