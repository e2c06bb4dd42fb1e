use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::AppError;
use crate::geo::haversine::EARTH_RADIUS_KM;
use crate::models::location::{
    Coordinates, Location, LocationPatch, LocationSource, NearbyLocation,
};
use crate::models::verification::{CheckType, JobStatus, JobUpdate, RiskLevel, VerificationJob};
use crate::store::{JobStore, LocationStore};

#[derive(Debug, Clone, FromRow)]
struct LocationRow {
    id: Uuid,
    user_id: Uuid,
    address: String,
    city: String,
    state: String,
    postal_code: Option<String>,
    coordinates: Option<Json<Coordinates>>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    verified: bool,
    source: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<LocationRow> for Location {
    type Error = AppError;

    fn try_from(row: LocationRow) -> Result<Self, Self::Error> {
        Ok(Location {
            id: row.id,
            user_id: row.user_id,
            address: row.address,
            city: row.city,
            state: row.state,
            postal_code: row.postal_code,
            coordinates: row.coordinates.map(|c| c.0),
            latitude: row.latitude,
            longitude: row.longitude,
            verified: row.verified,
            source: row.source.parse::<LocationSource>().map_err(|e: String| anyhow!(e))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct NearbyRow {
    #[sqlx(flatten)]
    location: LocationRow,
    distance_km: f64,
}

#[derive(Debug, Clone, FromRow)]
struct JobRow {
    id: Uuid,
    user_id: Uuid,
    location_id: Option<Uuid>,
    check_type: String,
    status: String,
    risk_level: Option<String>,
    check_data: Option<Value>,
    notes: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for VerificationJob {
    type Error = AppError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let risk_level = row
            .risk_level
            .map(|r| r.parse::<RiskLevel>())
            .transpose()
            .map_err(|e: String| anyhow!(e))?;
        Ok(VerificationJob {
            id: row.id,
            user_id: row.user_id,
            location_id: row.location_id,
            check_type: row.check_type.parse::<CheckType>().map_err(|e: String| anyhow!(e))?,
            status: row.status.parse::<JobStatus>().map_err(|e: String| anyhow!(e))?,
            risk_level,
            check_data: row.check_data,
            notes: row.notes,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_locations(rows: Vec<LocationRow>) -> Result<Vec<Location>, AppError> {
    rows.into_iter().map(Location::try_from).collect()
}

/// PostgreSQL-backed location store.
#[derive(Clone)]
pub struct PgLocationStore {
    pool: PgPool,
}

impl PgLocationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocationStore for PgLocationStore {
    async fn insert(&self, location: Location) -> Result<Location, AppError> {
        let row: LocationRow = sqlx::query_as(
            r#"
            INSERT INTO locations
                (id, user_id, address, city, state, postal_code, coordinates,
                 latitude, longitude, verified, source, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(location.id)
        .bind(location.user_id)
        .bind(&location.address)
        .bind(&location.city)
        .bind(&location.state)
        .bind(&location.postal_code)
        .bind(location.coordinates.map(Json))
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.verified)
        .bind(location.source.as_str())
        .bind(location.created_at)
        .bind(location.updated_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn update_current(
        &self,
        user_id: Uuid,
        patch: LocationPatch,
    ) -> Result<Option<Location>, AppError> {
        // Row lock for the whole read-modify-write.
        let mut tx = self.pool.begin().await?;

        let row: Option<LocationRow> = sqlx::query_as(
            r#"
            SELECT * FROM locations
            WHERE user_id = $1
            ORDER BY updated_at DESC, created_at DESC
            LIMIT 1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let mut location = Location::try_from(row)?;
        location.apply(patch);

        let row: LocationRow = sqlx::query_as(
            r#"
            UPDATE locations
            SET address = $2, city = $3, state = $4, postal_code = $5, coordinates = $6,
                latitude = $7, longitude = $8, verified = $9, source = $10, updated_at = $11
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(location.id)
        .bind(&location.address)
        .bind(&location.city)
        .bind(&location.state)
        .bind(&location.postal_code)
        .bind(location.coordinates.map(Json))
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.verified)
        .bind(location.source.as_str())
        .bind(location.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(Location::try_from(row)?))
    }

    async fn mark_verified(
        &self,
        id: Uuid,
        unchanged_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Location>, AppError> {
        let row: Option<LocationRow> = sqlx::query_as(
            r#"
            UPDATE locations
            SET verified = TRUE
            WHERE id = $1 AND ($2::timestamptz IS NULL OR updated_at = $2)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(unchanged_since)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Location::try_from).transpose()
    }

    async fn current_for_user(&self, user_id: Uuid) -> Result<Option<Location>, AppError> {
        let row: Option<LocationRow> = sqlx::query_as(
            r#"
            SELECT * FROM locations
            WHERE user_id = $1
            ORDER BY updated_at DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Location::try_from).transpose()
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM locations WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn within_radius(
        &self,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<NearbyLocation>, AppError> {
        // Same Haversine as geo::haversine_km, evaluated in SQL.
        let rows: Vec<NearbyRow> = sqlx::query_as(
            r#"
            SELECT * FROM (
                SELECT l.*,
                       2 * $4::float8 * asin(LEAST(1.0::float8, sqrt(
                           power(sin(radians(l.latitude - $1::float8) / 2), 2)
                           + cos(radians($1::float8)) * cos(radians(l.latitude))
                             * power(sin(radians(l.longitude - $2::float8) / 2), 2)
                       ))) AS distance_km
                FROM locations l
                WHERE l.latitude IS NOT NULL AND l.longitude IS NOT NULL
            ) hits
            WHERE distance_km < $3::float8
            ORDER BY distance_km ASC
            "#,
        )
        .bind(center.latitude)
        .bind(center.longitude)
        .bind(radius_km)
        .bind(EARTH_RADIUS_KM)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<NearbyLocation, AppError> {
                Ok(NearbyLocation {
                    location: row.location.try_into()?,
                    distance_km: row.distance_km,
                })
            })
            .collect()
    }

    async fn by_city(&self, city: &str) -> Result<Vec<Location>, AppError> {
        let rows: Vec<LocationRow> =
            sqlx::query_as("SELECT * FROM locations WHERE city = $1 ORDER BY updated_at DESC")
                .bind(city)
                .fetch_all(&self.pool)
                .await?;
        into_locations(rows)
    }

    async fn by_state(&self, state: &str) -> Result<Vec<Location>, AppError> {
        let rows: Vec<LocationRow> =
            sqlx::query_as("SELECT * FROM locations WHERE state = $1 ORDER BY updated_at DESC")
                .bind(state)
                .fetch_all(&self.pool)
                .await?;
        into_locations(rows)
    }
}

/// PostgreSQL-backed job store.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: VerificationJob) -> Result<VerificationJob, AppError> {
        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO verification_jobs
                (id, user_id, location_id, check_type, status, risk_level, check_data,
                 notes, completed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(job.id)
        .bind(job.user_id)
        .bind(job.location_id)
        .bind(job.check_type.as_str())
        .bind(job.status.as_str())
        .bind(job.risk_level.map(|r| r.as_str()))
        .bind(&job.check_data)
        .bind(&job.notes)
        .bind(job.completed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await?;
        row.try_into()
    }

    async fn get(&self, id: Uuid) -> Result<Option<VerificationJob>, AppError> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM verification_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(VerificationJob::try_from).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<VerificationJob>, AppError> {
        let rows: Vec<JobRow> = sqlx::query_as(
            "SELECT * FROM verification_jobs WHERE user_id = $1 ORDER BY seq DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(VerificationJob::try_from).collect()
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<VerificationJob, AppError> {
        // Row lock for the whole read-modify-write.
        let mut tx = self.pool.begin().await?;

        let row: Option<JobRow> =
            sqlx::query_as("SELECT * FROM verification_jobs WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *tx)
                .await?;
        let mut job = VerificationJob::try_from(
            row.ok_or_else(|| AppError::NotFound(format!("Verification job {id} not found")))?,
        )?;
        update.apply_to(&mut job, Utc::now())?;

        sqlx::query(
            r#"
            UPDATE verification_jobs
            SET status = $2, risk_level = $3, check_data = $4, notes = $5,
                completed_at = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.risk_level.map(|r| r.as_str()))
        .bind(&job.check_data)
        .bind(&job.notes)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }
}
