//! Persistence seams for the trust core.
//!
//! Both stores are object-safe traits carried as `Arc<dyn …>` so the in-memory
//! and PostgreSQL backends are interchangeable at startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::location::{Coordinates, Location, LocationPatch, NearbyLocation};
use crate::models::verification::{JobUpdate, VerificationJob};

pub mod memory;
pub mod postgres;

pub use memory::{MemoryJobStore, MemoryLocationStore};
pub use postgres::{PgJobStore, PgLocationStore};

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn insert(&self, location: Location) -> Result<Location, AppError>;

    /// Merges `patch` into the user's current row as one atomic read-modify-write.
    /// `None` when the user has no location.
    async fn update_current(
        &self,
        user_id: Uuid,
        patch: LocationPatch,
    ) -> Result<Option<Location>, AppError>;

    /// Sets `verified` on one row and touches no other column. With
    /// `unchanged_since`, the row is only marked while its `updated_at` still
    /// equals that stamp. `None` when the row is gone or has moved on.
    async fn mark_verified(
        &self,
        id: Uuid,
        unchanged_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Location>, AppError>;

    /// Most recently updated row for the user.
    async fn current_for_user(&self, user_id: Uuid) -> Result<Option<Location>, AppError>;

    /// Removes every row of the user, returning how many were removed.
    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError>;

    /// Rows with coordinates strictly closer than `radius_km`, nearest first.
    async fn within_radius(
        &self,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<NearbyLocation>, AppError>;

    /// Exact match, most recently updated first.
    async fn by_city(&self, city: &str) -> Result<Vec<Location>, AppError>;

    /// Exact match, most recently updated first.
    async fn by_state(&self, state: &str) -> Result<Vec<Location>, AppError>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert(&self, job: VerificationJob) -> Result<VerificationJob, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<VerificationJob>, AppError>;

    /// Newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<VerificationJob>, AppError>;

    /// Atomic read-modify-write of one job. Concurrent updates to the same job
    /// never interleave.
    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<VerificationJob, AppError>;
}
