use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::geo::haversine::haversine_km;
use crate::models::location::{Coordinates, Location, LocationPatch, NearbyLocation};
use crate::models::verification::{JobUpdate, VerificationJob};
use crate::store::{JobStore, LocationStore};

/// Rows carry a write revision so "latest" stays well defined when two writes
/// land within the same clock tick.
#[derive(Debug, Clone)]
struct Slot<T> {
    revision: u64,
    row: T,
}

fn newest_first<T>(slots: &mut [&Slot<T>]) {
    slots.sort_by(|a, b| b.revision.cmp(&a.revision));
}

/// Single-node location store.
#[derive(Default)]
pub struct MemoryLocationStore {
    rows: RwLock<HashMap<Uuid, Slot<Location>>>,
    revision: AtomicU64,
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_revision(&self) -> u64 {
        self.revision.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn filtered(&self, keep: impl Fn(&Location) -> bool) -> Vec<Location> {
        let rows = self.rows.read().await;
        let mut hits: Vec<_> = rows.values().filter(|s| keep(&s.row)).collect();
        newest_first(&mut hits);
        hits.into_iter().map(|s| s.row.clone()).collect()
    }
}

#[async_trait]
impl LocationStore for MemoryLocationStore {
    async fn insert(&self, location: Location) -> Result<Location, AppError> {
        let mut rows = self.rows.write().await;
        let revision = self.next_revision();
        rows.insert(
            location.id,
            Slot {
                revision,
                row: location.clone(),
            },
        );
        Ok(location)
    }

    async fn update_current(
        &self,
        user_id: Uuid,
        patch: LocationPatch,
    ) -> Result<Option<Location>, AppError> {
        let mut rows = self.rows.write().await;
        let revision = self.next_revision();
        let Some(slot) = rows
            .values_mut()
            .filter(|s| s.row.user_id == user_id)
            .max_by_key(|s| s.revision)
        else {
            return Ok(None);
        };
        slot.row.apply(patch);
        slot.revision = revision;
        Ok(Some(slot.row.clone()))
    }

    async fn mark_verified(
        &self,
        id: Uuid,
        unchanged_since: Option<DateTime<Utc>>,
    ) -> Result<Option<Location>, AppError> {
        let mut rows = self.rows.write().await;
        let Some(slot) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if unchanged_since.is_some_and(|stamp| stamp != slot.row.updated_at) {
            return Ok(None);
        }
        // a flag, not an edit: revision and updated_at stay put
        slot.row.verified = true;
        Ok(Some(slot.row.clone()))
    }

    async fn current_for_user(&self, user_id: Uuid) -> Result<Option<Location>, AppError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .filter(|s| s.row.user_id == user_id)
            .max_by_key(|s| s.revision)
            .map(|s| s.row.clone()))
    }

    async fn delete_for_user(&self, user_id: Uuid) -> Result<u64, AppError> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, s| s.row.user_id != user_id);
        Ok((before - rows.len()) as u64)
    }

    async fn within_radius(
        &self,
        center: Coordinates,
        radius_km: f64,
    ) -> Result<Vec<NearbyLocation>, AppError> {
        let rows = self.rows.read().await;
        let mut hits: Vec<NearbyLocation> = rows
            .values()
            .filter_map(|s| {
                let coordinates = s.row.coordinates?;
                let distance_km = haversine_km(center, coordinates);
                (distance_km < radius_km).then(|| NearbyLocation {
                    location: s.row.clone(),
                    distance_km,
                })
            })
            .collect();
        hits.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        Ok(hits)
    }

    async fn by_city(&self, city: &str) -> Result<Vec<Location>, AppError> {
        Ok(self.filtered(|l| l.city == city).await)
    }

    async fn by_state(&self, state: &str) -> Result<Vec<Location>, AppError> {
        Ok(self.filtered(|l| l.state == state).await)
    }
}

/// Single-node job store. The write lock is held across the whole
/// read-modify-write, which makes each `update` atomic per job.
#[derive(Default)]
pub struct MemoryJobStore {
    rows: RwLock<HashMap<Uuid, Slot<VerificationJob>>>,
    revision: AtomicU64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: VerificationJob) -> Result<VerificationJob, AppError> {
        let mut rows = self.rows.write().await;
        let revision = self.revision.fetch_add(1, Ordering::Relaxed) + 1;
        rows.insert(
            job.id,
            Slot {
                revision,
                row: job.clone(),
            },
        );
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<Option<VerificationJob>, AppError> {
        Ok(self.rows.read().await.get(&id).map(|s| s.row.clone()))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<VerificationJob>, AppError> {
        let rows = self.rows.read().await;
        // revision here is the insertion order, i.e. creation order
        let mut jobs: Vec<_> = rows.values().filter(|s| s.row.user_id == user_id).collect();
        newest_first(&mut jobs);
        Ok(jobs.into_iter().map(|s| s.row.clone()).collect())
    }

    async fn update(&self, id: Uuid, update: JobUpdate) -> Result<VerificationJob, AppError> {
        let mut rows = self.rows.write().await;
        let slot = rows
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Verification job {id} not found")))?;
        update.apply_to(&mut slot.row, Utc::now())?;
        Ok(slot.row.clone())
    }
}
