use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::location::{
    Coordinates, Location, LocationPatch, NearbyLocation, NewLocation,
};
use crate::store::LocationStore;

/// Owns every write to user locations and answers proximity queries.
///
/// Only the most recently updated row per user is "current"; older rows stay in
/// the store and still show up in radius and city/state scans.
#[derive(Clone)]
pub struct GeoIndex {
    store: Arc<dyn LocationStore>,
}

impl GeoIndex {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    /// Appends a new location row; it becomes the user's current location.
    pub async fn create_location(
        &self,
        user_id: Uuid,
        fields: NewLocation,
    ) -> Result<Location, AppError> {
        let location = self.store.insert(Location::new(user_id, fields)).await?;
        info!("Created location {} for user {user_id}", location.id);
        Ok(location)
    }

    /// Merges `patch` into the current location. `NotFound` if the user has none.
    pub async fn update_location(
        &self,
        user_id: Uuid,
        patch: LocationPatch,
    ) -> Result<Location, AppError> {
        let location = self
            .store
            .update_current(user_id, patch)
            .await?
            .ok_or_else(|| not_on_file(user_id))?;
        info!("Updated location {} for user {user_id}", location.id);
        Ok(location)
    }

    /// Updates the current location, or creates one when the patch carries
    /// every required field.
    pub async fn upsert_location(
        &self,
        user_id: Uuid,
        patch: LocationPatch,
    ) -> Result<Location, AppError> {
        if self.store.current_for_user(user_id).await?.is_some() {
            return self.update_location(user_id, patch).await;
        }
        let fields = patch.into_new().ok_or_else(|| {
            AppError::Validation(
                "address, city and state are required to create a location".to_string(),
            )
        })?;
        self.create_location(user_id, fields).await
    }

    pub async fn get_current_location(&self, user_id: Uuid) -> Result<Option<Location>, AppError> {
        self.store.current_for_user(user_id).await
    }

    /// Marks the user's current location verified, whatever its contents.
    #[allow(dead_code)]
    pub async fn mark_verified(&self, user_id: Uuid) -> Result<Location, AppError> {
        let current = self.require_current(user_id).await?;
        let location = self
            .store
            .mark_verified(current.id, None)
            .await?
            .ok_or_else(|| not_on_file(user_id))?;
        info!("Marked location {} verified for user {user_id}", location.id);
        Ok(location)
    }

    /// Marks `checked` verified only if the stored row is still exactly what
    /// was checked. Returns whether the flag was set.
    pub async fn mark_checked_verified(&self, checked: &Location) -> Result<bool, AppError> {
        let marked = self
            .store
            .mark_verified(checked.id, Some(checked.updated_at))
            .await?;
        match marked {
            Some(location) => {
                info!(
                    "Marked location {} verified for user {}",
                    location.id, location.user_id
                );
                Ok(true)
            }
            None => {
                warn!(
                    "Location {} changed or was removed after it was checked; left unverified",
                    checked.id
                );
                Ok(false)
            }
        }
    }

    pub async fn delete_locations(&self, user_id: Uuid) -> Result<(), AppError> {
        match self.store.delete_for_user(user_id).await? {
            0 => Err(not_on_file(user_id)),
            n => {
                info!("Deleted {n} location(s) for user {user_id}");
                Ok(())
            }
        }
    }

    pub async fn find_within_radius(
        &self,
        latitude: f64,
        longitude: f64,
        radius_km: f64,
    ) -> Result<Vec<NearbyLocation>, AppError> {
        self.store
            .within_radius(Coordinates::new(latitude, longitude), radius_km)
            .await
    }

    pub async fn find_by_city(&self, city: &str) -> Result<Vec<Location>, AppError> {
        self.store.by_city(city).await
    }

    pub async fn find_by_state(&self, state: &str) -> Result<Vec<Location>, AppError> {
        self.store.by_state(state).await
    }

    async fn require_current(&self, user_id: Uuid) -> Result<Location, AppError> {
        self.store
            .current_for_user(user_id)
            .await?
            .ok_or_else(|| not_on_file(user_id))
    }
}

fn not_on_file(user_id: Uuid) -> AppError {
    AppError::NotFound(format!("No location on file for user {user_id}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::location::LocationSource;
    use crate::store::MemoryLocationStore;

    fn index() -> GeoIndex {
        GeoIndex::new(Arc::new(MemoryLocationStore::new()))
    }

    fn gurgaon() -> NewLocation {
        NewLocation {
            address: "DLF Phase 2".into(),
            city: "Gurgaon".into(),
            state: "Haryana".into(),
            postal_code: Some("122002".into()),
            coordinates: Some(Coordinates::new(28.4595, 77.0266)),
            source: Some(LocationSource::Gps),
        }
    }

    #[tokio::test]
    async fn test_get_current_location_absent_is_none() {
        assert!(index()
            .get_current_location(Uuid::new_v4())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_get_current_location_is_idempotent() {
        let geo = index();
        let user = Uuid::new_v4();
        geo.create_location(user, gurgaon()).await.unwrap();
        let first = geo.get_current_location(user).await.unwrap();
        let second = geo.get_current_location(user).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_mark_verified_without_location_is_not_found() {
        let err = index().mark_verified(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_mark_verified_sets_flag_on_current() {
        let geo = index();
        let user = Uuid::new_v4();
        let created = geo.create_location(user, gurgaon()).await.unwrap();
        let verified = geo.mark_verified(user).await.unwrap();
        assert_eq!(verified.id, created.id);
        assert!(verified.verified);
        assert!(geo.get_current_location(user).await.unwrap().unwrap().verified);
    }

    #[tokio::test]
    async fn test_checked_snapshot_is_not_marked_after_an_edit() {
        let geo = index();
        let user = Uuid::new_v4();
        let checked = geo.create_location(user, gurgaon()).await.unwrap();
        geo.update_location(
            user,
            LocationPatch {
                address: Some("Fake Street 999".into()),
                city: Some("Mumbai".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(!geo.mark_checked_verified(&checked).await.unwrap());
        let current = geo.get_current_location(user).await.unwrap().unwrap();
        assert_eq!(current.city, "Mumbai");
        assert!(!current.verified);
    }

    #[tokio::test]
    async fn test_checked_snapshot_is_marked_when_unchanged() {
        let geo = index();
        let user = Uuid::new_v4();
        let checked = geo.create_location(user, gurgaon()).await.unwrap();
        assert!(geo.mark_checked_verified(&checked).await.unwrap());
        assert!(geo.get_current_location(user).await.unwrap().unwrap().verified);

        geo.delete_locations(user).await.unwrap();
        assert!(!geo.mark_checked_verified(&checked).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_can_clear_coordinates() {
        let geo = index();
        let user = Uuid::new_v4();
        geo.create_location(user, gurgaon()).await.unwrap();
        let cleared = geo
            .update_location(
                user,
                LocationPatch {
                    coordinates: Some(None),
                    postal_code: Some(None),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(cleared.coordinates.is_none() && cleared.latitude.is_none());
        assert!(cleared.postal_code.is_none());
        assert!(geo
            .find_within_radius(28.4595, 77.0266, 10.0)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_without_location_is_not_found() {
        let err = index()
            .update_location(Uuid::new_v4(), LocationPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_update_derives_scalar_coordinates() {
        let geo = index();
        let user = Uuid::new_v4();
        geo.create_location(user, gurgaon()).await.unwrap();
        let updated = geo
            .update_location(
                user,
                LocationPatch {
                    coordinates: Some(Some(Coordinates::new(28.5355, 77.3910))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.latitude, Some(28.5355));
        assert_eq!(updated.longitude, Some(77.3910));
        assert!(updated.updated_at >= updated.created_at);
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates_same_row() {
        let geo = index();
        let user = Uuid::new_v4();
        let created = geo
            .upsert_location(user, LocationPatch::from(gurgaon()))
            .await
            .unwrap();
        let updated = geo
            .upsert_location(
                user,
                LocationPatch {
                    city: Some("Gurugram".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(created.id, updated.id);
        assert_eq!(updated.city, "Gurugram");
    }

    #[tokio::test]
    async fn test_upsert_create_requires_address_fields() {
        let err = index()
            .upsert_location(
                Uuid::new_v4(),
                LocationPatch {
                    city: Some("Gurgaon".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_second_create_becomes_current() {
        let geo = index();
        let user = Uuid::new_v4();
        geo.create_location(user, gurgaon()).await.unwrap();
        let newer = geo
            .create_location(
                user,
                NewLocation {
                    city: "Noida".into(),
                    state: "Uttar Pradesh".into(),
                    ..gurgaon()
                },
            )
            .await
            .unwrap();
        let current = geo.get_current_location(user).await.unwrap().unwrap();
        assert_eq!(current.id, newer.id);
        // the old row is kept
        assert_eq!(geo.find_by_state("Haryana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_radius_never_returns_missing_coordinates() {
        let geo = index();
        geo.create_location(Uuid::new_v4(), gurgaon()).await.unwrap();
        geo.create_location(
            Uuid::new_v4(),
            NewLocation {
                coordinates: None,
                ..gurgaon()
            },
        )
        .await
        .unwrap();

        let hits = geo.find_within_radius(28.6139, 77.2090, 30.0).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].location.coordinates.is_some());
        assert!(hits[0].distance_km < 30.0);
    }

    #[tokio::test]
    async fn test_delete_locations() {
        let geo = index();
        let user = Uuid::new_v4();
        geo.create_location(user, gurgaon()).await.unwrap();
        geo.delete_locations(user).await.unwrap();
        assert!(geo.get_current_location(user).await.unwrap().is_none());
        assert!(matches!(
            geo.delete_locations(user).await.unwrap_err(),
            AppError::NotFound(_)
        ));
    }
}
