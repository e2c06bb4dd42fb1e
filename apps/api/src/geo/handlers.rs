use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::location::{Coordinates, Location, LocationPatch, LocationSource, NearbyLocation};
use crate::models::verification::VerificationJob;
use crate::state::AppState;

/// Both halves are optional on the wire so a half-filled pair can be rejected
/// with a useful message instead of a generic decode error.
#[derive(Debug, Deserialize)]
pub struct CoordinatesInput {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl CoordinatesInput {
    fn validate(self) -> Result<Coordinates, AppError> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => validate_point(latitude, longitude),
            _ => Err(AppError::Validation(
                "coordinates need both latitude and longitude".to_string(),
            )),
        }
    }
}

/// Absent key → `None`, explicit `null` → `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRequest {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub postal_code: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub coordinates: Option<Option<CoordinatesInput>>,
    pub source: Option<LocationSource>,
}

impl LocationRequest {
    fn into_patch(self) -> Result<LocationPatch, AppError> {
        let coordinates = self
            .coordinates
            .map(|c| c.map(CoordinatesInput::validate).transpose())
            .transpose()?;
        Ok(LocationPatch {
            address: self.address,
            city: self.city,
            state: self.state,
            postal_code: self.postal_code,
            coordinates,
            source: self.source,
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationWriteResponse {
    pub location: Location,
    /// The address check queued by this write, if auto-verification is on.
    pub verification_job: Option<VerificationJob>,
}

#[derive(Debug, Deserialize)]
pub struct NearbyQuery {
    pub lat: f64,
    pub lon: f64,
    #[serde(rename = "radiusKm")]
    pub radius_km: f64,
}

fn validate_point(latitude: f64, longitude: f64) -> Result<Coordinates, AppError> {
    let point = Coordinates::new(latitude, longitude);
    if point.is_valid() {
        Ok(point)
    } else {
        Err(AppError::Validation(format!(
            "coordinates ({latitude}, {longitude}) are out of range"
        )))
    }
}

/// Queues an address check after a location write. The write has already
/// succeeded, so a scheduling failure is logged rather than returned.
async fn verify_after_write(state: &AppState, user_id: Uuid) -> Option<VerificationJob> {
    if !state.config.auto_verify_on_location_write {
        return None;
    }
    match state
        .orchestrator
        .initiate_address_verification(user_id)
        .await
    {
        Ok(job) => Some(job),
        Err(e) => {
            error!("Could not queue address verification for user {user_id}: {e}");
            None
        }
    }
}

async fn written(state: &AppState, location: Location) -> Json<LocationWriteResponse> {
    let verification_job = verify_after_write(state, location.user_id).await;
    Json(LocationWriteResponse {
        location,
        verification_job,
    })
}

/// POST /api/v1/locations/:user_id
pub async fn handle_create_location(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<LocationRequest>,
) -> Result<(StatusCode, Json<LocationWriteResponse>), AppError> {
    let fields = req.into_patch()?.into_new().ok_or_else(|| {
        AppError::Validation("address, city and state are required".to_string())
    })?;
    let location = state.geo.create_location(user_id, fields).await?;
    Ok((StatusCode::CREATED, written(&state, location).await))
}

/// PUT /api/v1/locations/:user_id
pub async fn handle_upsert_location(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<LocationRequest>,
) -> Result<Json<LocationWriteResponse>, AppError> {
    let location = state
        .geo
        .upsert_location(user_id, req.into_patch()?)
        .await?;
    Ok(written(&state, location).await)
}

/// PATCH /api/v1/locations/:user_id
pub async fn handle_update_location(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(req): Json<LocationRequest>,
) -> Result<Json<LocationWriteResponse>, AppError> {
    let location = state
        .geo
        .update_location(user_id, req.into_patch()?)
        .await?;
    Ok(written(&state, location).await)
}

/// GET /api/v1/locations/:user_id
pub async fn handle_get_location(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Location>, AppError> {
    state
        .geo
        .get_current_location(user_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No location on file for user {user_id}")))
}

/// DELETE /api/v1/locations/:user_id
pub async fn handle_delete_location(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.geo.delete_locations(user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/locations/nearby?lat&lon&radiusKm
pub async fn handle_nearby(
    State(state): State<AppState>,
    Query(q): Query<NearbyQuery>,
) -> Result<Json<Vec<NearbyLocation>>, AppError> {
    let center = validate_point(q.lat, q.lon)?;
    if !(q.radius_km.is_finite() && q.radius_km > 0.0 && q.radius_km <= state.config.max_radius_km)
    {
        return Err(AppError::Validation(format!(
            "radiusKm must be greater than 0 and at most {}",
            state.config.max_radius_km
        )));
    }
    let hits = state
        .geo
        .find_within_radius(center.latitude, center.longitude, q.radius_km)
        .await?;
    Ok(Json(hits))
}

/// GET /api/v1/locations/city/:city
pub async fn handle_by_city(
    State(state): State<AppState>,
    Path(city): Path<String>,
) -> Result<Json<Vec<Location>>, AppError> {
    Ok(Json(state.geo.find_by_city(&city).await?))
}

/// GET /api/v1/locations/state/:state
pub async fn handle_by_state(
    State(state): State<AppState>,
    Path(region): Path<String>,
) -> Result<Json<Vec<Location>>, AppError> {
    Ok(Json(state.geo.find_by_state(&region).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_half_coordinates_are_rejected() {
        let input = CoordinatesInput {
            latitude: Some(28.6),
            longitude: None,
        };
        assert!(matches!(input.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_out_of_range_coordinates_are_rejected() {
        assert!(validate_point(91.0, 0.0).is_err());
        assert!(validate_point(0.0, -181.0).is_err());
        assert!(validate_point(28.6, 77.2).is_ok());
    }

    #[test]
    fn test_request_without_coordinates_leaves_them_untouched() {
        let req: LocationRequest =
            serde_json::from_str(r#"{"city": "Jaipur", "postalCode": "302001"}"#).unwrap();
        let patch = req.into_patch().unwrap();
        assert!(patch.coordinates.is_none());
        assert_eq!(patch.postal_code, Some(Some("302001".to_string())));
        assert!(patch.address.is_none());
    }

    #[test]
    fn test_explicit_null_clears_optional_fields() {
        let req: LocationRequest =
            serde_json::from_str(r#"{"postalCode": null, "coordinates": null}"#).unwrap();
        let patch = req.into_patch().unwrap();
        assert_eq!(patch.postal_code, Some(None));
        assert_eq!(patch.coordinates, Some(None));
    }
}
