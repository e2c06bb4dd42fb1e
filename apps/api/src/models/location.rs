use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How a location's coordinates were obtained.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gps,
    #[default]
    Manual,
    Geocoded,
}

impl LocationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocationSource::Gps => "gps",
            LocationSource::Manual => "manual",
            LocationSource::Geocoded => "geocoded",
        }
    }
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocationSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gps" => Ok(LocationSource::Gps),
            "manual" => Ok(LocationSource::Manual),
            "geocoded" => Ok(LocationSource::Geocoded),
            other => Err(format!("unknown location source '{other}'")),
        }
    }
}

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Finite and within [-90, 90] / [-180, 180].
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A user's declared address, optionally pinned to coordinates.
///
/// `latitude`/`longitude` mirror `coordinates` so radius scans can read plain
/// columns; they are always written together through [`Location::set_coordinates`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub verified: bool,
    pub source: LocationSource,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn new(user_id: Uuid, fields: NewLocation) -> Self {
        let now = Utc::now();
        let mut location = Location {
            id: Uuid::new_v4(),
            user_id,
            address: fields.address,
            city: fields.city,
            state: fields.state,
            postal_code: fields.postal_code,
            coordinates: None,
            latitude: None,
            longitude: None,
            verified: false,
            source: fields.source.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        location.set_coordinates(fields.coordinates);
        location
    }

    pub fn set_coordinates(&mut self, coordinates: Option<Coordinates>) {
        self.coordinates = coordinates;
        self.latitude = coordinates.map(|c| c.latitude);
        self.longitude = coordinates.map(|c| c.longitude);
    }

    /// Merges the provided fields and stamps `updated_at`.
    ///
    /// Any change to the address text or coordinates drops the `verified` flag:
    /// a verification only vouches for the data it saw.
    pub fn apply(&mut self, patch: LocationPatch) {
        let before = (
            self.address.clone(),
            self.city.clone(),
            self.state.clone(),
            self.postal_code.clone(),
            self.coordinates,
        );

        if let Some(address) = patch.address {
            self.address = address;
        }
        if let Some(city) = patch.city {
            self.city = city;
        }
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(postal_code) = patch.postal_code {
            self.postal_code = postal_code;
        }
        if let Some(coordinates) = patch.coordinates {
            self.set_coordinates(coordinates);
        }
        if let Some(source) = patch.source {
            self.source = source;
        }

        let after = (
            &self.address,
            &self.city,
            &self.state,
            &self.postal_code,
            self.coordinates,
        );
        if (&before.0, &before.1, &before.2, &before.3, before.4) != after {
            self.verified = false;
        }
        self.touch();
    }

    /// Moves `updated_at` strictly forward, at microsecond granularity so the
    /// stamp survives a round trip through a TIMESTAMPTZ column.
    fn touch(&mut self) {
        let next = self.updated_at + chrono::Duration::microseconds(1);
        self.updated_at = Utc::now().max(next);
    }
}

/// Fields required to create a location.
#[derive(Debug, Clone, Default)]
pub struct NewLocation {
    pub address: String,
    pub city: String,
    pub state: String,
    pub postal_code: Option<String>,
    pub coordinates: Option<Coordinates>,
    pub source: Option<LocationSource>,
}

/// Partial update; `None` leaves the stored value untouched.
///
/// The optional columns nest a second `Option`: `Some(None)` clears them.
#[derive(Debug, Clone, Default)]
pub struct LocationPatch {
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<Option<String>>,
    pub coordinates: Option<Option<Coordinates>>,
    pub source: Option<LocationSource>,
}

impl LocationPatch {
    /// Converts the patch into a full record, if every required field is present.
    pub fn into_new(self) -> Option<NewLocation> {
        Some(NewLocation {
            address: self.address?,
            city: self.city?,
            state: self.state?,
            postal_code: self.postal_code.flatten(),
            coordinates: self.coordinates.flatten(),
            source: self.source,
        })
    }
}

impl From<NewLocation> for LocationPatch {
    fn from(fields: NewLocation) -> Self {
        LocationPatch {
            address: Some(fields.address),
            city: Some(fields.city),
            state: Some(fields.state),
            postal_code: Some(fields.postal_code),
            coordinates: Some(fields.coordinates),
            source: fields.source,
        }
    }
}

/// A radius query hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NearbyLocation {
    pub location: Location,
    pub distance_km: f64,
}
