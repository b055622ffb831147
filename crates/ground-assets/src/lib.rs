//! Ground Assets Library
//!
//! Fixed ground-side records for cache placement: Starlink-style gateways,
//! populated cities with user density, and terrestrial data centers.
//! Provides great-circle lookups between them and the per-city fallback
//! weight used by the placement solver.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::path::PathBuf;
use thiserror::Error;

pub mod loader;

pub use loader::{load_cities, load_data_centers, load_gateways};

/// Speed of light in km/ms
pub const LIGHT_SPEED_KM_PER_MS: f64 = 299.792458;

/// Mean Earth radius in km
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Raw population figures are scaled down by this factor
pub const DENSITY_SCALE: u64 = 1000;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("No records found in {0}")]
    Empty(PathBuf),
}

pub type Result<T> = std::result::Result<T, AssetError>;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoLocation {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    pub fn distance_km(&self, other: &GeoLocation) -> f64 {
        haversine_km(
            self.latitude,
            self.longitude,
            other.latitude,
            other.longitude,
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundStation {
    pub index: usize,
    pub name: String,
    pub location: GeoLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct City {
    pub index: usize,
    pub name: String,
    pub location: GeoLocation,
    /// Population divided by [`DENSITY_SCALE`]
    pub density: u32,
    pub user_type: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCenter {
    pub index: usize,
    pub location: GeoLocation,
}

/// Nearest data center for one ground station
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Backhaul {
    pub ground_station: usize,
    pub data_center: usize,
    pub distance_km: f64,
    pub delay_ms: f64,
}

/// Haversine distance between two points in km
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1_rad = lat1 * PI / 180.0;
    let lat2_rad = lat2 * PI / 180.0;
    let dlat = (lat2 - lat1) * PI / 180.0;
    let dlon = (lon2 - lon1) * PI / 180.0;

    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_KM * c
}

/// One-way propagation delay in ms over `distance_km` at light speed
pub fn propagation_delay_ms(distance_km: f64) -> f64 {
    distance_km / LIGHT_SPEED_KM_PER_MS
}

fn nearest<'a, I>(from: &GeoLocation, candidates: I) -> Option<(usize, f64)>
where
    I: IntoIterator<Item = (usize, &'a GeoLocation)>,
{
    candidates
        .into_iter()
        .map(|(index, loc)| (index, from.distance_km(loc)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

/// Closest ground station to a city, as (station index, km)
pub fn nearest_ground_station(city: &City, stations: &[GroundStation]) -> Option<(usize, f64)> {
    nearest(
        &city.location,
        stations.iter().map(|s| (s.index, &s.location)),
    )
}

/// Closest data center to a location, as (data center index, km)
pub fn nearest_data_center(location: &GeoLocation, dcs: &[DataCenter]) -> Option<(usize, f64)> {
    nearest(location, dcs.iter().map(|d| (d.index, &d.location)))
}

/// Per-city propagation delay (ms) to the nearest data center.
///
/// Cities fall back to this terrestrial path when no cache serves them,
/// so the weight rewards covering cities that are far from one.
/// Returns 0 for every city when `dcs` is empty.
pub fn fallback_weights(cities: &[City], dcs: &[DataCenter]) -> Vec<f64> {
    cities
        .iter()
        .map(|c| {
            nearest_data_center(&c.location, dcs)
                .map(|(_, km)| propagation_delay_ms(km))
                .unwrap_or(0.0)
        })
        .collect()
}

/// Nearest data center for each ground station
pub fn gateway_backhaul(stations: &[GroundStation], dcs: &[DataCenter]) -> Vec<Backhaul> {
    stations
        .iter()
        .filter_map(|gs| {
            nearest_data_center(&gs.location, dcs).map(|(dc, km)| Backhaul {
                ground_station: gs.index,
                data_center: dc,
                distance_km: km,
                delay_ms: propagation_delay_ms(km),
            })
        })
        .collect()
}
