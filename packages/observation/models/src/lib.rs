#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Metric vocabulary and observation records.
//!
//! Every observation source produces [`RawObservation`] records. The ingest
//! boundary validates them into [`Observation`]s tagged with one of the
//! recognized [`MetricType`]s; anything that does not conform is rejected
//! rather than trusted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// The kind of quantity an observation measures.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricType {
    /// Residents per square kilometre.
    PopulationDensity,
    /// Road/transit connectivity score.
    InfrastructureAccess,
    /// Pollutant concentration (PM2.5 equivalent).
    AirQuality,
    /// Accumulated rainfall.
    Rainfall,
    /// Built-up land cover fraction.
    LandCover,
    /// Distance to the nearest essential resource (food, clinic, water).
    ResourceDistance,
    /// Housing pressure derived from night-time lights.
    HousingPressure,
    /// Land surface temperature.
    SurfaceTemperature,
    /// Terrain elevation above the local datum.
    Elevation,
    /// Storm drainage capacity.
    DrainageCapacity,
}

impl MetricType {
    /// Display unit used in layer descriptors and detail panels.
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::PopulationDensity => "people/km²",
            Self::InfrastructureAccess | Self::HousingPressure => "score",
            Self::AirQuality => "µg/m³",
            Self::Rainfall => "mm",
            Self::LandCover => "fraction",
            Self::ResourceDistance => "km",
            Self::SurfaceTemperature => "°C",
            Self::Elevation => "m",
            Self::DrainageCapacity => "mm/h",
        }
    }

    /// Default normalization ceiling: `min(value / reference_max, 1)`.
    #[must_use]
    pub const fn default_reference_max(self) -> f64 {
        match self {
            Self::PopulationDensity => 50_000.0,
            Self::InfrastructureAccess
            | Self::LandCover
            | Self::HousingPressure => 1.0,
            Self::AirQuality => 150.0,
            Self::Rainfall => 300.0,
            Self::ResourceDistance => 8.0,
            Self::SurfaceTemperature | Self::Elevation => 50.0,
            Self::DrainageCapacity => 100.0,
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::PopulationDensity,
            Self::InfrastructureAccess,
            Self::AirQuality,
            Self::Rainfall,
            Self::LandCover,
            Self::ResourceDistance,
            Self::HousingPressure,
            Self::SurfaceTemperature,
            Self::Elevation,
            Self::DrainageCapacity,
        ]
    }
}

/// An observation as delivered by a source, before validation.
///
/// Numeric fields are optional and the metric is free text so that a
/// malformed record still deserializes and can be reported individually
/// instead of failing the whole batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawObservation {
    /// Source-assigned identifier.
    #[serde(default)]
    pub id: String,
    /// Latitude (WGS84).
    pub lat: Option<f64>,
    /// Longitude (WGS84).
    pub lon: Option<f64>,
    /// Metric name, e.g. `"rainfall"`.
    #[serde(default)]
    pub metric_type: String,
    /// Measured value in the metric's unit.
    pub value: Option<f64>,
    /// When the measurement was taken.
    pub timestamp: Option<DateTime<Utc>>,
    /// Name of the producing source.
    #[serde(default)]
    pub source: String,
    /// Why a required field could not be decoded, set by lenient decoders.
    #[serde(skip)]
    pub decode_error: Option<String>,
}

impl RawObservation {
    /// Convenience constructor for a fully-populated record.
    #[must_use]
    pub fn new(id: impl Into<String>, lat: f64, lon: f64, metric: MetricType, value: f64) -> Self {
        Self {
            id: id.into(),
            lat: Some(lat),
            lon: Some(lon),
            metric_type: metric.to_string(),
            value: Some(value),
            timestamp: None,
            source: String::new(),
            decode_error: None,
        }
    }

    /// Returns `(lat, lon, value)` when all three are present, finite, and
    /// the coordinates are valid WGS84.
    ///
    /// # Errors
    ///
    /// Returns a description of the first defect found.
    pub fn numeric_fields(&self) -> Result<(f64, f64, f64), String> {
        if let Some(defect) = &self.decode_error {
            return Err(defect.clone());
        }
        let lat = finite(self.lat, "lat")?;
        let lon = finite(self.lon, "lon")?;
        let value = finite(self.value, "value")?;

        if !(-90.0..=90.0).contains(&lat) {
            return Err(format!("lat {lat} outside [-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(format!("lon {lon} outside [-180, 180]"));
        }

        Ok((lat, lon, value))
    }
}

fn finite(field: Option<f64>, name: &str) -> Result<f64, String> {
    match field {
        None => Err(format!("missing {name}")),
        Some(v) if !v.is_finite() => Err(format!("non-finite {name}: {v}")),
        Some(v) => Ok(v),
    }
}

/// A validated observation, owned by the grid cell it was bucketed into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Source-assigned identifier. Re-ingesting an id replaces the record.
    pub id: String,
    /// Latitude (WGS84).
    pub lat: f64,
    /// Longitude (WGS84).
    pub lon: f64,
    /// What was measured.
    pub metric_type: MetricType,
    /// Measured value in [`MetricType::unit`].
    pub value: f64,
    /// When the measurement was taken, if the source reported it.
    pub timestamp: Option<DateTime<Utc>>,
    /// Name of the producing source.
    pub source: String,
}
