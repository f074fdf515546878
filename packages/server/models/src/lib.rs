#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the climate map server.
//!
//! Region, layer, and cell payloads are the engine's own serializable
//! types; this crate only holds the envelopes specific to HTTP.

use climate_map_overlay_cache::CacheStats;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Health check response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the server is healthy.
    pub healthy: bool,
    /// Server version.
    pub version: String,
    /// Overlay cache counters.
    pub cache: CacheStats,
}

/// Body of every non-2xx JSON response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
}

impl ApiError {
    #[must_use]
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

/// How a layer is encoded in the response.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LayerFormat {
    /// The layer descriptor as-is.
    #[default]
    Descriptor,
    /// A `GeoJSON` `FeatureCollection`.
    Geojson,
}

/// Query parameters for the layer endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerQueryParams {
    #[serde(default)]
    pub format: LayerFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_format_defaults_to_descriptor() {
        let params: LayerQueryParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.format, LayerFormat::Descriptor);

        let params: LayerQueryParams = serde_json::from_str(r#"{"format":"geojson"}"#).unwrap();
        assert_eq!(params.format, LayerFormat::Geojson);
    }

    #[test]
    fn layer_format_parses_from_str() {
        assert_eq!("geojson".parse::<LayerFormat>(), Ok(LayerFormat::Geojson));
        assert_eq!(LayerFormat::Descriptor.as_ref(), "descriptor");
        assert!("kml".parse::<LayerFormat>().is_err());
    }

    #[test]
    fn health_serializes_cache_stats() {
        let json = serde_json::to_value(ApiHealth {
            healthy: true,
            version: "0.1.0".to_string(),
            cache: CacheStats::default(),
        })
        .unwrap();
        assert_eq!(json["cache"]["inFlight"], 0);
    }
}
