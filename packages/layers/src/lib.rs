#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Renderer-agnostic layer descriptors.
//!
//! The emitters in [`emit`] turn a [`ValueField`] into a [`LayerDescriptor`]:
//! a list of `GeoJSON` geometries with a value and a `[0, 1]` weight each,
//! plus a color (choropleth) or height (extrusion) where relevant. They never
//! recompute indices, only reshape them.

pub mod color;
pub mod emit;

use chrono::{DateTime, Utc};
use climate_map_grid::CellId;
use climate_map_index::{LayerMetric, ValueField};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use color::{ColorScale, ColorStop};
pub use emit::{LayerStyle, emit, emit_choropleth, emit_extrusion, emit_heatmap, emit_point};

/// Errors raised while building a layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayerError {
    /// Color stops not strictly ascending or not covering `[0, 1]`.
    #[error("invalid color scale: {reason}")]
    InvalidColorScale {
        /// What is wrong with the scale.
        reason: String,
    },

    /// Extrusion scale or ceiling negative or non-finite.
    #[error("invalid height scale: {reason}")]
    InvalidHeightScale {
        /// What is wrong with the scale.
        reason: String,
    },
}

/// How a layer is meant to be drawn.
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
pub enum LayerType {
    /// Cell centres weighted relative to the strongest cell.
    Heatmap,
    /// Cell polygons colored by bucket.
    Choropleth,
    /// Cell polygons with a height.
    Extrusion,
    /// Cell centres with their value.
    Point,
}

impl LayerType {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Heatmap, Self::Choropleth, Self::Extrusion, Self::Point]
    }
}

/// One drawable cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub cell_id: CellId,
    /// A `Point` (heatmap, point) or `Polygon` (choropleth, extrusion).
    pub geometry: geojson::Geometry,
    /// Value in the layer's unit.
    pub value: f64,
    pub normalized_weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// A complete layer, ready to hand to a renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LayerDescriptor {
    pub layer_type: LayerType,
    pub metric: LayerMetric,
    pub unit: String,
    pub generated_at: DateTime<Utc>,
    pub features: Vec<Feature>,
}

impl LayerDescriptor {
    fn from_field(layer_type: LayerType, field: &ValueField, features: Vec<Feature>) -> Self {
        Self {
            layer_type,
            metric: field.metric(),
            unit: field.unit().to_string(),
            generated_at: Utc::now(),
            features,
        }
    }

    /// A layer with no features, served when the real one cannot be built.
    #[must_use]
    pub fn empty(layer_type: LayerType, metric: LayerMetric) -> Self {
        Self {
            layer_type,
            metric,
            unit: metric.unit().to_string(),
            generated_at: Utc::now(),
            features: Vec::new(),
        }
    }

    /// The layer as a `GeoJSON` `FeatureCollection`, with value, weight,
    /// color and height in each feature's properties.
    #[must_use]
    pub fn to_feature_collection(&self) -> geojson::FeatureCollection {
        let features = self
            .features
            .iter()
            .map(|feature| {
                let mut properties = geojson::JsonObject::new();
                properties.insert("value".to_string(), feature.value.into());
                properties.insert(
                    "normalizedWeight".to_string(),
                    feature.normalized_weight.into(),
                );
                if let Some(color) = &feature.color {
                    properties.insert("color".to_string(), color.clone().into());
                }
                if let Some(height) = feature.height {
                    properties.insert("height".to_string(), height.into());
                }

                geojson::Feature {
                    bbox: None,
                    geometry: Some(feature.geometry.clone()),
                    id: Some(geojson::feature::Id::Number(feature.cell_id.0.into())),
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();

        geojson::FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}
