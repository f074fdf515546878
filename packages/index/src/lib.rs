#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Derived per-cell indices.
//!
//! The formulas in [`formulas`] are pure arithmetic over normalized inputs.
//! [`IndexCalculator`] feeds them from an [`climate_map_ingest::AggregateStore`],
//! applying the missing-data policy (regional mean, then a neutral 0.5) and
//! the neighbour smoothing used for heat intensity. Nothing here mutates the
//! store, so identical aggregates always produce bit-identical indices.

pub mod calculator;
pub mod field;
pub mod formulas;
pub mod regional;

use std::collections::BTreeMap;

use climate_map_observation_models::MetricType;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use calculator::{CellIndices, IndexCalculator, InputBasis, recommendations};
pub use field::{FieldValue, LayerMetric, ParseLayerMetricError, ValueField};
pub use formulas::OpportunitySubScores;
pub use regional::RegionalStats;

/// Derived quantities that can be requested as a layer.
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
pub enum IndexName {
    OpportunityScore,
    HeatIntensity,
    /// Rendered through the combined flood index, not the category.
    FloodRisk,
    PollutionExposure,
}

impl IndexName {
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::OpportunityScore => "score",
            Self::HeatIntensity | Self::FloodRisk | Self::PollutionExposure => "index",
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::OpportunityScore,
            Self::HeatIntensity,
            Self::FloodRisk,
            Self::PollutionExposure,
        ]
    }
}

/// Lower bound (inclusive) of the `high` band for both categorical indices.
pub const HIGH_THRESHOLD: f64 = 0.7;

/// Lower bound (inclusive) of the `medium` band for both categorical indices.
pub const MEDIUM_THRESHOLD: f64 = 0.4;

/// Flood risk thresholded from the combined flood index.
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
pub enum FloodRiskCategory {
    Low,
    Medium,
    High,
}

impl FloodRiskCategory {
    /// `high` if `combined >= 0.7`, `medium` if `>= 0.4`, else `low`.
    #[must_use]
    pub fn from_index(combined: f64) -> Self {
        if combined >= HIGH_THRESHOLD {
            Self::High
        } else if combined >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Opportunity banding, same thresholds as [`FloodRiskCategory`].
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
pub enum OpportunityCategory {
    Low,
    Medium,
    High,
}

impl OpportunityCategory {
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= HIGH_THRESHOLD {
            Self::High
        } else if score >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Default minimum temperature samples for a cell to stand on its own.
pub const DEFAULT_MIN_CELL_SAMPLES: u64 = 3;

/// Default minimum regional samples before the standard deviation is trusted.
pub const DEFAULT_MIN_REGIONAL_SAMPLES: u64 = 5;

/// Default heat spread (°C) when the regional deviation is unusable.
pub const DEFAULT_HEAT_SPREAD_FALLBACK: f64 = 5.0;

/// Tuning for [`IndexCalculator`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexConfig {
    /// Per-metric normalization ceilings. Metrics absent here use
    /// [`MetricType::default_reference_max`].
    pub reference_max: BTreeMap<MetricType, f64>,
    pub min_cell_samples: u64,
    pub min_regional_samples: u64,
    pub heat_spread_fallback: f64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            reference_max: BTreeMap::new(),
            min_cell_samples: DEFAULT_MIN_CELL_SAMPLES,
            min_regional_samples: DEFAULT_MIN_REGIONAL_SAMPLES,
            heat_spread_fallback: DEFAULT_HEAT_SPREAD_FALLBACK,
        }
    }
}

impl IndexConfig {
    /// Normalization ceiling for `metric`.
    #[must_use]
    pub fn reference_max(&self, metric: MetricType) -> f64 {
        self.reference_max
            .get(&metric)
            .copied()
            .unwrap_or_else(|| metric.default_reference_max())
    }
}
