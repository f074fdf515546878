//! Per-cell value fields: the input the layer emitters render.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use climate_map_grid::CellId;
use climate_map_observation_models::MetricType;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::IndexName;

const RAW_PREFIX: &str = "raw:";

/// What a layer shows: a derived index or a raw metric's cell mean.
///
/// Written as the index name (`"heat_intensity"`) or `raw:` followed by a
/// metric name (`"raw:rainfall"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LayerMetric {
    Index(IndexName),
    Raw(MetricType),
}

impl LayerMetric {
    #[must_use]
    pub const fn unit(self) -> &'static str {
        match self {
            Self::Index(index) => index.unit(),
            Self::Raw(metric) => metric.unit(),
        }
    }
}

impl fmt::Display for LayerMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(index) => write!(f, "{index}"),
            Self::Raw(metric) => write!(f, "{RAW_PREFIX}{metric}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown layer metric {0:?}")]
pub struct ParseLayerMetricError(pub String);

impl FromStr for LayerMetric {
    type Err = ParseLayerMetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unknown = || ParseLayerMetricError(s.to_string());
        s.strip_prefix(RAW_PREFIX).map_or_else(
            || s.parse().map(Self::Index).map_err(|_| unknown()),
            |metric| metric.parse().map(Self::Raw).map_err(|_| unknown()),
        )
    }
}

impl Serialize for LayerMetric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for LayerMetric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One cell's value in a field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValue {
    /// Value in the field's unit.
    pub value: f64,
    /// Value mapped to `[0, 1]`.
    pub normalized: f64,
}

/// Values of one [`LayerMetric`] for every cell that has one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueField {
    metric: LayerMetric,
    values: BTreeMap<CellId, FieldValue>,
}

impl ValueField {
    #[must_use]
    pub const fn new(metric: LayerMetric, values: BTreeMap<CellId, FieldValue>) -> Self {
        Self { metric, values }
    }

    #[must_use]
    pub const fn metric(&self) -> LayerMetric {
        self.metric
    }

    #[must_use]
    pub const fn unit(&self) -> &'static str {
        self.metric.unit()
    }

    #[must_use]
    pub fn get(&self, cell: CellId) -> Option<FieldValue> {
        self.values.get(&cell).copied()
    }

    /// Cells in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, FieldValue)> + '_ {
        self.values.iter().map(|(id, v)| (*id, *v))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
