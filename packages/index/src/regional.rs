//! Region-wide statistics per metric, merged from cell aggregates.

use std::collections::BTreeMap;

use climate_map_ingest::{AggregateStore, CellAggregate};
use climate_map_observation_models::MetricType;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionalStats {
    by_metric: BTreeMap<MetricType, CellAggregate>,
}

impl RegionalStats {
    /// Merges every cell's aggregate for every metric.
    #[must_use]
    pub fn from_store(store: &AggregateStore) -> Self {
        let by_metric = MetricType::all()
            .iter()
            .map(|&metric| (metric, store.regional_aggregate(metric)))
            .filter(|(_, agg)| !agg.is_empty())
            .collect();
        Self { by_metric }
    }

    #[must_use]
    pub fn get(&self, metric: MetricType) -> Option<&CellAggregate> {
        self.by_metric.get(&metric)
    }

    /// Regional mean, `None` when the region has no observations of `metric`.
    #[must_use]
    pub fn mean(&self, metric: MetricType) -> Option<f64> {
        self.get(metric).map(|agg| agg.mean)
    }

    #[must_use]
    pub fn std_dev(&self, metric: MetricType) -> Option<f64> {
        self.get(metric).and_then(CellAggregate::std_dev)
    }

    #[must_use]
    pub fn count(&self, metric: MetricType) -> u64 {
        self.get(metric).map_or(0, |agg| agg.count)
    }
}
