#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Observation ingestion into per-cell aggregates.
//!
//! An [`AggregateStore`] owns a [`GeoGrid`] and, for every cell, the
//! observations bucketed into it plus one [`CellAggregate`] per metric.
//! Records are validated in a fixed order (well-formed numbers, inside the
//! grid's box, recognized metric) and a bad record never aborts a batch:
//! [`AggregateStore::ingest_batch`] collects the errors and keeps going.

pub mod aggregate;

use std::collections::BTreeMap;

use climate_map_grid::{CellId, GeoGrid};
use climate_map_observation_models::{MetricType, Observation, RawObservation};
use serde::Serialize;

pub use aggregate::CellAggregate;

/// Per-record ingestion failures. None of these are fatal to a batch.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IngestError {
    /// Missing or non-numeric coordinates or value.
    #[error("malformed observation {id:?}: {reason}")]
    MalformedObservation {
        /// Observation id as reported by the source.
        id: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The point lies outside the grid's bounding box.
    #[error("observation {id:?} at ({lat}, {lon}) is outside the grid")]
    OutOfBounds {
        /// Observation id as reported by the source.
        id: String,
        /// Reported latitude.
        lat: f64,
        /// Reported longitude.
        lon: f64,
    },

    /// The metric name is not one of the recognized [`MetricType`]s.
    #[error("observation {id:?} has unknown metric {metric:?}")]
    UnknownMetric {
        /// Observation id as reported by the source.
        id: String,
        /// The unrecognized metric name.
        metric: String,
    },
}

/// Outcome of [`AggregateStore::ingest_batch`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Records bucketed into a cell.
    pub ingested: usize,
    /// Records rejected for any reason (one per entry in `errors`).
    pub skipped: usize,
    /// Of the skipped records, how many fell outside the box.
    pub out_of_bounds: usize,
    /// Every rejection, in input order.
    pub errors: Vec<IngestError>,
    /// Store data version after the batch.
    pub data_version: u64,
}

/// Everything bucketed into one cell.
#[derive(Debug, Clone, Default)]
struct CellBucket {
    observations: Vec<Observation>,
    aggregates: BTreeMap<MetricType, CellAggregate>,
}

impl CellBucket {
    fn rebuild(&mut self, metric: MetricType) {
        let agg = CellAggregate::from_values(
            self.observations
                .iter()
                .filter(|o| o.metric_type == metric)
                .map(|o| o.value),
        );
        if agg.is_empty() {
            self.aggregates.remove(&metric);
        } else {
            self.aggregates.insert(metric, agg);
        }
    }
}

/// Observations and aggregates for one gridded region.
#[derive(Debug, Clone)]
pub struct AggregateStore {
    grid: GeoGrid,
    cells: BTreeMap<CellId, CellBucket>,
    /// observation id -> owning cell
    locations: BTreeMap<String, CellId>,
    data_version: u64,
    next_anonymous_id: u64,
}

impl AggregateStore {
    #[must_use]
    pub const fn new(grid: GeoGrid) -> Self {
        Self {
            grid,
            cells: BTreeMap::new(),
            locations: BTreeMap::new(),
            data_version: 0,
            next_anonymous_id: 0,
        }
    }

    #[must_use]
    pub const fn grid(&self) -> &GeoGrid {
        &self.grid
    }

    /// Monotonic counter bumped on every change to the stored data.
    #[must_use]
    pub const fn data_version(&self) -> u64 {
        self.data_version
    }

    /// Total number of stored observations.
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.locations.len()
    }

    /// Validates one record and buckets it into its cell.
    ///
    /// Validation order: numeric fields, bounds, metric. Re-ingesting an id
    /// that is already stored is a correction: the old record is replaced
    /// and every affected aggregate is rebuilt.
    ///
    /// Does not bump the data version; see [`Self::ingest_batch`].
    ///
    /// # Errors
    ///
    /// Returns the first [`IngestError`] the record fails.
    pub fn ingest(&mut self, raw: &RawObservation) -> Result<CellId, IngestError> {
        let observation = self.validate(raw)?;
        let Some(cell) = self.grid.cell_for(observation.lat, observation.lon) else {
            // validate() already checked the box
            return Err(IngestError::OutOfBounds {
                id: observation.id,
                lat: observation.lat,
                lon: observation.lon,
            });
        };

        if self.locations.contains_key(&observation.id) {
            log::debug!("Correcting observation {:?}", observation.id);
            self.remove_entry(&observation.id);
            let bucket = self.cells.entry(cell.id).or_default();
            let metric = observation.metric_type;
            bucket.observations.push(observation.clone());
            bucket.rebuild(metric);
        } else {
            let bucket = self.cells.entry(cell.id).or_default();
            bucket
                .aggregates
                .entry(observation.metric_type)
                .or_default()
                .push(observation.value);
            bucket.observations.push(observation.clone());
        }

        self.locations.insert(observation.id, cell.id);
        Ok(cell.id)
    }

    /// Ingests every record, collecting per-record failures.
    ///
    /// The data version is bumped once if at least one record was stored.
    pub fn ingest_batch(&mut self, batch: &[RawObservation]) -> BatchReport {
        let mut report = BatchReport::default();

        for raw in batch {
            match self.ingest(raw) {
                Ok(_) => report.ingested += 1,
                Err(e) => {
                    log::debug!("Skipping record: {e}");
                    if matches!(e, IngestError::OutOfBounds { .. }) {
                        report.out_of_bounds += 1;
                    }
                    report.skipped += 1;
                    report.errors.push(e);
                }
            }
        }

        if report.ingested > 0 {
            self.data_version += 1;
        }
        report.data_version = self.data_version;

        if report.skipped > 0 {
            log::warn!(
                "Batch ingested {} of {} records ({} skipped, {} out of bounds)",
                report.ingested,
                batch.len(),
                report.skipped,
                report.out_of_bounds,
            );
        } else {
            log::debug!("Batch ingested {} records", report.ingested);
        }

        report
    }

    /// Removes an observation and rebuilds its cell's aggregate.
    pub fn remove(&mut self, id: &str) -> Option<Observation> {
        let removed = self.remove_entry(id)?;
        self.data_version += 1;
        Some(removed)
    }

    /// All aggregates for a cell, keyed by metric.
    #[must_use]
    pub fn aggregates(&self, cell: CellId) -> Option<&BTreeMap<MetricType, CellAggregate>> {
        self.cells.get(&cell).map(|b| &b.aggregates)
    }

    /// The aggregate for one metric in one cell.
    #[must_use]
    pub fn aggregate(&self, cell: CellId, metric: MetricType) -> Option<&CellAggregate> {
        self.cells.get(&cell)?.aggregates.get(&metric)
    }

    /// Observations bucketed into a cell.
    #[must_use]
    pub fn observations(&self, cell: CellId) -> &[Observation] {
        self.cells
            .get(&cell)
            .map_or(&[][..], |b| b.observations.as_slice())
    }

    /// Merges one metric's aggregates across every cell.
    #[must_use]
    pub fn regional_aggregate(&self, metric: MetricType) -> CellAggregate {
        self.cells
            .values()
            .filter_map(|b| b.aggregates.get(&metric))
            .fold(CellAggregate::default(), |acc, agg| acc.merge(agg))
    }

    fn validate(&mut self, raw: &RawObservation) -> Result<Observation, IngestError> {
        let (lat, lon, value) =
            raw.numeric_fields()
                .map_err(|reason| IngestError::MalformedObservation {
                    id: raw.id.clone(),
                    reason,
                })?;

        if !self.grid.bbox().contains(lat, lon) {
            return Err(IngestError::OutOfBounds {
                id: raw.id.clone(),
                lat,
                lon,
            });
        }

        let metric_type: MetricType =
            raw.metric_type
                .trim()
                .parse()
                .map_err(|_| IngestError::UnknownMetric {
                    id: raw.id.clone(),
                    metric: raw.metric_type.clone(),
                })?;

        let id = if raw.id.is_empty() {
            self.next_anonymous_id += 1;
            format!("anon-{}", self.next_anonymous_id)
        } else {
            raw.id.clone()
        };

        Ok(Observation {
            id,
            lat,
            lon,
            metric_type,
            value,
            timestamp: raw.timestamp,
            source: raw.source.clone(),
        })
    }

    fn remove_entry(&mut self, id: &str) -> Option<Observation> {
        let cell = self.locations.remove(id)?;
        let bucket = self.cells.get_mut(&cell)?;
        let idx = bucket.observations.iter().position(|o| o.id == id)?;
        let removed = bucket.observations.swap_remove(idx);
        bucket.rebuild(removed.metric_type);

        if bucket.observations.is_empty() {
            self.cells.remove(&cell);
        }

        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use climate_map_grid::{BoundingBox, Resolution};

    use super::*;

    fn store_2x2() -> AggregateStore {
        let grid = GeoGrid::build(
            BoundingBox::new(0.0, 0.0, 2.0, 2.0).unwrap(),
            Resolution::new(2, 2),
        )
        .unwrap();
        AggregateStore::new(grid)
    }

    fn pop(id: &str, lat: f64, lon: f64, value: f64) -> RawObservation {
        RawObservation::new(id, lat, lon, MetricType::PopulationDensity, value)
    }

    #[test]
    fn ingest_buckets_into_expected_cell() {
        let mut store = store_2x2();
        assert_eq!(store.ingest(&pop("a", 0.5, 0.5, 40_000.0)), Ok(CellId(0)));
        assert_eq!(store.ingest(&pop("b", 1.5, 1.5, 10_000.0)), Ok(CellId(3)));

        let agg = store
            .aggregate(CellId(0), MetricType::PopulationDensity)
            .unwrap();
        assert_eq!(agg.count, 1);
        assert!((agg.mean - 40_000.0).abs() < f64::EPSILON);
        assert!(store.aggregates(CellId(1)).is_none());
    }

    #[test]
    fn validation_order_is_malformed_then_bounds_then_metric() {
        let mut store = store_2x2();

        // Malformed and unknown metric: malformed wins.
        let mut raw = pop("m", 0.5, 0.5, 1.0);
        raw.value = None;
        raw.metric_type = "bogus".to_string();
        assert!(matches!(
            store.ingest(&raw),
            Err(IngestError::MalformedObservation { .. })
        ));

        // Out of bounds and unknown metric: bounds wins.
        let mut raw = pop("o", 5.0, 5.0, 1.0);
        raw.metric_type = "bogus".to_string();
        assert!(matches!(
            store.ingest(&raw),
            Err(IngestError::OutOfBounds { .. })
        ));

        let mut raw = pop("u", 0.5, 0.5, 1.0);
        raw.metric_type = "bogus".to_string();
        assert_eq!(
            store.ingest(&raw),
            Err(IngestError::UnknownMetric {
                id: "u".to_string(),
                metric: "bogus".to_string(),
            })
        );
    }

    #[test]
    fn batch_with_malformed_records_continues() {
        let mut store = store_2x2();
        let batch: Vec<RawObservation> = (0..100)
            .map(|i| {
                let mut raw = pop(&format!("obs-{i}"), 0.5, 1.5, f64::from(i));
                if i % 10 == 0 {
                    raw.lat = None;
                }
                raw
            })
            .collect();

        let report = store.ingest_batch(&batch);
        assert_eq!(report.ingested, 90);
        assert_eq!(report.skipped, 10);
        assert_eq!(report.errors.len(), 10);
        assert_eq!(report.out_of_bounds, 0);
        assert_eq!(report.data_version, 1);
        assert_eq!(store.observation_count(), 90);
    }

    #[test]
    fn out_of_bounds_counts_as_skipped() {
        let mut store = store_2x2();
        let report = store.ingest_batch(&[pop("in", 1.0, 1.0, 1.0), pop("out", 3.0, 1.0, 1.0)]);
        assert_eq!(report.ingested, 1);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.out_of_bounds, 1);
    }

    #[test]
    fn data_version_bumps_only_on_successful_batches() {
        let mut store = store_2x2();
        assert_eq!(store.data_version(), 0);

        let report = store.ingest_batch(&[pop("out", 9.0, 9.0, 1.0)]);
        assert_eq!(report.data_version, 0);

        store.ingest_batch(&[pop("a", 0.5, 0.5, 1.0), pop("b", 0.6, 0.6, 2.0)]);
        assert_eq!(store.data_version(), 1);

        store.remove("a");
        assert_eq!(store.data_version(), 2);
        assert!(store.remove("missing").is_none());
        assert_eq!(store.data_version(), 2);
    }

    #[test]
    fn correction_rebuilds_aggregate() {
        let mut store = store_2x2();
        store.ingest_batch(&[pop("a", 0.5, 0.5, 10.0), pop("b", 0.5, 0.5, 20.0)]);

        // Same id, new value and new cell.
        store.ingest_batch(&[pop("a", 1.5, 0.5, 100.0)]);

        let old = store
            .aggregate(CellId(0), MetricType::PopulationDensity)
            .unwrap();
        assert_eq!(old.count, 1);
        assert!((old.mean - 20.0).abs() < f64::EPSILON);

        let new = store
            .aggregate(CellId(2), MetricType::PopulationDensity)
            .unwrap();
        assert_eq!(new.count, 1);
        assert!((new.max - 100.0).abs() < f64::EPSILON);
        assert_eq!(store.observation_count(), 2);
    }

    #[test]
    fn removal_recomputes_min_and_max() {
        let mut store = store_2x2();
        store.ingest_batch(&[
            pop("a", 0.5, 0.5, 1.0),
            pop("b", 0.5, 0.5, 5.0),
            pop("c", 0.5, 0.5, 3.0),
        ]);

        let removed = store.remove("b").unwrap();
        assert!((removed.value - 5.0).abs() < f64::EPSILON);

        let agg = store
            .aggregate(CellId(0), MetricType::PopulationDensity)
            .unwrap();
        assert_eq!(agg.count, 2);
        assert!((agg.max - 3.0).abs() < f64::EPSILON);
        assert!((agg.mean - 2.0).abs() < f64::EPSILON);

        store.remove("a");
        store.remove("c");
        assert!(store.aggregates(CellId(0)).is_none());
    }

    #[test]
    fn anonymous_records_get_unique_ids() {
        let mut store = store_2x2();
        store.ingest_batch(&[pop("", 0.5, 0.5, 1.0), pop("", 0.5, 0.5, 2.0)]);
        assert_eq!(store.observation_count(), 2);
        assert_eq!(
            store
                .aggregate(CellId(0), MetricType::PopulationDensity)
                .unwrap()
                .count,
            2
        );
    }

    #[test]
    fn regional_aggregate_merges_cells() {
        let mut store = store_2x2();
        store.ingest_batch(&[
            pop("a", 0.5, 0.5, 10.0),
            pop("b", 1.5, 1.5, 30.0),
            pop("c", 1.5, 0.5, 20.0),
        ]);
        let regional = store.regional_aggregate(MetricType::PopulationDensity);
        assert_eq!(regional.count, 3);
        assert!((regional.mean - 20.0).abs() < 1e-12);
        assert_eq!(store.regional_aggregate(MetricType::Rainfall).count, 0);
    }
}
