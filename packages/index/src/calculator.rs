//! Per-cell index computation over an [`AggregateStore`].

use std::collections::BTreeMap;

use climate_map_grid::CellId;
use climate_map_ingest::{AggregateStore, CellAggregate};
use climate_map_observation_models::MetricType;
use serde::Serialize;

use crate::field::{FieldValue, LayerMetric, ValueField};
use crate::formulas::{self, OpportunitySubScores};
use crate::regional::RegionalStats;
use crate::{FloodRiskCategory, IndexConfig, IndexName, OpportunityCategory};

/// Normalized input used for cells (or regions) without observations.
pub const NEUTRAL_INPUT: f64 = 0.5;

/// Threshold below which an opportunity sub-score or index counts as poor.
const POOR_THRESHOLD: f64 = 0.4;

/// Threshold at or above which heat and pollution trigger an advisory.
const SEVERE_THRESHOLD: f64 = 0.7;

/// Where a cell's input for a metric came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InputBasis {
    /// The cell's own observations.
    Observed,
    /// The cell had none; the regional mean was substituted.
    RegionalMean,
    /// The region had none; a neutral `0.5` was substituted.
    Neutral,
}

/// A normalized input with its provenance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Input {
    pub normalized: f64,
    pub basis: InputBasis,
}

/// Every index for one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellIndices {
    pub opportunity_score: f64,
    pub opportunity_category: OpportunityCategory,
    pub sub_scores: OpportunitySubScores,
    pub heat_intensity: f64,
    /// Combined flood index behind `flood_risk`.
    pub flood_index: f64,
    pub flood_risk: FloodRiskCategory,
    pub pollution_exposure: f64,
    /// Inputs that were not observed in the cell.
    pub imputed: BTreeMap<MetricType, InputBasis>,
}

/// Computes indices from a read-only view of a region's aggregates.
///
/// Regional statistics are merged once at construction; every other method
/// is a pure function of the store and the config.
#[derive(Debug)]
pub struct IndexCalculator<'a> {
    store: &'a AggregateStore,
    config: &'a IndexConfig,
    regional: RegionalStats,
}

impl<'a> IndexCalculator<'a> {
    #[must_use]
    pub fn new(store: &'a AggregateStore, config: &'a IndexConfig) -> Self {
        Self {
            store,
            config,
            regional: RegionalStats::from_store(store),
        }
    }

    #[must_use]
    pub const fn regional(&self) -> &RegionalStats {
        &self.regional
    }

    /// The cell's normalized input for `metric`, applying the missing-data
    /// policy: cell mean, else regional mean, else neutral.
    #[must_use]
    pub fn input(&self, cell: CellId, metric: MetricType) -> Input {
        let reference_max = self.config.reference_max(metric);

        if let Some(agg) = self.store.aggregate(cell, metric) {
            return Input {
                normalized: formulas::normalize(agg.mean, reference_max),
                basis: InputBasis::Observed,
            };
        }

        self.regional.mean(metric).map_or(
            Input {
                normalized: NEUTRAL_INPUT,
                basis: InputBasis::Neutral,
            },
            |mean| Input {
                normalized: formulas::normalize(mean, reference_max),
                basis: InputBasis::RegionalMean,
            },
        )
    }

    #[must_use]
    pub fn opportunity_sub_scores(&self, cell: CellId) -> OpportunitySubScores {
        OpportunitySubScores {
            population_score: self.input(cell, MetricType::PopulationDensity).normalized,
            distance_score: 1.0 - self.input(cell, MetricType::ResourceDistance).normalized,
            infra_score: self.input(cell, MetricType::InfrastructureAccess).normalized,
            housing_score: 1.0 - self.input(cell, MetricType::HousingPressure).normalized,
        }
    }

    #[must_use]
    pub fn opportunity_score(&self, cell: CellId) -> f64 {
        formulas::opportunity_score(&self.opportunity_sub_scores(cell))
    }

    /// Surface temperature relative to the regional baseline.
    ///
    /// Zero when the region has no temperature observations. Cells with
    /// fewer than `min_cell_samples` observations use their radius-1
    /// neighbourhood instead of their own mean.
    #[must_use]
    pub fn heat_intensity(&self, cell: CellId) -> f64 {
        let Some(baseline) = self.regional.mean(MetricType::SurfaceTemperature) else {
            return 0.0;
        };
        let cell_mean = self.smoothed_temperature(cell).unwrap_or(baseline);
        formulas::heat_intensity(cell_mean, baseline, self.heat_spread())
    }

    /// Regional standard deviation if enough samples back it, else the
    /// configured fallback.
    #[must_use]
    pub fn heat_spread(&self) -> f64 {
        let metric = MetricType::SurfaceTemperature;
        match self.regional.std_dev(metric) {
            Some(std)
                if std > 0.0 && self.regional.count(metric) >= self.config.min_regional_samples =>
            {
                std
            }
            _ => self.config.heat_spread_fallback,
        }
    }

    fn smoothed_temperature(&self, cell: CellId) -> Option<f64> {
        let metric = MetricType::SurfaceTemperature;

        if let Some(own) = self
            .store
            .aggregate(cell, metric)
            .filter(|agg| agg.count >= self.config.min_cell_samples)
        {
            return Some(own.mean);
        }

        let pooled = self
            .store
            .grid()
            .neighbors_of(cell, 1)
            .iter()
            .filter_map(|c| self.store.aggregate(c.id, metric))
            .fold(CellAggregate::default(), |acc, agg| acc.merge(agg));

        (!pooled.is_empty()).then_some(pooled.mean)
    }

    #[must_use]
    pub fn flood_index(&self, cell: CellId) -> f64 {
        formulas::flood_index(
            self.input(cell, MetricType::Rainfall).normalized,
            self.input(cell, MetricType::Elevation).normalized,
            self.input(cell, MetricType::DrainageCapacity).normalized,
        )
    }

    #[must_use]
    pub fn flood_risk(&self, cell: CellId) -> FloodRiskCategory {
        FloodRiskCategory::from_index(self.flood_index(cell))
    }

    #[must_use]
    pub fn pollution_exposure(&self, cell: CellId) -> f64 {
        formulas::pollution_exposure(
            self.input(cell, MetricType::AirQuality).normalized,
            self.input(cell, MetricType::PopulationDensity).normalized,
        )
    }

    /// Numeric value of `index`; flood risk yields its combined index.
    #[must_use]
    pub fn index_value(&self, cell: CellId, index: IndexName) -> f64 {
        match index {
            IndexName::OpportunityScore => self.opportunity_score(cell),
            IndexName::HeatIntensity => self.heat_intensity(cell),
            IndexName::FloodRisk => self.flood_index(cell),
            IndexName::PollutionExposure => self.pollution_exposure(cell),
        }
    }

    #[must_use]
    pub fn cell_indices(&self, cell: CellId) -> CellIndices {
        let sub_scores = self.opportunity_sub_scores(cell);
        let opportunity_score = formulas::opportunity_score(&sub_scores);
        let flood_index = self.flood_index(cell);

        let imputed = [
            MetricType::PopulationDensity,
            MetricType::ResourceDistance,
            MetricType::InfrastructureAccess,
            MetricType::HousingPressure,
            MetricType::AirQuality,
            MetricType::Rainfall,
            MetricType::Elevation,
            MetricType::DrainageCapacity,
        ]
        .into_iter()
        .map(|metric| (metric, self.input(cell, metric).basis))
        .filter(|(_, basis)| *basis != InputBasis::Observed)
        .collect();

        CellIndices {
            opportunity_score,
            opportunity_category: OpportunityCategory::from_score(opportunity_score),
            sub_scores,
            heat_intensity: self.heat_intensity(cell),
            flood_index,
            flood_risk: FloodRiskCategory::from_index(flood_index),
            pollution_exposure: self.pollution_exposure(cell),
            imputed,
        }
    }

    /// Values of `metric` across the grid.
    ///
    /// Index fields cover every cell. Raw fields cover only cells with
    /// observations, holding the cell mean and its normalized value.
    #[must_use]
    pub fn field(&self, metric: LayerMetric) -> ValueField {
        let values: BTreeMap<CellId, FieldValue> = match metric {
            LayerMetric::Index(index) => self
                .store
                .grid()
                .cells()
                .map(|cell| {
                    let value = self.index_value(cell.id, index);
                    (
                        cell.id,
                        FieldValue {
                            value,
                            normalized: formulas::clamp_unit(value),
                        },
                    )
                })
                .collect(),
            LayerMetric::Raw(raw) => {
                let reference_max = self.config.reference_max(raw);
                self.store
                    .grid()
                    .cells()
                    .filter_map(|cell| {
                        self.store.aggregate(cell.id, raw).map(|agg| {
                            (
                                cell.id,
                                FieldValue {
                                    value: agg.mean,
                                    normalized: formulas::normalize(agg.mean, reference_max),
                                },
                            )
                        })
                    })
                    .collect()
            }
        };

        log::debug!("Computed {metric} over {} cells", values.len());
        ValueField::new(metric, values)
    }
}

/// Planning recommendations for a cell, most specific first.
#[must_use]
pub fn recommendations(indices: &CellIndices) -> Vec<String> {
    let sub = &indices.sub_scores;
    let mut recs = Vec::new();

    if sub.distance_score < POOR_THRESHOLD {
        recs.push("Establish community food markets within 3km radius".to_string());
    }
    if sub.infra_score < POOR_THRESHOLD {
        recs.push("Improve road connectivity and public transport routes".to_string());
    }
    if 1.0 - sub.housing_score > SEVERE_THRESHOLD {
        recs.push("Develop affordable housing projects to reduce density pressure".to_string());
    }
    if indices.opportunity_score < POOR_THRESHOLD {
        recs.push("Priority zone for integrated development intervention".to_string());
    }
    if indices.heat_intensity >= SEVERE_THRESHOLD {
        recs.push("Expand tree canopy and cool roofs to mitigate urban heat".to_string());
    }
    if indices.flood_risk == FloodRiskCategory::High {
        recs.push("Upgrade drainage and restrict construction in flood-prone ground".to_string());
    }
    if indices.pollution_exposure >= SEVERE_THRESHOLD {
        recs.push("Add green buffers and emission controls near dense housing".to_string());
    }

    recs
}
