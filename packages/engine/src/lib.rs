#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The query boundary of the climate map.
//!
//! An [`Engine`] owns one [`AggregateStore`] per configured region. Each
//! store is held as an immutable `Arc` snapshot: readers clone the `Arc`
//! and work on it without holding any lock, and every mutation swaps in
//! a new snapshot with a bumped data version. Layers are served through an
//! [`OverlayCache`] keyed by that version, so a cached layer never
//! outlives the data it was built from.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use climate_map_config::{Config, ConfigError, RegionConfig};
use climate_map_grid::{BoundingBox, Cell, CellId, GeoGrid, GridError, Resolution};
use climate_map_index::{
    CellIndices, FloodRiskCategory, HIGH_THRESHOLD, IndexCalculator, IndexConfig, LayerMetric,
    recommendations,
};
use climate_map_ingest::{AggregateStore, BatchReport, CellAggregate};
use climate_map_layers::{LayerDescriptor, LayerStyle, LayerType, emit};
use climate_map_observation_models::{MetricType, Observation, RawObservation};
use climate_map_overlay_cache::{CacheStats, OverlayCache, OverlayError, OverlayKey};
use climate_map_source::http::HttpSource;
use climate_map_source::retry::RetryPolicy;
use climate_map_source::{ObservationSource, SourceError};
use serde::Serialize;

/// Errors returned by [`Engine`] operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No region with this id is registered.
    #[error("unknown region {0:?}")]
    UnknownRegion(String),

    /// A region with this id is already registered.
    #[error("region {0:?} is already registered")]
    DuplicateRegion(String),

    /// The cell id is outside the region's grid.
    #[error("region {region:?} has no cell {cell}")]
    UnknownCell {
        /// Region that was queried.
        region: String,
        /// Requested cell.
        cell: CellId,
    },

    /// The region has no `sourceUrl` to refresh from.
    #[error("region {0:?} has no configured source")]
    NoSource(String),

    /// The region's grid could not be built.
    #[error("region {region:?}: {source}")]
    Grid {
        /// Region being registered.
        region: String,
        /// Underlying grid error.
        source: GridError,
    },

    /// Fetching observations failed.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// Building a layer failed.
    #[error(transparent)]
    Overlay(#[from] OverlayError),

    /// The configuration could not be turned into engine settings.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// A region as listed by [`Engine::regions`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionSummary {
    pub id: String,
    pub name: String,
    pub bbox: BoundingBox,
    pub resolution: Resolution,
    pub cell_count: u32,
    pub data_version: u64,
    pub observation_count: usize,
    /// Whether [`Engine::refresh_configured`] has somewhere to fetch from.
    pub has_source: bool,
}

/// Aggregate statistics for one metric in a cell or across a region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSummary {
    pub unit: &'static str,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Population standard deviation.
    pub std_dev: f64,
}

impl MetricSummary {
    fn new(metric: MetricType, agg: &CellAggregate) -> Self {
        Self {
            unit: metric.unit(),
            count: agg.count,
            sum: agg.sum,
            min: agg.min,
            max: agg.max,
            mean: agg.mean,
            std_dev: agg.std_dev().unwrap_or(0.0),
        }
    }
}

/// Everything known about one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDetail {
    pub region_id: String,
    pub cell: Cell,
    pub data_version: u64,
    pub observation_count: usize,
    /// Observed metrics only.
    pub metrics: BTreeMap<MetricType, MetricSummary>,
    pub indices: CellIndices,
    pub recommendations: Vec<String>,
}

/// Region-wide dashboard figures.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub region_id: String,
    pub data_version: u64,
    pub cell_count: u32,
    pub observation_count: usize,
    /// Merged statistics of every observed metric.
    pub metrics: BTreeMap<MetricType, MetricSummary>,
    /// Regional mean surface temperature, if any was observed.
    pub mean_temperature: Option<f64>,
    /// Cells whose heat intensity is at least 0.7.
    pub heat_island_count: usize,
    /// Cells in the `high` flood risk category.
    pub flood_risk_area_count: usize,
    pub mean_pollution_exposure: f64,
    pub mean_opportunity_score: f64,
}

struct Region {
    config: RegionConfig,
    snapshot: RwLock<Arc<AggregateStore>>,
}

impl Region {
    fn snapshot(&self) -> Arc<AggregateStore> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Applies `f` to a private copy of the store unless nobody else holds
    /// the current snapshot, then publishes the result.
    fn update<T>(&self, f: impl FnOnce(&mut AggregateStore) -> T) -> T {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        f(Arc::make_mut(&mut *guard))
    }
}

/// Regions, index settings, layer styling, and the overlay cache.
pub struct Engine {
    regions: BTreeMap<String, Region>,
    index_config: Arc<IndexConfig>,
    style: Arc<LayerStyle>,
    cache: OverlayCache,
    retry: RetryPolicy,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("regions", &self.regions.keys().collect::<Vec<_>>())
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// An engine with no regions.
    #[must_use]
    pub fn new(
        index_config: IndexConfig,
        style: LayerStyle,
        cache: OverlayCache,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            regions: BTreeMap::new(),
            index_config: Arc::new(index_config),
            style: Arc::new(style),
            cache,
            retry,
        }
    }

    /// Builds an engine with every region in `config` registered.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Config`] for invalid settings,
    /// [`EngineError::Grid`] for a region whose grid cannot be built, and
    /// [`EngineError::DuplicateRegion`] for a repeated id.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let mut engine = Self::new(
            config.index_config()?,
            config.layer_style()?,
            OverlayCache::new(config.cache_capacity, config.cache_ttl()),
            config.retry_policy(),
        );
        for region in &config.regions {
            engine.add_region(region.clone(), config.resolution_for(region))?;
        }
        Ok(engine)
    }

    /// Registers a region with an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateRegion`] if the id is taken and
    /// [`EngineError::Grid`] if the grid cannot be built.
    pub fn add_region(
        &mut self,
        config: RegionConfig,
        resolution: Resolution,
    ) -> Result<(), EngineError> {
        if self.regions.contains_key(&config.id) {
            return Err(EngineError::DuplicateRegion(config.id));
        }
        let grid = GeoGrid::build(config.bbox, resolution).map_err(|source| EngineError::Grid {
            region: config.id.clone(),
            source,
        })?;

        log::info!(
            "Registered region {} ({}x{} cells)",
            config.id,
            resolution.rows,
            resolution.cols
        );
        self.regions.insert(
            config.id.clone(),
            Region {
                config,
                snapshot: RwLock::new(Arc::new(AggregateStore::new(grid))),
            },
        );
        Ok(())
    }

    fn region(&self, region_id: &str) -> Result<&Region, EngineError> {
        self.regions
            .get(region_id)
            .ok_or_else(|| EngineError::UnknownRegion(region_id.to_string()))
    }

    #[must_use]
    pub fn has_region(&self, region_id: &str) -> bool {
        self.regions.contains_key(region_id)
    }

    /// All registered regions, ordered by id.
    #[must_use]
    pub fn regions(&self) -> Vec<RegionSummary> {
        self.regions
            .values()
            .map(|region| {
                let store = region.snapshot();
                let grid = store.grid();
                RegionSummary {
                    id: region.config.id.clone(),
                    name: region.config.name.clone(),
                    bbox: *grid.bbox(),
                    resolution: grid.resolution(),
                    cell_count: grid.cell_count(),
                    data_version: store.data_version(),
                    observation_count: store.observation_count(),
                    has_source: region.config.source_url.is_some(),
                }
            })
            .collect()
    }

    /// The region's current store. Later mutations do not affect it.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRegion`].
    pub fn snapshot(&self, region_id: &str) -> Result<Arc<AggregateStore>, EngineError> {
        Ok(self.region(region_id)?.snapshot())
    }

    /// Ingests a batch into a region and drops cached layers built from
    /// older data.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRegion`]. Bad records are reported in
    /// the [`BatchReport`], not as errors.
    pub fn ingest(
        &self,
        region_id: &str,
        batch: &[RawObservation],
    ) -> Result<BatchReport, EngineError> {
        let region = self.region(region_id)?;
        let report = region.update(|store| store.ingest_batch(batch));
        self.cache.observe_version(region_id, report.data_version);

        log::info!(
            "Ingested {} of {} records into {region_id} (data version {})",
            report.ingested,
            batch.len(),
            report.data_version
        );
        Ok(report)
    }

    /// Removes one observation from a region.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRegion`].
    pub fn remove_observation(
        &self,
        region_id: &str,
        observation_id: &str,
    ) -> Result<Option<Observation>, EngineError> {
        let region = self.region(region_id)?;
        let (removed, data_version) = region.update(|store| {
            let removed = store.remove(observation_id);
            (removed, store.data_version())
        });

        if removed.is_some() {
            log::info!("Removed observation {observation_id:?} from {region_id}");
            self.cache.observe_version(region_id, data_version);
        }
        Ok(removed)
    }

    /// Fetches one batch from `source` and ingests it.
    ///
    /// Retrying is up to the source; [`HttpSource`] retries transient
    /// failures with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRegion`] before fetching, or
    /// [`EngineError::Source`] if the fetch fails. A failed fetch leaves the
    /// store untouched.
    pub async fn refresh(
        &self,
        region_id: &str,
        source: &dyn ObservationSource,
    ) -> Result<BatchReport, EngineError> {
        self.region(region_id)?;

        let batch = source.fetch().await.inspect_err(|e| {
            log::error!("Source {} failed for {region_id}: {e}", source.id());
        })?;
        log::debug!("Source {} returned {} records", source.id(), batch.len());

        self.ingest(region_id, &batch)
    }

    /// Refreshes a region from its configured `sourceUrl`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoSource`] when the region has no URL, and
    /// otherwise whatever [`Self::refresh`] returns.
    pub async fn refresh_configured(&self, region_id: &str) -> Result<BatchReport, EngineError> {
        let region = self.region(region_id)?;
        let Some(url) = region.config.source_url.clone() else {
            return Err(EngineError::NoSource(region_id.to_string()));
        };

        let source = HttpSource::new(region_id, url, self.retry);
        self.refresh(region_id, &source).await
    }

    /// Returns the layer for `metric` drawn as `layer_type`, computing it at
    /// most once per data version no matter how many callers ask at once.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRegion`] or [`EngineError::Overlay`].
    pub async fn get_layer(
        &self,
        region_id: &str,
        metric: LayerMetric,
        layer_type: LayerType,
    ) -> Result<Arc<LayerDescriptor>, EngineError> {
        let store = self.snapshot(region_id)?;
        let key = OverlayKey::new(region_id, metric, layer_type, store.data_version());
        let index_config = Arc::clone(&self.index_config);
        let style = Arc::clone(&self.style);

        let layer = self
            .cache
            .get_or_compute(key, move || async move {
                let field = IndexCalculator::new(&store, &index_config).field(metric);
                emit(layer_type, store.grid(), &field, &style).map_err(OverlayError::from)
            })
            .await?;
        Ok(layer)
    }

    /// Like [`Self::get_layer`], but any failure yields an empty layer so a
    /// map can keep rendering.
    pub async fn get_layer_or_empty(
        &self,
        region_id: &str,
        metric: LayerMetric,
        layer_type: LayerType,
    ) -> Arc<LayerDescriptor> {
        match self.get_layer(region_id, metric, layer_type).await {
            Ok(layer) => layer,
            Err(e) => {
                log::warn!("Serving empty {layer_type} layer for {region_id}/{metric}: {e}");
                Arc::new(LayerDescriptor::empty(layer_type, metric))
            }
        }
    }

    /// Aggregates, indices, and recommendations for one cell.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRegion`] or [`EngineError::UnknownCell`].
    pub fn get_cell_detail(
        &self,
        region_id: &str,
        cell_id: CellId,
    ) -> Result<CellDetail, EngineError> {
        let store = self.snapshot(region_id)?;
        let cell = store
            .grid()
            .cell(cell_id)
            .ok_or_else(|| EngineError::UnknownCell {
                region: region_id.to_string(),
                cell: cell_id,
            })?;

        let indices = IndexCalculator::new(&store, &self.index_config).cell_indices(cell_id);
        let metrics = store
            .aggregates(cell_id)
            .map(|aggs| {
                aggs.iter()
                    .map(|(metric, agg)| (*metric, MetricSummary::new(*metric, agg)))
                    .collect()
            })
            .unwrap_or_default();

        Ok(CellDetail {
            region_id: region_id.to_string(),
            cell,
            data_version: store.data_version(),
            observation_count: store.observations(cell_id).len(),
            metrics,
            recommendations: recommendations(&indices),
            indices,
        })
    }

    /// Regional statistics plus counts of heat islands and high flood risk
    /// cells, computed over the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownRegion`].
    pub fn region_summary(&self, region_id: &str) -> Result<AnalyticsSummary, EngineError> {
        let store = self.snapshot(region_id)?;
        let calc = IndexCalculator::new(&store, &self.index_config);

        let mut heat_island_count = 0;
        let mut flood_risk_area_count = 0;
        let mut pollution_total = 0.0;
        let mut opportunity_total = 0.0;
        for cell in store.grid().cells() {
            if calc.heat_intensity(cell.id) >= HIGH_THRESHOLD {
                heat_island_count += 1;
            }
            if calc.flood_risk(cell.id) == FloodRiskCategory::High {
                flood_risk_area_count += 1;
            }
            pollution_total += calc.pollution_exposure(cell.id);
            opportunity_total += calc.opportunity_score(cell.id);
        }
        let cell_count = store.grid().cell_count();

        let metrics = MetricType::all()
            .iter()
            .filter_map(|&metric| {
                calc.regional()
                    .get(metric)
                    .map(|agg| (metric, MetricSummary::new(metric, agg)))
            })
            .collect();

        Ok(AnalyticsSummary {
            region_id: region_id.to_string(),
            data_version: store.data_version(),
            cell_count,
            observation_count: store.observation_count(),
            metrics,
            mean_temperature: calc.regional().mean(MetricType::SurfaceTemperature),
            heat_island_count,
            flood_risk_area_count,
            mean_pollution_exposure: pollution_total / f64::from(cell_count),
            mean_opportunity_score: opportunity_total / f64::from(cell_count),
        })
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use climate_map_index::IndexName;
    use climate_map_source::static_source::StaticSource;

    use super::*;

    fn engine() -> Engine {
        Engine::from_config(&Config::default()).unwrap()
    }

    fn air(id: &str, lat: f64, lon: f64, value: f64) -> RawObservation {
        RawObservation::new(id, lat, lon, MetricType::AirQuality, value)
    }

    struct BrokenSource;

    #[async_trait]
    impl ObservationSource for BrokenSource {
        fn id(&self) -> &str {
            "broken"
        }

        async fn fetch(&self) -> Result<Vec<RawObservation>, SourceError> {
            Err(SourceError::Payload {
                message: "not an array".to_string(),
            })
        }
    }

    #[test]
    fn default_config_registers_dhaka() {
        let regions = engine().regions();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].id, "dhaka");
        assert_eq!(regions[0].cell_count, 100);
        assert_eq!(regions[0].data_version, 0);
        assert!(!regions[0].has_source);
    }

    #[test]
    fn duplicate_regions_are_rejected() {
        let mut engine = engine();
        let region = RegionConfig::dhaka().unwrap();
        assert!(matches!(
            engine.add_region(region, Resolution::new(5, 5)),
            Err(EngineError::DuplicateRegion(id)) if id == "dhaka"
        ));
    }

    #[test]
    fn unknown_region_is_an_error() {
        let engine = engine();
        assert!(matches!(
            engine.ingest("atlantis", &[]),
            Err(EngineError::UnknownRegion(_))
        ));
        assert!(matches!(
            engine.get_cell_detail("atlantis", CellId(0)),
            Err(EngineError::UnknownRegion(_))
        ));
    }

    #[test]
    fn snapshots_are_isolated_from_later_ingests() {
        let engine = engine();
        engine.ingest("dhaka", &[air("a", 23.71, 90.31, 50.0)]).unwrap();
        let before = engine.snapshot("dhaka").unwrap();

        let report = engine.ingest("dhaka", &[air("b", 23.89, 90.49, 90.0)]).unwrap();
        assert_eq!(report.data_version, 2);

        assert_eq!(before.data_version(), 1);
        assert_eq!(before.observation_count(), 1);
        assert_eq!(engine.snapshot("dhaka").unwrap().observation_count(), 2);
    }

    #[test]
    fn ingest_reports_bad_records() {
        let engine = engine();
        let report = engine
            .ingest(
                "dhaka",
                &[air("in", 23.75, 90.35, 40.0), air("out", 10.0, 10.0, 40.0)],
            )
            .unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.out_of_bounds, 1);
        assert_eq!(engine.regions()[0].observation_count, 1);
    }

    #[tokio::test]
    async fn layers_are_cached_per_data_version() {
        let engine = engine();
        engine
            .ingest(
                "dhaka",
                &[air("a", 23.71, 90.31, 75.0), air("b", 23.89, 90.49, 300.0)],
            )
            .unwrap();
        let metric = LayerMetric::Raw(MetricType::AirQuality);

        let first = engine.get_layer("dhaka", metric, LayerType::Heatmap).await.unwrap();
        let second = engine.get_layer("dhaka", metric, LayerType::Heatmap).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.features.len(), 2);
        assert_eq!(engine.cache_stats().hits, 1);

        engine.ingest("dhaka", &[air("c", 23.81, 90.41, 150.0)]).unwrap();
        assert_eq!(engine.cache_stats().entries, 0);

        let third = engine.get_layer("dhaka", metric, LayerType::Heatmap).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(third.features.len(), 3);
    }

    #[tokio::test]
    async fn concurrent_requests_share_one_computation() {
        let engine = engine();
        engine.ingest("dhaka", &[air("a", 23.71, 90.31, 75.0)]).unwrap();
        let metric = LayerMetric::Index(IndexName::PollutionExposure);

        let (a, b) = tokio::join!(
            engine.get_layer("dhaka", metric, LayerType::Choropleth),
            engine.get_layer("dhaka", metric, LayerType::Choropleth),
        );
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));

        let stats = engine.cache_stats();
        assert_eq!(stats.coalesced, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn index_layers_cover_every_cell() {
        let engine = engine();
        let layer = engine
            .get_layer(
                "dhaka",
                LayerMetric::Index(IndexName::OpportunityScore),
                LayerType::Extrusion,
            )
            .await
            .unwrap();
        assert_eq!(layer.features.len(), 100);
        assert!(layer.features.iter().all(|f| f.height.is_some()));
    }

    #[tokio::test]
    async fn failed_layers_degrade_to_empty() {
        let engine = engine();
        let metric = LayerMetric::Index(IndexName::FloodRisk);

        assert!(matches!(
            engine.get_layer("atlantis", metric, LayerType::Point).await,
            Err(EngineError::UnknownRegion(_))
        ));

        let layer = engine
            .get_layer_or_empty("atlantis", metric, LayerType::Point)
            .await;
        assert!(layer.features.is_empty());
        assert_eq!(layer.layer_type, LayerType::Point);
        assert_eq!(layer.unit, "index");
    }

    #[test]
    fn cell_detail_combines_aggregates_and_indices() {
        let engine = engine();
        engine
            .ingest(
                "dhaka",
                &[
                    air("a", 23.71, 90.31, 40.0),
                    air("b", 23.712, 90.312, 60.0),
                    RawObservation::new("r", 23.715, 90.315, MetricType::Rainfall, 120.0),
                ],
            )
            .unwrap();

        let detail = engine.get_cell_detail("dhaka", CellId(0)).unwrap();
        assert_eq!(detail.observation_count, 3);
        assert_eq!(detail.data_version, 1);

        let air_quality = detail.metrics[&MetricType::AirQuality];
        assert_eq!(air_quality.count, 2);
        assert!((air_quality.mean - 50.0).abs() < 1e-12);
        assert!((air_quality.std_dev - 10.0).abs() < 1e-9);
        assert_eq!(air_quality.unit, MetricType::AirQuality.unit());
        assert!(!detail.metrics.contains_key(&MetricType::Elevation));

        let store = engine.snapshot("dhaka").unwrap();
        let config = IndexConfig::default();
        let expected = IndexCalculator::new(&store, &config).cell_indices(CellId(0));
        assert_eq!(detail.indices, expected);
        assert_eq!(detail.recommendations, recommendations(&expected));
    }

    #[test]
    fn cell_detail_rejects_cells_outside_the_grid() {
        let engine = engine();
        assert!(matches!(
            engine.get_cell_detail("dhaka", CellId(100)),
            Err(EngineError::UnknownCell { cell: CellId(100), .. })
        ));
    }

    #[test]
    fn removing_an_observation_bumps_the_version() {
        let engine = engine();
        engine.ingest("dhaka", &[air("a", 23.71, 90.31, 40.0)]).unwrap();

        assert!(engine.remove_observation("dhaka", "missing").unwrap().is_none());
        assert_eq!(engine.regions()[0].data_version, 1);

        let removed = engine.remove_observation("dhaka", "a").unwrap().unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(engine.regions()[0].data_version, 2);
        assert_eq!(engine.regions()[0].observation_count, 0);
    }

    fn reading(id: &str, lat: f64, lon: f64, metric: MetricType, value: f64) -> RawObservation {
        RawObservation::new(id, lat, lon, metric, value)
    }

    #[test]
    fn region_summary_counts_heat_islands_and_flood_areas() {
        let engine = engine();
        let mut batch = Vec::new();
        for i in 0..3 {
            // cell 0 runs hot, cell 99 cool
            batch.push(reading(&format!("hot{i}"), 23.71, 90.31, MetricType::SurfaceTemperature, 40.0));
            batch.push(reading(&format!("cool{i}"), 23.89, 90.49, MetricType::SurfaceTemperature, 20.0));
        }
        batch.push(reading("wet", 23.71, 90.31, MetricType::Rainfall, 300.0));
        batch.push(reading("dry", 23.89, 90.49, MetricType::Rainfall, 0.0));
        engine.ingest("dhaka", &batch).unwrap();

        let summary = engine.region_summary("dhaka").unwrap();
        assert_eq!(summary.cell_count, 100);
        assert_eq!(summary.observation_count, 8);
        assert!((summary.mean_temperature.unwrap() - 30.0).abs() < 1e-9);
        assert_eq!(summary.metrics[&MetricType::SurfaceTemperature].count, 6);
        assert_eq!(summary.metrics[&MetricType::Rainfall].count, 2);
        assert!(!summary.metrics.contains_key(&MetricType::AirQuality));

        // cell 0 and its three neighbours inherit the hot readings
        assert_eq!(summary.heat_island_count, 4);
        // only cell 0 pairs full rainfall with neutral elevation and drainage
        assert_eq!(summary.flood_risk_area_count, 1);
        assert!((summary.mean_pollution_exposure - 0.25).abs() < 1e-9);
        assert!((summary.mean_opportunity_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn region_summary_of_empty_region() {
        let summary = engine().region_summary("dhaka").unwrap();
        assert!(summary.metrics.is_empty());
        assert_eq!(summary.mean_temperature, None);
        assert_eq!(summary.heat_island_count, 0);
        assert!(matches!(
            engine().region_summary("atlantis"),
            Err(EngineError::UnknownRegion(_))
        ));
    }

    #[tokio::test]
    async fn refresh_ingests_the_fetched_batch() {
        let engine = engine();
        let source = StaticSource::new("fixture", vec![air("a", 23.71, 90.31, 40.0)]);

        let report = engine.refresh("dhaka", &source).await.unwrap();
        assert_eq!(report.ingested, 1);
        assert_eq!(report.data_version, 1);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_the_store_alone() {
        let engine = engine();
        assert!(matches!(
            engine.refresh("dhaka", &BrokenSource).await,
            Err(EngineError::Source(SourceError::Payload { .. }))
        ));
        assert_eq!(engine.regions()[0].data_version, 0);
    }

    #[tokio::test]
    async fn refresh_configured_needs_a_source_url() {
        let engine = engine();
        assert!(matches!(
            engine.refresh_configured("dhaka").await,
            Err(EngineError::NoSource(_))
        ));
    }
}
