#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Engine and server configuration.
//!
//! Read from a TOML file whose path comes from `CLIMATE_MAP_CONFIG`
//! (default `climate_map.toml`). A missing file means defaults; any key
//! left out of the file keeps its default. Everything is validated up front
//! so bad values fail at startup instead of on the first request.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use climate_map_grid::{BoundingBox, GeoGrid, GridError, Resolution};
use climate_map_index::IndexConfig;
use climate_map_layers::{ColorScale, ColorStop, LayerError, LayerStyle};
use climate_map_observation_models::MetricType;
use climate_map_source::retry::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "CLIMATE_MAP_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "climate_map.toml";

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was read.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid TOML or has unknown keys.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A region's box or resolution is unusable.
    #[error("region {region}: {source}")]
    Grid {
        /// Offending region id.
        region: String,
        /// Underlying error.
        source: GridError,
    },

    /// The color scale is unusable.
    #[error(transparent)]
    Layer(#[from] LayerError),

    /// Any other out-of-range value.
    #[error("invalid config: {reason}")]
    Invalid {
        /// What is wrong.
        reason: String,
    },
}

/// A geographic region served by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegionConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub bbox: BoundingBox,
    /// Overrides the top-level `gridResolution`.
    #[serde(default)]
    pub resolution: Option<Resolution>,
    /// JSON endpoint polled by `refresh`.
    #[serde(default)]
    pub source_url: Option<String>,
}

impl RegionConfig {
    /// The default region: Dhaka, Bangladesh.
    #[must_use]
    pub fn dhaka() -> Option<Self> {
        let bbox = BoundingBox::new(23.7, 90.3, 23.9, 90.5).ok()?;
        Some(Self {
            id: "dhaka".to_string(),
            name: "Dhaka".to_string(),
            bbox,
            resolution: None,
            source_url: None,
        })
    }
}

/// Index tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct IndexSettings {
    pub min_cell_samples: u64,
    pub min_regional_samples: u64,
    pub heat_spread_fallback: f64,
}

impl Default for IndexSettings {
    fn default() -> Self {
        let defaults = IndexConfig::default();
        Self {
            min_cell_samples: defaults.min_cell_samples,
            min_regional_samples: defaults.min_regional_samples,
            heat_spread_fallback: defaults.heat_spread_fallback,
        }
    }
}

/// Backoff for observation sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: u64::try_from(policy.base_delay.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    pub grid_resolution: Resolution,
    /// Normalization ceilings keyed by metric name.
    pub reference_max: BTreeMap<String, f64>,
    pub cache_capacity: usize,
    /// Seconds a cached layer stays fresh.
    #[serde(alias = "cacheTTL")]
    pub cache_ttl: u64,
    pub index: IndexSettings,
    pub max_extrusion_height: f64,
    /// Extrusion height for a normalized weight of 1.
    pub extrusion_height_scale: f64,
    pub color_scale: Vec<ColorStop>,
    pub retry: RetrySettings,
    pub regions: Vec<RegionConfig>,
}

impl Default for Config {
    fn default() -> Self {
        let style = LayerStyle::default();
        Self {
            grid_resolution: Resolution::new(10, 10),
            reference_max: MetricType::all()
                .iter()
                .map(|metric| (metric.to_string(), metric.default_reference_max()))
                .collect(),
            cache_capacity: 64,
            cache_ttl: 300,
            index: IndexSettings::default(),
            max_extrusion_height: style.max_height,
            extrusion_height_scale: style.height_scale,
            color_scale: style.color_scale.stops().to_vec(),
            retry: RetrySettings::default(),
            regions: RegionConfig::dhaka().into_iter().collect(),
        }
    }
}

impl Config {
    /// Loads from `$CLIMATE_MAP_CONFIG`, or `climate_map.toml`.
    ///
    /// # Errors
    ///
    /// See [`Self::load_from`].
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    /// Loads and validates a config file. A missing file yields defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed, or
    /// fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => {
                log::info!("Loading config from {}", path.display());
                Self::from_toml_str(&text)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No config at {}, using defaults", path.display());
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Parses and validates TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys,
    /// or a validation error.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every value, building each region's grid once.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        self.index_config()?;
        self.layer_style()?;

        if self.cache_capacity == 0 {
            return invalid("cacheCapacity must be at least 1".to_string());
        }
        if self.cache_ttl == 0 {
            return invalid("cacheTtl must be at least 1 second".to_string());
        }
        if self.index.min_cell_samples == 0 {
            return invalid("index.minCellSamples must be at least 1".to_string());
        }
        if !self.index.heat_spread_fallback.is_finite() || self.index.heat_spread_fallback <= 0.0 {
            return invalid(format!(
                "index.heatSpreadFallback must be positive, got {}",
                self.index.heat_spread_fallback
            ));
        }
        if self.regions.is_empty() {
            return invalid("at least one region is required".to_string());
        }

        let mut ids = BTreeSet::new();
        for region in &self.regions {
            if region.id.trim().is_empty() {
                return invalid("region id must not be empty".to_string());
            }
            if !ids.insert(region.id.as_str()) {
                return invalid(format!("duplicate region id {:?}", region.id));
            }
            GeoGrid::build(region.bbox, self.resolution_for(region)).map_err(|source| {
                ConfigError::Grid {
                    region: region.id.clone(),
                    source,
                }
            })?;
        }

        Ok(())
    }

    /// The region's own resolution, else the global one.
    #[must_use]
    pub fn resolution_for(&self, region: &RegionConfig) -> Resolution {
        region.resolution.unwrap_or(self.grid_resolution)
    }

    /// Index tuning with metric names resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown metric or a
    /// non-positive ceiling.
    pub fn index_config(&self) -> Result<IndexConfig, ConfigError> {
        let reference_max = self
            .reference_max
            .iter()
            .map(|(name, max)| {
                let metric: MetricType = name.parse().map_err(|_| ConfigError::Invalid {
                    reason: format!("referenceMax: unknown metric {name:?}"),
                })?;
                if !max.is_finite() || *max <= 0.0 {
                    return Err(ConfigError::Invalid {
                        reason: format!("referenceMax.{name} must be positive, got {max}"),
                    });
                }
                Ok((metric, *max))
            })
            .collect::<Result<_, _>>()?;

        Ok(IndexConfig {
            reference_max,
            min_cell_samples: self.index.min_cell_samples,
            min_regional_samples: self.index.min_regional_samples,
            heat_spread_fallback: self.index.heat_spread_fallback,
        })
    }

    /// Layer styling with the color scale validated.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Layer`] for a bad color scale and
    /// [`ConfigError::Invalid`] for a bad extrusion setting.
    pub fn layer_style(&self) -> Result<LayerStyle, ConfigError> {
        for (name, v) in [
            ("maxExtrusionHeight", self.max_extrusion_height),
            ("extrusionHeightScale", self.extrusion_height_scale),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(ConfigError::Invalid {
                    reason: format!("{name} must be a non-negative number, got {v}"),
                });
            }
        }

        Ok(LayerStyle {
            color_scale: ColorScale::new(self.color_scale.clone())?,
            height_scale: self.extrusion_height_scale,
            max_height: self.max_extrusion_height,
        })
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
        }
    }

    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipped_config_matches_defaults() {
        let shipped = Config::from_toml_str(include_str!("../../../climate_map.toml")).unwrap();
        assert_eq!(shipped, Config::default());
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.regions[0].id, "dhaka");
        assert_eq!(config.grid_resolution, Resolution::new(10, 10));
        assert_eq!(config.cache_ttl(), Duration::from_secs(300));
        assert_eq!(config.retry_policy(), RetryPolicy::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config = Config::from_toml_str(
            r#"
            cacheCapacity = 8
            gridResolution = { rows = 20, cols = 30 }

            [referenceMax]
            rainfall = 150.0

            [[regions]]
            id = "khulna"
            bbox = { minLat = 22.7, minLon = 89.4, maxLat = 22.9, maxLon = 89.7 }
            resolution = { rows = 5, cols = 5 }
            "#,
        )
        .unwrap();

        assert_eq!(config.cache_capacity, 8);
        assert_eq!(config.cache_ttl, 300);
        assert_eq!(config.regions.len(), 1);
        assert_eq!(
            config.resolution_for(&config.regions[0]),
            Resolution::new(5, 5)
        );

        let index = config.index_config().unwrap();
        assert!((index.reference_max(MetricType::Rainfall) - 150.0).abs() < f64::EPSILON);
        assert!(
            (index.reference_max(MetricType::PopulationDensity) - 50_000.0).abs() < f64::EPSILON
        );
    }

    #[test]
    fn accepts_uppercase_ttl_alias() {
        let config = Config::from_toml_str("cacheTTL = 30").unwrap();
        assert_eq!(config.cache_ttl(), Duration::from_secs(30));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from("/nonexistent/dir/climate_map.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            Config::from_toml_str("cacheCapacty = 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn rejects_unknown_metric() {
        let err = Config::from_toml_str("[referenceMax]\nsoil_moisture = 1.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn rejects_non_positive_reference_max() {
        let err = Config::from_toml_str("[referenceMax]\nrainfall = 0.0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn rejects_bad_resolution() {
        let err = Config::from_toml_str("gridResolution = { rows = 0, cols = 10 }").unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::Grid {
                    source: GridError::InvalidResolution { rows: 0, cols: 10 },
                    ..
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn rejects_inverted_region_box() {
        let err = Config::from_toml_str(
            r#"
            [[regions]]
            id = "upside_down"
            bbox = { minLat = 24.0, minLon = 90.3, maxLat = 23.0, maxLon = 90.5 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "{err}");
    }

    #[test]
    fn rejects_duplicate_regions() {
        let region = r#"
            [[regions]]
            id = "dhaka"
            bbox = { minLat = 23.7, minLon = 90.3, maxLat = 23.9, maxLon = 90.5 }
        "#;
        let err = Config::from_toml_str(&format!("{region}{region}")).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn rejects_bad_color_scale() {
        let err = Config::from_toml_str(
            r##"
            [[colorScale]]
            upperBound = 0.5
            color = "#000"
            "##,
        )
        .unwrap_err();
        assert!(
            matches!(err, ConfigError::Layer(LayerError::InvalidColorScale { .. })),
            "{err}"
        );
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            Config::from_toml_str("cacheCapacity = 0"),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
