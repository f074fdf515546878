//! Discrete color scales for choropleth layers.

use serde::{Deserialize, Serialize};

use crate::LayerError;

/// One bucket of a [`ColorScale`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorStop {
    /// Exclusive upper bound, except for the last stop where it is inclusive.
    pub upper_bound: f64,
    /// CSS color, e.g. `"#22c55e"`.
    pub color: String,
}

impl ColorStop {
    #[must_use]
    pub fn new(upper_bound: f64, color: impl Into<String>) -> Self {
        Self {
            upper_bound,
            color: color.into(),
        }
    }
}

/// A validated, ascending list of [`ColorStop`]s covering `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ColorScale {
    stops: Vec<ColorStop>,
}

impl ColorScale {
    /// # Errors
    ///
    /// Returns [`LayerError::InvalidColorScale`] if the stops are empty,
    /// have a non-finite or non-ascending bound, leave `0` uncovered (first
    /// bound not above zero), stop short of `1`, or have an empty color.
    pub fn new(stops: Vec<ColorStop>) -> Result<Self, LayerError> {
        let invalid = |reason: String| Err(LayerError::InvalidColorScale { reason });

        let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
            return invalid("no stops".to_string());
        };
        if let Some(stop) = stops.iter().find(|s| !s.upper_bound.is_finite()) {
            return invalid(format!("non-finite bound {}", stop.upper_bound));
        }
        if let Some(stop) = stops.iter().find(|s| s.color.trim().is_empty()) {
            return invalid(format!("empty color at bound {}", stop.upper_bound));
        }
        if let Some(pair) = stops
            .windows(2)
            .find(|pair| pair[1].upper_bound <= pair[0].upper_bound)
        {
            return invalid(format!(
                "bounds not strictly ascending: {} then {}",
                pair[0].upper_bound, pair[1].upper_bound
            ));
        }
        if first.upper_bound <= 0.0 {
            return invalid(format!("first bound {} leaves 0 uncovered", first.upper_bound));
        }
        if last.upper_bound < 1.0 {
            return invalid(format!("last bound {} leaves 1 uncovered", last.upper_bound));
        }

        Ok(Self { stops })
    }

    #[must_use]
    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Color of the first stop whose bound exceeds `value`; the last stop
    /// also takes its own bound and anything above it.
    #[must_use]
    pub fn color_for(&self, value: f64) -> &str {
        self.stops
            .iter()
            .find(|stop| value < stop.upper_bound)
            .or_else(|| self.stops.last())
            .map_or("", |stop| stop.color.as_str())
    }
}

impl Default for ColorScale {
    /// Red below 0.4, amber below 0.7, green up to 1.
    fn default() -> Self {
        Self {
            stops: vec![
                ColorStop::new(0.4, "#ef4444"),
                ColorStop::new(0.7, "#f59e0b"),
                ColorStop::new(1.0, "#22c55e"),
            ],
        }
    }
}

impl TryFrom<Vec<ColorStop>> for ColorScale {
    type Error = LayerError;

    fn try_from(stops: Vec<ColorStop>) -> Result<Self, Self::Error> {
        Self::new(stops)
    }
}
