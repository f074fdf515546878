//! Index formulas over normalized inputs.
//!
//! Every input is already in `[0, 1]` (see [`normalize`]) and every output
//! is clamped to `[0, 1]`.

use serde::{Deserialize, Serialize};

/// Weights of the opportunity score's four sub-scores.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpportunityWeights {
    pub population: f64,
    pub distance: f64,
    pub infrastructure: f64,
    pub housing: f64,
}

impl OpportunityWeights {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.population + self.distance + self.infrastructure + self.housing
    }
}

pub const OPPORTUNITY_WEIGHTS: OpportunityWeights = OpportunityWeights {
    population: 0.30,
    distance: 0.25,
    infrastructure: 0.30,
    housing: 0.15,
};

/// Weights of the combined flood index.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloodWeights {
    pub rainfall: f64,
    /// Applied to `1 - norm(elevation)`: low ground floods first.
    pub low_elevation: f64,
    /// Applied to `1 - norm(drainage_capacity)`.
    pub poor_drainage: f64,
}

impl FloodWeights {
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.rainfall + self.low_elevation + self.poor_drainage
    }
}

pub const FLOOD_WEIGHTS: FloodWeights = FloodWeights {
    rainfall: 0.5,
    low_elevation: 0.25,
    poor_drainage: 0.25,
};

/// Opportunity sub-scores, each in `[0, 1]` with higher meaning better.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpportunitySubScores {
    pub population_score: f64,
    /// `1 - norm(resource_distance)`.
    pub distance_score: f64,
    pub infra_score: f64,
    /// `1 - norm(housing_pressure)`.
    pub housing_score: f64,
}

/// `min(value / reference_max, 1)`, floored at zero.
///
/// A non-positive or non-finite ceiling normalizes everything to zero.
#[must_use]
pub fn normalize(value: f64, reference_max: f64) -> f64 {
    if !reference_max.is_finite() || reference_max <= 0.0 {
        return 0.0;
    }
    clamp_unit(value / reference_max)
}

/// Clamps to `[0, 1]`, mapping NaN to zero.
#[must_use]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weighted sum of the sub-scores.
#[must_use]
pub fn opportunity_score(sub: &OpportunitySubScores) -> f64 {
    let w = OPPORTUNITY_WEIGHTS;
    clamp_unit(w.housing.mul_add(
        sub.housing_score,
        w.infrastructure.mul_add(
            sub.infra_score,
            w.distance
                .mul_add(sub.distance_score, w.population * sub.population_score),
        ),
    ))
}

/// Combined flood index from normalized rainfall, elevation and drainage.
#[must_use]
pub fn flood_index(rainfall: f64, elevation: f64, drainage: f64) -> f64 {
    let w = FLOOD_WEIGHTS;
    clamp_unit(w.poor_drainage.mul_add(
        1.0 - drainage,
        w.low_elevation
            .mul_add(1.0 - elevation, w.rainfall * rainfall),
    ))
}

/// `clamp((cell_mean - baseline) / spread, 0, 1)`; zero for a non-positive spread.
#[must_use]
pub fn heat_intensity(cell_mean: f64, baseline: f64, spread: f64) -> f64 {
    if !spread.is_finite() || spread <= 0.0 {
        return 0.0;
    }
    clamp_unit((cell_mean - baseline) / spread)
}

/// Normalized pollutant concentration weighted by normalized population.
#[must_use]
pub fn pollution_exposure(pollutant: f64, population_weight: f64) -> f64 {
    clamp_unit(pollutant * population_weight)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::float_cmp)]
    fn weight_tables_sum_to_exactly_one() {
        assert_eq!(OPPORTUNITY_WEIGHTS.sum(), 1.0);
        assert_eq!(FLOOD_WEIGHTS.sum(), 1.0);
    }

    #[test]
    fn normalize_clamps_outliers() {
        assert!((normalize(40_000.0, 50_000.0) - 0.8).abs() < 1e-12);
        assert!((normalize(500_000.0, 50_000.0) - 1.0).abs() < f64::EPSILON);
        assert!(normalize(-3.0, 10.0).abs() < f64::EPSILON);
        assert!(normalize(5.0, 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn opportunity_score_uses_documented_weights() {
        let sub = OpportunitySubScores {
            population_score: 1.0,
            distance_score: 0.0,
            infra_score: 0.0,
            housing_score: 0.0,
        };
        assert!((opportunity_score(&sub) - 0.30).abs() < 1e-12);

        let sub = OpportunitySubScores {
            population_score: 0.0,
            distance_score: 0.0,
            infra_score: 0.0,
            housing_score: 1.0,
        };
        assert!((opportunity_score(&sub) - 0.15).abs() < 1e-12);

        let all = OpportunitySubScores {
            population_score: 1.0,
            distance_score: 1.0,
            infra_score: 1.0,
            housing_score: 1.0,
        };
        assert!((opportunity_score(&all) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn flood_index_inverts_elevation_and_drainage() {
        assert!((flood_index(1.0, 0.0, 0.0) - 1.0).abs() < 1e-12);
        assert!(flood_index(0.0, 1.0, 1.0).abs() < 1e-12);
        assert!((flood_index(0.6, 0.5, 0.5) - 0.55).abs() < 1e-12);
    }

    #[test]
    fn heat_intensity_is_relative_to_baseline() {
        assert!((heat_intensity(32.0, 30.0, 4.0) - 0.5).abs() < 1e-12);
        assert!(heat_intensity(28.0, 30.0, 4.0).abs() < f64::EPSILON);
        assert!((heat_intensity(80.0, 30.0, 4.0) - 1.0).abs() < f64::EPSILON);
        assert!(heat_intensity(35.0, 30.0, 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn pollution_exposure_scales_with_population() {
        assert!((pollution_exposure(0.8, 0.5) - 0.4).abs() < 1e-12);
        assert!(pollution_exposure(0.8, 0.0).abs() < f64::EPSILON);
    }
}
