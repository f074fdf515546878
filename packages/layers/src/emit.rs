//! Field-to-layer transforms. All of them are pure.

use climate_map_grid::{Cell, GeoGrid};
use climate_map_index::{FieldValue, ValueField};

use crate::{ColorScale, Feature, LayerDescriptor, LayerError, LayerType};

/// Default extrusion ceiling in renderer height units.
pub const DEFAULT_MAX_EXTRUSION_HEIGHT: f64 = 1000.0;

/// Styling inputs shared by the emitters.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerStyle {
    pub color_scale: ColorScale,
    /// Height per unit of normalized weight.
    pub height_scale: f64,
    pub max_height: f64,
}

impl Default for LayerStyle {
    fn default() -> Self {
        Self {
            color_scale: ColorScale::default(),
            height_scale: DEFAULT_MAX_EXTRUSION_HEIGHT,
            max_height: DEFAULT_MAX_EXTRUSION_HEIGHT,
        }
    }
}

/// Emits `field` as a layer of the requested type.
///
/// # Errors
///
/// Returns [`LayerError::InvalidHeightScale`] for an extrusion with a bad
/// height scale or ceiling.
pub fn emit(
    layer_type: LayerType,
    grid: &GeoGrid,
    field: &ValueField,
    style: &LayerStyle,
) -> Result<LayerDescriptor, LayerError> {
    let layer = match layer_type {
        LayerType::Heatmap => emit_heatmap(grid, field),
        LayerType::Choropleth => emit_choropleth(grid, field, &style.color_scale),
        LayerType::Extrusion => emit_extrusion(grid, field, style.height_scale, style.max_height)?,
        LayerType::Point => emit_point(grid, field),
    };
    log::debug!(
        "Emitted {layer_type} layer for {} with {} features",
        field.metric(),
        layer.features.len()
    );
    Ok(layer)
}

/// One point per cell with a non-zero weight, rescaled so the strongest
/// cell weighs exactly 1.
#[must_use]
pub fn emit_heatmap(grid: &GeoGrid, field: &ValueField) -> LayerDescriptor {
    let max = field
        .iter()
        .map(|(_, v)| v.normalized)
        .fold(0.0_f64, f64::max);

    let features = if max > 0.0 {
        cells_with_values(grid, field)
            .filter(|(_, v)| v.normalized > 0.0)
            .map(|(cell, v)| Feature {
                cell_id: cell.id,
                geometry: point(&cell),
                value: v.value,
                normalized_weight: (v.normalized / max).min(1.0),
                color: None,
                height: None,
            })
            .collect()
    } else {
        Vec::new()
    };

    LayerDescriptor::from_field(LayerType::Heatmap, field, features)
}

/// One polygon per cell, colored by the bucket its weight falls in.
#[must_use]
pub fn emit_choropleth(grid: &GeoGrid, field: &ValueField, scale: &ColorScale) -> LayerDescriptor {
    let features = cells_with_values(grid, field)
        .map(|(cell, v)| Feature {
            cell_id: cell.id,
            geometry: polygon(&cell),
            value: v.value,
            normalized_weight: v.normalized,
            color: Some(scale.color_for(v.normalized).to_string()),
            height: None,
        })
        .collect();

    LayerDescriptor::from_field(LayerType::Choropleth, field, features)
}

/// One polygon per cell with `height = normalized * height_scale`, capped
/// at `max_height`.
///
/// # Errors
///
/// Returns [`LayerError::InvalidHeightScale`] if either parameter is
/// negative or non-finite.
pub fn emit_extrusion(
    grid: &GeoGrid,
    field: &ValueField,
    height_scale: f64,
    max_height: f64,
) -> Result<LayerDescriptor, LayerError> {
    for (name, v) in [("height scale", height_scale), ("max height", max_height)] {
        if !v.is_finite() || v < 0.0 {
            return Err(LayerError::InvalidHeightScale {
                reason: format!("{name} must be a non-negative number, got {v}"),
            });
        }
    }

    let features = cells_with_values(grid, field)
        .map(|(cell, v)| Feature {
            cell_id: cell.id,
            geometry: polygon(&cell),
            value: v.value,
            normalized_weight: v.normalized,
            color: None,
            height: Some((v.normalized * height_scale).min(max_height)),
        })
        .collect();

    Ok(LayerDescriptor::from_field(LayerType::Extrusion, field, features))
}

/// One point per cell that has a value.
#[must_use]
pub fn emit_point(grid: &GeoGrid, field: &ValueField) -> LayerDescriptor {
    let features = cells_with_values(grid, field)
        .map(|(cell, v)| Feature {
            cell_id: cell.id,
            geometry: point(&cell),
            value: v.value,
            normalized_weight: v.normalized,
            color: None,
            height: None,
        })
        .collect();

    LayerDescriptor::from_field(LayerType::Point, field, features)
}

fn cells_with_values<'a>(
    grid: &'a GeoGrid,
    field: &'a ValueField,
) -> impl Iterator<Item = (Cell, FieldValue)> + 'a {
    field
        .iter()
        .filter_map(move |(id, v)| grid.cell(id).map(|cell| (cell, v)))
}

fn point(cell: &Cell) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(&cell.center()))
}

fn polygon(cell: &Cell) -> geojson::Geometry {
    geojson::Geometry::new(geojson::Value::from(&cell.polygon()))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use climate_map_grid::{BoundingBox, CellId, Resolution};
    use climate_map_index::{IndexName, LayerMetric};

    use super::*;

    fn grid() -> GeoGrid {
        GeoGrid::build(
            BoundingBox::new(0.0, 0.0, 2.0, 2.0).unwrap(),
            Resolution::new(2, 2),
        )
        .unwrap()
    }

    fn field(values: &[(u32, f64)]) -> ValueField {
        ValueField::new(
            LayerMetric::Index(IndexName::OpportunityScore),
            values
                .iter()
                .map(|&(id, v)| {
                    (
                        CellId(id),
                        FieldValue {
                            value: v,
                            normalized: v,
                        },
                    )
                })
                .collect::<BTreeMap<_, _>>(),
        )
    }

    #[test]
    fn heatmap_skips_zero_cells_and_rescales_to_one() {
        let layer = emit_heatmap(&grid(), &field(&[(0, 0.0), (1, 0.2), (2, 0.4), (3, 0.1)]));

        assert_eq!(layer.layer_type, LayerType::Heatmap);
        assert_eq!(layer.features.len(), 3);
        let weights: Vec<f64> = layer.features.iter().map(|f| f.normalized_weight).collect();
        assert!((weights[0] - 0.5).abs() < 1e-12);
        assert!((weights[1] - 1.0).abs() < f64::EPSILON);
        assert!((weights[2] - 0.25).abs() < 1e-12);
        assert!((layer.features[1].value - 0.4).abs() < f64::EPSILON);
        assert!(matches!(
            layer.features[0].geometry.value,
            geojson::Value::Point(_)
        ));
    }

    #[test]
    fn heatmap_of_all_zero_field_is_empty() {
        let layer = emit_heatmap(&grid(), &field(&[(0, 0.0), (1, 0.0)]));
        assert!(layer.features.is_empty());
    }

    #[test]
    fn choropleth_colors_by_bucket() {
        let layer = emit_choropleth(
            &grid(),
            &field(&[(0, 0.1), (1, 0.5), (2, 0.9)]),
            &ColorScale::default(),
        );
        let colors: Vec<&str> = layer
            .features
            .iter()
            .filter_map(|f| f.color.as_deref())
            .collect();
        assert_eq!(colors, vec!["#ef4444", "#f59e0b", "#22c55e"]);
        assert!(matches!(
            layer.features[0].geometry.value,
            geojson::Value::Polygon(_)
        ));
    }

    #[test]
    fn extrusion_heights_are_clamped() {
        let layer = emit_extrusion(&grid(), &field(&[(0, 0.25), (1, 1.0)]), 2000.0, 1000.0).unwrap();
        let heights: Vec<f64> = layer.features.iter().filter_map(|f| f.height).collect();
        assert!((heights[0] - 500.0).abs() < f64::EPSILON);
        assert!((heights[1] - 1000.0).abs() < f64::EPSILON);

        assert!(matches!(
            emit_extrusion(&grid(), &field(&[]), -1.0, 1000.0),
            Err(LayerError::InvalidHeightScale { .. })
        ));
        assert!(matches!(
            emit_extrusion(&grid(), &field(&[]), 1.0, f64::INFINITY),
            Err(LayerError::InvalidHeightScale { .. })
        ));
    }

    #[test]
    fn point_layer_has_one_feature_per_valued_cell() {
        let layer = emit_point(&grid(), &field(&[(0, 0.0), (3, 0.6)]));
        assert_eq!(layer.features.len(), 2);
        assert_eq!(layer.features[1].cell_id, CellId(3));

        // Cell 3 is the north-east cell; its centre is (1.5, 1.5).
        let geojson::Value::Point(coords) = &layer.features[1].geometry.value else {
            panic!("expected a point");
        };
        assert!((coords[0] - 1.5).abs() < 1e-12);
        assert!((coords[1] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn cells_outside_the_grid_are_ignored() {
        let layer = emit_point(&grid(), &field(&[(0, 0.5), (99, 0.5)]));
        assert_eq!(layer.features.len(), 1);
    }

    #[test]
    fn json_shape_matches_renderer_contract() {
        let layer = emit(
            LayerType::Extrusion,
            &grid(),
            &field(&[(2, 0.5)]),
            &LayerStyle::default(),
        )
        .unwrap();
        let json = serde_json::to_value(&layer).unwrap();

        assert_eq!(json["layerType"], "extrusion");
        assert_eq!(json["unit"], "score");
        let feature = &json["features"][0];
        assert_eq!(feature["cellId"], 2);
        assert_eq!(feature["geometry"]["type"], "Polygon");
        assert_eq!(feature["normalizedWeight"], 0.5);
        assert_eq!(feature["height"], 500.0);
        assert!(feature.get("color").is_none());

        let collection = layer.to_feature_collection();
        assert_eq!(collection.features.len(), 1);
        let properties = collection.features[0].properties.as_ref().unwrap();
        assert_eq!(properties["height"], 500.0);
    }
}
