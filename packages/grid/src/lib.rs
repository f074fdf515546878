#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Regular partition of a geographic bounding box into grid cells.
//!
//! A [`GeoGrid`] tiles a [`BoundingBox`] into `rows × cols` cells. Rows run
//! south to north and columns west to east. Cell ids are `row * cols + col`,
//! so gridding the same box at the same resolution always yields the same
//! ids.
//!
//! Cells are half-open: a cell owns its southern and western edges, and the
//! northern/eastern edge belongs to the neighbouring cell. The last row and
//! last column also own the box's outer edge, so every point inside the box
//! (edges included) maps to exactly one cell.

use std::fmt;

use geo::{Coord, Point, Polygon, Rect};
use serde::{Deserialize, Serialize};

/// Largest accepted row or column count.
pub const MAX_RESOLUTION: u32 = 500;

/// Errors raised while constructing a grid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GridError {
    /// The bounding box is empty, inverted, or non-finite.
    #[error("invalid bounding box: {reason}")]
    InvalidBoundingBox {
        /// What is wrong with the box.
        reason: String,
    },

    /// The requested resolution is zero or exceeds [`MAX_RESOLUTION`].
    #[error("invalid resolution {rows}x{cols}: rows and cols must be in 1..={MAX_RESOLUTION}")]
    InvalidResolution {
        /// Requested row count.
        rows: u32,
        /// Requested column count.
        cols: u32,
    },
}

/// An immutable WGS84 bounding box with `min < max` on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "BoundingBoxFields")]
pub struct BoundingBox {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BoundingBoxFields {
    min_lat: f64,
    min_lon: f64,
    max_lat: f64,
    max_lon: f64,
}

impl TryFrom<BoundingBoxFields> for BoundingBox {
    type Error = GridError;

    fn try_from(f: BoundingBoxFields) -> Result<Self, Self::Error> {
        Self::new(f.min_lat, f.min_lon, f.max_lat, f.max_lon)
    }
}

impl BoundingBox {
    /// Creates a bounding box.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidBoundingBox`] if any coordinate is
    /// non-finite or `min >= max` on either axis.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self, GridError> {
        if ![min_lat, min_lon, max_lat, max_lon]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(GridError::InvalidBoundingBox {
                reason: "coordinates must be finite".to_string(),
            });
        }
        if min_lat >= max_lat {
            return Err(GridError::InvalidBoundingBox {
                reason: format!("min_lat {min_lat} must be below max_lat {max_lat}"),
            });
        }
        if min_lon >= max_lon {
            return Err(GridError::InvalidBoundingBox {
                reason: format!("min_lon {min_lon} must be below max_lon {max_lon}"),
            });
        }

        Ok(Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        })
    }

    #[must_use]
    pub const fn min_lat(&self) -> f64 {
        self.min_lat
    }

    #[must_use]
    pub const fn min_lon(&self) -> f64 {
        self.min_lon
    }

    #[must_use]
    pub const fn max_lat(&self) -> f64 {
        self.max_lat
    }

    #[must_use]
    pub const fn max_lon(&self) -> f64 {
        self.max_lon
    }

    /// Whether the point lies inside the box, edges included.
    #[must_use]
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        (self.min_lat..=self.max_lat).contains(&lat) && (self.min_lon..=self.max_lon).contains(&lon)
    }

    /// Centre of the box.
    #[must_use]
    pub fn center(&self) -> Point<f64> {
        Point::new(
            f64::midpoint(self.min_lon, self.max_lon),
            f64::midpoint(self.min_lat, self.max_lat),
        )
    }

    /// Closed polygon ring (x = lon, y = lat).
    #[must_use]
    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.min_lon,
                y: self.min_lat,
            },
            Coord {
                x: self.max_lon,
                y: self.max_lat,
            },
        )
        .to_polygon()
    }
}

/// Number of rows and columns in a grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    /// Row count (latitude bands).
    pub rows: u32,
    /// Column count (longitude bands).
    pub cols: u32,
}

impl Resolution {
    #[must_use]
    pub const fn new(rows: u32, cols: u32) -> Self {
        Self { rows, cols }
    }
}

/// Stable cell identifier, `row * cols + col`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CellId(pub u32);

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One grid cell and its sub-box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    /// Stable identifier.
    pub id: CellId,
    /// Zero-based row, counted from the southern edge.
    pub row: u32,
    /// Zero-based column, counted from the western edge.
    pub col: u32,
    /// The cell's extent.
    pub bounds: BoundingBox,
}

impl Cell {
    /// Centre point (x = lon, y = lat).
    #[must_use]
    pub fn center(&self) -> Point<f64> {
        self.bounds.center()
    }

    /// Cell outline (x = lon, y = lat).
    #[must_use]
    pub fn polygon(&self) -> Polygon<f64> {
        self.bounds.to_polygon()
    }
}

/// A regular tiling of a [`BoundingBox`].
#[derive(Debug, Clone, PartialEq)]
pub struct GeoGrid {
    bbox: BoundingBox,
    resolution: Resolution,
    lat_step: f64,
    lon_step: f64,
}

impl GeoGrid {
    /// Builds a grid over `bbox`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidResolution`] if rows or cols fall outside
    /// `1..=MAX_RESOLUTION`.
    pub fn build(bbox: BoundingBox, resolution: Resolution) -> Result<Self, GridError> {
        let valid = 1..=MAX_RESOLUTION;
        if !valid.contains(&resolution.rows) || !valid.contains(&resolution.cols) {
            return Err(GridError::InvalidResolution {
                rows: resolution.rows,
                cols: resolution.cols,
            });
        }

        Ok(Self {
            bbox,
            resolution,
            lat_step: (bbox.max_lat - bbox.min_lat) / f64::from(resolution.rows),
            lon_step: (bbox.max_lon - bbox.min_lon) / f64::from(resolution.cols),
        })
    }

    #[must_use]
    pub const fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    #[must_use]
    pub const fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// Total number of cells.
    #[must_use]
    pub const fn cell_count(&self) -> u32 {
        self.resolution.rows * self.resolution.cols
    }

    /// Returns the cell at `(row, col)`, or `None` if out of range.
    #[must_use]
    pub fn cell_at(&self, row: u32, col: u32) -> Option<Cell> {
        if row >= self.resolution.rows || col >= self.resolution.cols {
            return None;
        }

        Some(Cell {
            id: CellId(row * self.resolution.cols + col),
            row,
            col,
            bounds: BoundingBox {
                min_lat: self.lat_edge(row),
                max_lat: self.lat_edge(row + 1),
                min_lon: self.lon_edge(col),
                max_lon: self.lon_edge(col + 1),
            },
        })
    }

    /// Returns the cell with the given id, or `None` if out of range.
    #[must_use]
    pub fn cell(&self, id: CellId) -> Option<Cell> {
        if id.0 >= self.cell_count() {
            return None;
        }
        self.cell_at(id.0 / self.resolution.cols, id.0 % self.resolution.cols)
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (0..self.cell_count()).filter_map(|id| self.cell(CellId(id)))
    }

    /// Returns the cell containing the point, or `None` if it falls outside
    /// the box. Noisy sources routinely report such points, so this never
    /// fails.
    #[must_use]
    pub fn cell_for(&self, lat: f64, lon: f64) -> Option<Cell> {
        if !lat.is_finite() || !lon.is_finite() || !self.bbox.contains(lat, lon) {
            return None;
        }

        let row = band_index(lat, self.bbox.min_lat, self.lat_step, self.resolution.rows, |i| {
            self.lat_edge(i)
        });
        let col = band_index(lon, self.bbox.min_lon, self.lon_step, self.resolution.cols, |i| {
            self.lon_edge(i)
        });

        self.cell_at(row, col)
    }

    /// Cells within Chebyshev distance `radius` of `id` (the cell itself
    /// included), in row-major order. Unknown ids yield an empty list.
    #[must_use]
    pub fn neighbors_of(&self, id: CellId, radius: u32) -> Vec<Cell> {
        let Some(center) = self.cell(id) else {
            return Vec::new();
        };

        let row_lo = center.row.saturating_sub(radius);
        let row_hi = center.row.saturating_add(radius).min(self.resolution.rows - 1);
        let col_lo = center.col.saturating_sub(radius);
        let col_hi = center.col.saturating_add(radius).min(self.resolution.cols - 1);

        (row_lo..=row_hi)
            .flat_map(|row| (col_lo..=col_hi).map(move |col| (row, col)))
            .filter_map(|(row, col)| self.cell_at(row, col))
            .collect()
    }

    /// Southern edge of row `i`; `i == rows` is the box's northern edge.
    fn lat_edge(&self, i: u32) -> f64 {
        if i == 0 {
            self.bbox.min_lat
        } else if i >= self.resolution.rows {
            self.bbox.max_lat
        } else {
            f64::from(i).mul_add(self.lat_step, self.bbox.min_lat)
        }
    }

    /// Western edge of column `i`; `i == cols` is the box's eastern edge.
    fn lon_edge(&self, i: u32) -> f64 {
        if i == 0 {
            self.bbox.min_lon
        } else if i >= self.resolution.cols {
            self.bbox.max_lon
        } else {
            f64::from(i).mul_add(self.lon_step, self.bbox.min_lon)
        }
    }
}

/// Locates the band holding `v`, correcting the floor estimate against the
/// exact edges so lookups agree with [`GeoGrid::cell_at`] bounds.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn band_index(v: f64, min: f64, step: f64, bands: u32, edge: impl Fn(u32) -> f64) -> u32 {
    let estimate = ((v - min) / step).floor().clamp(0.0, f64::from(bands - 1)) as u32;

    if estimate > 0 && v < edge(estimate) {
        estimate - 1
    } else if estimate + 1 < bands && v >= edge(estimate + 1) {
        estimate + 1
    } else {
        estimate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box() -> BoundingBox {
        BoundingBox::new(0.0, 0.0, 2.0, 2.0).unwrap()
    }

    #[test]
    fn rejects_inverted_and_degenerate_boxes() {
        assert!(matches!(
            BoundingBox::new(1.0, 0.0, 1.0, 2.0),
            Err(GridError::InvalidBoundingBox { .. })
        ));
        assert!(matches!(
            BoundingBox::new(0.0, 3.0, 1.0, 2.0),
            Err(GridError::InvalidBoundingBox { .. })
        ));
        assert!(BoundingBox::new(f64::NAN, 0.0, 1.0, 1.0).is_err());
    }

    #[test]
    fn rejects_out_of_range_resolution() {
        for (rows, cols) in [(0, 4), (4, 0), (MAX_RESOLUTION + 1, 1)] {
            assert_eq!(
                GeoGrid::build(unit_box(), Resolution::new(rows, cols)),
                Err(GridError::InvalidResolution { rows, cols })
            );
        }
        assert!(GeoGrid::build(unit_box(), Resolution::new(MAX_RESOLUTION, MAX_RESOLUTION)).is_ok());
    }

    #[test]
    fn bounding_box_deserialization_validates() {
        let ok: BoundingBox =
            serde_json::from_str(r#"{"minLat":0,"minLon":0,"maxLat":2,"maxLon":2}"#).unwrap();
        assert_eq!(ok, unit_box());

        let bad = serde_json::from_str::<BoundingBox>(
            r#"{"minLat":2,"minLon":0,"maxLat":0,"maxLon":2}"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn cells_partition_the_box_exactly() {
        let bbox = BoundingBox::new(23.7, 90.3, 23.9, 90.5).unwrap();
        for (rows, cols) in [(1, 1), (3, 7), (10, 10), (13, 5)] {
            let grid = GeoGrid::build(bbox, Resolution::new(rows, cols)).unwrap();
            assert_eq!(grid.cells().count(), (rows * cols) as usize);

            for cell in grid.cells() {
                let b = cell.bounds;
                assert!(b.min_lat() < b.max_lat() && b.min_lon() < b.max_lon());

                if cell.row == 0 {
                    assert_eq!(b.min_lat(), bbox.min_lat());
                }
                if cell.col == 0 {
                    assert_eq!(b.min_lon(), bbox.min_lon());
                }
                match grid.cell_at(cell.row + 1, cell.col) {
                    Some(north) => assert_eq!(b.max_lat(), north.bounds.min_lat()),
                    None => assert_eq!(b.max_lat(), bbox.max_lat()),
                }
                match grid.cell_at(cell.row, cell.col + 1) {
                    Some(east) => assert_eq!(b.max_lon(), east.bounds.min_lon()),
                    None => assert_eq!(b.max_lon(), bbox.max_lon()),
                }
            }
        }
    }

    #[test]
    fn cell_for_agrees_with_cell_bounds() {
        let grid = GeoGrid::build(
            BoundingBox::new(23.7, 90.3, 23.9, 90.5).unwrap(),
            Resolution::new(7, 9),
        )
        .unwrap();

        for cell in grid.cells() {
            let b = cell.bounds;
            // South-west corner is owned by the cell itself.
            assert_eq!(grid.cell_for(b.min_lat(), b.min_lon()).unwrap().id, cell.id);
            let c = cell.center();
            assert_eq!(grid.cell_for(c.y(), c.x()).unwrap().id, cell.id);
        }
    }

    #[test]
    fn outer_edges_belong_to_last_row_and_col() {
        let grid = GeoGrid::build(unit_box(), Resolution::new(2, 2)).unwrap();
        assert_eq!(grid.cell_for(2.0, 2.0).unwrap().id, CellId(3));
        assert_eq!(grid.cell_for(1.0, 1.0).unwrap().id, CellId(3));
        assert_eq!(grid.cell_for(0.0, 2.0).unwrap().id, CellId(1));
    }

    #[test]
    fn cell_for_outside_box_is_none() {
        let grid = GeoGrid::build(unit_box(), Resolution::new(2, 2)).unwrap();
        assert!(grid.cell_for(-0.1, 1.0).is_none());
        assert!(grid.cell_for(1.0, 2.1).is_none());
        assert!(grid.cell_for(f64::NAN, 1.0).is_none());
    }

    #[test]
    fn cell_ids_are_deterministic() {
        let a = GeoGrid::build(unit_box(), Resolution::new(2, 2)).unwrap();
        let b = GeoGrid::build(unit_box(), Resolution::new(2, 2)).unwrap();

        let first = a.cell_for(0.5, 0.5).unwrap();
        assert_eq!(first.id, a.cell_for(0.5, 0.5).unwrap().id);
        assert_eq!(first.id, b.cell_for(0.5, 0.5).unwrap().id);
        assert_eq!((first.row, first.col), (0, 0));

        let other = a.cell_for(1.5, 1.5).unwrap();
        assert_ne!(first.id, other.id);
        assert_eq!((other.row, other.col), (1, 1));
    }

    #[test]
    fn neighbors_are_row_major_and_clipped() {
        let grid = GeoGrid::build(unit_box(), Resolution::new(4, 4)).unwrap();

        let corner: Vec<u32> = grid
            .neighbors_of(CellId(0), 1)
            .iter()
            .map(|c| c.id.0)
            .collect();
        assert_eq!(corner, vec![0, 1, 4, 5]);

        let middle: Vec<u32> = grid
            .neighbors_of(CellId(5), 1)
            .iter()
            .map(|c| c.id.0)
            .collect();
        assert_eq!(middle, vec![0, 1, 2, 4, 5, 6, 8, 9, 10]);

        assert_eq!(grid.neighbors_of(CellId(5), 0).len(), 1);
        assert_eq!(grid.neighbors_of(CellId(5), 10).len(), 16);
        assert!(grid.neighbors_of(CellId(16), 1).is_empty());
    }

    #[test]
    fn cell_polygon_is_closed_ring() {
        let grid = GeoGrid::build(unit_box(), Resolution::new(2, 2)).unwrap();
        let poly = grid.cell(CellId(0)).unwrap().polygon();
        let ring = &poly.exterior().0;
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
    }
}
