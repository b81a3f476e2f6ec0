use serde::{Deserialize, Serialize};

use crate::error::{PeatError, Result};

/// Affine georeference of a north-up grid plus its coordinate-reference id.
///
/// Pixel `(row, col)` has its upper-left corner at
/// `(origin_x + col * pixel_size, origin_y + row * pixel_size)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoRef {
    pub origin_x: f64,
    pub origin_y: f64,
    /// Pixel edge length in CRS units (metres for EPSG:3857).
    pub pixel_size: f64,
    pub crs: String,
}

impl GeoRef {
    pub fn new(origin_x: f64, origin_y: f64, pixel_size: f64, crs: impl Into<String>) -> Self {
        Self { origin_x, origin_y, pixel_size, crs: crs.into() }
    }
}

impl Default for GeoRef {
    fn default() -> Self {
        Self::new(0.0, 0.0, 30.0, "EPSG:3857")
    }
}

/// Configured grid domain: dimensions plus georeference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_size: f64,
    pub crs: String,
}

impl GridSpec {
    pub fn georef(&self) -> GeoRef {
        GeoRef::new(self.origin_x, self.origin_y, self.pixel_size, self.crs.clone())
    }

    pub fn zeros(&self) -> Grid<f32> {
        Grid::zeros(self.width, self.height, self.georef())
    }

    /// `Err(ShapeMismatch)` unless `grid` covers this domain.
    pub fn check<T>(&self, grid: &Grid<T>) -> Result<()> {
        if grid.width == self.width && grid.height == self.height {
            Ok(())
        } else {
            Err(PeatError::ShapeMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: grid.width,
                actual_height: grid.height,
            })
        }
    }
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            origin_x: 0.0,
            origin_y: 0.0,
            pixel_size: 30.0,
            crs: "EPSG:3857".to_string(),
        }
    }
}

/// A 2D grid over a fixed height×width domain, row-major.
///
/// Displacement, deficit and dryness grids use `f32`; fire masks use `u8`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T = f32> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub georef: GeoRef,
}

/// Binary burn mask (0 = unburnt, 1 = fire).
pub type FireMask = Grid<u8>;

impl<T: Copy> Grid<T> {
    /// Create a grid filled with the given value.
    pub fn new(width: usize, height: usize, georef: GeoRef, fill: T) -> Self {
        Self { data: vec![fill; width * height], width, height, georef }
    }

    /// Wrap existing row-major values. Fails when `data` does not cover the domain.
    pub fn from_vec(width: usize, height: usize, georef: GeoRef, data: Vec<T>) -> Result<Self> {
        if data.len() != width * height {
            return Err(PeatError::InvalidParameter(format!(
                "grid data has {} values, {width}x{height} requires {}",
                data.len(),
                width * height
            )));
        }
        Ok(Self { data, width, height, georef })
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> T {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: T) {
        self.data[row * self.width + col] = val;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// `Err(ShapeMismatch)` unless `other` covers exactly the same domain.
    /// Grids are never broadcast or cropped to fit.
    pub fn ensure_same_shape<U>(&self, other: &Grid<U>) -> Result<()> {
        if self.width == other.width && self.height == other.height {
            Ok(())
        } else {
            Err(PeatError::ShapeMismatch {
                expected_width: self.width,
                expected_height: self.height,
                actual_width: other.width,
                actual_height: other.height,
            })
        }
    }

    /// Element-wise map into a new grid sharing this grid's georeference.
    pub fn map<U, F: FnMut(T) -> U>(&self, f: F) -> Grid<U> {
        Grid {
            data: self.data.iter().copied().map(f).collect(),
            width: self.width,
            height: self.height,
            georef: self.georef.clone(),
        }
    }
}

impl Grid<f32> {
    pub fn zeros(width: usize, height: usize, georef: GeoRef) -> Self {
        Self::new(width, height, georef, 0.0)
    }

    /// Mean of the finite values; `NaN` when none are finite.
    pub fn mean(&self) -> f32 {
        let (sum, n) = self
            .data
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
        if n == 0 { f32::NAN } else { (sum / n as f64) as f32 }
    }

    pub fn min_value(&self) -> f32 {
        self.data.iter().cloned().fold(f32::INFINITY, f32::min)
    }

    pub fn max_value(&self) -> f32 {
        self.data.iter().cloned().fold(f32::NEG_INFINITY, f32::max)
    }
}

impl Grid<u8> {
    /// Fraction of non-zero cells, 0 for an empty grid.
    pub fn active_fraction(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().filter(|&&v| v != 0).count() as f32 / self.data.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_are_row_major() {
        let mut g = Grid::zeros(4, 3, GeoRef::default());
        g.set(2, 1, 7.0);
        assert_eq!(g.data[2 * 4 + 1], 7.0);
        assert_eq!(g.get(2, 1), 7.0);
    }

    #[test]
    fn shape_check_rejects_transposed_grid() {
        let a = Grid::zeros(4, 3, GeoRef::default());
        let b: FireMask = Grid::new(3, 4, GeoRef::default(), 0);
        assert!(matches!(a.ensure_same_shape(&b), Err(PeatError::ShapeMismatch { .. })));
        assert!(a.ensure_same_shape(&a.clone()).is_ok());
    }

    #[test]
    fn from_vec_rejects_short_data() {
        assert!(Grid::from_vec(2, 2, GeoRef::default(), vec![0.0f32; 3]).is_err());
    }

    #[test]
    fn mean_skips_nan() {
        let g = Grid::from_vec(3, 1, GeoRef::default(), vec![1.0, f32::NAN, 3.0]).unwrap();
        assert_eq!(g.mean(), 2.0);
        assert!(Grid::zeros(0, 0, GeoRef::default()).mean().is_nan());
    }

    #[test]
    fn active_fraction_counts_fire_pixels() {
        let m: FireMask = Grid::from_vec(2, 2, GeoRef::default(), vec![0, 1, 1, 0]).unwrap();
        assert_eq!(m.active_fraction(), 0.5);
    }
}
