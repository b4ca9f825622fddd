//! Band radiance measured by the sensor at a buoy location.

use crate::core::projection::to_utm;
use crate::types::{CalError, CalResult, GeoPoint, GeoTransform};
use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Half-width of the averaging window (3×3)
const WINDOW_RADIUS: i64 = 1;

/// Linear DN → radiance calibration for one band
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub gain: f64,
    pub offset: f64,
}

impl Calibration {
    pub fn new(gain: f64, offset: f64) -> Self {
        Self { gain, offset }
    }

    pub fn apply(&self, dn: f64) -> f64 {
        self.gain * dn + self.offset
    }
}

/// A single-band image in UTM map coordinates
#[derive(Debug, Clone)]
pub struct BandImage {
    pub data: Array2<f32>,
    pub geo_transform: GeoTransform,
    pub utm_zone: u8,
}

impl BandImage {
    pub fn new(data: Array2<f32>, geo_transform: GeoTransform, utm_zone: u8) -> Self {
        Self {
            data,
            geo_transform,
            utm_zone,
        }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Pixel (row, col) containing `point`, projected into the image zone
    pub fn pixel_for(&self, point: &GeoPoint) -> CalResult<(usize, usize)> {
        let projected = to_utm(point, self.utm_zone)?;
        let (row, col) = self
            .geo_transform
            .pixel_of(projected.easting, projected.northing);
        let (rows, cols) = self.shape();
        if row < 0 || col < 0 || row >= rows as i64 || col >= cols as i64 {
            return Err(CalError::OutOfRange(format!(
                "({:.5}, {:.5}) maps to pixel ({}, {}) outside {}x{} raster",
                point.lat, point.lon, row, col, rows, cols
            )));
        }
        Ok((row as usize, col as usize))
    }

    /// Mean digital count of the 3×3 window centred on (row, col)
    pub fn window_mean(&self, row: usize, col: usize) -> CalResult<f64> {
        let (rows, cols) = self.shape();
        let (r, c) = (row as i64, col as i64);
        if r - WINDOW_RADIUS < 0
            || c - WINDOW_RADIUS < 0
            || r + WINDOW_RADIUS >= rows as i64
            || c + WINDOW_RADIUS >= cols as i64
        {
            return Err(CalError::OutOfRange(format!(
                "3x3 window at pixel ({}, {}) crosses the {}x{} raster edge",
                row, col, rows, cols
            )));
        }

        let window = self.data.slice(s![row - 1..=row + 1, col - 1..=col + 1]);
        // DN 0 is the product fill value
        if window.iter().any(|&dn| dn == 0.0 || !dn.is_finite()) {
            return Err(CalError::OutOfRange(format!(
                "3x3 window at pixel ({}, {}) contains fill",
                row, col
            )));
        }
        let sum: f64 = window.iter().map(|&dn| dn as f64).sum();
        Ok(sum / window.len() as f64)
    }

    /// Calibrated radiance of the window centred on the pixel containing `point`
    pub fn radiance_at(&self, point: &GeoPoint, calibration: &Calibration) -> CalResult<f64> {
        let (row, col) = self.pixel_for(point)?;
        let dc = self.window_mean(row, col)?;
        let radiance = calibration.apply(dc);
        log::debug!(
            "Pixel ({}, {}) mean DC {:.2} -> radiance {:.4}",
            row,
            col,
            dc,
            radiance
        );
        Ok(radiance)
    }
}
