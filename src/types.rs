use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Geographic coordinate in decimal degrees (WGS84)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Shift by a number of degrees in each direction
    pub fn offset(&self, dlat: f64, dlon: f64) -> Self {
        Self::new(self.lat + dlat, self.lon + dlon)
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// Grow the box by `margin` degrees on every side
    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min_lon: self.min_lon - margin,
            max_lon: self.max_lon + margin,
            min_lat: self.min_lat - margin,
            max_lat: self.max_lat + margin,
        }
    }

    pub fn contains(&self, point: &GeoPoint) -> bool {
        point.lat >= self.min_lat
            && point.lat <= self.max_lat
            && point.lon >= self.min_lon
            && point.lon <= self.max_lon
    }
}

/// Image footprint given by its four corner coordinates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Corners {
    pub upper_left: GeoPoint,
    pub upper_right: GeoPoint,
    pub lower_left: GeoPoint,
    pub lower_right: GeoPoint,
}

impl Corners {
    pub fn bounding_box(&self) -> BoundingBox {
        let pts = self.ring();
        BoundingBox {
            min_lon: pts.iter().map(|p| p.lon).fold(f64::INFINITY, f64::min),
            max_lon: pts.iter().map(|p| p.lon).fold(f64::NEG_INFINITY, f64::max),
            min_lat: pts.iter().map(|p| p.lat).fold(f64::INFINITY, f64::min),
            max_lat: pts.iter().map(|p| p.lat).fold(f64::NEG_INFINITY, f64::max),
        }
    }

    pub fn center(&self) -> GeoPoint {
        let pts = self.ring();
        GeoPoint::new(
            pts.iter().map(|p| p.lat).sum::<f64>() / 4.0,
            pts.iter().map(|p| p.lon).sum::<f64>() / 4.0,
        )
    }

    /// Corners in ring order (UL, UR, LR, LL)
    fn ring(&self) -> [GeoPoint; 4] {
        [
            self.upper_left,
            self.upper_right,
            self.lower_right,
            self.lower_left,
        ]
    }

    /// Point-in-polygon test against the footprint quadrilateral
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let ring = self.ring();
        let mut inside = false;
        let mut j = ring.len() - 1;
        for i in 0..ring.len() {
            let (pi, pj) = (ring[i], ring[j]);
            if (pi.lat > point.lat) != (pj.lat > point.lat) {
                let cross_lon =
                    (pj.lon - pi.lon) * (point.lat - pi.lat) / (pj.lat - pi.lat) + pi.lon;
                if point.lon < cross_lon {
                    inside = !inside;
                }
            }
            j = i;
        }
        inside
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Build from the six-element affine array used by GDAL
    pub fn from_array(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    /// Integer (row, col) of the pixel containing map coordinate (x, y).
    /// Rotation terms are assumed zero (north-up imagery).
    pub fn pixel_of(&self, x: f64, y: f64) -> (i64, i64) {
        let col = ((x - self.top_left_x) / self.pixel_width).floor() as i64;
        let row = ((y - self.top_left_y) / self.pixel_height).floor() as i64;
        (row, col)
    }
}

/// Satellite sensor family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorFamily {
    Landsat5,
    Landsat7,
    Landsat8,
    Landsat9,
}

impl SensorFamily {
    /// Derive from a scene identifier prefix (LC08, LE07, ...)
    pub fn from_scene_id(scene_id: &str) -> CalResult<Self> {
        let prefix: String = scene_id.chars().take(4).collect::<String>().to_uppercase();
        match prefix.as_str() {
            "LT05" => Ok(SensorFamily::Landsat5),
            "LE07" => Ok(SensorFamily::Landsat7),
            "LC08" => Ok(SensorFamily::Landsat8),
            "LC09" => Ok(SensorFamily::Landsat9),
            // Pre-collection identifiers (LC80130332014165LGN00)
            _ => match prefix.get(..3).unwrap_or(prefix.as_str()) {
                "LT5" => Ok(SensorFamily::Landsat5),
                "LE7" => Ok(SensorFamily::Landsat7),
                "LC8" => Ok(SensorFamily::Landsat8),
                "LC9" => Ok(SensorFamily::Landsat9),
                _ => Err(CalError::InvalidInput(format!(
                    "cannot determine sensor from scene id '{}'",
                    scene_id
                ))),
            },
        }
    }

    /// Derive from the MTL `SPACECRAFT_ID` value
    pub fn from_spacecraft_id(id: &str) -> CalResult<Self> {
        match id.trim().to_uppercase().as_str() {
            "LANDSAT_5" => Ok(SensorFamily::Landsat5),
            "LANDSAT_7" => Ok(SensorFamily::Landsat7),
            "LANDSAT_8" => Ok(SensorFamily::Landsat8),
            "LANDSAT_9" => Ok(SensorFamily::Landsat9),
            other => Err(CalError::InputParseError(format!(
                "unknown spacecraft '{}'",
                other
            ))),
        }
    }

    /// Thermal bands carried by the sensor
    pub fn thermal_bands(&self) -> &'static [u8] {
        match self {
            SensorFamily::Landsat5 | SensorFamily::Landsat7 => &[6],
            SensorFamily::Landsat8 | SensorFamily::Landsat9 => &[10, 11],
        }
    }

    /// Short tag used in file names (RSR curves, run directories)
    pub fn tag(&self) -> &'static str {
        match self {
            SensorFamily::Landsat5 => "LT05",
            SensorFamily::Landsat7 => "LE07",
            SensorFamily::Landsat8 => "LC08",
            SensorFamily::Landsat9 => "LC09",
        }
    }
}

impl std::fmt::Display for SensorFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Vertical atmospheric profile, stored bottom-up as parallel columns.
///
/// Units: height in km, pressure in hPa, temperature in K, relative
/// humidity in percent.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AtmosphericProfile {
    pub height: Vec<f64>,
    pub pressure: Vec<f64>,
    pub temperature: Vec<f64>,
    pub rel_humidity: Vec<f64>,
}

/// One layer of an [`AtmosphericProfile`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Layer {
    pub height: f64,
    pub pressure: f64,
    pub temperature: f64,
    pub rel_humidity: f64,
}

impl AtmosphericProfile {
    pub fn new(
        height: Vec<f64>,
        pressure: Vec<f64>,
        temperature: Vec<f64>,
        rel_humidity: Vec<f64>,
    ) -> CalResult<Self> {
        let n = height.len();
        if pressure.len() != n || temperature.len() != n || rel_humidity.len() != n {
            return Err(CalError::InvalidInput(format!(
                "profile columns have mismatched lengths ({}, {}, {}, {})",
                n,
                pressure.len(),
                temperature.len(),
                rel_humidity.len()
            )));
        }
        Ok(Self {
            height,
            pressure,
            temperature,
            rel_humidity,
        })
    }

    pub fn from_layers(layers: &[Layer]) -> Self {
        Self {
            height: layers.iter().map(|l| l.height).collect(),
            pressure: layers.iter().map(|l| l.pressure).collect(),
            temperature: layers.iter().map(|l| l.temperature).collect(),
            rel_humidity: layers.iter().map(|l| l.rel_humidity).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.height.len()
    }

    pub fn is_empty(&self) -> bool {
        self.height.is_empty()
    }

    pub fn layer(&self, i: usize) -> Layer {
        Layer {
            height: self.height[i],
            pressure: self.pressure[i],
            temperature: self.temperature[i],
            rel_humidity: self.rel_humidity[i],
        }
    }

    pub fn layers(&self) -> impl Iterator<Item = Layer> + '_ {
        (0..self.len()).map(move |i| self.layer(i))
    }

    pub fn push(&mut self, layer: Layer) {
        self.height.push(layer.height);
        self.pressure.push(layer.pressure);
        self.temperature.push(layer.temperature);
        self.rel_humidity.push(layer.rel_humidity);
    }

    pub fn insert(&mut self, index: usize, layer: Layer) {
        self.height.insert(index, layer.height);
        self.pressure.insert(index, layer.pressure);
        self.temperature.insert(index, layer.temperature);
        self.rel_humidity.insert(index, layer.rel_humidity);
    }

    pub fn remove(&mut self, index: usize) {
        self.height.remove(index);
        self.pressure.remove(index);
        self.temperature.remove(index);
        self.rel_humidity.remove(index);
    }

    /// Height of the highest layer, if any
    pub fn top_height(&self) -> Option<f64> {
        self.height.last().copied()
    }

    /// Check the assembled-profile invariants: strictly increasing
    /// height, strictly decreasing pressure, RH within [0, 100] and
    /// finite values everywhere.
    pub fn validate(&self) -> CalResult<()> {
        if self.is_empty() {
            return Err(CalError::InvalidInput("profile has no layers".to_string()));
        }
        for (i, layer) in self.layers().enumerate() {
            let values = [
                layer.height,
                layer.pressure,
                layer.temperature,
                layer.rel_humidity,
            ];
            if values.iter().any(|v| !v.is_finite()) {
                return Err(CalError::InvalidInput(format!(
                    "non-finite value in profile layer {}",
                    i
                )));
            }
            if !(0.0..=100.0).contains(&layer.rel_humidity) {
                return Err(CalError::InvalidInput(format!(
                    "relative humidity {} out of range at layer {}",
                    layer.rel_humidity, i
                )));
            }
            if i > 0 {
                if self.height[i] <= self.height[i - 1] {
                    return Err(CalError::InvalidInput(format!(
                        "height not increasing at layer {} ({} <= {})",
                        i,
                        self.height[i],
                        self.height[i - 1]
                    )));
                }
                if self.pressure[i] >= self.pressure[i - 1] {
                    return Err(CalError::InvalidInput(format!(
                        "pressure not decreasing at layer {} ({} >= {})",
                        i,
                        self.pressure[i],
                        self.pressure[i - 1]
                    )));
                }
            }
        }
        Ok(())
    }

    /// Write the profile as four whitespace-separated columns
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.len() * 48);
        for layer in self.layers() {
            let _ = writeln!(
                out,
                "{:10.4} {:12.5} {:9.3} {:8.3}",
                layer.height, layer.pressure, layer.temperature, layer.rel_humidity
            );
        }
        out
    }

    /// Parse the four-column text format written by [`to_text`](Self::to_text),
    /// which is also the standard-atmosphere file format.
    pub fn from_text(text: &str) -> CalResult<Self> {
        let mut profile = AtmosphericProfile::default();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<f64> = line
                .split_whitespace()
                .map(|s| s.parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|e| {
                    CalError::InputParseError(format!("profile line {}: {}", lineno + 1, e))
                })?;
            if fields.len() < 4 {
                return Err(CalError::InputParseError(format!(
                    "profile line {} has {} columns, expected 4",
                    lineno + 1,
                    fields.len()
                )));
            }
            profile.push(Layer {
                height: fields[0],
                pressure: fields[1],
                temperature: fields[2],
                rel_humidity: fields[3],
            });
        }
        Ok(profile)
    }
}

/// Buoy-derived surface layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceLayer {
    /// Barometric pressure in hPa
    pub pressure: f64,
    /// Air temperature in °C
    pub air_temp_c: f64,
    /// Dewpoint in °C
    pub dewpoint_c: f64,
    /// Relative humidity in percent
    pub rel_humidity: f64,
}

/// Cooperative cancellation flag shared between the caller and
/// long-running stages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Return `Err(Cancelled)` if a cancel has been raised
    pub fn check(&self) -> CalResult<()> {
        if self.is_cancelled() {
            Err(CalError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-buoy result row produced by the scene orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct BuoyResult {
    pub scene_id: String,
    pub buoy_id: String,
    pub overpass: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
    /// Bulk water temperature in K
    pub bulk_temp: f64,
    /// Skin temperature in K
    pub skin_temp: f64,
    /// Band number and modeled radiance [W m-2 sr-1 um-1]
    pub modeled: Vec<(u8, f64)>,
    /// Band number and image-derived radiance [W m-2 sr-1 um-1]
    pub measured: Vec<(u8, f64)>,
    /// Band number and modeled-radiance standard deviation
    pub sigma: Vec<(u8, f64)>,
}

/// Error types for calibration processing
#[derive(Debug, thiserror::Error)]
pub enum CalError {
    #[error("remote fetch failed: {0}")]
    RemoteFetchFailed(String),

    #[error("input parse error: {0}")]
    InputParseError(String),

    #[error("insufficient atmosphere coverage: {0}")]
    InsufficientAtmosphereCoverage(String),

    #[error("buoy out of range: {0}")]
    BuoyOutOfRange(String),

    #[error("no buoy in scene {0}")]
    NoBuoyInScene(String),

    #[error("RT execution failed: {0}")]
    RtExecutionFailed(String),

    #[error("RT output missing: {0}")]
    RtOutputMissing(String),

    #[error("RT output corrupt: {0}")]
    RtOutputCorrupt(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("degenerate quadrilateral (alpha={alpha:.3}, beta={beta:.3})")]
    Degenerate { alpha: f64, beta: f64 },

    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalError {
    /// Error class name used in user-facing diagnostics
    pub fn class(&self) -> &'static str {
        match self {
            CalError::RemoteFetchFailed(_) => "RemoteFetchFailed",
            CalError::InputParseError(_) => "InputParseError",
            CalError::InsufficientAtmosphereCoverage(_) => "InsufficientAtmosphereCoverage",
            CalError::BuoyOutOfRange(_) => "BuoyOutOfRange",
            CalError::NoBuoyInScene(_) => "NoBuoyInScene",
            CalError::RtExecutionFailed(_) => "RTExecutionFailed",
            CalError::RtOutputMissing(_) => "RTOutputMissing",
            CalError::RtOutputCorrupt(_) => "RTOutputCorrupt",
            CalError::OutOfRange(_) => "OutOfRange",
            CalError::InvalidInput(_) => "InvalidInput",
            CalError::Degenerate { .. } => "Degenerate",
            CalError::Cancelled => "Cancelled",
            CalError::Config(_) => "ConfigError",
            CalError::Io(_) => "IoError",
        }
    }
}

/// Result type for calibration operations
pub type CalResult<T> = Result<T, CalError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn square_corners() -> Corners {
        Corners {
            upper_left: GeoPoint::new(1.0, 0.0),
            upper_right: GeoPoint::new(1.0, 1.0),
            lower_left: GeoPoint::new(0.0, 0.0),
            lower_right: GeoPoint::new(0.0, 1.0),
        }
    }

    #[test]
    fn test_corners_contains() {
        let corners = square_corners();
        assert!(corners.contains(&GeoPoint::new(0.5, 0.5)));
        assert!(!corners.contains(&GeoPoint::new(1.5, 0.5)));
        assert!(!corners.contains(&GeoPoint::new(0.5, -0.1)));
    }

    #[test]
    fn test_profile_text_roundtrip() {
        let profile = AtmosphericProfile::new(
            vec![0.0, 1.25, 3.5],
            vec![1013.25, 898.7461, 650.0],
            vec![293.15, 285.5, 270.125],
            vec![80.0, 55.125, 10.0],
        )
        .unwrap();

        let text = profile.to_text();
        let parsed = AtmosphericProfile::from_text(&text).unwrap();
        assert_eq!(parsed.len(), 3);
        // Re-writing must reproduce the file byte for byte
        assert_eq!(parsed.to_text(), text);
    }

    #[test]
    fn test_profile_validate() {
        let good = AtmosphericProfile::new(
            vec![0.0, 1.0],
            vec![1000.0, 900.0],
            vec![290.0, 285.0],
            vec![50.0, 40.0],
        )
        .unwrap();
        assert!(good.validate().is_ok());

        let mut bad = good.clone();
        bad.pressure[1] = 1001.0;
        assert!(matches!(bad.validate(), Err(CalError::InvalidInput(_))));

        let mut nan = good.clone();
        nan.temperature[0] = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_sensor_family_from_scene_id() {
        assert_eq!(
            SensorFamily::from_scene_id("LC80130332014165LGN00").unwrap(),
            SensorFamily::Landsat8
        );
        assert!(SensorFamily::from_scene_id("S1A_IW_SLC").is_err());
        assert_eq!(
            SensorFamily::from_scene_id("LC08_L1TP_013033_20140614_20170421_01_T1").unwrap(),
            SensorFamily::Landsat8
        );
        assert_eq!(SensorFamily::Landsat7.thermal_bands(), &[6]);
    }

    #[test]
    fn test_cancel_token() {
        let token = CancelToken::new();
        let shared = token.clone();
        assert!(token.check().is_ok());
        shared.cancel();
        assert!(matches!(token.check(), Err(CalError::Cancelled)));
    }
}
