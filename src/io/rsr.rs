use crate::core::spectral::Rsr;
use crate::types::{CalError, CalResult, SensorFamily};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Nadir water reflectance across the thermal window (μm, reflectance)
const WATER_REFLECTANCE: [(f64, f64); 15] = [
    (7.5, 0.021),
    (8.0, 0.018),
    (8.5, 0.016),
    (9.0, 0.015),
    (9.5, 0.012),
    (10.0, 0.010),
    (10.5, 0.009),
    (11.0, 0.009),
    (11.5, 0.011),
    (12.0, 0.015),
    (12.5, 0.019),
    (13.0, 0.025),
    (13.5, 0.030),
    (14.0, 0.035),
    (14.5, 0.038),
];

/// Split a data line on whitespace or commas into numbers
fn parse_numbers(line: &str, lineno: usize, what: &str) -> CalResult<Vec<f64>> {
    line.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|e| {
                CalError::InputParseError(format!("{} line {}: {}", what, lineno + 1, e))
            })
        })
        .collect()
}

/// Parse a two-column `(wavelength μm, response)` RSR file. Lines starting
/// with `#` are comments; rows are sorted by wavelength.
pub fn parse_rsr(content: &str) -> CalResult<Rsr> {
    let mut rows: Vec<(f64, f64)> = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = parse_numbers(line, lineno, "RSR")?;
        if values.len() < 2 {
            return Err(CalError::InputParseError(format!(
                "RSR line {} has {} columns",
                lineno + 1,
                values.len()
            )));
        }
        rows.push((values[0], values[1]));
    }
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    rows.dedup_by(|a, b| a.0 == b.0);
    let (wavelengths, response) = rows.into_iter().unzip();
    Rsr::new(wavelengths, response).map_err(|e| CalError::InputParseError(e.to_string()))
}

/// Nominal trapezoidal response for a thermal band: band edges (μm) with a
/// 0.05 μm ramp on each side
pub fn nominal_rsr(family: SensorFamily, band: u8) -> CalResult<Rsr> {
    let (lo, hi) = match (family, band) {
        (SensorFamily::Landsat8 | SensorFamily::Landsat9, 10) => (10.60, 11.19),
        (SensorFamily::Landsat8 | SensorFamily::Landsat9, 11) => (11.50, 12.51),
        (SensorFamily::Landsat5 | SensorFamily::Landsat7, 6) => (10.40, 12.50),
        _ => {
            return Err(CalError::InvalidInput(format!(
                "{} has no thermal band {}",
                family, band
            )))
        }
    };
    let ramp = 0.05;
    Rsr::new(
        vec![lo - ramp, lo, hi, hi + ramp],
        vec![0.0, 1.0, 1.0, 0.0],
    )
}

/// Band RSR curves for one sensor, loaded once and shared read-only
#[derive(Debug, Clone, Default)]
pub struct RsrLibrary {
    curves: HashMap<(SensorFamily, u8), Rsr>,
}

impl RsrLibrary {
    /// Path of a band curve under `<dir>`: `<family>_b<band>.txt`
    pub fn curve_path(dir: &Path, family: SensorFamily, band: u8) -> PathBuf {
        dir.join(format!("{}_b{}.txt", family.tag(), band))
    }

    /// Load curves for `bands` from `dir`. A missing file is a
    /// configuration error unless `allow_nominal` is set, in which case the
    /// nominal band shape stands in.
    pub fn load(
        dir: &Path,
        family: SensorFamily,
        bands: &[u8],
        allow_nominal: bool,
    ) -> CalResult<Self> {
        let mut curves = HashMap::new();
        for &band in bands {
            let path = Self::curve_path(dir, family, band);
            let rsr = if path.exists() {
                log::debug!("Reading RSR {}", path.display());
                parse_rsr(&std::fs::read_to_string(&path)?)?
            } else if allow_nominal {
                log::warn!(
                    "RSR file {} not found, using nominal {} band {} response",
                    path.display(),
                    family,
                    band
                );
                nominal_rsr(family, band)?
            } else {
                return Err(CalError::Config(format!(
                    "RSR file {} for {} band {} not found",
                    path.display(),
                    family,
                    band
                )));
            };
            curves.insert((family, band), rsr);
        }
        Ok(Self { curves })
    }

    pub fn insert(&mut self, family: SensorFamily, band: u8, rsr: Rsr) {
        self.curves.insert((family, band), rsr);
    }

    pub fn get(&self, family: SensorFamily, band: u8) -> CalResult<&Rsr> {
        self.curves.get(&(family, band)).ok_or_else(|| {
            CalError::InvalidInput(format!("no RSR loaded for {} band {}", family, band))
        })
    }
}

/// Spectral reflectance of the water surface
#[derive(Debug, Clone, PartialEq)]
pub struct WaterReflectance {
    pub wavelengths: Vec<f64>,
    pub reflectance: Vec<f64>,
}

impl WaterReflectance {
    /// Parse a reflectance table: three header lines, then
    /// `(wavelength μm, reflectance)` rows
    pub fn parse(content: &str) -> CalResult<Self> {
        let mut wavelengths = Vec::new();
        let mut reflectance = Vec::new();
        for (lineno, line) in content.lines().enumerate().skip(3) {
            if line.trim().is_empty() {
                continue;
            }
            let values = parse_numbers(line, lineno, "reflectance")?;
            if values.len() < 2 {
                return Err(CalError::InputParseError(format!(
                    "reflectance line {} has {} columns",
                    lineno + 1,
                    values.len()
                )));
            }
            wavelengths.push(values[0]);
            reflectance.push(values[1]);
        }
        Self::new(wavelengths, reflectance)
    }

    pub fn new(wavelengths: Vec<f64>, reflectance: Vec<f64>) -> CalResult<Self> {
        if wavelengths.len() < 2 || wavelengths.len() != reflectance.len() {
            return Err(CalError::InputParseError(
                "reflectance table needs at least two (wavelength, value) rows".to_string(),
            ));
        }
        if wavelengths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CalError::InputParseError(
                "reflectance wavelengths must ascend".to_string(),
            ));
        }
        if reflectance.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(CalError::InputParseError(
                "reflectance outside [0, 1]".to_string(),
            ));
        }
        Ok(Self {
            wavelengths,
            reflectance,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        log::info!("Reading water reflectance: {}", path.as_ref().display());
        Self::parse(&std::fs::read_to_string(path)?)
    }

    /// Built-in nadir water table
    pub fn water() -> &'static WaterReflectance {
        static TABLE: OnceLock<WaterReflectance> = OnceLock::new();
        TABLE.get_or_init(|| WaterReflectance {
            wavelengths: WATER_REFLECTANCE.iter().map(|r| r.0).collect(),
            reflectance: WATER_REFLECTANCE.iter().map(|r| r.1).collect(),
        })
    }
}
