//! Spectral quantities with their units attached.
//!
//! Every spectrum carries a [`WavelengthGrid`] in micrometers and a
//! [`RadianceUnit`]. Unit changes go through [`Spectrum::to_unit`] only.

use crate::core::numerics::{interp_many, trapz};
use crate::types::{CalError, CalResult};

/// Spectral radiance units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadianceUnit {
    /// W cm⁻² sr⁻¹ μm⁻¹ (RT engine output)
    WPerCm2SrUm,
    /// W m⁻² sr⁻¹ μm⁻¹ (band radiance, image calibration)
    WPerM2SrUm,
    /// W m⁻² sr⁻¹ m⁻¹ (SI, Planck function)
    WPerM2SrM,
}

impl RadianceUnit {
    /// Multiplier converting a value in this unit to W m⁻² sr⁻¹ μm⁻¹
    fn to_w_m2_sr_um(self) -> f64 {
        match self {
            RadianceUnit::WPerCm2SrUm => 1e4,
            RadianceUnit::WPerM2SrUm => 1.0,
            RadianceUnit::WPerM2SrM => 1e-6,
        }
    }

    /// Conversion factor from `self` to `target`
    pub fn factor_to(self, target: RadianceUnit) -> f64 {
        self.to_w_m2_sr_um() / target.to_w_m2_sr_um()
    }
}

impl std::fmt::Display for RadianceUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadianceUnit::WPerCm2SrUm => write!(f, "W cm-2 sr-1 um-1"),
            RadianceUnit::WPerM2SrUm => write!(f, "W m-2 sr-1 um-1"),
            RadianceUnit::WPerM2SrM => write!(f, "W m-2 sr-1 m-1"),
        }
    }
}

/// Strictly ascending wavelength axis in micrometers
#[derive(Debug, Clone, PartialEq)]
pub struct WavelengthGrid {
    micrometers: Vec<f64>,
}

impl WavelengthGrid {
    pub fn from_micrometers(micrometers: Vec<f64>) -> CalResult<Self> {
        if micrometers.iter().any(|w| !w.is_finite() || *w <= 0.0) {
            return Err(CalError::InvalidInput(
                "wavelengths must be finite and positive".to_string(),
            ));
        }
        if micrometers.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CalError::InvalidInput(
                "wavelength grid must be strictly ascending".to_string(),
            ));
        }
        Ok(Self { micrometers })
    }

    /// Build from wavenumbers in cm⁻¹. The input must be strictly
    /// descending so that the resulting wavelengths ascend.
    pub fn from_wavenumbers(wavenumbers: &[f64]) -> CalResult<Self> {
        if wavenumbers.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(CalError::InvalidInput(
                "wavenumbers must be finite and positive".to_string(),
            ));
        }
        Self::from_micrometers(wavenumbers.iter().map(|v| 1e4 / v).collect())
    }

    pub fn micrometers(&self) -> &[f64] {
        &self.micrometers
    }

    pub fn meters(&self) -> Vec<f64> {
        self.micrometers.iter().map(|w| w * 1e-6).collect()
    }

    pub fn len(&self) -> usize {
        self.micrometers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.micrometers.is_empty()
    }
}

/// Spectral radiance sampled on a wavelength grid
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    grid: WavelengthGrid,
    values: Vec<f64>,
    unit: RadianceUnit,
}

impl Spectrum {
    pub fn new(grid: WavelengthGrid, values: Vec<f64>, unit: RadianceUnit) -> CalResult<Self> {
        if grid.len() != values.len() {
            return Err(CalError::InvalidInput(format!(
                "spectrum has {} values for {} wavelengths",
                values.len(),
                grid.len()
            )));
        }
        Ok(Self { grid, values, unit })
    }

    pub fn grid(&self) -> &WavelengthGrid {
        &self.grid
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn unit(&self) -> RadianceUnit {
        self.unit
    }

    /// Same spectrum expressed in another unit
    pub fn to_unit(&self, unit: RadianceUnit) -> Spectrum {
        let factor = self.unit.factor_to(unit);
        Spectrum {
            grid: self.grid.clone(),
            values: self.values.iter().map(|v| v * factor).collect(),
            unit,
        }
    }
}

/// Relative spectral response of one sensor band
#[derive(Debug, Clone, PartialEq)]
pub struct Rsr {
    wavelengths: Vec<f64>,
    response: Vec<f64>,
}

impl Rsr {
    /// `wavelengths` in μm (ascending), `response` in [0, 1]
    pub fn new(wavelengths: Vec<f64>, response: Vec<f64>) -> CalResult<Self> {
        if wavelengths.len() != response.len() || wavelengths.len() < 2 {
            return Err(CalError::InvalidInput(format!(
                "RSR needs matching wavelength/response columns with at least 2 samples (got {} and {})",
                wavelengths.len(),
                response.len()
            )));
        }
        if wavelengths.windows(2).any(|w| w[1] <= w[0]) {
            return Err(CalError::InvalidInput(
                "RSR wavelengths must be strictly ascending".to_string(),
            ));
        }
        if response.iter().any(|r| !(0.0..=1.0).contains(r)) {
            return Err(CalError::InvalidInput(
                "RSR response must lie within [0, 1]".to_string(),
            ));
        }
        Ok(Self {
            wavelengths,
            response,
        })
    }

    pub fn wavelengths(&self) -> &[f64] {
        &self.wavelengths
    }

    pub fn response(&self) -> &[f64] {
        &self.response
    }

    /// Wavelength range covered by the curve (μm)
    pub fn range(&self) -> (f64, f64) {
        (self.wavelengths[0], self.wavelengths[self.wavelengths.len() - 1])
    }
}

/// Band-weighted radiance `∫ L R dλ / ∫ R dλ` over the RSR's wavelength
/// range. The result is in the spectrum's unit.
pub fn band_radiance(spectrum: &Spectrum, rsr: &Rsr) -> CalResult<f64> {
    let (lo, hi) = rsr.range();
    let (wavelengths, radiance): (Vec<f64>, Vec<f64>) = spectrum
        .grid()
        .micrometers()
        .iter()
        .zip(spectrum.values())
        .filter(|(w, _)| **w >= lo && **w <= hi)
        .map(|(w, v)| (*w, *v))
        .unzip();

    if wavelengths.len() < 2 {
        return Err(CalError::InvalidInput(format!(
            "spectrum has {} samples inside the RSR range [{:.3}, {:.3}] um",
            wavelengths.len(),
            lo,
            hi
        )));
    }

    let response = interp_many(&wavelengths, rsr.wavelengths(), rsr.response())?;
    let weighted: Vec<f64> = radiance.iter().zip(&response).map(|(l, r)| l * r).collect();

    let denominator = trapz(&wavelengths, &response)?;
    if denominator <= 0.0 {
        return Err(CalError::InvalidInput(
            "RSR integrates to zero over the spectral grid".to_string(),
        ));
    }
    Ok(trapz(&wavelengths, &weighted)? / denominator)
}
