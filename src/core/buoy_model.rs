//! Buoy bulk-to-skin temperature model.
//!
//! The skin temperature is derived from a 24-hour window of buoy data
//! centred on the overpass: a wind-dependent cool-skin offset on the mean
//! water temperature plus a damped, time-lagged diurnal term.

use crate::core::numerics::{interp, mean};
use crate::io::buoy::{BuoyRecord, BuoySample};
use crate::types::{CalError, CalResult, GeoPoint, SurfaceLayer};
use chrono::{DateTime, Duration, Utc};

/// Height the wind speed is corrected to (m)
pub const REFERENCE_WIND_HEIGHT_M: f64 = 10.0;

/// Cool-skin offset applied to the average skin temperature (K)
pub const COOL_SKIN_OFFSET: f64 = 0.17;

const KELVIN: f64 = 273.15;

/// Model validity envelope
const WIND_RANGE: (f64, f64) = (1.5, 7.6);
const GRADIENT_RANGE: (f64, f64) = (-1.1, 0.0);
const DAMPING_RANGE: (f64, f64) = (1.0, 6.0);
const LAG_RANGE: (f64, f64) = (0.0, 4.0);

/// Correct a wind speed measured at `height_m` to 10 m with a 1/10 power law
pub fn wind_at_reference_height(speed: f64, height_m: f64) -> f64 {
    speed * (REFERENCE_WIND_HEIGHT_M / height_m).powf(0.1)
}

/// Relative humidity (%) from air temperature and dewpoint (both °C)
pub fn relative_humidity(air_temp_c: f64, dewpoint_c: f64) -> f64 {
    let saturation = |t: f64| (17.625 * t / (243.04 + t)).exp();
    100.0 * saturation(dewpoint_c) / saturation(air_temp_c)
}

/// Wind-dependent model coefficients
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkinCoefficients {
    /// Wind speed at 10 m (m/s)
    pub wind_speed: f64,
    /// Thermal gradient (K/m)
    pub a: f64,
    /// Diurnal damping rate (1/m)
    pub b: f64,
    /// Diurnal lag rate (h/m)
    pub c: f64,
}

impl SkinCoefficients {
    pub fn from_wind(wind_speed: f64) -> Self {
        Self {
            wind_speed,
            a: 0.05 - 0.6 / wind_speed + 0.03 * wind_speed.ln(),
            b: 0.35 + 0.018 * (0.4 * wind_speed).exp(),
            c: 1.32 - 0.64 * wind_speed.ln(),
        }
    }

    fn in_range(value: f64, (lo, hi): (f64, f64)) -> bool {
        value >= lo && value <= hi
    }

    /// Whether the depth-scaled coefficients lie within the fitted envelope
    pub fn within_envelope(&self, depth_m: f64) -> bool {
        Self::in_range(self.a * depth_m, GRADIENT_RANGE)
            && Self::in_range((self.b * depth_m).exp(), DAMPING_RANGE)
            && Self::in_range(self.c * depth_m, LAG_RANGE)
    }

    /// Apply the validity gate. Both the wind range and the coefficient
    /// envelope must hold.
    pub fn check(&self, depth_m: f64) -> CalResult<()> {
        if !Self::in_range(self.wind_speed, WIND_RANGE) {
            return Err(CalError::BuoyOutOfRange(format!(
                "wind speed {:.2} m/s outside [{}, {}]",
                self.wind_speed, WIND_RANGE.0, WIND_RANGE.1
            )));
        }
        if !self.within_envelope(depth_m) {
            return Err(CalError::BuoyOutOfRange(format!(
                "coefficients outside envelope at depth {} m (a*z={:.3}, exp(b*z)={:.3}, c*z={:.3})",
                depth_m,
                self.a * depth_m,
                (self.b * depth_m).exp(),
                self.c * depth_m
            )));
        }
        Ok(())
    }
}

/// Bulk and skin temperature pair (K)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkinTemperature {
    pub bulk_temp: f64,
    pub skin_temp: f64,
    pub coefficients: SkinCoefficients,
}

/// Evaluate the skin model without the validity gate.
///
/// `hours`/`water_temp_c` is the 24-hour water temperature series (hours
/// relative to any fixed origin, ascending), `overpass_hours` the overpass
/// on the same axis and `wind_speed` the mean wind already corrected to
/// 10 m.
pub fn evaluate_skin(
    hours: &[f64],
    water_temp_c: &[f64],
    overpass_hours: f64,
    wind_speed: f64,
    depth_m: f64,
) -> CalResult<SkinTemperature> {
    let avg_wtmp = mean(water_temp_c)
        .ok_or_else(|| CalError::BuoyOutOfRange("no water temperature in window".to_string()))?;
    if hours.len() != water_temp_c.len() {
        return Err(CalError::InvalidInput(format!(
            "water temperature series has {} times and {} values",
            hours.len(),
            water_temp_c.len()
        )));
    }

    let coefficients = SkinCoefficients::from_wind(wind_speed);
    let SkinCoefficients { a, b, c, .. } = coefficients;

    let skin_avg = avg_wtmp - a * depth_m - COOL_SKIN_OFFSET;
    let lagged = interp(overpass_hours - c * depth_m, hours, water_temp_c);
    let diurnal = (lagged - skin_avg) / (b * depth_m).exp();

    Ok(SkinTemperature {
        bulk_temp: avg_wtmp + KELVIN,
        skin_temp: skin_avg + diurnal + KELVIN,
        coefficients,
    })
}

/// Everything the rest of the pipeline needs from one buoy at one overpass
#[derive(Debug, Clone, PartialEq)]
pub struct BuoyObservation {
    pub buoy_id: String,
    pub location: GeoPoint,
    pub depth_m: f64,
    pub overpass: DateTime<Utc>,
    /// Mean water temperature over the window (K)
    pub bulk_temp: f64,
    /// Modeled skin temperature at the overpass (K)
    pub skin_temp: f64,
    pub surface: SurfaceLayer,
}

/// Parameters of the buoy model
#[derive(Debug, Clone)]
pub struct BuoyModelParams {
    /// Total window length centred on the overpass (hours)
    pub window_hours: i64,
}

impl Default for BuoyModelParams {
    fn default() -> Self {
        Self { window_hours: 24 }
    }
}

/// Buoy model: window selection, skin temperature and surface layer
pub struct BuoyModel {
    params: BuoyModelParams,
}

impl BuoyModel {
    pub fn new(params: BuoyModelParams) -> Self {
        Self { params }
    }

    /// Samples inside the window centred on `overpass`
    pub fn window<'a>(&self, record: &'a BuoyRecord, overpass: DateTime<Utc>) -> &'a [BuoySample] {
        let half = Duration::minutes(self.params.window_hours * 30);
        record.between(overpass - half, overpass + half)
    }

    /// Gated skin temperature for a record at the overpass
    pub fn skin_temperature(
        &self,
        record: &BuoyRecord,
        overpass: DateTime<Utc>,
    ) -> CalResult<SkinTemperature> {
        let window = self.window(record, overpass);
        if window.is_empty() {
            return Err(CalError::BuoyOutOfRange(format!(
                "buoy {} has no data within {} h of {}",
                record.station.id, self.params.window_hours, overpass
            )));
        }

        let hours_of = |t: DateTime<Utc>| (t - overpass).num_seconds() as f64 / 3600.0;
        let (hours, water): (Vec<f64>, Vec<f64>) = window
            .iter()
            .filter_map(|s| s.water_temp.map(|w| (hours_of(s.time), w)))
            .unzip();
        if water.is_empty() {
            return Err(CalError::BuoyOutOfRange(format!(
                "buoy {} has no water temperature in window",
                record.station.id
            )));
        }

        let winds: Vec<f64> = window.iter().filter_map(|s| s.wind_speed).collect();
        let mean_wind = mean(&winds).ok_or_else(|| {
            CalError::BuoyOutOfRange(format!(
                "buoy {} has no wind speed in window",
                record.station.id
            ))
        })?;
        let wind = wind_at_reference_height(mean_wind, record.station.anemometer_height_m);

        let depth = record.station.depth_m;
        SkinCoefficients::from_wind(wind).check(depth)?;
        let result = evaluate_skin(&hours, &water, 0.0, wind, depth)?;

        log::debug!(
            "Buoy {}: {} samples, wind {:.2} m/s, bulk {:.3} K, skin {:.3} K",
            record.station.id,
            window.len(),
            wind,
            result.bulk_temp,
            result.skin_temp
        );
        Ok(result)
    }

    /// Surface layer from the sample in the window closest to the overpass
    /// with valid pressure, air temperature and dewpoint
    pub fn surface_layer(
        &self,
        record: &BuoyRecord,
        overpass: DateTime<Utc>,
    ) -> CalResult<SurfaceLayer> {
        self.window(record, overpass)
            .iter()
            .filter_map(|s| match (s.pressure, s.air_temp, s.dewpoint) {
                (Some(p), Some(t), Some(d)) => Some((s.time, p, t, d)),
                _ => None,
            })
            .min_by_key(|(time, ..)| (*time - overpass).num_seconds().abs())
            .map(|(_, pressure, air_temp_c, dewpoint_c)| SurfaceLayer {
                pressure,
                air_temp_c,
                dewpoint_c,
                rel_humidity: relative_humidity(air_temp_c, dewpoint_c).clamp(0.0, 100.0),
            })
            .ok_or_else(|| {
                CalError::BuoyOutOfRange(format!(
                    "buoy {} has no complete surface observation within {} h of {}",
                    record.station.id, self.params.window_hours, overpass
                ))
            })
    }

    /// Full buoy observation for the overpass
    pub fn observe(&self, record: &BuoyRecord, overpass: DateTime<Utc>) -> CalResult<BuoyObservation> {
        let skin = self.skin_temperature(record, overpass)?;
        let surface = self.surface_layer(record, overpass)?;
        Ok(BuoyObservation {
            buoy_id: record.station.id.clone(),
            location: record.station.location,
            depth_m: record.station.depth_m,
            overpass,
            bulk_temp: skin.bulk_temp,
            skin_temp: skin.skin_temp,
            surface,
        })
    }
}

impl Default for BuoyModel {
    fn default() -> Self {
        Self::new(BuoyModelParams::default())
    }
}
