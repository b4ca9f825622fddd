use crate::types::{AtmosphericProfile, CalError, CalResult, Layer};
use std::path::Path;
use std::sync::OnceLock;

/// AFGL mid-latitude summer atmosphere: (height km, pressure hPa,
/// temperature K, relative humidity %). RH derived from the tabulated
/// water-vapour density.
const MID_LATITUDE_SUMMER: [(f64, f64, f64, f64); 46] = [
    (0.0, 1013.0, 294.2, 76.191),
    (1.0, 902.0, 289.7, 66.031),
    (2.0, 802.0, 285.2, 55.191),
    (3.0, 710.0, 279.2, 45.311),
    (4.0, 628.0, 273.2, 39.052),
    (5.0, 554.0, 267.2, 33.295),
    (6.0, 487.0, 261.2, 33.677),
    (7.0, 426.0, 254.7, 36.321),
    (8.0, 372.0, 248.2, 37.808),
    (9.0, 324.0, 241.7, 40.971),
    (10.0, 281.0, 235.3, 42.507),
    (11.0, 243.0, 228.8, 29.859),
    (12.0, 209.0, 222.3, 17.362),
    (13.0, 179.0, 215.8, 11.631),
    (14.0, 153.0, 215.7, 6.544),
    (15.0, 130.0, 215.7, 4.974),
    (16.0, 111.0, 215.7, 4.188),
    (17.0, 95.0, 215.7, 3.665),
    (18.0, 81.2, 216.8, 2.846),
    (19.0, 69.5, 217.9, 2.429),
    (20.0, 59.5, 219.2, 1.899),
    (21.0, 51.0, 220.4, 1.857),
    (22.0, 43.7, 221.6, 1.605),
    (23.0, 37.6, 222.8, 1.472),
    (24.0, 32.2, 223.9, 1.435),
    (25.0, 27.7, 225.1, 1.392),
    (27.5, 19.07, 228.45, 0.904),
    (30.0, 13.2, 233.7, 0.434),
    (32.5, 9.3, 239.0, 0.212),
    (35.0, 6.52, 245.2, 0.096),
    (37.5, 4.64, 251.3, 0.044),
    (40.0, 3.33, 257.5, 0.021),
    (42.5, 2.41, 263.7, 0.010),
    (45.0, 1.76, 269.9, 0.005),
    (47.5, 1.29, 275.2, 0.002),
    (50.0, 0.951, 275.7, 0.002),
    (55.0, 0.515, 269.3, 0.002),
    (60.0, 0.272, 257.1, 0.003),
    (65.0, 0.139, 240.1, 0.008),
    (70.0, 0.067, 218.1, 0.048),
    (75.0, 0.03, 196.1, 0.512),
    (80.0, 0.012, 174.1, 9.381),
    (85.0, 0.00448, 165.1, 24.015),
    (90.0, 0.00164, 165.0, 9.204),
    (95.0, 0.000625, 178.3, 0.210),
    (100.0, 0.000258, 190.5, 0.010),
];

/// Reference profile used above the highest reanalysis level
#[derive(Debug, Clone)]
pub struct StandardAtmosphere {
    profile: AtmosphericProfile,
}

impl StandardAtmosphere {
    pub fn new(profile: AtmosphericProfile) -> CalResult<Self> {
        profile.validate().map_err(|e| {
            CalError::InputParseError(format!("standard atmosphere is not a valid profile: {}", e))
        })?;
        Ok(Self { profile })
    }

    /// Load a header-less four-column file (km, hPa, K, %)
    pub fn from_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        log::info!(
            "Reading standard atmosphere: {}",
            path.as_ref().display()
        );
        let content = std::fs::read_to_string(&path)?;
        Self::new(AtmosphericProfile::from_text(&content)?)
    }

    /// Built-in mid-latitude summer table, initialised on first use
    pub fn mid_latitude_summer() -> &'static StandardAtmosphere {
        static TABLE: OnceLock<StandardAtmosphere> = OnceLock::new();
        TABLE.get_or_init(|| {
            let layers: Vec<Layer> = MID_LATITUDE_SUMMER
                .iter()
                .map(|&(height, pressure, temperature, rel_humidity)| Layer {
                    height,
                    pressure,
                    temperature,
                    rel_humidity,
                })
                .collect();
            StandardAtmosphere {
                profile: AtmosphericProfile::from_layers(&layers),
            }
        })
    }

    pub fn profile(&self) -> &AtmosphericProfile {
        &self.profile
    }
}
