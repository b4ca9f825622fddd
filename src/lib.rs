//! buoycal: buoy-based vicarious calibration of satellite thermal bands
//!
//! Predicts the top-of-atmosphere radiance a thermal band should see over a
//! moored buoy, from the buoy's water temperature and a reanalysis
//! atmosphere pushed through an external radiative-transfer engine, and
//! compares it with the radiance the image actually recorded.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{Config, DataLayout};
pub use types::{
    AtmosphericProfile, BuoyResult, CalError, CalResult, CancelToken, Corners, GeoPoint,
    SensorFamily, SurfaceLayer,
};

pub use crate::core::{SceneCalibrator, SceneRequest};
pub use io::ReanalysisSource;
