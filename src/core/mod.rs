//! Core calibration modules

pub mod buoy_model;
pub mod image_radiance;
pub mod numerics;
pub mod orchestrator;
pub mod profile;
pub mod projection;
pub mod radiance;
pub mod rt_driver;
pub mod spectral;
pub mod uncertainty;

// Re-export main types
pub use buoy_model::{BuoyModel, BuoyModelParams, BuoyObservation, SkinTemperature};
pub use image_radiance::{BandImage, Calibration};
pub use orchestrator::{
    BuoyProvider, CalibratorParams, ReanalysisProvider, SceneCalibrator, SceneProvider,
    SceneRequest,
};
pub use profile::ProfileAssembler;
pub use radiance::{band_radiances, modeled_radiances, toa_radiance};
pub use rt_driver::{DeckParams, ModtranEngine, RtDriver, RtEngine, RtResult};
pub use spectral::{RadianceUnit, Rsr, Spectrum, WavelengthGrid};
pub use uncertainty::{UncertaintyEstimator, UncertaintyParams};
