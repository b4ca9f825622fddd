//! Readers, downloaders and data sources

pub mod buoy;
pub mod download;
pub mod imagery;
pub mod metadata;
#[cfg(feature = "netcdf")]
pub mod netcdf_grid;
pub mod providers;
pub mod reanalysis;
pub mod report;
pub mod rsr;
pub mod standard_atmosphere;

pub use buoy::{BuoyCatalog, BuoyRecord, BuoySample, BuoyStation};
pub use download::Downloader;
pub use imagery::ImageReader;
pub use metadata::{BandMetadata, SceneMetadata};
pub use providers::{LocalScenes, NdbcBuoys, ReanalysisFiles};
pub use reanalysis::{GridData, ReanalysisDataset, ReanalysisGrid, ReanalysisSource};
pub use rsr::{RsrLibrary, WaterReflectance};
pub use standard_atmosphere::StandardAtmosphere;
