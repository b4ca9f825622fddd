//! Runtime configuration and on-disk data layout.

use crate::types::{CalError, CalResult, SensorFamily};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// External RT engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RtConfig {
    /// Engine executable
    pub binary: PathBuf,
    /// Engine data directory, linked as `DATA` in each run directory
    pub data_dir: PathBuf,
    pub timeout_secs: u64,
    /// Keep run directories after a successful run
    pub keep_workdirs: bool,
}

impl Default for RtConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("modtran"),
            data_dir: PathBuf::from("DATA"),
            timeout_secs: 600,
            keep_workdirs: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuoyConfig {
    pub default_depth_m: f64,
    pub default_anemometer_height_m: f64,
    /// Height of the water surface above the geoid (km)
    pub surface_height_km: f64,
}

impl Default for BuoyConfig {
    fn default() -> Self {
        Self {
            default_depth_m: crate::io::buoy::DEFAULT_DEPTH_M,
            default_anemometer_height_m: crate::io::buoy::DEFAULT_ANEMOMETER_HEIGHT_M,
            surface_height_km: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UncertaintyConfig {
    /// Skin temperature 1σ per sensor family (K)
    pub skin_sigma_k: HashMap<SensorFamily, f64>,
    /// Reanalysis sample shift in grid units
    pub spatial_shift_grid_units: f64,
}

impl Default for UncertaintyConfig {
    fn default() -> Self {
        let skin_sigma_k = [
            (SensorFamily::Landsat5, 0.305),
            (SensorFamily::Landsat7, 0.305),
            (SensorFamily::Landsat8, 0.305),
            (SensorFamily::Landsat9, 0.305),
        ]
        .into_iter()
        .collect();
        Self {
            skin_sigma_k,
            spatial_shift_grid_units: 0.5,
        }
    }
}

impl UncertaintyConfig {
    pub fn skin_sigma(&self, family: SensorFamily) -> f64 {
        self.skin_sigma_k.get(&family).copied().unwrap_or(0.305)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 500,
            timeout_secs: 60,
        }
    }
}

/// Top-level configuration. Every field has a default, so `{}` is a valid
/// configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Four-column standard atmosphere; built-in mid-latitude summer if unset
    pub standard_atmosphere: Option<PathBuf>,
    /// Water reflectance table; built-in nadir table if unset
    pub water_reflectance: Option<PathBuf>,
    /// Use nominal band shapes when an RSR file is missing
    pub nominal_rsr_fallback: bool,
    pub rt: RtConfig,
    pub buoy: BuoyConfig,
    pub uncertainty: UncertaintyConfig,
    pub download: DownloadConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("buoycal"),
            standard_atmosphere: None,
            water_reflectance: None,
            nominal_rsr_fallback: false,
            rt: RtConfig::default(),
            buoy: BuoyConfig::default(),
            uncertainty: UncertaintyConfig::default(),
            download: DownloadConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        log::info!("Loading configuration: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> CalResult<Self> {
        let config: Config =
            serde_json::from_str(content).map_err(|e| CalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CalResult<()> {
        if self.rt.timeout_secs == 0 {
            return Err(CalError::Config("rt.timeout_secs must be positive".to_string()));
        }
        if self.buoy.default_depth_m < 0.0 {
            return Err(CalError::Config("buoy.default_depth_m must be >= 0".to_string()));
        }
        if !(self.uncertainty.spatial_shift_grid_units > 0.0) {
            return Err(CalError::Config(
                "uncertainty.spatial_shift_grid_units must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }
}

/// Directory layout under the data root
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn reanalysis(&self) -> PathBuf {
        self.root.join("reanalysis")
    }

    pub fn buoy(&self) -> PathBuf {
        self.root.join("buoy")
    }

    pub fn imagery(&self, scene_id: &str) -> PathBuf {
        self.root.join("imagery").join(scene_id)
    }

    pub fn rt_runs(&self) -> PathBuf {
        self.root.join("rt_runs")
    }

    pub fn cache(&self) -> PathBuf {
        self.root.join("cache")
    }

    pub fn rsr(&self) -> PathBuf {
        self.root.join("rsr")
    }

    /// Create every top-level directory
    pub fn create(&self) -> CalResult<()> {
        for dir in [
            self.reanalysis(),
            self.buoy(),
            self.root.join("imagery"),
            self.rt_runs(),
            self.cache(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
