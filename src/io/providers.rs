//! Disk- and network-backed implementations of the scene, buoy and
//! reanalysis collaborators.

use crate::config::DataLayout;
use crate::core::image_radiance::BandImage;
use crate::core::orchestrator::{BuoyProvider, ReanalysisProvider, SceneProvider};
use crate::io::buoy::{read_stdmet_file, stdmet_urls, BuoyCatalog, BuoyRecord, BuoyStation};
use crate::io::download::Downloader;
use crate::io::imagery::ImageReader;
use crate::io::metadata::SceneMetadata;
use crate::io::reanalysis::{ReanalysisDataset, ReanalysisSource};
use crate::types::{CalError, CalResult, Corners};
use chrono::{DateTime, NaiveDate, Utc};
use std::path::{Path, PathBuf};

const STATION_TABLE_URL: &str = "https://www.ndbc.noaa.gov/data/stations/station_table.txt";
const HEIGHTS_FILE: &str = "buoy_heights.txt";

/// Scenes unpacked under `imagery/<scene_id>/`
pub struct LocalScenes {
    layout: DataLayout,
}

impl LocalScenes {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    fn find_mtl(dir: &Path) -> CalResult<PathBuf> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            CalError::InvalidInput(format!("scene directory {}: {}", dir.display(), e))
        })?;
        for entry in entries {
            let path = entry?.path();
            let is_mtl = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.to_uppercase().ends_with("_MTL.TXT"));
            if is_mtl {
                return Ok(path);
            }
        }
        Err(CalError::InvalidInput(format!(
            "no *_MTL.txt in {}",
            dir.display()
        )))
    }
}

impl SceneProvider for LocalScenes {
    fn metadata(&self, scene_id: &str) -> CalResult<SceneMetadata> {
        let dir = self.layout.imagery(scene_id);
        let mut meta = SceneMetadata::from_file(Self::find_mtl(&dir)?)?;
        // Scenes are addressed by their directory name
        if meta.scene_id != scene_id {
            log::debug!("Scene {} carries product id {}", scene_id, meta.scene_id);
            meta.scene_id = scene_id.to_string();
        }
        Ok(meta)
    }

    fn band_image(&self, scene: &SceneMetadata, band: u8) -> CalResult<BandImage> {
        let file = &scene.band(band)?.file_name;
        let path = self.layout.imagery(&scene.scene_id).join(file);
        ImageReader::read_band(path, scene.utm_zone)
    }
}

/// NDBC stations and standard meteorological archives
pub struct NdbcBuoys {
    catalog: BuoyCatalog,
    downloader: Downloader,
    today: NaiveDate,
}

impl NdbcBuoys {
    pub fn new(catalog: BuoyCatalog, downloader: Downloader, today: NaiveDate) -> Self {
        Self {
            catalog,
            downloader,
            today,
        }
    }

    /// Catalog from `buoy/station_table.txt` (downloaded into the cache when
    /// absent) and the optional `buoy/buoy_heights.txt`
    pub fn load_catalog(
        layout: &DataLayout,
        downloader: &Downloader,
        defaults: (f64, f64),
    ) -> CalResult<BuoyCatalog> {
        let local = layout.buoy().join("station_table.txt");
        let table_path = if local.is_file() {
            local
        } else {
            downloader.fetch(STATION_TABLE_URL)?
        };
        let heights_path = layout.buoy().join(HEIGHTS_FILE);
        let heights = if heights_path.is_file() {
            BuoyCatalog::parse_heights(&std::fs::read_to_string(&heights_path)?)?
        } else {
            log::debug!("No {} found, using default instrument heights", heights_path.display());
            Default::default()
        };
        BuoyCatalog::parse_station_table(&std::fs::read_to_string(table_path)?, &heights, defaults)
    }
}

impl BuoyProvider for NdbcBuoys {
    fn stations_in(&self, corners: &Corners) -> CalResult<Vec<BuoyStation>> {
        Ok(self.catalog.stations_in(corners).into_iter().cloned().collect())
    }

    fn record(&self, station: &BuoyStation, overpass: DateTime<Utc>) -> CalResult<BuoyRecord> {
        let urls = stdmet_urls(&station.id, overpass, self.today);
        let path = self.downloader.fetch_first(&urls)?;
        let samples = read_stdmet_file(path)?;
        Ok(BuoyRecord::new(station.clone(), samples))
    }
}

/// Reanalysis files fetched through the download cache
pub struct ReanalysisFiles {
    downloader: Downloader,
}

impl ReanalysisFiles {
    pub fn new(downloader: Downloader) -> Self {
        Self { downloader }
    }
}

impl ReanalysisProvider for ReanalysisFiles {
    fn dataset(&self, source: ReanalysisSource, t: DateTime<Utc>) -> CalResult<ReanalysisDataset> {
        let mut dataset = ReanalysisDataset::default();
        for url in source.files_for(t) {
            let path = self.downloader.fetch(&url)?;
            dataset.push(Box::new(open_grid(&path, source)?));
        }
        Ok(dataset)
    }
}

#[cfg(feature = "netcdf")]
fn open_grid(path: &Path, source: ReanalysisSource) -> CalResult<crate::io::reanalysis::GridData> {
    let variables = source.variables();
    // NARR ships one variable per file
    let present: Vec<&str> = match source {
        ReanalysisSource::Narr => {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            variables
                .iter()
                .copied()
                .filter(|v| name.starts_with(&format!("{}.", v)))
                .collect()
        }
        ReanalysisSource::Merra => variables.to_vec(),
    };
    crate::io::netcdf_grid::read_grid(path, &present)
}

#[cfg(not(feature = "netcdf"))]
fn open_grid(path: &Path, _source: ReanalysisSource) -> CalResult<crate::io::reanalysis::GridData> {
    Err(CalError::Config(format!(
        "cannot open {}: built without the netcdf feature",
        path.display()
    )))
}
