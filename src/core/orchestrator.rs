//! Scene-level calibration: every buoy in a scene through the modeled and
//! measured radiance pipelines.

use crate::config::UncertaintyConfig;
use crate::core::buoy_model::{BuoyModel, BuoyObservation};
use crate::core::image_radiance::BandImage;
use crate::core::profile::ProfileAssembler;
use crate::core::radiance::modeled_radiances;
use crate::core::rt_driver::{DeckParams, RtDriver};
use crate::core::spectral::Rsr;
use crate::core::uncertainty::{PerturbedAtmosphere, UncertaintyEstimator, UncertaintyParams};
use crate::io::buoy::{BuoyRecord, BuoyStation};
use crate::io::metadata::SceneMetadata;
use crate::io::reanalysis::{ReanalysisDataset, ReanalysisSource};
use crate::io::rsr::{RsrLibrary, WaterReflectance};
use crate::io::standard_atmosphere::StandardAtmosphere;
use crate::types::{BuoyResult, CalError, CalResult, CancelToken, Corners};
use chrono::{DateTime, Datelike, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Scene metadata and band images
pub trait SceneProvider {
    fn metadata(&self, scene_id: &str) -> CalResult<SceneMetadata>;
    fn band_image(&self, scene: &SceneMetadata, band: u8) -> CalResult<BandImage>;
}

/// Buoy stations and their observation records
pub trait BuoyProvider {
    /// Stations inside the footprint, nearest to its centre first
    fn stations_in(&self, corners: &Corners) -> CalResult<Vec<BuoyStation>>;
    fn record(&self, station: &BuoyStation, overpass: DateTime<Utc>) -> CalResult<BuoyRecord>;
}

/// Reanalysis files covering an instant
pub trait ReanalysisProvider {
    fn dataset(&self, source: ReanalysisSource, t: DateTime<Utc>) -> CalResult<ReanalysisDataset>;
}

/// One calibration request
#[derive(Debug, Clone)]
pub struct SceneRequest {
    pub scene_id: String,
    pub source: ReanalysisSource,
    /// Thermal bands to process; all of the sensor's when `None`
    pub bands: Option<Vec<u8>>,
    /// Restrict processing to one station
    pub buoy_id: Option<String>,
}

impl SceneRequest {
    pub fn new(scene_id: &str, source: ReanalysisSource) -> Self {
        Self {
            scene_id: scene_id.to_string(),
            source,
            bands: None,
            buoy_id: None,
        }
    }
}

/// Parameters fixed for every scene
#[derive(Debug, Clone, Default)]
pub struct CalibratorParams {
    pub surface_height_km: f64,
    pub uncertainty: UncertaintyConfig,
    /// Stand in nominal band shapes for missing RSR files
    pub nominal_rsr_fallback: bool,
}

/// Per-scene state shared by every buoy
struct SceneContext<'s> {
    meta: &'s SceneMetadata,
    source: ReanalysisSource,
    dataset: &'s ReanalysisDataset,
    images: &'s BTreeMap<u8, BandImage>,
    rsrs: &'s RsrLibrary,
}

/// Drives the per-buoy pipeline for whole scenes
pub struct SceneCalibrator<'a> {
    pub scenes: &'a dyn SceneProvider,
    pub buoys: &'a dyn BuoyProvider,
    pub reanalysis: &'a dyn ReanalysisProvider,
    pub driver: RtDriver,
    pub std_atmo: &'a StandardAtmosphere,
    pub water: &'a WaterReflectance,
    /// Directory of band RSR curves
    pub rsr_dir: PathBuf,
    pub buoy_model: BuoyModel,
    pub params: CalibratorParams,
    pub cancel: CancelToken,
}

impl<'a> SceneCalibrator<'a> {
    fn bands_for(&self, meta: &SceneMetadata, requested: &Option<Vec<u8>>) -> CalResult<Vec<u8>> {
        let bands: Vec<u8> = match requested {
            Some(bands) => bands.clone(),
            None => meta.bands.keys().copied().collect(),
        };
        if bands.is_empty() {
            return Err(CalError::InvalidInput("no bands requested".to_string()));
        }
        for band in &bands {
            if !meta.family.thermal_bands().contains(band) {
                return Err(CalError::InvalidInput(format!(
                    "band {} is not a thermal band of {}",
                    band, meta.family
                )));
            }
            meta.band(*band)?;
        }
        Ok(bands)
    }

    /// Calibrate every buoy in the scene, handing each row to `on_row` as it
    /// completes. Buoy failures are logged and skipped; a scene without
    /// candidate buoys fails with `NoBuoyInScene`.
    pub fn run<F>(&self, request: &SceneRequest, mut on_row: F) -> CalResult<Vec<BuoyResult>>
    where
        F: FnMut(&BuoyResult),
    {
        self.cancel.check()?;
        let meta = self.scenes.metadata(&request.scene_id)?;
        let bands = self.bands_for(&meta, &request.bands)?;

        let mut stations = self.buoys.stations_in(&meta.corners)?;
        if let Some(id) = &request.buoy_id {
            stations.retain(|s| s.id.eq_ignore_ascii_case(id));
        }
        if stations.is_empty() {
            return Err(CalError::NoBuoyInScene(request.scene_id.clone()));
        }
        log::info!(
            "Scene {}: {} candidate buoys, bands {:?}, {}",
            meta.scene_id,
            stations.len(),
            bands,
            request.source
        );

        let mut images = BTreeMap::new();
        for &band in &bands {
            images.insert(band, self.scenes.band_image(&meta, band)?);
        }
        let rsrs = RsrLibrary::load(
            &self.rsr_dir,
            meta.family,
            &bands,
            self.params.nominal_rsr_fallback,
        )?;
        let dataset = self.reanalysis.dataset(request.source, meta.acquired)?;

        let ctx = SceneContext {
            meta: &meta,
            source: request.source,
            dataset: &dataset,
            images: &images,
            rsrs: &rsrs,
        };

        let mut rows = Vec::new();
        for station in &stations {
            self.cancel.check()?;
            match self.process_buoy(&ctx, station) {
                Ok(row) => {
                    on_row(&row);
                    rows.push(row);
                }
                Err(CalError::Cancelled) => return Err(CalError::Cancelled),
                Err(e) => log::warn!(
                    "Scene {} buoy {} skipped: {}: {}",
                    meta.scene_id,
                    station.id,
                    e.class(),
                    e
                ),
            }
        }

        log::info!(
            "Scene {}: {} of {} buoys calibrated",
            meta.scene_id,
            rows.len(),
            stations.len()
        );
        Ok(rows)
    }

    fn process_buoy(&self, ctx: &SceneContext<'_>, station: &BuoyStation) -> CalResult<BuoyResult> {
        let meta = ctx.meta;
        let overpass = meta.acquired;
        let record = self.buoys.record(station, overpass)?;
        let obs = self.buoy_model.observe(&record, overpass)?;
        log::info!(
            "Buoy {} at ({:.4}, {:.4}): bulk {:.3} K, skin {:.3} K",
            obs.buoy_id,
            obs.location.lat,
            obs.location.lon,
            obs.bulk_temp,
            obs.skin_temp
        );

        // Image radiance is independent of the modeled pipeline
        let mut measured = Vec::with_capacity(ctx.images.len());
        for (&band, image) in ctx.images {
            let calibration = meta.band(band)?.calibration;
            measured.push((band, image.radiance_at(&obs.location, &calibration)?));
        }

        let assembler = ProfileAssembler::new(self.std_atmo, self.params.surface_height_km);
        let julian_day = overpass.ordinal();
        let sample = ctx
            .source
            .read_columns(ctx.dataset, &obs.location, overpass, &meta.corners)?;
        let profile = assembler.assemble(&sample, &obs.location, overpass, &obs.surface)?;
        let deck = DeckParams::new(obs.location, julian_day, obs.skin_temp);
        let rt = self
            .driver
            .run(&meta.scene_id, &obs.buoy_id, None, &profile, &deck, &self.cancel)?;

        let rsr_refs: Vec<(u8, &Rsr)> = ctx
            .images
            .keys()
            .map(|&band| Ok((band, ctx.rsrs.get(meta.family, band)?)))
            .collect::<CalResult<_>>()?;
        let modeled = modeled_radiances(&rt, obs.skin_temp, self.water, &rsr_refs)?;

        let estimator = UncertaintyEstimator {
            driver: &self.driver,
            water: self.water,
            rsrs: &rsr_refs,
            params: UncertaintyParams {
                skin_sigma: self.params.uncertainty.skin_sigma(meta.family),
                shift_grid_units: self.params.uncertainty.spatial_shift_grid_units,
                grid_spacing_deg: ctx.source.grid_spacing_deg(),
            },
        };
        let atmospheres = self.perturbed_atmospheres(ctx, &obs, &assembler, &estimator.params)?;
        let sigma = estimator.estimate(
            &meta.scene_id,
            &obs.buoy_id,
            &rt,
            &atmospheres,
            obs.skin_temp,
            &self.cancel,
        )?;

        Ok(BuoyResult {
            scene_id: meta.scene_id.clone(),
            buoy_id: obs.buoy_id,
            overpass,
            lat: obs.location.lat,
            lon: obs.location.lon,
            bulk_temp: obs.bulk_temp,
            skin_temp: obs.skin_temp,
            modeled,
            measured,
            sigma,
        })
    }

    /// Atmospheres re-read and re-assembled at shifted sample points
    fn perturbed_atmospheres(
        &self,
        ctx: &SceneContext<'_>,
        obs: &BuoyObservation,
        assembler: &ProfileAssembler<'_>,
        params: &UncertaintyParams,
    ) -> CalResult<Vec<PerturbedAtmosphere>> {
        let overpass = ctx.meta.acquired;
        params
            .spatial_shifts()
            .into_iter()
            .map(|shift| {
                let point = obs.location.offset(shift.dlat, shift.dlon);
                let sample = ctx
                    .source
                    .read_columns(ctx.dataset, &point, overpass, &ctx.meta.corners)?;
                let profile = assembler.assemble(&sample, &point, overpass, &obs.surface)?;
                Ok(PerturbedAtmosphere {
                    tag: shift.tag,
                    profile,
                    deck: DeckParams::new(point, overpass.ordinal(), obs.skin_temp),
                })
            })
            .collect()
    }
}
