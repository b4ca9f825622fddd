//! Calibrate the thermal bands of one scene against every buoy it covers.

use anyhow::Context;
use buoycal::config::Config;
use buoycal::core::buoy_model::BuoyModel;
use buoycal::core::orchestrator::{CalibratorParams, SceneCalibrator, SceneRequest};
use buoycal::core::rt_driver::{ModtranEngine, RtDriver};
use buoycal::io::download::Downloader;
use buoycal::io::providers::{LocalScenes, NdbcBuoys, ReanalysisFiles};
use buoycal::io::reanalysis::ReanalysisSource;
use buoycal::io::report::{append_csv, csv_header, csv_row};
use buoycal::io::rsr::WaterReflectance;
use buoycal::io::standard_atmosphere::StandardAtmosphere;
use buoycal::types::{BuoyResult, CalError, CancelToken};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Buoy-based thermal calibration of a Landsat scene")]
struct Args {
    /// Scene identifier (directory name under imagery/)
    scene_id: String,

    /// Reanalysis source: narr or merra
    #[arg(long, default_value = "narr")]
    atmo: ReanalysisSource,

    /// Thermal bands to process (all of the sensor's by default)
    #[arg(long, num_args = 1..)]
    bands: Option<Vec<u8>>,

    /// Process only this buoy
    #[arg(long)]
    buoy_id: Option<String>,

    /// Append result rows to this CSV file
    #[arg(long)]
    save: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn band_columns(row: &BuoyResult) -> Vec<u8> {
    row.modeled.iter().map(|(band, _)| *band).collect()
}

fn run(args: &Args) -> anyhow::Result<Vec<BuoyResult>> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let layout = config.layout();
    layout
        .create()
        .with_context(|| format!("creating data directories under {}", layout.root().display()))?;

    let scenes = LocalScenes::new(layout.clone());
    let catalog_downloader = Downloader::new(layout.cache(), &config.download)?;
    let catalog = NdbcBuoys::load_catalog(
        &layout,
        &catalog_downloader,
        (
            config.buoy.default_depth_m,
            config.buoy.default_anemometer_height_m,
        ),
    )?;
    let buoys = NdbcBuoys::new(
        catalog,
        Downloader::new(layout.cache(), &config.download)?,
        Utc::now().date_naive(),
    );
    let reanalysis = ReanalysisFiles::new(Downloader::new(layout.cache(), &config.download)?);

    let loaded_atmo;
    let std_atmo = match &config.standard_atmosphere {
        Some(path) => {
            loaded_atmo = StandardAtmosphere::from_file(path)?;
            &loaded_atmo
        }
        None => StandardAtmosphere::mid_latitude_summer(),
    };
    let loaded_water;
    let water = match &config.water_reflectance {
        Some(path) => {
            loaded_water = WaterReflectance::from_file(path)?;
            &loaded_water
        }
        None => WaterReflectance::water(),
    };

    let engine = ModtranEngine::new(
        config.rt.binary.clone(),
        config.rt.data_dir.clone(),
        Duration::from_secs(config.rt.timeout_secs),
    );
    let driver = RtDriver::new(Arc::new(engine), layout.rt_runs(), config.rt.keep_workdirs);

    let calibrator = SceneCalibrator {
        scenes: &scenes,
        buoys: &buoys,
        reanalysis: &reanalysis,
        driver,
        std_atmo,
        water,
        rsr_dir: layout.rsr(),
        buoy_model: BuoyModel::default(),
        params: CalibratorParams {
            surface_height_km: config.buoy.surface_height_km,
            uncertainty: config.uncertainty.clone(),
            nominal_rsr_fallback: config.nominal_rsr_fallback,
        },
        cancel: CancelToken::new(),
    };

    let mut request = SceneRequest::new(&args.scene_id, args.atmo);
    request.bands = args.bands.clone();
    request.buoy_id = args.buoy_id.clone();

    let mut header_written = false;
    let rows = calibrator.run(&request, |row| {
        let bands = band_columns(row);
        if !header_written {
            println!("{}", csv_header(&bands));
            header_written = true;
        }
        println!("{}", csv_row(row, &bands));
    })?;

    if let (Some(path), Some(first)) = (&args.save, rows.first()) {
        append_csv(path, &band_columns(first), &rows)?;
    }
    Ok(rows)
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&args) {
        Ok(rows) if rows.is_empty() => {
            log::warn!("Scene {}: every buoy was skipped", args.scene_id);
            ExitCode::SUCCESS
        }
        Ok(rows) => {
            log::info!("{} buoys calibrated for {}", rows.len(), args.scene_id);
            ExitCode::SUCCESS
        }
        Err(err) => {
            let class = err
                .downcast_ref::<CalError>()
                .map_or("Error", |e| e.class());
            eprintln!("{}: scene {}: {:#}", class, args.scene_id, err);
            ExitCode::FAILURE
        }
    }
}
