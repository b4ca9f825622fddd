use buoycal::core::image_radiance::{BandImage, Calibration};
use buoycal::core::orchestrator::{
    BuoyProvider, CalibratorParams, ReanalysisProvider, SceneCalibrator, SceneProvider,
    SceneRequest,
};
use buoycal::core::projection::to_utm;
use buoycal::core::rt_driver::{RtDriver, RtEngine};
use buoycal::core::buoy_model::BuoyModel;
use buoycal::io::buoy::{BuoyRecord, BuoySample, BuoyStation};
use buoycal::io::metadata::{BandMetadata, SceneMetadata};
use buoycal::io::reanalysis::{GridData, ReanalysisDataset, ReanalysisSource};
use buoycal::io::report::{append_csv, csv_header};
use buoycal::io::rsr::{RsrLibrary, WaterReflectance};
use buoycal::io::standard_atmosphere::StandardAtmosphere;
use buoycal::types::{
    BuoyResult, CalError, CalResult, CancelToken, Corners, GeoPoint, GeoTransform, SensorFamily,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::{Array2, Array4};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const SCENE: &str = "LC08_L1TP_014033_20140614";

fn overpass() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 6, 14, 15, 30, 0).unwrap()
}

fn buoy_in_image() -> GeoPoint {
    GeoPoint::new(38.457, -74.702)
}

fn scene_metadata() -> SceneMetadata {
    let mut bands = BTreeMap::new();
    bands.insert(
        10,
        BandMetadata {
            calibration: Calibration::new(0.1, 1.0),
            file_name: "B10.TIF".to_string(),
        },
    );
    SceneMetadata {
        scene_id: SCENE.to_string(),
        family: SensorFamily::Landsat8,
        acquired: overpass(),
        corners: Corners {
            upper_left: GeoPoint::new(39.5, -75.9),
            upper_right: GeoPoint::new(39.5, -73.2),
            lower_left: GeoPoint::new(37.5, -75.9),
            lower_right: GeoPoint::new(37.5, -73.2),
        },
        utm_zone: 18,
        bands,
    }
}

/// 5x5 image of DC 100 centred on the first buoy
struct FakeScenes;

impl SceneProvider for FakeScenes {
    fn metadata(&self, scene_id: &str) -> CalResult<SceneMetadata> {
        if scene_id != SCENE {
            return Err(CalError::InvalidInput(format!("unknown scene {}", scene_id)));
        }
        Ok(scene_metadata())
    }

    fn band_image(&self, scene: &SceneMetadata, _band: u8) -> CalResult<BandImage> {
        let centre = to_utm(&buoy_in_image(), scene.utm_zone)?;
        let gt = GeoTransform::from_array([
            centre.easting - 2.5 * 30.0,
            30.0,
            0.0,
            centre.northing + 2.5 * 30.0,
            0.0,
            -30.0,
        ]);
        Ok(BandImage::new(
            Array2::from_elem((5, 5), 100.0f32),
            gt,
            scene.utm_zone,
        ))
    }
}

struct FakeBuoys {
    stations: Vec<(BuoyStation, f64)>,
}

impl FakeBuoys {
    fn new() -> Self {
        let station = |id: &str, location: GeoPoint| BuoyStation {
            id: id.to_string(),
            location,
            depth_m: 0.8,
            anemometer_height_m: 10.0,
        };
        Self {
            stations: vec![
                // Calibrates
                (station("44009", buoy_in_image()), 5.0),
                // Inside the footprint but off the test image
                (station("44025", GeoPoint::new(39.0, -74.0)), 5.0),
                // Calm: rejected by the skin model gate
                (station("44065", GeoPoint::new(38.0, -75.0)), 0.5),
            ],
        }
    }
}

impl BuoyProvider for FakeBuoys {
    fn stations_in(&self, corners: &Corners) -> CalResult<Vec<BuoyStation>> {
        Ok(self
            .stations
            .iter()
            .map(|(s, _)| s.clone())
            .filter(|s| corners.contains(&s.location))
            .collect())
    }

    fn record(&self, station: &BuoyStation, overpass: DateTime<Utc>) -> CalResult<BuoyRecord> {
        let wind = self
            .stations
            .iter()
            .find(|(s, _)| s.id == station.id)
            .map(|(_, w)| *w)
            .ok_or_else(|| CalError::RemoteFetchFailed(station.id.clone()))?;
        let samples = (-12..=12)
            .map(|h| BuoySample {
                time: overpass + Duration::hours(h),
                wind_speed: Some(wind),
                water_temp: Some(20.0),
                air_temp: Some(18.0),
                pressure: Some(1015.0),
                dewpoint: Some(12.0),
            })
            .collect();
        Ok(BuoyRecord::new(station.clone(), samples))
    }
}

/// Spatially uniform MERRA-style grid bracketing the overpass
struct FakeReanalysis;

impl ReanalysisProvider for FakeReanalysis {
    fn dataset(&self, source: ReanalysisSource, t: DateTime<Utc>) -> CalResult<ReanalysisDataset> {
        assert_eq!(source, ReanalysisSource::Merra);
        let base = Utc.with_ymd_and_hms(2014, 6, 14, 15, 0, 0).unwrap();
        assert!(t >= base && t <= base + Duration::hours(3));

        let levels = vec![1000.0, 850.0, 700.0, 500.0];
        let (ny, nx) = (7, 6);
        let lat = Array2::from_shape_fn((ny, nx), |(y, _)| 37.0 + y as f64 * 0.5);
        let lon = Array2::from_shape_fn((ny, nx), |(_, x)| -76.25 + x as f64 * 0.625);
        let shape = (2, levels.len(), ny, nx);
        let heights = [100.0f32, 1500.0, 3000.0, 5500.0];
        let temps = [291.0f32, 283.0, 273.0, 258.0];

        let mut variables = HashMap::new();
        variables.insert(
            "H".to_string(),
            Array4::from_shape_fn(shape, |(_, l, _, _)| heights[l]),
        );
        variables.insert(
            "T".to_string(),
            Array4::from_shape_fn(shape, |(ti, l, _, _)| temps[l] + ti as f32),
        );
        variables.insert("RH".to_string(), Array4::from_elem(shape, 0.5f32));

        let grid = GridData {
            times: vec![base, base + Duration::hours(3)],
            levels,
            lat,
            lon,
            variables,
        };
        grid.validate()?;
        Ok(ReanalysisDataset::new(vec![Box::new(grid)]))
    }
}

/// Engine returning a fixed spectrum and recording its run directories
struct FakeEngine {
    workdirs: Mutex<Vec<String>>,
}

impl FakeEngine {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            workdirs: Mutex::new(Vec::new()),
        })
    }

    fn runs(&self) -> Vec<String> {
        let mut dirs = self.workdirs.lock().unwrap().clone();
        dirs.sort();
        dirs
    }
}

impl RtEngine for FakeEngine {
    fn run(&self, workdir: &Path, deck: &str, cancel: &CancelToken) -> CalResult<String> {
        cancel.check()?;
        assert!(deck.contains("AAH2222222222"));
        let name = workdir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        self.workdirs.lock().unwrap().push(name);

        let mut out = String::from("  FREQ TOT_TRANS PTH_THRML ... TOTAL_RAD\n");
        for i in 0..=45 {
            let nu = 700.0 + i as f64 * 10.0;
            let (trans, path) = (0.8, 2.0e-6);
            let ground = 1.0e-6 * trans;
            let _ = writeln!(
                out,
                "{:8.1} {:.4} {:.4E} 0.0 0.0 0.0 0.0 {:.4E} 0.0 {:.4E} 0.0 0.0 0.1",
                nu,
                trans,
                path,
                ground,
                path + ground
            );
        }
        Ok(out)
    }
}

/// RSR directory holding a band 10 curve
fn rsr_dir(root: &Path) -> PathBuf {
    let dir = root.join("rsr");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        RsrLibrary::curve_path(&dir, SensorFamily::Landsat8, 10),
        "# TIRS band 10\n10.50 0.0\n10.60 0.9\n10.90 1.0\n11.19 0.9\n11.30 0.0\n",
    )
    .unwrap();
    dir
}

fn calibrator<'a>(
    engine: Arc<FakeEngine>,
    runs_dir: &Path,
    scenes: &'a FakeScenes,
    buoys: &'a FakeBuoys,
    reanalysis: &'a FakeReanalysis,
) -> SceneCalibrator<'a> {
    SceneCalibrator {
        scenes,
        buoys,
        reanalysis,
        driver: RtDriver::new(engine, runs_dir.to_path_buf(), true),
        std_atmo: StandardAtmosphere::mid_latitude_summer(),
        water: WaterReflectance::water(),
        rsr_dir: rsr_dir(runs_dir),
        buoy_model: BuoyModel::default(),
        params: CalibratorParams::default(),
        cancel: CancelToken::new(),
    }
}

#[test]
fn test_scene_calibrates_valid_buoy_and_skips_others() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine::new();
    let (scenes, buoys, reanalysis) = (FakeScenes, FakeBuoys::new(), FakeReanalysis);
    let cal = calibrator(engine.clone(), dir.path(), &scenes, &buoys, &reanalysis);

    let mut streamed: Vec<String> = Vec::new();
    let rows = cal
        .run(&SceneRequest::new(SCENE, ReanalysisSource::Merra), |row| {
            streamed.push(row.buoy_id.clone())
        })
        .unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(streamed, vec!["44009".to_string()]);

    let row = &rows[0];
    assert_eq!(row.scene_id, SCENE);
    assert!((row.bulk_temp - 293.15).abs() < 1e-9);
    assert!(row.skin_temp < row.bulk_temp);
    assert_eq!(row.measured.len(), 1);
    assert!((row.measured[0].1 - 11.0).abs() < 1e-9);

    let (band, modeled) = row.modeled[0];
    assert_eq!(band, 10);
    assert!(modeled > 5.0 && modeled < 15.0, "modeled {}", modeled);
    let (_, sigma) = row.sigma[0];
    assert!(sigma > 0.0 && sigma < 1.0, "sigma {}", sigma);

    // Nominal plus four shifted atmospheres for the one buoy that got that far
    let runs = engine.runs();
    assert_eq!(runs.len(), 5);
    assert!(runs.contains(&format!("{}_44009", SCENE)));
    assert!(runs.contains(&format!("{}_44009_lon-", SCENE)));
    assert!(dir.path().join(format!("{}_44009", SCENE)).join("atmo.txt").is_file());
}

#[test]
fn test_buoy_filter_and_no_buoy_in_scene() {
    let dir = tempfile::tempdir().unwrap();
    let (scenes, buoys, reanalysis) = (FakeScenes, FakeBuoys::new(), FakeReanalysis);
    let cal = calibrator(FakeEngine::new(), dir.path(), &scenes, &buoys, &reanalysis);

    let mut request = SceneRequest::new(SCENE, ReanalysisSource::Merra);
    request.buoy_id = Some("44009".to_string());
    let rows = cal.run(&request, |_| {}).unwrap();
    assert_eq!(rows.len(), 1);

    request.buoy_id = Some("99999".to_string());
    let result = cal.run(&request, |_| {});
    assert!(matches!(result, Err(CalError::NoBuoyInScene(ref id)) if id == SCENE));
}

#[test]
fn test_all_buoys_failing_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let (scenes, reanalysis) = (FakeScenes, FakeReanalysis);
    let mut buoys = FakeBuoys::new();
    buoys.stations.retain(|(s, _)| s.id != "44009");
    let engine = FakeEngine::new();
    let cal = calibrator(engine.clone(), dir.path(), &scenes, &buoys, &reanalysis);

    let rows = cal
        .run(&SceneRequest::new(SCENE, ReanalysisSource::Merra), |_| {
            panic!("no row expected")
        })
        .unwrap();
    assert!(rows.is_empty());
    assert!(engine.runs().is_empty());
}

#[test]
fn test_missing_rsr_fails_scene_unless_nominal_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let (scenes, buoys, reanalysis) = (FakeScenes, FakeBuoys::new(), FakeReanalysis);
    let engine = FakeEngine::new();
    let mut cal = calibrator(engine.clone(), dir.path(), &scenes, &buoys, &reanalysis);
    cal.rsr_dir = dir.path().join("empty_rsr");

    let request = SceneRequest::new(SCENE, ReanalysisSource::Merra);
    assert!(matches!(cal.run(&request, |_| {}), Err(CalError::Config(_))));
    assert!(engine.runs().is_empty());

    cal.params.nominal_rsr_fallback = true;
    assert_eq!(cal.run(&request, |_| {}).unwrap().len(), 1);
}

#[test]
fn test_invalid_band_request() {
    let dir = tempfile::tempdir().unwrap();
    let (scenes, buoys, reanalysis) = (FakeScenes, FakeBuoys::new(), FakeReanalysis);
    let cal = calibrator(FakeEngine::new(), dir.path(), &scenes, &buoys, &reanalysis);

    let mut request = SceneRequest::new(SCENE, ReanalysisSource::Merra);
    request.bands = Some(vec![4]);
    assert!(matches!(
        cal.run(&request, |_| {}),
        Err(CalError::InvalidInput(_))
    ));
}

#[test]
fn test_cancelled_run() {
    let dir = tempfile::tempdir().unwrap();
    let (scenes, buoys, reanalysis) = (FakeScenes, FakeBuoys::new(), FakeReanalysis);
    let cal = calibrator(FakeEngine::new(), dir.path(), &scenes, &buoys, &reanalysis);
    cal.cancel.cancel();
    assert!(matches!(
        cal.run(&SceneRequest::new(SCENE, ReanalysisSource::Merra), |_| {}),
        Err(CalError::Cancelled)
    ));
}

#[test]
fn test_rows_saved_as_csv() {
    let dir = tempfile::tempdir().unwrap();
    let (scenes, buoys, reanalysis) = (FakeScenes, FakeBuoys::new(), FakeReanalysis);
    let cal = calibrator(FakeEngine::new(), dir.path(), &scenes, &buoys, &reanalysis);
    let rows: Vec<BuoyResult> = cal
        .run(&SceneRequest::new(SCENE, ReanalysisSource::Merra), |_| {})
        .unwrap();

    let csv = dir.path().join("results.csv");
    append_csv(&csv, &[10], &rows).unwrap();
    let text = std::fs::read_to_string(&csv).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], csv_header(&[10]));
    assert!(lines[1].starts_with(&format!("{},2014/06/14,44009,293.150,", SCENE)));
}
