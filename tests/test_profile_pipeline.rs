use approx::assert_relative_eq;
use buoycal::core::profile::{spatial_weights, ProfileAssembler};
use buoycal::core::rt_driver::{DeckParams, RtDriver, RtEngine};
use buoycal::io::reanalysis::{GridData, ReanalysisDataset, ReanalysisSource};
use buoycal::io::standard_atmosphere::StandardAtmosphere;
use buoycal::types::{
    AtmosphericProfile, CalError, CalResult, CancelToken, Corners, GeoPoint, SurfaceLayer,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use ndarray::{Array2, Array4};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

const LEVELS: [f64; 7] = [1000.0, 850.0, 700.0, 500.0, 300.0, 100.0, 10.0];
const HEIGHTS_M: [f32; 7] = [100.0, 1500.0, 3000.0, 5600.0, 9200.0, 16200.0, 31000.0];

fn t1() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2014, 6, 14, 15, 0, 0).unwrap()
}

fn lapse(height_m: f32) -> f32 {
    288.0 - 2.0 * height_m / 1000.0
}

/// Four identical dry columns on a 2x2 grid; `offsets` shift the whole
/// temperature column at each of the two times
fn dataset(offsets: [f32; 2]) -> ReanalysisDataset {
    let lat = Array2::from_shape_fn((2, 2), |(y, _)| 38.0 + y as f64 * 0.5);
    let lon = Array2::from_shape_fn((2, 2), |(_, x)| -75.0 + x as f64 * 0.625);
    let shape = (2, LEVELS.len(), 2, 2);

    let mut variables = HashMap::new();
    variables.insert(
        "H".to_string(),
        Array4::from_shape_fn(shape, |(_, l, _, _)| HEIGHTS_M[l]),
    );
    variables.insert(
        "T".to_string(),
        Array4::from_shape_fn(shape, |(t, l, _, _)| lapse(HEIGHTS_M[l]) + offsets[t]),
    );
    variables.insert("RH".to_string(), Array4::from_elem(shape, 0.0f32));

    let grid = GridData {
        times: vec![t1(), t1() + Duration::hours(3)],
        levels: LEVELS.to_vec(),
        lat,
        lon,
        variables,
    };
    grid.validate().unwrap();
    ReanalysisDataset::new(vec![Box::new(grid)])
}

fn corners() -> Corners {
    Corners {
        upper_left: GeoPoint::new(39.0, -75.5),
        upper_right: GeoPoint::new(39.0, -74.0),
        lower_left: GeoPoint::new(37.5, -75.5),
        lower_right: GeoPoint::new(37.5, -74.0),
    }
}

/// Standard atmosphere topping out below the reanalysis columns
fn low_standard_atmosphere() -> StandardAtmosphere {
    StandardAtmosphere::new(
        AtmosphericProfile::new(
            vec![0.0, 5.0, 10.0, 25.0],
            vec![1013.0, 540.0, 265.0, 25.0],
            vec![288.0, 255.0, 223.0, 221.0],
            vec![50.0, 20.0, 5.0, 0.0],
        )
        .unwrap(),
    )
    .unwrap()
}

fn surface() -> SurfaceLayer {
    SurfaceLayer {
        pressure: 1013.0,
        air_temp_c: 15.0,
        dewpoint_c: 10.0,
        rel_humidity: 72.0,
    }
}

struct DeckRecorder {
    decks: Mutex<Vec<String>>,
}

impl RtEngine for DeckRecorder {
    fn run(&self, _workdir: &Path, deck: &str, _cancel: &CancelToken) -> CalResult<String> {
        self.decks.lock().unwrap().push(deck.to_string());
        Ok(String::new())
    }
}

#[test]
fn test_synthetic_atmosphere_reaches_rt_deck() {
    let target = GeoPoint::new(38.0, -75.0);
    let sample = ReanalysisSource::Merra
        .read_columns(&dataset([0.0, 0.0]), &target, t1(), &corners())
        .unwrap();

    let weights = spatial_weights(&sample.points, &target);
    let at_bound = |w: f64| w.abs() < 1e-9 || (w - 1.0).abs() < 1e-9;
    assert!(at_bound(weights.alpha) && at_bound(weights.beta));

    let std_atmo = low_standard_atmosphere();
    let profile = ProfileAssembler::new(&std_atmo, 0.0)
        .assemble(&sample, &target, t1(), &surface())
        .unwrap();

    assert_eq!(profile.len(), LEVELS.len() + 1);
    assert_relative_eq!(profile.temperature[0], 288.15, epsilon = 1e-9);
    assert_relative_eq!(profile.pressure[0], 1013.0);
    for (i, &h) in HEIGHTS_M.iter().enumerate() {
        assert_relative_eq!(profile.height[i + 1], h as f64 / 1000.0, epsilon = 1e-6);
        assert_relative_eq!(profile.temperature[i + 1], lapse(h) as f64, epsilon = 1e-4);
        assert_relative_eq!(profile.rel_humidity[i + 1], 0.0);
        assert_relative_eq!(profile.pressure[i + 1], LEVELS[i], epsilon = 1e-9);
    }

    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(DeckRecorder {
        decks: Mutex::new(Vec::new()),
    });
    let driver = RtDriver::new(engine.clone(), dir.path().to_path_buf(), true);
    let result = driver.run(
        "SCENE",
        "44009",
        None,
        &profile,
        &DeckParams::new(target, 165, 290.0),
        &CancelToken::new(),
    );
    // An engine that writes nothing is a missing-output failure
    assert!(matches!(result, Err(CalError::RtOutputMissing(_))));

    let decks = engine.decks.lock().unwrap();
    assert_eq!(decks.len(), 1);
    let layer_lines = decks[0].lines().filter(|l| l.contains("AAH2222222222")).count();
    assert_eq!(layer_lines, LEVELS.len() + 1);

    let written = std::fs::read_to_string(dir.path().join("SCENE_44009").join("atmo.txt")).unwrap();
    let reread = AtmosphericProfile::from_text(&written).unwrap();
    assert_eq!(reread.len(), profile.len());
}

#[test]
fn test_two_time_linear_blend() {
    let target = GeoPoint::new(38.2, -74.7);
    let midway = t1() + Duration::minutes(90);
    // Offsets chosen so the bottom column sits at 280 K then 290 K
    let bottom = lapse(HEIGHTS_M[0]);
    let sample = ReanalysisSource::Merra
        .read_columns(
            &dataset([280.0 - bottom, 290.0 - bottom]),
            &target,
            midway,
            &corners(),
        )
        .unwrap();
    assert_eq!(sample.times, [t1(), t1() + Duration::hours(3)]);

    let std_atmo = low_standard_atmosphere();
    let assembler = ProfileAssembler::new(&std_atmo, 0.0);
    let column = assembler.column_at(&sample, &target, midway).unwrap();
    assert_relative_eq!(column.temperature[0], 285.0, epsilon = 1e-4);
    for (i, &h) in HEIGHTS_M.iter().enumerate() {
        let expected = lapse(h) as f64 - bottom as f64 + 285.0;
        assert_relative_eq!(column.temperature[i], expected, epsilon = 1e-3);
    }

    // Grid times reproduce their own columns
    let at_t2 = assembler
        .column_at(&sample, &target, t1() + Duration::hours(3))
        .unwrap();
    assert_relative_eq!(at_t2.temperature[0], 290.0, epsilon = 1e-4);
}

#[test]
fn test_overpass_outside_reanalysis_times() {
    let result = ReanalysisSource::Merra.read_columns(
        &dataset([0.0, 0.0]),
        &GeoPoint::new(38.2, -74.7),
        t1() + Duration::hours(6),
        &corners(),
    );
    assert!(matches!(
        result,
        Err(CalError::InsufficientAtmosphereCoverage(_))
    ));
}
