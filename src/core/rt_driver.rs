//! Radiative transfer driver.
//!
//! Builds a MODTRAN-style `tape5` deck from an assembled profile, runs the
//! engine in a per-run working directory and parses `tape7.scn` into
//! spectra on an ascending wavelength grid.

use crate::core::spectral::{RadianceUnit, Spectrum, WavelengthGrid};
use crate::types::{AtmosphericProfile, CalError, CalResult, CancelToken, GeoPoint};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Spectral window accepted from the engine output (cm⁻¹)
pub const WAVENUMBER_WINDOW: (f64, f64) = (710.0, 1120.0);

/// Transmittance floor applied before division
pub const MIN_TRANSMITTANCE: f64 = 1e-6;

/// Maximum summed residual of the downwelled consistency check
pub const CONSISTENCY_TOLERANCE: f64 = 0.05;

/// Deck header: thermal radiance mode, user-defined model atmosphere, ground
/// at `gdalt` km with surface temperature `tmp____` and unit albedo.
const DECK_HEADER: &str = "\
TM  7    2    2   -1    0    0    0    0    0    0    1    1    0 tmp____   1.00
TFF  8F   0   360.00000         1.0         0.0 F F F         0.000
    1    0    0    3    0    0     0.000     0.000     0.000     0.000   gdalt
  nml    0    0 buoycal user profile
";

/// Deck tail: nadir view from space over the target, spectral range and
/// instrument slit
const DECK_TAIL: &str = "\
   705.000     0.000   180.000
    2    0  jay    0
    latitu    longit     0.000     0.000     0.000     0.000     0.000     0.000
  startp  stoppp   stepp    2.0RN        AA
    0
";

/// Parameters substituted into the deck besides the profile itself
#[derive(Debug, Clone)]
pub struct DeckParams {
    pub location: GeoPoint,
    /// Day of year of the overpass
    pub julian_day: u32,
    /// Surface temperature (K)
    pub skin_temp: f64,
    /// Spectral range and step (cm⁻¹)
    pub start_wavenumber: f64,
    pub stop_wavenumber: f64,
    pub step_wavenumber: f64,
}

impl DeckParams {
    pub fn new(location: GeoPoint, julian_day: u32, skin_temp: f64) -> Self {
        Self {
            location,
            julian_day,
            skin_temp,
            start_wavenumber: 700.0,
            stop_wavenumber: 1130.0,
            step_wavenumber: 1.0,
        }
    }
}

/// Longitude in the engine's west-positive convention
pub fn west_positive_longitude(lon: f64) -> f64 {
    if lon >= 0.0 {
        360.0 - lon
    } else {
        lon.abs()
    }
}

/// Fortran `E` edit descriptor, e.g. `1.01E+03` for `%.2E`
pub fn fortran_e(value: f64, precision: usize) -> String {
    let formatted = format!("{:.*E}", precision, value);
    match formatted.split_once('E') {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or(0);
            format!(
                "{}E{}{:02}",
                mantissa,
                if exp < 0 { '-' } else { '+' },
                exp.abs()
            )
        }
        None => formatted,
    }
}

/// Replace `key` in `template` with `value`, right-aligned in the key's
/// width. Longer values consume blanks to the left of the key so the
/// following columns stay in place.
pub fn substitute(template: &str, key: &str, value: &str) -> CalResult<String> {
    let start = template
        .find(key)
        .ok_or_else(|| CalError::InvalidInput(format!("deck template has no '{}'", key)))?;
    let blanks = template[..start]
        .chars()
        .rev()
        .take_while(|c| *c == ' ')
        .count();

    let width = key.len();
    if value.len() > width + blanks {
        return Err(CalError::InvalidInput(format!(
            "value '{}' does not fit placeholder '{}'",
            value, key
        )));
    }
    let borrow = value.len().saturating_sub(width);
    let field_start = start - borrow;
    let field_width = width + borrow;

    let mut out = String::with_capacity(template.len() + borrow);
    out.push_str(&template[..field_start]);
    let _ = write!(out, "{:>w$}", value, w = field_width);
    out.push_str(&template[start + width..]);
    Ok(out)
}

/// Render the full `tape5` deck
pub fn build_deck(profile: &AtmosphericProfile, params: &DeckParams) -> CalResult<String> {
    if profile.is_empty() {
        return Err(CalError::InvalidInput("cannot build a deck from an empty profile".to_string()));
    }

    let mut header = DECK_HEADER.to_string();
    for (key, value) in [
        ("nml", profile.len().to_string()),
        ("gdalt", format!("{:.3}", profile.height[0])),
        ("tmp____", format!("{:.3}", params.skin_temp)),
    ] {
        header = substitute(&header, key, &value)?;
    }

    let mut body = String::with_capacity(profile.len() * 80);
    for layer in profile.layers() {
        let _ = writeln!(
            body,
            "{:10.3}{:>10}{:>10}{:>10}{:>10}{:>10}AAH2222222222 2",
            layer.height,
            fortran_e(layer.pressure, 2),
            fortran_e(layer.temperature, 2),
            fortran_e(layer.rel_humidity, 2),
            fortran_e(0.0, 2),
            fortran_e(0.0, 2),
        );
    }

    let mut tail = DECK_TAIL.to_string();
    for (key, value) in [
        ("latitu", format!("{:.3}", params.location.lat)),
        ("longit", format!("{:.3}", west_positive_longitude(params.location.lon))),
        ("jay", params.julian_day.to_string()),
        ("startp", format!("{:.1}", params.start_wavenumber)),
        ("stoppp", format!("{:.1}", params.stop_wavenumber)),
        ("stepp", format!("{:.1}", params.step_wavenumber)),
    ] {
        tail = substitute(&tail, key, &value)?;
    }

    Ok(format!("{}{}{}", header, body, tail))
}

/// External radiative transfer engine
pub trait RtEngine: Send + Sync {
    /// Run the engine on `deck` inside `workdir` and return the text of
    /// its spectral output table
    fn run(&self, workdir: &Path, deck: &str, cancel: &CancelToken) -> CalResult<String>;
}

/// MODTRAN executable reading `tape5` and writing `tape7.scn`
#[derive(Debug, Clone)]
pub struct ModtranEngine {
    pub binary: PathBuf,
    pub data_dir: PathBuf,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl ModtranEngine {
    pub fn new(binary: PathBuf, data_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            binary,
            data_dir,
            timeout,
            poll_interval: Duration::from_millis(100),
        }
    }

    #[cfg(unix)]
    fn link_data(&self, workdir: &Path) -> CalResult<()> {
        let link = workdir.join("DATA");
        if link.symlink_metadata().is_err() {
            std::os::unix::fs::symlink(&self.data_dir, &link)?;
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn link_data(&self, _workdir: &Path) -> CalResult<()> {
        log::warn!("DATA symlink not supported on this platform; engine must find its data itself");
        Ok(())
    }
}

impl RtEngine for ModtranEngine {
    fn run(&self, workdir: &Path, deck: &str, cancel: &CancelToken) -> CalResult<String> {
        cancel.check()?;
        std::fs::write(workdir.join("tape5"), deck)?;
        self.link_data(workdir)?;

        let stdout = std::fs::File::create(workdir.join("engine.log"))?;
        let stderr = stdout.try_clone()?;
        log::debug!("Starting {} in {}", self.binary.display(), workdir.display());
        let mut child = Command::new(&self.binary)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()
            .map_err(|e| {
                CalError::RtExecutionFailed(format!("cannot start {}: {}", self.binary.display(), e))
            })?;

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if cancel.is_cancelled() {
                log::warn!("Cancelling RT run in {}", workdir.display());
                let _ = child.kill();
                let _ = child.wait();
                return Err(CalError::Cancelled);
            }
            if started.elapsed() > self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(CalError::RtExecutionFailed(format!(
                    "engine exceeded {:?} in {}",
                    self.timeout,
                    workdir.display()
                )));
            }
            std::thread::sleep(self.poll_interval);
        };

        if !status.success() {
            return Err(CalError::RtExecutionFailed(format!(
                "engine exited with {} in {}",
                status,
                workdir.display()
            )));
        }

        let output = workdir.join("tape7.scn");
        std::fs::read_to_string(&output).map_err(|e| {
            CalError::RtOutputMissing(format!("{}: {}", output.display(), e))
        })
    }
}

/// Parsed engine output on an ascending wavelength grid
#[derive(Debug, Clone)]
pub struct RtResult {
    /// Path thermal radiance (W cm⁻² sr⁻¹ μm⁻¹)
    pub upwelled: Spectrum,
    /// Ground-reflected radiance (W cm⁻² sr⁻¹ μm⁻¹)
    pub ground_reflected: Spectrum,
    /// Downwelled radiance at the surface, `ground_reflected / τ`
    pub downwelled: Spectrum,
    /// Total radiance (W cm⁻² sr⁻¹ μm⁻¹)
    pub total: Spectrum,
    /// Total transmittance, within (0, 1]
    pub transmittance: Vec<f64>,
}

impl RtResult {
    pub fn grid(&self) -> &WavelengthGrid {
        self.upwelled.grid()
    }
}

const COL_FREQ: usize = 0;
const COL_TRANS: usize = 1;
const COL_PATH_THERMAL: usize = 2;
const COL_GROUND_REFLECTED: usize = 7;
const COL_TOTAL: usize = 9;

/// Parse `tape7.scn`.
///
/// Only rows whose first field is a wavenumber within
/// [`WAVENUMBER_WINDOW`] are read. Radiances per cm⁻¹ are converted to per
/// μm, zero transmittance is clamped and the downwelled term is checked
/// against `(total - upwelled) / τ`.
pub fn parse_tape7(text: &str) -> CalResult<RtResult> {
    let mut freq = Vec::new();
    let mut trans = Vec::new();
    let mut path = Vec::new();
    let mut ground = Vec::new();
    let mut total = Vec::new();

    for (lineno, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = fields.first().and_then(|s| s.parse::<f64>().ok()) else {
            continue;
        };
        if first < WAVENUMBER_WINDOW.0 || first > WAVENUMBER_WINDOW.1 {
            continue;
        }
        if fields.len() <= COL_TOTAL {
            return Err(CalError::RtOutputMissing(format!(
                "tape7 line {} has {} columns",
                lineno + 1,
                fields.len()
            )));
        }
        let value = |col: usize| -> CalResult<f64> {
            fields[col].parse::<f64>().map_err(|e| {
                CalError::RtOutputCorrupt(format!("tape7 line {} column {}: {}", lineno + 1, col, e))
            })
        };
        freq.push(value(COL_FREQ)?);
        trans.push(value(COL_TRANS)?);
        path.push(value(COL_PATH_THERMAL)?);
        ground.push(value(COL_GROUND_REFLECTED)?);
        total.push(value(COL_TOTAL)?);
    }

    if freq.len() < 2 {
        return Err(CalError::RtOutputMissing(format!(
            "tape7 has {} rows in the {}-{} cm-1 window",
            freq.len(),
            WAVENUMBER_WINDOW.0,
            WAVENUMBER_WINDOW.1
        )));
    }

    // Engine output ascends in wavenumber; reverse for ascending wavelength
    for column in [&mut freq, &mut trans, &mut path, &mut ground, &mut total] {
        column.reverse();
    }
    let grid = WavelengthGrid::from_wavenumbers(&freq)
        .map_err(|e| CalError::RtOutputCorrupt(format!("tape7 spectral axis: {}", e)))?;

    // W cm-2 sr-1 (cm-1)-1 -> W cm-2 sr-1 um-1
    let per_um = |values: &[f64]| -> Vec<f64> {
        values
            .iter()
            .zip(&freq)
            .map(|(v, nu)| v * nu * nu * 1e-4)
            .collect()
    };
    let upwelled = per_um(&path);
    let ground_reflected = per_um(&ground);
    let total = per_um(&total);

    let transmittance: Vec<f64> = trans
        .iter()
        .map(|t| if *t <= 0.0 { MIN_TRANSMITTANCE } else { *t })
        .collect();
    if transmittance.iter().any(|t| !t.is_finite() || *t > 1.0) {
        return Err(CalError::RtOutputCorrupt(
            "transmittance outside (0, 1]".to_string(),
        ));
    }
    if upwelled.iter().chain(&ground_reflected).any(|v| !v.is_finite() || *v < 0.0) {
        return Err(CalError::RtOutputCorrupt(
            "negative or non-finite radiance".to_string(),
        ));
    }

    let downwelled: Vec<f64> = ground_reflected
        .iter()
        .zip(&transmittance)
        .map(|(g, t)| g / t)
        .collect();

    let residual: f64 = downwelled
        .iter()
        .zip(&total)
        .zip(&upwelled)
        .zip(&transmittance)
        .map(|(((d, tot), up), t)| (d - (tot - up) / t).abs())
        .sum();
    if !(residual < CONSISTENCY_TOLERANCE) {
        return Err(CalError::RtOutputCorrupt(format!(
            "downwelled radiance inconsistent with total (residual {:.4})",
            residual
        )));
    }

    let spectrum = |values: Vec<f64>| Spectrum::new(grid.clone(), values, RadianceUnit::WPerCm2SrUm);
    Ok(RtResult {
        upwelled: spectrum(upwelled)?,
        ground_reflected: spectrum(ground_reflected)?,
        downwelled: spectrum(downwelled)?,
        total: spectrum(total)?,
        transmittance,
    })
}

/// Working directory for one RT invocation; removed on drop unless kept
struct RunDir {
    path: PathBuf,
    remove: bool,
}

impl Drop for RunDir {
    fn drop(&mut self) {
        if self.remove {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                log::debug!("Could not remove {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Runs the engine for assembled profiles, one directory per invocation
#[derive(Clone)]
pub struct RtDriver {
    engine: Arc<dyn RtEngine>,
    runs_dir: PathBuf,
    keep_workdirs: bool,
}

impl RtDriver {
    pub fn new(engine: Arc<dyn RtEngine>, runs_dir: PathBuf, keep_workdirs: bool) -> Self {
        Self {
            engine,
            runs_dir,
            keep_workdirs,
        }
    }

    /// `<runs_dir>/<scene>_<buoy>[_<tag>]`
    pub fn workdir(&self, scene_id: &str, buoy_id: &str, tag: Option<&str>) -> PathBuf {
        let name = match tag {
            Some(tag) => format!("{}_{}_{}", scene_id, buoy_id, tag),
            None => format!("{}_{}", scene_id, buoy_id),
        };
        self.runs_dir.join(name)
    }

    /// Build the deck, run the engine and parse its output
    pub fn run(
        &self,
        scene_id: &str,
        buoy_id: &str,
        tag: Option<&str>,
        profile: &AtmosphericProfile,
        params: &DeckParams,
        cancel: &CancelToken,
    ) -> CalResult<RtResult> {
        cancel.check()?;
        let path = self.workdir(scene_id, buoy_id, tag);
        std::fs::create_dir_all(&path)?;
        let mut dir = RunDir {
            path,
            remove: !self.keep_workdirs,
        };

        std::fs::write(dir.path.join("atmo.txt"), profile.to_text())?;
        let deck = build_deck(profile, params)?;

        log::info!(
            "RT run {} ({} layers, skin {:.3} K)",
            dir.path.display(),
            profile.len(),
            params.skin_temp
        );
        let output = match self.engine.run(&dir.path, &deck, cancel) {
            Ok(output) => output,
            Err(CalError::Cancelled) => {
                // Leave the directory for inspection
                dir.remove = false;
                return Err(CalError::Cancelled);
            }
            Err(e) => return Err(e),
        };
        parse_tape7(&output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::sync::Mutex;

    fn profile(n: usize) -> AtmosphericProfile {
        AtmosphericProfile::new(
            (0..n).map(|i| i as f64 * 1.5).collect(),
            (0..n).map(|i| 1013.0 * (-(i as f64) * 0.18).exp()).collect(),
            (0..n).map(|i| 290.0 - i as f64 * 6.0).collect(),
            (0..n).map(|_| 50.0).collect(),
        )
        .unwrap()
    }

    /// tape7.scn text with `total = path + ground`
    fn synthetic_tape7(trans: f64) -> String {
        let mut out = String::from(
            "  FREQ TOT_TRANS PTH_THRML THRML_SCT SURF_EMIS SOL_SCAT SING_SCAT GRND_RFLT DRCT_RFLT TOTAL_RAD REF_SOL SOL@OBS DEPTH\n",
        );
        out.push_str("   1   2   3\n");
        for i in 0..=45 {
            let nu = 700.0 + i as f64 * 10.0;
            let path = 2.0e-6;
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
        out
    }

    #[test]
    fn test_fortran_e() {
        assert_eq!(fortran_e(1013.0, 2), "1.01E+03");
        assert_eq!(fortran_e(0.0, 2), "0.00E+00");
        assert_eq!(fortran_e(0.00256, 2), "2.56E-03");
        assert_eq!(fortran_e(293.15, 2), "2.93E+02");
    }

    #[test]
    fn test_substitute_alignment() {
        assert_eq!(substitute("  nml    0", "nml", "12").unwrap(), "   12    0");
        assert_eq!(substitute("    latitu  x", "latitu", "-38.457").unwrap(), "   -38.457  x");
        assert!(substitute("latitu", "latitu", "-38.457").is_err());
        assert!(substitute("abc", "zzz", "1").is_err());
    }

    #[test]
    fn test_west_positive_longitude() {
        assert_relative_eq!(west_positive_longitude(-74.7), 74.7);
        assert_relative_eq!(west_positive_longitude(10.0), 350.0);
        assert_relative_eq!(west_positive_longitude(0.0), 360.0);
    }

    #[test]
    fn test_build_deck() {
        let p = profile(5);
        let params = DeckParams::new(GeoPoint::new(38.457, -74.702), 165, 293.101);
        let deck = build_deck(&p, &params).unwrap();

        assert!(deck.contains("    5    0    0 buoycal"));
        assert!(deck.contains("293.101"));
        assert!(deck.contains("74.702"));
        assert!(deck.contains("  165    0"));
        let layer_lines: Vec<&str> = deck.lines().filter(|l| l.ends_with("AAH2222222222 2")).collect();
        assert_eq!(layer_lines.len(), 5);
        assert!(layer_lines[0].starts_with("     0.000  1.01E+03  2.90E+02  5.00E+01"));
        assert!(!deck.contains("tmp____"));
        assert!(!deck.contains("latitu"));
    }

    #[test]
    fn test_parse_tape7() {
        let result = parse_tape7(&synthetic_tape7(0.8)).unwrap();
        // 710..1120 inclusive at 10 cm-1
        assert_eq!(result.grid().len(), 42);
        let wl = result.grid().micrometers();
        assert!(wl.windows(2).all(|w| w[0] < w[1]));
        assert_relative_eq!(wl[0], 1e4 / 1120.0);

        // Downwelled = ground / tau, in per-um units
        let nu = 1120.0;
        assert_relative_eq!(
            result.downwelled.values()[0],
            1.0e-6 * nu * nu * 1e-4,
            max_relative = 1e-3
        );
        assert!(result.transmittance.iter().all(|t| *t > 0.0 && *t <= 1.0));
    }

    #[test]
    fn test_parse_tape7_clamps_zero_transmittance() {
        let result = parse_tape7(&synthetic_tape7(0.0)).unwrap();
        assert!(result.transmittance.iter().all(|t| *t == MIN_TRANSMITTANCE));
        assert!(result.downwelled.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_parse_tape7_failures() {
        assert!(matches!(parse_tape7("no data\n"), Err(CalError::RtOutputMissing(_))));
        assert!(matches!(
            parse_tape7("  800.0 0.5 1.0E-6\n"),
            Err(CalError::RtOutputMissing(_))
        ));

        // Inflate the total column so the consistency check fails
        let inflated: String = synthetic_tape7(0.8)
            .lines()
            .map(|line| {
                let mut fields: Vec<String> = line.split_whitespace().map(String::from).collect();
                if fields.len() > 9 && fields[0].parse::<f64>().is_ok() {
                    fields[9] = "1.0E-2".to_string();
                }
                fields.join(" ") + "\n"
            })
            .collect();
        assert!(matches!(parse_tape7(&inflated), Err(CalError::RtOutputCorrupt(_))));
    }

    struct RecordingEngine {
        decks: Mutex<Vec<(PathBuf, String)>>,
    }

    impl RtEngine for RecordingEngine {
        fn run(&self, workdir: &Path, deck: &str, cancel: &CancelToken) -> CalResult<String> {
            cancel.check()?;
            if let Ok(mut decks) = self.decks.lock() {
                decks.push((workdir.to_path_buf(), deck.to_string()));
            }
            Ok(synthetic_tape7(0.9))
        }
    }

    #[test]
    fn test_driver_workdirs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine {
            decks: Mutex::new(Vec::new()),
        });
        let driver = RtDriver::new(engine.clone(), dir.path().to_path_buf(), true);
        let params = DeckParams::new(GeoPoint::new(38.4, -74.7), 165, 293.0);
        let token = CancelToken::new();

        driver.run("SCENE", "44009", None, &profile(4), &params, &token).unwrap();
        driver
            .run("SCENE", "44009", Some("lat+"), &profile(4), &params, &token)
            .unwrap();

        let decks = engine.decks.lock().unwrap();
        assert_eq!(decks.len(), 2);
        assert_ne!(decks[0].0, decks[1].0);
        assert!(dir.path().join("SCENE_44009").join("atmo.txt").exists());
        assert!(dir.path().join("SCENE_44009_lat+").exists());

        let saved = std::fs::read_to_string(dir.path().join("SCENE_44009/atmo.txt")).unwrap();
        assert_eq!(AtmosphericProfile::from_text(&saved).unwrap().len(), 4);
    }

    #[test]
    fn test_driver_removes_workdir_when_not_kept() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine {
            decks: Mutex::new(Vec::new()),
        });
        let driver = RtDriver::new(engine, dir.path().to_path_buf(), false);
        let params = DeckParams::new(GeoPoint::new(38.4, -74.7), 165, 293.0);
        driver
            .run("SCENE", "44009", None, &profile(4), &params, &CancelToken::new())
            .unwrap();
        assert!(!dir.path().join("SCENE_44009").exists());
    }

    #[test]
    fn test_driver_honours_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(RecordingEngine {
            decks: Mutex::new(Vec::new()),
        });
        let driver = RtDriver::new(engine, dir.path().to_path_buf(), true);
        let token = CancelToken::new();
        token.cancel();
        let params = DeckParams::new(GeoPoint::new(38.4, -74.7), 165, 293.0);
        let result = driver.run("SCENE", "44009", None, &profile(4), &params, &token);
        assert!(matches!(result, Err(CalError::Cancelled)));
    }

    #[cfg(unix)]
    #[test]
    fn test_modtran_engine_with_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let tape7 = dir.path().join("fixture.scn");
        std::fs::write(&tape7, synthetic_tape7(0.7)).unwrap();

        let script = dir.path().join("fake_modtran.sh");
        std::fs::write(
            &script,
            format!("#!/bin/sh\ntest -f tape5 || exit 3\ncp {} tape7.scn\n", tape7.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let work = dir.path().join("run");
        std::fs::create_dir_all(&work).unwrap();
        let engine = ModtranEngine::new(script, dir.path().to_path_buf(), Duration::from_secs(30));
        let text = engine.run(&work, "deck\n", &CancelToken::new()).unwrap();
        assert!(parse_tape7(&text).is_ok());
        assert!(work.join("DATA").symlink_metadata().is_ok());

        let failing = dir.path().join("fail.sh");
        std::fs::write(&failing, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&failing, std::fs::Permissions::from_mode(0o755)).unwrap();
        let engine = ModtranEngine::new(failing, dir.path().to_path_buf(), Duration::from_secs(30));
        assert!(matches!(
            engine.run(&work, "deck\n", &CancelToken::new()),
            Err(CalError::RtExecutionFailed(_))
        ));
    }

    #[cfg(unix)]
    fn sleeping_engine(dir: &Path, timeout: Duration) -> ModtranEngine {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.join("slow_modtran.sh");
        std::fs::write(&script, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let mut engine = ModtranEngine::new(script, dir.to_path_buf(), timeout);
        engine.poll_interval = Duration::from_millis(20);
        engine
    }

    #[cfg(unix)]
    #[test]
    fn test_modtran_engine_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let work = dir.path().join("run");
        std::fs::create_dir_all(&work).unwrap();
        let engine = sleeping_engine(dir.path(), Duration::from_millis(300));

        let started = Instant::now();
        let result = engine.run(&work, "deck\n", &CancelToken::new());
        assert!(matches!(result, Err(CalError::RtExecutionFailed(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_cancel_kills_running_engine_and_keeps_workdir() {
        let dir = tempfile::tempdir().unwrap();
        let runs = dir.path().join("runs");
        let engine = sleeping_engine(dir.path(), Duration::from_secs(60));
        let driver = RtDriver::new(Arc::new(engine), runs.clone(), false);
        let params = DeckParams::new(GeoPoint::new(38.4, -74.7), 165, 293.0);

        let token = CancelToken::new();
        let remote = token.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            remote.cancel();
        });

        let started = Instant::now();
        let result = driver.run("SCENE", "44009", None, &profile(4), &params, &token);
        canceller.join().unwrap();

        assert!(matches!(result, Err(CalError::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(10));
        let workdir = runs.join("SCENE_44009");
        assert!(workdir.join("tape5").is_file());
        assert!(workdir.join("atmo.txt").is_file());
    }
}
