//! Reanalysis access: gridded pressure-level fields, source-specific file
//! naming and unit handling, and selection of the four columns around a
//! point.

use crate::core::numerics::{is_near_rectangle, planar_distance};
use crate::types::{AtmosphericProfile, BoundingBox, CalError, CalResult, Corners, GeoPoint};
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};
use ndarray::{Array2, Array4};
use std::collections::HashMap;
use std::str::FromStr;

/// Degrees the scene footprint is grown by before searching for columns
pub const FOOTPRINT_MARGIN_DEG: f64 = 0.5;

/// Number of nearest candidates searched for a near-rectangle
const SEARCH_DEPTH: usize = 16;

/// Values above this magnitude are treated as fill
const FILL_THRESHOLD: f64 = 1e10;

/// Read access to one gridded reanalysis file. Variables are indexed
/// `[time, level, y, x]`; `lat`/`lon` are indexed `[y, x]`.
pub trait ReanalysisGrid: Send + Sync {
    fn times(&self) -> &[DateTime<Utc>];
    /// Pressure levels in hPa
    fn levels(&self) -> &[f64];
    fn lat(&self) -> &Array2<f64>;
    fn lon(&self) -> &Array2<f64>;
    fn variable(&self, name: &str) -> Option<&Array4<f32>>;
}

/// In-memory grid
#[derive(Debug, Clone)]
pub struct GridData {
    pub times: Vec<DateTime<Utc>>,
    pub levels: Vec<f64>,
    pub lat: Array2<f64>,
    pub lon: Array2<f64>,
    pub variables: HashMap<String, Array4<f32>>,
}

impl GridData {
    /// Check that every variable agrees with the coordinate shapes
    pub fn validate(&self) -> CalResult<()> {
        if self.lat.dim() != self.lon.dim() {
            return Err(CalError::InputParseError(format!(
                "lat {:?} and lon {:?} shapes differ",
                self.lat.dim(),
                self.lon.dim()
            )));
        }
        let (ny, nx) = self.lat.dim();
        let expected = (self.times.len(), self.levels.len(), ny, nx);
        for (name, values) in &self.variables {
            if values.dim() != expected {
                return Err(CalError::InputParseError(format!(
                    "variable {} has shape {:?}, expected {:?}",
                    name,
                    values.dim(),
                    expected
                )));
            }
        }
        Ok(())
    }
}

impl ReanalysisGrid for GridData {
    fn times(&self) -> &[DateTime<Utc>] {
        &self.times
    }

    fn levels(&self) -> &[f64] {
        &self.levels
    }

    fn lat(&self) -> &Array2<f64> {
        &self.lat
    }

    fn lon(&self) -> &Array2<f64> {
        &self.lon
    }

    fn variable(&self, name: &str) -> Option<&Array4<f32>> {
        self.variables.get(name)
    }
}

/// Parse a CF reference datetime such as `1800-1-1 00:00:0.0` or
/// `2014-06-14T00:00:00Z`
fn parse_reference_time(text: &str) -> CalResult<DateTime<Utc>> {
    let bad = || CalError::InputParseError(format!("bad CF reference time '{}'", text));
    let cleaned = text.trim().trim_end_matches('Z').replace('T', " ");
    let mut parts = cleaned.split_whitespace();

    let date_part = parts.next().ok_or_else(bad)?;
    let ymd: Vec<u32> = date_part
        .split('-')
        .map(|s| s.parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|_| bad())?;
    if ymd.len() != 3 {
        return Err(bad());
    }
    let date = NaiveDate::from_ymd_opt(ymd[0] as i32, ymd[1], ymd[2]).ok_or_else(bad)?;

    let mut seconds = 0.0;
    if let Some(time_part) = parts.next() {
        let hms: Vec<f64> = time_part
            .split(':')
            .map(|s| s.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| bad())?;
        for (value, scale) in hms.iter().zip([3600.0, 60.0, 1.0]) {
            seconds += value * scale;
        }
    }

    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(bad)?;
    Ok(Utc.from_utc_datetime(&midnight) + Duration::milliseconds((seconds * 1000.0).round() as i64))
}

/// Decode CF-convention time offsets (`"<unit> since <datetime>"`)
pub fn decode_cf_times(values: &[f64], units: &str) -> CalResult<Vec<DateTime<Utc>>> {
    let (unit, reference) = units.split_once(" since ").ok_or_else(|| {
        CalError::InputParseError(format!("time units '{}' are not CF", units))
    })?;
    let seconds_per_unit = match unit.trim().to_lowercase().as_str() {
        "days" | "day" => 86_400.0,
        "hours" | "hour" | "h" => 3_600.0,
        "minutes" | "minute" | "min" => 60.0,
        "seconds" | "second" | "s" => 1.0,
        other => {
            return Err(CalError::InputParseError(format!(
                "unsupported time unit '{}'",
                other
            )))
        }
    };
    let origin = parse_reference_time(reference)?;
    Ok(values
        .iter()
        .map(|v| origin + Duration::milliseconds((v * seconds_per_unit * 1000.0).round() as i64))
        .collect())
}

/// Set of grids making up one reanalysis source for an overpass. A source
/// may split variables (NARR) or days (MERRA-2) across files.
#[derive(Default)]
pub struct ReanalysisDataset {
    grids: Vec<Box<dyn ReanalysisGrid>>,
}

impl ReanalysisDataset {
    pub fn new(grids: Vec<Box<dyn ReanalysisGrid>>) -> Self {
        Self { grids }
    }

    pub fn push(&mut self, grid: Box<dyn ReanalysisGrid>) {
        self.grids.push(grid);
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    /// Horizontal coordinates, shared by every grid of a source
    fn coordinates(&self) -> CalResult<(&Array2<f64>, &Array2<f64>)> {
        let grid = self.grids.first().ok_or_else(|| {
            CalError::InsufficientAtmosphereCoverage("no reanalysis grids loaded".to_string())
        })?;
        Ok((grid.lat(), grid.lon()))
    }

    /// Sorted, de-duplicated times at which `variable` is available
    pub fn times(&self, variable: &str) -> Vec<DateTime<Utc>> {
        let mut times: Vec<DateTime<Utc>> = self
            .grids
            .iter()
            .filter(|g| g.variable(variable).is_some())
            .flat_map(|g| g.times().iter().copied())
            .collect();
        times.sort();
        times.dedup();
        times
    }

    /// Grid and time index holding `variable` at `time`
    fn locate(&self, variable: &str, time: DateTime<Utc>) -> CalResult<(&dyn ReanalysisGrid, usize)> {
        self.grids
            .iter()
            .find_map(|g| {
                g.variable(variable)?;
                let index = g.times().iter().position(|t| *t == time)?;
                Some((g.as_ref(), index))
            })
            .ok_or_else(|| {
                CalError::InsufficientAtmosphereCoverage(format!(
                    "variable {} not available at {}",
                    variable, time
                ))
            })
    }
}

/// Four neighbour columns at the two grid times bracketing an overpass.
/// Column pressures equal `levels`; columns are bottom-up.
#[derive(Debug, Clone)]
pub struct ReanalysisSample {
    pub points: [GeoPoint; 4],
    pub times: [DateTime<Utc>; 2],
    /// Pressure levels common to all columns (hPa, descending)
    pub levels: Vec<f64>,
    /// `columns[time][point]`
    pub columns: [[AtmosphericProfile; 4]; 2],
}

/// Indices of the two grid times bracketing `t`. A time coinciding with a
/// grid time pairs it with its successor (or predecessor at the end).
pub fn bracket_times(times: &[DateTime<Utc>], t: DateTime<Utc>) -> CalResult<(usize, usize)> {
    if times.len() < 2 {
        return Err(CalError::InsufficientAtmosphereCoverage(format!(
            "need two reanalysis times around {}, have {}",
            t,
            times.len()
        )));
    }
    if let Some(i) = times.iter().position(|x| *x == t) {
        return Ok(if i + 1 < times.len() { (i, i + 1) } else { (i - 1, i) });
    }
    times
        .windows(2)
        .position(|w| w[0] < t && t < w[1])
        .map(|i| (i, i + 1))
        .ok_or_else(|| {
            CalError::InsufficientAtmosphereCoverage(format!(
                "overpass {} outside reanalysis times [{}, {}]",
                t,
                times[0],
                times[times.len() - 1]
            ))
        })
}

/// Normalise a longitude to [-180, 180)
fn wrap_lon(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Choose four grid points around `target`.
///
/// Candidates inside `bbox` are ranked by distance and the first four-tuple
/// (in combination order over the nearest few) passing the rectangle test
/// wins. With fewer than four candidates in the box the four globally
/// nearest points are used without the rectangle test.
pub fn select_neighbors(
    grid_points: &[GeoPoint],
    target: &GeoPoint,
    bbox: &BoundingBox,
) -> CalResult<[usize; 4]> {
    let by_distance = |indices: &mut Vec<usize>| {
        indices.sort_by(|&a, &b| {
            planar_distance(&grid_points[a], target).total_cmp(&planar_distance(&grid_points[b], target))
        });
    };

    let mut inside: Vec<usize> = (0..grid_points.len())
        .filter(|&i| bbox.contains(&grid_points[i]))
        .collect();

    if inside.len() < 4 {
        if grid_points.len() < 4 {
            return Err(CalError::InsufficientAtmosphereCoverage(format!(
                "grid has only {} points",
                grid_points.len()
            )));
        }
        log::warn!(
            "Only {} reanalysis points in footprint, using the four nearest overall",
            inside.len()
        );
        let mut all: Vec<usize> = (0..grid_points.len()).collect();
        by_distance(&mut all);
        return Ok([all[0], all[1], all[2], all[3]]);
    }

    by_distance(&mut inside);
    let pool = &inside[..inside.len().min(SEARCH_DEPTH)];
    let coords = |i: usize| (grid_points[i].lon, grid_points[i].lat);

    let n = pool.len();
    for i in 0..n {
        for j in i + 1..n {
            for k in j + 1..n {
                for l in k + 1..n {
                    let quad = [pool[i], pool[j], pool[k], pool[l]];
                    if is_near_rectangle(&quad.map(coords)) {
                        return Ok(quad);
                    }
                }
            }
        }
    }

    Err(CalError::InsufficientAtmosphereCoverage(format!(
        "no near-rectangle among the {} nearest points to ({:.4}, {:.4})",
        n, target.lat, target.lon
    )))
}

/// Supported reanalysis sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReanalysisSource {
    /// NCEP North American Regional Reanalysis (3-hourly, 32 km Lambert)
    Narr,
    /// NASA MERRA-2 (3-hourly instantaneous, 0.5° x 0.625°)
    Merra,
}

impl FromStr for ReanalysisSource {
    type Err = CalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "narr" => Ok(ReanalysisSource::Narr),
            "merra" | "merra2" => Ok(ReanalysisSource::Merra),
            other => Err(CalError::InvalidInput(format!(
                "unknown reanalysis source '{}'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ReanalysisSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReanalysisSource::Narr => write!(f, "narr"),
            ReanalysisSource::Merra => write!(f, "merra"),
        }
    }
}

const NARR_BASE_URL: &str = "https://downloads.psl.noaa.gov/Datasets/NARR/pressure";
const MERRA_BASE_URL: &str =
    "https://goldsmr5.gesdisc.eosdis.nasa.gov/data/MERRA2/M2I3NPASM.5.12.4";

impl ReanalysisSource {
    /// Variable names for (geopotential height, temperature, humidity)
    pub fn variables(&self) -> [&'static str; 3] {
        match self {
            ReanalysisSource::Narr => ["hgt", "air", "shum"],
            ReanalysisSource::Merra => ["H", "T", "RH"],
        }
    }

    /// Nominal grid spacing in degrees (lat, lon)
    pub fn grid_spacing_deg(&self) -> (f64, f64) {
        match self {
            ReanalysisSource::Narr => (0.29, 0.29),
            ReanalysisSource::Merra => (0.5, 0.625),
        }
    }

    /// Remote files covering `date`
    pub fn list_files(&self, date: NaiveDate) -> Vec<String> {
        match self {
            ReanalysisSource::Narr => ["air", "hgt", "shum"]
                .iter()
                .map(|v| format!("{}/{}.{}.nc", NARR_BASE_URL, v, date.format("%Y%m")))
                .collect(),
            ReanalysisSource::Merra => {
                let stream = match date.year() {
                    y if y < 1992 => 100,
                    y if y < 2001 => 200,
                    y if y < 2011 => 300,
                    _ => 400,
                };
                vec![format!(
                    "{}/{}/MERRA2_{}.inst3_3d_asm_Np.{}.nc4",
                    MERRA_BASE_URL,
                    date.format("%Y/%m"),
                    stream,
                    date.format("%Y%m%d")
                )]
            }
        }
    }

    /// Files needed to bracket `t`: the overpass day's files, plus the
    /// next day's when `t` falls after the last 3-hourly step
    pub fn files_for(&self, t: DateTime<Utc>) -> Vec<String> {
        let date = t.date_naive();
        let mut urls = self.list_files(date);
        if t.hour() >= 21 {
            if let Some(next) = date.succ_opt() {
                for url in self.list_files(next) {
                    if !urls.contains(&url) {
                        urls.push(url);
                    }
                }
            }
        }
        urls
    }

    /// Relative humidity (%) from the humidity field at one level
    fn rel_humidity(&self, humidity: f64, pressure_hpa: f64, temperature_k: f64) -> f64 {
        let rh = match self {
            ReanalysisSource::Narr => {
                let t_c = temperature_k - 273.15;
                26.3 * pressure_hpa * humidity * (-17.67 * t_c / (temperature_k - 29.65)).exp()
            }
            ReanalysisSource::Merra => humidity * 100.0,
        };
        rh.clamp(0.0, 100.0)
    }

    /// Select four columns around `point` at the grid times bracketing `t`
    pub fn read_columns(
        &self,
        dataset: &ReanalysisDataset,
        point: &GeoPoint,
        t: DateTime<Utc>,
        corners: &Corners,
    ) -> CalResult<ReanalysisSample> {
        let [h_var, t_var, q_var] = self.variables();

        let times = dataset.times(t_var);
        let (i1, i2) = bracket_times(&times, t)?;
        let bracket = [times[i1], times[i2]];

        let (lat, lon) = dataset.coordinates()?;
        let (_, nx) = lat.dim();
        let grid_points: Vec<GeoPoint> = lat
            .iter()
            .zip(lon.iter())
            .map(|(la, lo)| GeoPoint::new(*la, wrap_lon(*lo)))
            .collect();
        let bbox = corners.bounding_box().expanded(FOOTPRINT_MARGIN_DEG);
        let chosen = select_neighbors(&grid_points, point, &bbox)?;
        let cells = chosen.map(|flat| (flat / nx, flat % nx));

        // raw[time][point][var] = per-level values
        let mut raw: Vec<Vec<[Vec<f64>; 3]>> = Vec::with_capacity(2);
        let mut levels: Option<Vec<f64>> = None;
        for time in bracket {
            let mut per_point = Vec::with_capacity(4);
            for &(y, x) in &cells {
                let mut fields: [Vec<f64>; 3] = Default::default();
                for (slot, name) in [h_var, t_var, q_var].iter().enumerate() {
                    let (grid, ti) = dataset.locate(name, time)?;
                    let values = grid.variable(name).ok_or_else(|| {
                        CalError::InputParseError(format!("variable {} vanished", name))
                    })?;
                    levels.get_or_insert_with(|| grid.levels().to_vec());
                    fields[slot] = (0..grid.levels().len())
                        .map(|li| values[[ti, li, y, x]] as f64)
                        .collect();
                }
                per_point.push(fields);
            }
            raw.push(per_point);
        }
        let levels = levels.unwrap_or_default();

        // Keep levels valid everywhere, ordered bottom-up
        let usable = |v: f64| v.is_finite() && v.abs() < FILL_THRESHOLD;
        let mut keep: Vec<usize> = (0..levels.len())
            .filter(|&li| {
                usable(levels[li])
                    && raw.iter().all(|pts| {
                        pts.iter()
                            .all(|fields| fields.iter().all(|f| f.get(li).copied().map_or(false, usable)))
                    })
            })
            .collect();
        keep.sort_by(|&a, &b| levels[b].total_cmp(&levels[a]));
        if keep.len() < 2 {
            return Err(CalError::InsufficientAtmosphereCoverage(format!(
                "only {} valid pressure levels at ({:.4}, {:.4})",
                keep.len(),
                point.lat,
                point.lon
            )));
        }
        let kept_levels: Vec<f64> = keep.iter().map(|&li| levels[li]).collect();

        let build = |fields: &[Vec<f64>; 3]| -> CalResult<AtmosphericProfile> {
            let height = keep.iter().map(|&li| fields[0][li] / 1000.0).collect();
            let temperature: Vec<f64> = keep.iter().map(|&li| fields[1][li]).collect();
            let rel_humidity = keep
                .iter()
                .zip(&temperature)
                .map(|(&li, &temp)| self.rel_humidity(fields[2][li], levels[li], temp))
                .collect();
            AtmosphericProfile::new(height, kept_levels.clone(), temperature, rel_humidity)
        };

        let mut columns: Vec<[AtmosphericProfile; 4]> = Vec::with_capacity(2);
        for per_point in &raw {
            columns.push([
                build(&per_point[0])?,
                build(&per_point[1])?,
                build(&per_point[2])?,
                build(&per_point[3])?,
            ]);
        }
        let [early, late]: [[AtmosphericProfile; 4]; 2] = columns
            .try_into()
            .map_err(|_| CalError::InvalidInput("expected two time steps".to_string()))?;

        let points = chosen.map(|i| grid_points[i]);
        log::info!(
            "{} columns for ({:.4}, {:.4}) at {} / {}: {} levels, points {:?}",
            self,
            point.lat,
            point.lon,
            bracket[0],
            bracket[1],
            kept_levels.len(),
            points.map(|p| (p.lat, p.lon))
        );

        Ok(ReanalysisSample {
            points,
            times: bracket,
            levels: kept_levels,
            columns: [early, late],
        })
    }
}
