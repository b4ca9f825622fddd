use crate::core::numerics::planar_distance;
use crate::types::{CalError, CalResult, Corners, GeoPoint};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use flate2::read::GzDecoder;
use regex::Regex;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

const NDBC_BASE_URL: &str = "https://www.ndbc.noaa.gov/data";

/// Default thermometer depth when a station has no entry in the heights table
pub const DEFAULT_DEPTH_M: f64 = 0.8;
/// Default anemometer height when a station has no entry in the heights table
pub const DEFAULT_ANEMOMETER_HEIGHT_M: f64 = 5.0;

/// Static description of a moored buoy
#[derive(Debug, Clone, PartialEq)]
pub struct BuoyStation {
    pub id: String,
    pub location: GeoPoint,
    /// Thermometer depth below the surface (m)
    pub depth_m: f64,
    /// Anemometer height above the surface (m)
    pub anemometer_height_m: f64,
}

/// One row of a standard meteorological file. Missing values are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct BuoySample {
    pub time: DateTime<Utc>,
    /// Wind speed (m/s)
    pub wind_speed: Option<f64>,
    /// Water temperature (°C)
    pub water_temp: Option<f64>,
    /// Air temperature (°C)
    pub air_temp: Option<f64>,
    /// Barometric pressure (hPa)
    pub pressure: Option<f64>,
    /// Dewpoint (°C)
    pub dewpoint: Option<f64>,
}

/// Station plus its time series, ordered by time
#[derive(Debug, Clone)]
pub struct BuoyRecord {
    pub station: BuoyStation,
    pub samples: Vec<BuoySample>,
}

impl BuoyRecord {
    pub fn new(station: BuoyStation, mut samples: Vec<BuoySample>) -> Self {
        samples.sort_by_key(|s| s.time);
        Self { station, samples }
    }

    /// Samples within `[start, end]`
    pub fn between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> &[BuoySample] {
        let lo = self.samples.partition_point(|s| s.time < start);
        let hi = self.samples.partition_point(|s| s.time <= end);
        &self.samples[lo..hi]
    }
}

/// Column positions located from the header line
#[derive(Debug)]
struct ColumnMap {
    year: usize,
    month: usize,
    day: usize,
    hour: usize,
    minute: Option<usize>,
    wind_speed: Option<usize>,
    water_temp: Option<usize>,
    air_temp: Option<usize>,
    pressure: Option<usize>,
    dewpoint: Option<usize>,
}

impl ColumnMap {
    fn from_header(header: &str) -> CalResult<Self> {
        let names: Vec<String> = header
            .trim_start_matches('#')
            .split_whitespace()
            .map(|s| s.to_uppercase())
            .collect();
        let find = |candidates: &[&str]| names.iter().position(|n| candidates.contains(&n.as_str()));
        let require = |candidates: &[&str]| {
            find(candidates).ok_or_else(|| {
                CalError::InputParseError(format!(
                    "buoy header is missing column {}",
                    candidates.join("/")
                ))
            })
        };

        Ok(Self {
            year: require(&["YY", "YYYY"])?,
            month: require(&["MM"])?,
            day: require(&["DD"])?,
            hour: require(&["HH"])?,
            // "mm" (minute) upper-cases to "MM"; it is the second MM column
            minute: names
                .iter()
                .enumerate()
                .filter(|(_, n)| n.as_str() == "MM")
                .map(|(i, _)| i)
                .nth(1),
            wind_speed: find(&["WSPD", "SPD"]),
            water_temp: find(&["WTMP"]),
            air_temp: find(&["ATMP"]),
            pressure: find(&["PRES", "BAR"]),
            dewpoint: find(&["DEWP"]),
        })
    }
}

/// Interpret a raw field, mapping NDBC missing-value sentinels to `None`
fn parse_field(fields: &[&str], index: Option<usize>, sentinel: f64) -> Option<f64> {
    let raw = fields.get(index?)?;
    if *raw == "MM" {
        return None;
    }
    let value: f64 = raw.parse().ok()?;
    if value >= sentinel {
        None
    } else {
        Some(value)
    }
}

/// Parse an NDBC standard meteorological text file
pub fn parse_stdmet(content: &str) -> CalResult<Vec<BuoySample>> {
    let mut columns: Option<ColumnMap> = None;
    let mut samples = Vec::new();

    for (lineno, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let first_is_digit = trimmed
            .chars()
            .next()
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false);

        if !first_is_digit {
            // First non-numeric line is the header, the next is units
            if columns.is_none() {
                columns = Some(ColumnMap::from_header(trimmed)?);
            }
            continue;
        }

        let map = columns.as_ref().ok_or_else(|| {
            CalError::InputParseError("buoy file has no header line".to_string())
        })?;
        let fields: Vec<&str> = trimmed.split_whitespace().collect();

        let int_field = |idx: usize| -> CalResult<u32> {
            fields
                .get(idx)
                .and_then(|s| s.parse::<u32>().ok())
                .ok_or_else(|| {
                    CalError::InputParseError(format!(
                        "buoy line {}: bad date field {}",
                        lineno + 1,
                        idx
                    ))
                })
        };

        let mut year = int_field(map.year)? as i32;
        if year < 100 {
            year += 1900;
        }
        let minute = match map.minute {
            Some(idx) => int_field(idx)?,
            None => 0,
        };
        let time = Utc
            .with_ymd_and_hms(
                year,
                int_field(map.month)?,
                int_field(map.day)?,
                int_field(map.hour)?,
                minute,
                0,
            )
            .single()
            .ok_or_else(|| {
                CalError::InputParseError(format!("buoy line {}: invalid timestamp", lineno + 1))
            })?;

        samples.push(BuoySample {
            time,
            wind_speed: parse_field(&fields, map.wind_speed, 99.0),
            water_temp: parse_field(&fields, map.water_temp, 999.0),
            air_temp: parse_field(&fields, map.air_temp, 999.0),
            pressure: parse_field(&fields, map.pressure, 9999.0),
            dewpoint: parse_field(&fields, map.dewpoint, 999.0),
        });
    }

    if columns.is_none() {
        return Err(CalError::InputParseError(
            "buoy file has no header line".to_string(),
        ));
    }
    Ok(samples)
}

/// Read a standard meteorological file, transparently handling gzip
pub fn read_stdmet_file<P: AsRef<Path>>(path: P) -> CalResult<Vec<BuoySample>> {
    log::debug!("Reading buoy file: {}", path.as_ref().display());
    let bytes = std::fs::read(&path)?;

    let content = if bytes.starts_with(&[0x1f, 0x8b]) {
        let mut text = String::new();
        GzDecoder::new(&bytes[..])
            .read_to_string(&mut text)
            .map_err(|e| CalError::InputParseError(format!("gzip decode failed: {}", e)))?;
        text
    } else {
        String::from_utf8(bytes)
            .map_err(|e| CalError::InputParseError(format!("buoy file is not UTF-8: {}", e)))?
    };
    parse_stdmet(&content)
}

/// NDBC month code used in monthly archive names (1-9, a, b, c)
fn month_code(month: u32) -> String {
    match month {
        10 => "a".to_string(),
        11 => "b".to_string(),
        12 => "c".to_string(),
        m => m.to_string(),
    }
}

/// Candidate download URLs for a station's data around `overpass`, most
/// specific first. `today` decides which archive tier exists.
pub fn stdmet_urls(station_id: &str, overpass: DateTime<Utc>, today: NaiveDate) -> Vec<String> {
    let id = station_id.to_lowercase();
    let date = overpass.date_naive();
    let mut urls = Vec::new();

    if date.year() < today.year() {
        urls.push(format!(
            "{}/historical/stdmet/{}h{}.txt.gz",
            NDBC_BASE_URL,
            id,
            date.year()
        ));
    } else if date.month() < today.month() {
        urls.push(format!(
            "{}/stdmet/{}/{}{}{}.txt.gz",
            NDBC_BASE_URL,
            date.format("%b"),
            id,
            month_code(date.month()),
            date.year()
        ));
    }
    // The realtime file covers the last 45 days
    if (today - date).num_days() <= 45 {
        urls.push(format!(
            "{}/realtime2/{}.txt",
            NDBC_BASE_URL,
            station_id.to_uppercase()
        ));
    }
    urls
}

/// Known stations with their locations and instrument heights
#[derive(Debug, Clone, Default)]
pub struct BuoyCatalog {
    stations: Vec<BuoyStation>,
}

impl BuoyCatalog {
    pub fn new(stations: Vec<BuoyStation>) -> Self {
        Self { stations }
    }

    /// Parse NDBC `station_table.txt`. `heights` maps station id to
    /// (thermometer depth, anemometer height); stations without an entry
    /// get the supplied defaults.
    pub fn parse_station_table(
        content: &str,
        heights: &HashMap<String, (f64, f64)>,
        defaults: (f64, f64),
    ) -> CalResult<Self> {
        let location_re = Regex::new(r"(\d+(?:\.\d+)?)\s*([NS])\s+(\d+(?:\.\d+)?)\s*([EW])")
            .map_err(|e| CalError::InputParseError(format!("location pattern: {}", e)))?;

        let mut stations = Vec::new();
        for line in content.lines() {
            if line.trim_start().starts_with('#') || line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('|').collect();
            if fields.len() < 7 {
                continue;
            }
            let id = fields[0].trim().to_lowercase();
            let Some(cap) = location_re.captures(fields[6]) else {
                log::debug!("Station {} has no parsable location, skipping", id);
                continue;
            };

            let mut lat: f64 = cap[1]
                .parse()
                .map_err(|e| CalError::InputParseError(format!("station {} lat: {}", id, e)))?;
            let mut lon: f64 = cap[3]
                .parse()
                .map_err(|e| CalError::InputParseError(format!("station {} lon: {}", id, e)))?;
            if &cap[2] == "S" {
                lat = -lat;
            }
            if &cap[4] == "W" {
                lon = -lon;
            }

            let (depth_m, anemometer_height_m) = heights.get(&id).copied().unwrap_or(defaults);
            stations.push(BuoyStation {
                id,
                location: GeoPoint::new(lat, lon),
                depth_m,
                anemometer_height_m,
            });
        }

        log::info!("Loaded {} buoy stations", stations.len());
        Ok(Self { stations })
    }

    /// Parse a heights table of `id depth_m anemometer_height_m` lines
    pub fn parse_heights(content: &str) -> CalResult<HashMap<String, (f64, f64)>> {
        let mut heights = HashMap::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return Err(CalError::InputParseError(format!(
                    "heights line {}: expected 3 columns",
                    lineno + 1
                )));
            }
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|e| {
                    CalError::InputParseError(format!("heights line {}: {}", lineno + 1, e))
                })
            };
            heights.insert(
                fields[0].to_lowercase(),
                (parse(fields[1])?, parse(fields[2])?),
            );
        }
        Ok(heights)
    }

    pub fn get(&self, id: &str) -> Option<&BuoyStation> {
        let id = id.to_lowercase();
        self.stations.iter().find(|s| s.id == id)
    }

    pub fn stations(&self) -> &[BuoyStation] {
        &self.stations
    }

    /// Stations inside the footprint, nearest to its center first
    pub fn stations_in(&self, corners: &Corners) -> Vec<&BuoyStation> {
        let center = corners.center();
        let mut inside: Vec<&BuoyStation> = self
            .stations
            .iter()
            .filter(|s| corners.contains(&s.location))
            .collect();
        inside.sort_by(|a, b| {
            planar_distance(&a.location, &center).total_cmp(&planar_distance(&b.location, &center))
        });
        inside
    }
}
