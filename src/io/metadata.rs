//! Landsat MTL scene metadata.

use crate::core::image_radiance::Calibration;
use crate::types::{CalError, CalResult, Corners, GeoPoint, SensorFamily};
use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Calibration and file for one band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandMetadata {
    pub calibration: Calibration,
    pub file_name: String,
}

/// Scene-level metadata needed for calibration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMetadata {
    pub scene_id: String,
    pub family: SensorFamily,
    pub acquired: DateTime<Utc>,
    pub corners: Corners,
    pub utm_zone: u8,
    pub bands: BTreeMap<u8, BandMetadata>,
}

/// Flat `KEY = value` map of an MTL file. GROUP/END_GROUP lines are
/// dropped and quotes stripped; later keys overwrite earlier ones.
pub fn parse_mtl_pairs(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key == "GROUP" || key == "END_GROUP" {
                return None;
            }
            Some((key.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

/// MTL key suffix for a thermal band. Landsat 7 splits band 6 into low and
/// high gain; the low-gain VCID_1 product is used.
fn band_key(family: SensorFamily, band: u8) -> String {
    match (family, band) {
        (SensorFamily::Landsat7, 6) => "6_VCID_1".to_string(),
        _ => band.to_string(),
    }
}

struct Pairs<'a>(&'a HashMap<String, String>);

impl Pairs<'_> {
    fn get(&self, key: &str) -> CalResult<&str> {
        self.0
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| CalError::InputParseError(format!("MTL missing {}", key)))
    }

    fn number(&self, key: &str) -> CalResult<f64> {
        let value = self.get(key)?;
        value
            .parse()
            .map_err(|_| CalError::InputParseError(format!("MTL {} = '{}' is not a number", key, value)))
    }

    fn corner(&self, name: &str) -> CalResult<GeoPoint> {
        Ok(GeoPoint::new(
            self.number(&format!("CORNER_{}_LAT_PRODUCT", name))?,
            self.number(&format!("CORNER_{}_LON_PRODUCT", name))?,
        ))
    }
}

/// `SCENE_CENTER_TIME` carries up to seven fractional digits and a trailing Z
fn parse_center_time(value: &str) -> CalResult<NaiveTime> {
    let trimmed = value.trim_end_matches('Z');
    let (hms, fraction) = trimmed.split_once('.').unwrap_or((trimmed, "0"));
    let time = NaiveTime::parse_from_str(hms, "%H:%M:%S")
        .map_err(|e| CalError::InputParseError(format!("SCENE_CENTER_TIME '{}': {}", value, e)))?;
    let digits: String = fraction.chars().take(9).collect();
    let nanos = format!("{:0<9}", digits)
        .parse::<u32>()
        .map_err(|e| CalError::InputParseError(format!("SCENE_CENTER_TIME '{}': {}", value, e)))?;
    time.with_nanosecond(nanos).ok_or_else(|| {
        CalError::InputParseError(format!("SCENE_CENTER_TIME '{}' out of range", value))
    })
}

impl SceneMetadata {
    pub fn from_file<P: AsRef<Path>>(path: P) -> CalResult<Self> {
        log::info!("Reading scene metadata: {}", path.as_ref().display());
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn parse(content: &str) -> CalResult<Self> {
        let map = parse_mtl_pairs(content);
        let pairs = Pairs(&map);

        let scene_id = pairs
            .get("LANDSAT_PRODUCT_ID")
            .or_else(|_| pairs.get("LANDSAT_SCENE_ID"))?
            .to_string();
        let family = match pairs.get("SPACECRAFT_ID") {
            Ok(id) => SensorFamily::from_spacecraft_id(id)?,
            Err(_) => SensorFamily::from_scene_id(&scene_id)?,
        };

        let date = NaiveDate::parse_from_str(pairs.get("DATE_ACQUIRED")?, "%Y-%m-%d")
            .map_err(|e| CalError::InputParseError(format!("DATE_ACQUIRED: {}", e)))?;
        let time = parse_center_time(pairs.get("SCENE_CENTER_TIME")?)?;
        let acquired = date.and_time(time).and_utc();

        let corners = Corners {
            upper_left: pairs.corner("UL")?,
            upper_right: pairs.corner("UR")?,
            lower_left: pairs.corner("LL")?,
            lower_right: pairs.corner("LR")?,
        };

        let zone = pairs.number("UTM_ZONE")?;
        if !(1.0..=60.0).contains(&zone) || zone.fract() != 0.0 {
            return Err(CalError::InputParseError(format!("UTM_ZONE {} invalid", zone)));
        }

        let mut bands = BTreeMap::new();
        for &band in family.thermal_bands() {
            let key = band_key(family, band);
            let gain = pairs.number(&format!("RADIANCE_MULT_BAND_{}", key));
            let offset = pairs.number(&format!("RADIANCE_ADD_BAND_{}", key));
            let file_name = pairs.get(&format!("FILE_NAME_BAND_{}", key));
            match (gain, offset, file_name) {
                (Ok(gain), Ok(offset), Ok(file_name)) => {
                    bands.insert(
                        band,
                        BandMetadata {
                            calibration: Calibration::new(gain, offset),
                            file_name: file_name.to_string(),
                        },
                    );
                }
                (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                    log::warn!("Band {} unusable in {}: {}", band, scene_id, e);
                }
            }
        }
        if bands.is_empty() {
            return Err(CalError::InputParseError(format!(
                "no thermal band calibration in MTL for {}",
                scene_id
            )));
        }

        log::debug!(
            "Scene {} ({}) acquired {} zone {}",
            scene_id,
            family,
            acquired,
            zone
        );
        Ok(Self {
            scene_id,
            family,
            acquired,
            corners,
            utm_zone: zone as u8,
            bands,
        })
    }

    pub fn band(&self, band: u8) -> CalResult<&BandMetadata> {
        self.bands.get(&band).ok_or_else(|| {
            CalError::InvalidInput(format!("scene {} has no band {}", self.scene_id, band))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::Datelike;

    const L8_MTL: &str = r#"GROUP = LANDSAT_METADATA_FILE
  GROUP = PRODUCT_CONTENTS
    LANDSAT_PRODUCT_ID = "LC08_L1TP_013033_20140614_20200911_02_T1"
    FILE_NAME_BAND_10 = "LC08_L1TP_013033_20140614_20200911_02_T1_B10.TIF"
    FILE_NAME_BAND_11 = "LC08_L1TP_013033_20140614_20200911_02_T1_B11.TIF"
  END_GROUP = PRODUCT_CONTENTS
  GROUP = IMAGE_ATTRIBUTES
    SPACECRAFT_ID = "LANDSAT_8"
    DATE_ACQUIRED = 2014-06-14
    SCENE_CENTER_TIME = "15:34:26.1234567Z"
  END_GROUP = IMAGE_ATTRIBUTES
  GROUP = PROJECTION_ATTRIBUTES
    UTM_ZONE = 18
    CORNER_UL_LAT_PRODUCT = 39.41
    CORNER_UL_LON_PRODUCT = -75.87
    CORNER_UR_LAT_PRODUCT = 39.42
    CORNER_UR_LON_PRODUCT = -73.18
    CORNER_LL_LAT_PRODUCT = 37.26
    CORNER_LL_LON_PRODUCT = -75.82
    CORNER_LR_LAT_PRODUCT = 37.27
    CORNER_LR_LON_PRODUCT = -73.19
  END_GROUP = PROJECTION_ATTRIBUTES
  GROUP = LEVEL1_RADIOMETRIC_RESCALING
    RADIANCE_MULT_BAND_10 = 3.3420E-04
    RADIANCE_MULT_BAND_11 = 3.3420E-04
    RADIANCE_ADD_BAND_10 = 0.10000
    RADIANCE_ADD_BAND_11 = 0.10000
  END_GROUP = LEVEL1_RADIOMETRIC_RESCALING
END_GROUP = LANDSAT_METADATA_FILE
END
"#;

    #[test]
    fn test_parse_landsat8() {
        let meta = SceneMetadata::parse(L8_MTL).unwrap();
        assert_eq!(meta.family, SensorFamily::Landsat8);
        assert_eq!(meta.scene_id, "LC08_L1TP_013033_20140614_20200911_02_T1");
        assert_eq!(meta.utm_zone, 18);
        assert_eq!(meta.acquired.day(), 14);
        assert_eq!(meta.acquired.hour(), 15);
        assert_eq!(meta.acquired.second(), 26);
        assert_eq!(meta.acquired.nanosecond(), 123_456_700);
        assert_relative_eq!(meta.corners.lower_right.lon, -73.19);

        let b10 = meta.band(10).unwrap();
        assert_relative_eq!(b10.calibration.gain, 3.342e-4);
        assert_relative_eq!(b10.calibration.offset, 0.1);
        assert!(b10.file_name.ends_with("_B10.TIF"));
        assert!(meta.band(6).is_err());
    }

    #[test]
    fn test_parse_landsat7_low_gain() {
        let mtl = L8_MTL
            .replace("LANDSAT_8", "LANDSAT_7")
            .replace("LC08", "LE07")
            .replace("BAND_10", "BAND_6_VCID_1")
            .replace("BAND_11", "BAND_6_VCID_2");
        let meta = SceneMetadata::parse(&mtl).unwrap();
        assert_eq!(meta.family, SensorFamily::Landsat7);
        assert_eq!(meta.bands.keys().copied().collect::<Vec<_>>(), vec![6]);
        assert!(meta.band(6).unwrap().file_name.ends_with("_B10.TIF"));
    }

    #[test]
    fn test_missing_fields() {
        let mtl = L8_MTL.replace("    UTM_ZONE = 18\n", "");
        assert!(matches!(
            SceneMetadata::parse(&mtl),
            Err(CalError::InputParseError(_))
        ));

        let no_bands = L8_MTL
            .lines()
            .filter(|l| !l.contains("RADIANCE_MULT"))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(SceneMetadata::parse(&no_bands).is_err());
    }

    #[test]
    fn test_pairs_strip_quotes_and_groups() {
        let map = parse_mtl_pairs("GROUP = A\n  KEY = \"value\"\nEND_GROUP = A\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map["KEY"], "value");
    }
}
