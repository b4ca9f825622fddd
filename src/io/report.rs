//! CSV rows for calibration results.

use crate::types::{BuoyResult, CalResult};
use std::io::Write;
use std::path::Path;

pub fn csv_header(bands: &[u8]) -> String {
    let mut columns: Vec<String> = [
        "scene_id", "date", "buoy_id", "bulk_temp_K", "skin_temp_K", "buoy_lat", "buoy_lon",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for prefix in ["modeled", "measured", "sigma"] {
        columns.extend(bands.iter().map(|b| format!("{}_band_{}", prefix, b)));
    }
    columns.join(",")
}

fn band_value(values: &[(u8, f64)], band: u8) -> String {
    values
        .iter()
        .find(|(b, _)| *b == band)
        .map(|(_, v)| format!("{:.6}", v))
        .unwrap_or_default()
}

/// One row; bands missing from the result leave empty cells
pub fn csv_row(result: &BuoyResult, bands: &[u8]) -> String {
    let mut cells = vec![
        result.scene_id.clone(),
        result.overpass.format("%Y/%m/%d").to_string(),
        result.buoy_id.clone(),
        format!("{:.3}", result.bulk_temp),
        format!("{:.3}", result.skin_temp),
        format!("{:.5}", result.lat),
        format!("{:.5}", result.lon),
    ];
    for values in [&result.modeled, &result.measured, &result.sigma] {
        cells.extend(bands.iter().map(|&b| band_value(values, b)));
    }
    cells.join(",")
}

/// Append rows to `path`, writing the header first when the file is new
pub fn append_csv<P: AsRef<Path>>(path: P, bands: &[u8], rows: &[BuoyResult]) -> CalResult<()> {
    let path = path.as_ref();
    let exists = path.is_file() && std::fs::metadata(path)?.len() > 0;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    if !exists {
        writeln!(file, "{}", csv_header(bands))?;
    }
    for row in rows {
        writeln!(file, "{}", csv_row(row, bands))?;
    }
    log::info!("Saved {} rows to {}", rows.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn result() -> BuoyResult {
        BuoyResult {
            scene_id: "LC08_TEST".to_string(),
            buoy_id: "44009".to_string(),
            overpass: Utc.with_ymd_and_hms(2014, 6, 14, 15, 34, 26).unwrap(),
            lat: 38.457,
            lon: -74.702,
            bulk_temp: 294.15,
            skin_temp: 293.9,
            modeled: vec![(10, 9.1), (11, 8.2)],
            measured: vec![(10, 9.0), (11, 8.25)],
            sigma: vec![(10, 0.05), (11, 0.04)],
        }
    }

    #[test]
    fn test_header_and_row() {
        assert_eq!(
            csv_header(&[10, 11]),
            "scene_id,date,buoy_id,bulk_temp_K,skin_temp_K,buoy_lat,buoy_lon,\
             modeled_band_10,modeled_band_11,measured_band_10,measured_band_11,\
             sigma_band_10,sigma_band_11"
        );
        let row = csv_row(&result(), &[10, 11]);
        assert!(row.starts_with("LC08_TEST,2014/06/14,44009,294.150,293.900,38.45700,-74.70200,"));
        assert!(row.ends_with("0.050000,0.040000"));
        assert_eq!(row.split(',').count(), 13);
    }

    #[test]
    fn test_append_writes_header_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        append_csv(&path, &[10], &[result()]).unwrap();
        append_csv(&path, &[10], &[result()]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("scene_id"));
    }
}
