//! netCDF reader producing [`GridData`] for NARR and MERRA-2 files.

use crate::io::reanalysis::{decode_cf_times, GridData};
use crate::types::{CalError, CalResult};
use ndarray::{Array2, Array4};
use std::collections::HashMap;
use std::path::Path;

fn nc_err(e: netcdf::Error) -> CalError {
    CalError::InputParseError(format!("netCDF: {}", e))
}

fn attr_f64(var: &netcdf::Variable, name: &str) -> Option<f64> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Double(d) => Some(d),
            netcdf::AttributeValue::Float(f) => Some(f as f64),
            netcdf::AttributeValue::Short(s) => Some(s as f64),
            _ => None,
        })
}

fn attr_str(var: &netcdf::Variable, name: &str) -> Option<String> {
    var.attribute_value(name)
        .and_then(|r| r.ok())
        .and_then(|v| match v {
            netcdf::AttributeValue::Str(s) => Some(s),
            _ => None,
        })
}

fn read_coord(file: &netcdf::File, names: &[&str]) -> CalResult<(Vec<f64>, Vec<usize>)> {
    for name in names {
        if let Some(var) = file.variable(name) {
            let shape = var.dimensions().iter().map(|d| d.len()).collect();
            let data: Vec<f64> = var.get_values(..).map_err(nc_err)?;
            return Ok((data, shape));
        }
    }
    Err(CalError::InputParseError(format!(
        "missing coordinate {}",
        names.join(" or ")
    )))
}

/// Open a reanalysis file and load the requested variables.
///
/// Packed values are unpacked with `scale_factor`/`add_offset`; values equal
/// to `_FillValue` or `missing_value` become NaN. 1-D lat/lon are expanded
/// to 2-D.
pub fn read_grid<P: AsRef<Path>>(path: P, variables: &[&str]) -> CalResult<GridData> {
    log::info!("Opening reanalysis file: {}", path.as_ref().display());
    let file = netcdf::open(path.as_ref()).map_err(nc_err)?;

    let (lat_raw, lat_shape) = read_coord(&file, &["lat", "latitude"])?;
    let (lon_raw, lon_shape) = read_coord(&file, &["lon", "longitude"])?;
    let (lat, lon) = if lat_shape.len() == 2 {
        let shape = (lat_shape[0], lat_shape[1]);
        let lat = Array2::from_shape_vec(shape, lat_raw)
            .map_err(|e| CalError::InputParseError(format!("lat shape: {}", e)))?;
        let lon = Array2::from_shape_vec(shape, lon_raw)
            .map_err(|e| CalError::InputParseError(format!("lon shape: {}", e)))?;
        (lat, lon)
    } else {
        let shape = (lat_raw.len(), lon_raw.len());
        (
            Array2::from_shape_fn(shape, |(y, _)| lat_raw[y]),
            Array2::from_shape_fn(shape, |(_, x)| lon_raw[x]),
        )
    };

    let (levels, _) = read_coord(&file, &["level", "lev"])?;

    let time_var = file
        .variable("time")
        .ok_or_else(|| CalError::InputParseError("missing time variable".to_string()))?;
    let time_values: Vec<f64> = time_var.get_values(..).map_err(nc_err)?;
    let units = attr_str(&time_var, "units")
        .ok_or_else(|| CalError::InputParseError("time variable has no units".to_string()))?;
    let times = decode_cf_times(&time_values, &units)?;

    let mut data = HashMap::new();
    for name in variables {
        let var = file
            .variable(name)
            .ok_or_else(|| CalError::InputParseError(format!("missing variable {}", name)))?;
        let shape: Vec<usize> = var.dimensions().iter().map(|d| d.len()).collect();
        if shape.len() != 4 {
            return Err(CalError::InputParseError(format!(
                "variable {} has {} dimensions, expected 4",
                name,
                shape.len()
            )));
        }

        let scale = attr_f64(&var, "scale_factor").unwrap_or(1.0);
        let offset = attr_f64(&var, "add_offset").unwrap_or(0.0);
        let fill = attr_f64(&var, "_FillValue").or_else(|| attr_f64(&var, "missing_value"));

        let raw: Vec<f64> = var.get_values(..).map_err(nc_err)?;
        let unpacked: Vec<f32> = raw
            .into_iter()
            .map(|v| match fill {
                Some(f) if v == f => f32::NAN,
                _ => (v * scale + offset) as f32,
            })
            .collect();
        let array = Array4::from_shape_vec((shape[0], shape[1], shape[2], shape[3]), unpacked)
            .map_err(|e| CalError::InputParseError(format!("{} shape: {}", name, e)))?;
        log::debug!("Loaded {} with shape {:?}", name, array.dim());
        data.insert(name.to_string(), array);
    }

    let grid = GridData {
        times,
        levels,
        lat,
        lon,
        variables: data,
    };
    grid.validate()?;
    Ok(grid)
}
