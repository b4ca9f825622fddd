//! Atmospheric profile assembly.
//!
//! Four reanalysis columns at two times are blended in time, extended
//! upward with the standard atmosphere, interpolated to the point of
//! interest and finally given the buoy surface layer at the bottom.

use crate::core::numerics::{
    apply_bilinear_weights, offset_bilinear_weights, rect_bilinear_weights,
};
use crate::io::reanalysis::ReanalysisSample;
use crate::io::standard_atmosphere::StandardAtmosphere;
use crate::types::{AtmosphericProfile, CalError, CalResult, GeoPoint, Layer, SurfaceLayer};
use chrono::{DateTime, Utc};

/// Linear blend of two columns with weight `w` on the second
fn blend(first: &AtmosphericProfile, second: &AtmosphericProfile, w: f64) -> CalResult<AtmosphericProfile> {
    if first.len() != second.len() {
        return Err(CalError::InvalidInput(format!(
            "cannot blend columns of {} and {} layers",
            first.len(),
            second.len()
        )));
    }
    let mix = |a: &[f64], b: &[f64]| -> Vec<f64> {
        a.iter().zip(b).map(|(x, y)| (1.0 - w) * x + w * y).collect()
    };
    AtmosphericProfile::new(
        mix(&first.height, &second.height),
        mix(&first.pressure, &second.pressure),
        mix(&first.temperature, &second.temperature),
        mix(&first.rel_humidity, &second.rel_humidity),
    )
}

/// Interpolate each of the four columns to time `t`, linearly between the
/// sample's two grid times. At either grid time the corresponding column is
/// returned unchanged.
pub fn interpolate_time(
    sample: &ReanalysisSample,
    t: DateTime<Utc>,
) -> CalResult<[AtmosphericProfile; 4]> {
    let [t1, t2] = sample.times;
    let span = (t2 - t1).num_seconds() as f64;
    let w = if span > 0.0 {
        (t - t1).num_seconds() as f64 / span
    } else {
        0.0
    };
    if !(0.0..=1.0).contains(&w) {
        log::warn!("Overpass {} lies outside grid times [{}, {}]", t, t1, t2);
    }

    let [early, late] = &sample.columns;
    Ok([
        blend(&early[0], &late[0], w)?,
        blend(&early[1], &late[1], w)?,
        blend(&early[2], &late[2], w)?,
        blend(&early[3], &late[3], w)?,
    ])
}

/// Index of the first standard-atmosphere layer strictly above the column
/// top in height and strictly below it in pressure
fn stitch_index(column: &AtmosphericProfile, std_atmo: &AtmosphericProfile) -> Option<usize> {
    let top = column.layer(column.len().checked_sub(1)?);
    std_atmo
        .layers()
        .position(|l| l.height > top.height && l.pressure < top.pressure)
}

/// Extend `column` with the standard atmosphere above its top, bridging the
/// gap with `gap_layers` evenly spaced interpolated layers. A column
/// reaching above the standard atmosphere is returned unchanged.
pub fn stitch_column(
    column: &AtmosphericProfile,
    std_atmo: &AtmosphericProfile,
    gap_layers: usize,
) -> AtmosphericProfile {
    if column.is_empty() {
        return std_atmo.clone();
    }
    let Some(index) = stitch_index(column, std_atmo) else {
        return column.clone();
    };

    let top = column.layer(column.len() - 1);
    let base = std_atmo.layer(index);
    let mut stitched = column.clone();
    for j in 1..=gap_layers {
        let w = j as f64 / (gap_layers + 1) as f64;
        let lerp = |a: f64, b: f64| (1.0 - w) * a + w * b;
        stitched.push(Layer {
            height: lerp(top.height, base.height),
            pressure: lerp(top.pressure, base.pressure),
            temperature: lerp(top.temperature, base.temperature),
            rel_humidity: lerp(top.rel_humidity, base.rel_humidity),
        });
    }
    for layer in std_atmo.layers().skip(index) {
        stitched.push(layer);
    }
    stitched
}

/// Stitch all four columns so they end up with the same layer count. The
/// longest stitched column gets one midpoint layer; shorter ones get extra
/// gap layers to match.
pub fn stitch_columns(
    columns: &[AtmosphericProfile; 4],
    std_atmo: &AtmosphericProfile,
) -> CalResult<[AtmosphericProfile; 4]> {
    if let Some(i) = columns.iter().position(|c| c.is_empty()) {
        return Err(CalError::InvalidInput(format!("column {} has no layers", i)));
    }
    // Length each column would have with a single midpoint layer
    let natural: Vec<(usize, bool)> = columns
        .iter()
        .map(|c| match stitch_index(c, std_atmo) {
            Some(index) => (c.len() + 1 + std_atmo.len() - index, true),
            None => (c.len(), false),
        })
        .collect();
    let target = natural.iter().map(|(n, _)| *n).max().unwrap_or(0);

    let mut out: Vec<AtmosphericProfile> = Vec::with_capacity(4);
    for (column, &(len, stitched)) in columns.iter().zip(&natural) {
        if !stitched {
            if len != target {
                return Err(CalError::InvalidInput(format!(
                    "column of {} layers reaches above the standard atmosphere but others stitch to {}",
                    len, target
                )));
            }
            out.push(column.clone());
            continue;
        }
        out.push(stitch_column(column, std_atmo, 1 + target - len));
    }

    let [a, b, c, d]: [AtmosphericProfile; 4] = out
        .try_into()
        .map_err(|_| CalError::InvalidInput("expected four columns".to_string()))?;
    Ok([a, b, c, d])
}

/// How the four sample points map onto the interpolation corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialWeights {
    /// Sample index for each corner, in order `[q00, q10, q11, q01]`
    pub corners: [usize; 4],
    pub alpha: f64,
    pub beta: f64,
    /// Whether the axis-aligned fallback was used
    pub fallback: bool,
}

/// Order four points cyclically by angle around their centroid
fn cyclic_order(points: &[GeoPoint; 4]) -> [usize; 4] {
    let cx = points.iter().map(|p| p.lon).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.lat).sum::<f64>() / 4.0;
    let mut order = [0, 1, 2, 3];
    order.sort_by(|&i, &j| {
        let angle = |k: usize| (points[k].lat - cy).atan2(points[k].lon - cx);
        angle(i).total_cmp(&angle(j))
    });
    order
}

/// Compute the weights of `target` within the four sample points, falling
/// back to an axis-aligned rectangle if the quadrilateral solve degenerates
pub fn spatial_weights(points: &[GeoPoint; 4], target: &GeoPoint) -> SpatialWeights {
    let order = cyclic_order(points);
    let quad = order.map(|i| (points[i].lon, points[i].lat));

    match offset_bilinear_weights(&quad, (target.lon, target.lat)) {
        Ok((alpha, beta)) => SpatialWeights {
            corners: order,
            alpha,
            beta,
            fallback: false,
        },
        Err(e) => {
            log::debug!("Offset bilinear failed ({}), using axis-aligned fallback", e);
            let x0 = points.iter().map(|p| p.lon).fold(f64::INFINITY, f64::min);
            let x1 = points.iter().map(|p| p.lon).fold(f64::NEG_INFINITY, f64::max);
            let y0 = points.iter().map(|p| p.lat).fold(f64::INFINITY, f64::min);
            let y1 = points.iter().map(|p| p.lat).fold(f64::NEG_INFINITY, f64::max);

            // Each rectangle corner takes the nearest sample
            let rect = [(x0, y0), (x1, y0), (x1, y1), (x0, y1)];
            let corners = rect.map(|(x, y)| {
                (0..4)
                    .min_by(|&i, &j| {
                        let d = |k: usize| (points[k].lon - x).powi(2) + (points[k].lat - y).powi(2);
                        d(i).total_cmp(&d(j))
                    })
                    .unwrap_or(0)
            });
            let (alpha, beta) = rect_bilinear_weights(x0, x1, y0, y1, (target.lon, target.lat));
            SpatialWeights {
                corners,
                alpha,
                beta,
                fallback: true,
            }
        }
    }
}

/// Interpolate four equal-length columns to the target point
pub fn interpolate_space(
    columns: &[AtmosphericProfile; 4],
    points: &[GeoPoint; 4],
    target: &GeoPoint,
) -> CalResult<AtmosphericProfile> {
    let n = columns[0].len();
    if columns.iter().any(|c| c.len() != n) {
        return Err(CalError::InvalidInput(format!(
            "column lengths differ: {:?}",
            columns.iter().map(|c| c.len()).collect::<Vec<_>>()
        )));
    }

    let weights = spatial_weights(points, target);
    let [c00, c10, c11, c01] = weights.corners.map(|i| &columns[i]);
    let field = |get: fn(&AtmosphericProfile) -> &Vec<f64>| -> Vec<f64> {
        (0..n)
            .map(|i| {
                apply_bilinear_weights(
                    [get(c00)[i], get(c10)[i], get(c11)[i], get(c01)[i]],
                    weights.alpha,
                    weights.beta,
                )
            })
            .collect()
    };

    let rel_humidity = field(|c| &c.rel_humidity)
        .into_iter()
        .map(|rh| rh.clamp(0.0, 100.0))
        .collect();
    AtmosphericProfile::new(
        field(|c| &c.height),
        field(|c| &c.pressure),
        field(|c| &c.temperature),
        rel_humidity,
    )
}

/// Prepend the buoy surface layer, then drop layers that would break the
/// height/pressure ordering just above it
pub fn inject_surface(
    mut profile: AtmosphericProfile,
    surface: &SurfaceLayer,
    surface_height_km: f64,
) -> AtmosphericProfile {
    profile.insert(
        0,
        Layer {
            height: surface_height_km,
            pressure: surface.pressure,
            temperature: surface.air_temp_c + 273.15,
            rel_humidity: surface.rel_humidity,
        },
    );
    while profile.len() > 1
        && (profile.height[1] <= profile.height[0] || profile.pressure[1] >= profile.pressure[0])
    {
        profile.remove(1);
    }
    profile
}

/// Full profile assembly for one point and time
pub struct ProfileAssembler<'a> {
    std_atmo: &'a StandardAtmosphere,
    surface_height_km: f64,
}

impl<'a> ProfileAssembler<'a> {
    pub fn new(std_atmo: &'a StandardAtmosphere, surface_height_km: f64) -> Self {
        Self {
            std_atmo,
            surface_height_km,
        }
    }

    /// Temporal interpolation, stitching and spatial interpolation; no
    /// surface layer
    pub fn column_at(
        &self,
        sample: &ReanalysisSample,
        target: &GeoPoint,
        t: DateTime<Utc>,
    ) -> CalResult<AtmosphericProfile> {
        let timed = interpolate_time(sample, t)?;
        let stitched = stitch_columns(&timed, self.std_atmo.profile())?;
        interpolate_space(&stitched, &sample.points, target)
    }

    /// Assemble and validate the profile handed to the RT engine
    pub fn assemble(
        &self,
        sample: &ReanalysisSample,
        target: &GeoPoint,
        t: DateTime<Utc>,
        surface: &SurfaceLayer,
    ) -> CalResult<AtmosphericProfile> {
        let column = self.column_at(sample, target, t)?;
        let profile = inject_surface(column, surface, self.surface_height_km);
        profile.validate()?;
        log::debug!(
            "Assembled profile at ({:.4}, {:.4}): {} layers up to {:.1} km",
            target.lat,
            target.lon,
            profile.len(),
            profile.top_height().unwrap_or(0.0)
        );
        Ok(profile)
    }
}
