//! Numerical building blocks: Planck radiance, trapezoidal integration,
//! linear interpolation, quadrilateral weights and planar distances.
//!
//! Functions here are unit-agnostic unless stated; callers convert at the
//! component boundary.

use crate::types::{CalError, CalResult, GeoPoint};

/// Planck constant (J s)
pub const PLANCK_H: f64 = 6.626_070_15e-34;
/// Speed of light (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;
/// Boltzmann constant (J/K)
pub const BOLTZMANN_K: f64 = 1.380_649e-23;

/// First radiation constant for spectral radiance, 2hc² (W m² sr⁻¹)
pub const C1: f64 = 2.0 * PLANCK_H * SPEED_OF_LIGHT * SPEED_OF_LIGHT;
/// Second radiation constant, hc/k (m K)
pub const C2: f64 = PLANCK_H * SPEED_OF_LIGHT / BOLTZMANN_K;

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// Spectral radiance of a blackbody.
///
/// `wavelength` in m, `temperature` in K, result in W m⁻² sr⁻¹ m⁻¹.
pub fn planck(wavelength: f64, temperature: f64) -> f64 {
    C1 / (wavelength.powi(5) * ((C2 / (wavelength * temperature)).exp() - 1.0))
}

/// Trapezoidal integral of `y` over `x`
pub fn trapz(x: &[f64], y: &[f64]) -> CalResult<f64> {
    if x.len() != y.len() {
        return Err(CalError::InvalidInput(format!(
            "trapz: x has {} samples but y has {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(CalError::InvalidInput(
            "trapz: at least two samples are required".to_string(),
        ));
    }

    Ok(x
        .windows(2)
        .zip(y.windows(2))
        .map(|(xs, ys)| 0.5 * (xs[1] - xs[0]) * (ys[0] + ys[1]))
        .sum())
}

/// Piecewise-linear interpolation of `(xp, fp)` at `x`.
///
/// `xp` must be ascending. Points outside the table are clamped to the
/// end values.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len();
    if n == 0 {
        return f64::NAN;
    }
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    // Index of the first sample strictly greater than x
    let upper = xp.partition_point(|&v| v <= x);
    let lower = upper - 1;
    let span = xp[upper] - xp[lower];
    if span == 0.0 {
        return fp[lower];
    }
    let weight = (x - xp[lower]) / span;
    fp[lower] * (1.0 - weight) + fp[upper] * weight
}

/// Interpolate a table onto a new set of abscissae
pub fn interp_many(x: &[f64], xp: &[f64], fp: &[f64]) -> CalResult<Vec<f64>> {
    if xp.len() != fp.len() || xp.is_empty() {
        return Err(CalError::InvalidInput(format!(
            "interpolation table has {} abscissae and {} ordinates",
            xp.len(),
            fp.len()
        )));
    }
    if xp.windows(2).any(|w| w[1] < w[0]) {
        return Err(CalError::InvalidInput(
            "interpolation abscissae must be ascending".to_string(),
        ));
    }
    Ok(x.iter().map(|&v| interp(v, xp, fp)).collect())
}

/// 2-D cross product
fn cross(a: (f64, f64), b: (f64, f64)) -> f64 {
    a.0 * b.1 - a.1 * b.0
}

/// Threshold on |alpha| or |beta| above which the quadrilateral solve is
/// considered degenerate
pub const DEGENERATE_WEIGHT: f64 = 100.0;

/// Weights `(alpha, beta)` locating `target` inside the quadrilateral
/// `corners`, given in cyclic order `[q00, q10, q11, q01]`.
///
/// The forward map is
/// `P(a, b) = q00 + a (q10 - q00) + b (q01 - q00) + a b (q00 - q10 + q11 - q01)`,
/// so the interpolated value of a field is
/// `(1-a)(1-b) v00 + a(1-b) v10 + a b v11 + (1-a) b v01`.
pub fn offset_bilinear_weights(
    corners: &[(f64, f64); 4],
    target: (f64, f64),
) -> CalResult<(f64, f64)> {
    let [a, b, c, d] = *corners;
    let e = (b.0 - a.0, b.1 - a.1);
    let f = (d.0 - a.0, d.1 - a.1);
    let g = (a.0 - b.0 + c.0 - d.0, a.1 - b.1 + c.1 - d.1);
    let h = (target.0 - a.0, target.1 - a.1);

    let k2 = cross(g, f);
    let k1 = cross(e, f) + cross(h, g);
    let k0 = cross(h, e);

    let degenerate = |alpha: f64, beta: f64| CalError::Degenerate { alpha, beta };

    let alpha_for = |beta: f64| -> f64 {
        let dx = e.0 + g.0 * beta;
        let dy = e.1 + g.1 * beta;
        if dx.abs() >= dy.abs() {
            (h.0 - f.0 * beta) / dx
        } else {
            (h.1 - f.1 * beta) / dy
        }
    };

    let scale = cross(e, f).abs().max(f64::MIN_POSITIVE);
    let (alpha, beta) = if k2.abs() <= 1e-12 * scale {
        if k1 == 0.0 {
            return Err(degenerate(f64::INFINITY, f64::INFINITY));
        }
        let beta = -k0 / k1;
        (alpha_for(beta), beta)
    } else {
        let disc = k1 * k1 - 4.0 * k2 * k0;
        if disc < 0.0 {
            return Err(degenerate(f64::NAN, f64::NAN));
        }
        // Numerically stable roots of k2 b² + k1 b + k0 = 0
        let q = -0.5 * (k1 + k1.signum() * disc.sqrt());
        let mut roots = Vec::with_capacity(2);
        if q != 0.0 {
            roots.push(k0 / q);
        }
        roots.push(q / k2);

        let inside = |v: f64| (-1e-9..=1.0 + 1e-9).contains(&v);
        roots
            .iter()
            .map(|&beta| (alpha_for(beta), beta))
            .find(|&(alpha, beta)| inside(alpha) && inside(beta))
            .unwrap_or_else(|| {
                // Outside the quad: keep the smaller excursion
                let beta = roots
                    .iter()
                    .copied()
                    .min_by(|x, y| (x - 0.5).abs().total_cmp(&(y - 0.5).abs()))
                    .unwrap_or(f64::NAN);
                (alpha_for(beta), beta)
            })
    };

    if !alpha.is_finite()
        || !beta.is_finite()
        || alpha.abs() > DEGENERATE_WEIGHT
        || beta.abs() > DEGENERATE_WEIGHT
    {
        return Err(degenerate(alpha, beta));
    }
    Ok((alpha, beta))
}

/// Combine four corner values with offset-bilinear weights; corner order
/// matches [`offset_bilinear_weights`].
pub fn apply_bilinear_weights(values: [f64; 4], alpha: f64, beta: f64) -> f64 {
    let [v00, v10, v11, v01] = values;
    (1.0 - alpha) * (1.0 - beta) * v00
        + alpha * (1.0 - beta) * v10
        + alpha * beta * v11
        + (1.0 - alpha) * beta * v01
}

/// Axis-aligned bilinear weights of `target` within the rectangle
/// `[x0, x1] × [y0, y1]`
pub fn rect_bilinear_weights(x0: f64, x1: f64, y0: f64, y1: f64, target: (f64, f64)) -> (f64, f64) {
    let alpha = if x1 != x0 { (target.0 - x0) / (x1 - x0) } else { 0.0 };
    let beta = if y1 != y0 { (target.1 - y0) / (y1 - y0) } else { 0.0 };
    (alpha, beta)
}

/// Whether three points lie on a common line:
/// `|det [[x1, y1, 1], [x2, y2, 1], [x3, y3, 1]]| < 1e-3`
pub fn is_colinear(p1: (f64, f64), p2: (f64, f64), p3: (f64, f64)) -> bool {
    let det = p1.0 * (p2.1 - p3.1) - p1.1 * (p2.0 - p3.0) + (p2.0 * p3.1 - p3.0 * p2.1);
    det.abs() < 1e-3
}

/// Rectangle test: every triple of the four points is non-colinear
pub fn is_near_rectangle(points: &[(f64, f64); 4]) -> bool {
    (0..4).all(|i| {
        let p1 = points[i];
        let p2 = points[(i + 1) % 4];
        let p3 = points[(i + 2) % 4];
        !is_colinear(p1, p2, p3)
    })
}

/// Approximate distance in meters between two geographic points on the
/// local tangent plane of the WGS84 ellipsoid. Intended for ranking
/// nearby candidates, not for geodesy.
pub fn planar_distance(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let mean_lat = ((a.lat + b.lat) / 2.0).to_radians();
    let sin2 = mean_lat.sin().powi(2);
    let w = (1.0 - e2 * sin2).sqrt();
    // Meridional and prime-vertical radii of curvature
    let meridional = WGS84_A * (1.0 - e2) / (w * w * w);
    let prime_vertical = WGS84_A / w;

    let mut dlon = b.lon - a.lon;
    if dlon > 180.0 {
        dlon -= 360.0;
    } else if dlon < -180.0 {
        dlon += 360.0;
    }

    let dy = meridional * (b.lat - a.lat).to_radians();
    let dx = prime_vertical * mean_lat.cos() * dlon.to_radians();
    (dx * dx + dy * dy).sqrt()
}

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation; `None` for an empty slice
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}
