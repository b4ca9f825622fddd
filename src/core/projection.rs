//! Transverse Mercator (UTM) on WGS84 using the Krüger series.
//!
//! Landsat products use northern-hemisphere zone numbers everywhere, so
//! southern scenes carry negative northings; no false northing is applied.

use crate::core::numerics::{WGS84_A, WGS84_F};
use crate::types::{CalError, CalResult, GeoPoint};

const K0: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;

/// Projected coordinate in a UTM zone (m)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmPoint {
    pub easting: f64,
    pub northing: f64,
    pub zone: u8,
}

/// Zone containing a longitude
pub fn utm_zone(lon: f64) -> u8 {
    let wrapped = (lon + 180.0).rem_euclid(360.0);
    ((wrapped / 6.0).floor() as u8).min(59) + 1
}

/// Central meridian of a zone (degrees)
pub fn central_meridian(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

/// Series coefficients depending only on the ellipsoid
struct Kruger {
    /// Rectifying radius scaled by k0
    scale: f64,
    alpha: [f64; 3],
    beta: [f64; 3],
    delta: [f64; 3],
    n: f64,
}

impl Kruger {
    fn wgs84() -> Self {
        let n = WGS84_F / (2.0 - WGS84_F);
        let (n2, n3) = (n * n, n * n * n);
        Self {
            scale: K0 * WGS84_A / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0),
            alpha: [
                n / 2.0 - 2.0 * n2 / 3.0 + 5.0 * n3 / 16.0,
                13.0 * n2 / 48.0 - 3.0 * n3 / 5.0,
                61.0 * n3 / 240.0,
            ],
            beta: [
                n / 2.0 - 2.0 * n2 / 3.0 + 37.0 * n3 / 96.0,
                n2 / 48.0 + n3 / 15.0,
                17.0 * n3 / 480.0,
            ],
            delta: [
                2.0 * n - 2.0 * n2 / 3.0 - 2.0 * n3,
                7.0 * n2 / 3.0 - 8.0 * n3 / 5.0,
                56.0 * n3 / 15.0,
            ],
            n,
        }
    }
}

fn check_zone(zone: u8) -> CalResult<()> {
    if (1..=60).contains(&zone) {
        Ok(())
    } else {
        Err(CalError::InvalidInput(format!("UTM zone {} outside 1..=60", zone)))
    }
}

/// Project a geographic point into `zone`. Points outside the zone are
/// projected about the zone's central meridian as well.
pub fn to_utm(point: &GeoPoint, zone: u8) -> CalResult<UtmPoint> {
    check_zone(zone)?;
    if !(-90.0..=90.0).contains(&point.lat) {
        return Err(CalError::InvalidInput(format!("latitude {} out of range", point.lat)));
    }
    let k = Kruger::wgs84();
    let phi = point.lat.to_radians();
    let mut dlon = point.lon - central_meridian(zone);
    if dlon > 180.0 {
        dlon -= 360.0;
    } else if dlon < -180.0 {
        dlon += 360.0;
    }
    let lambda = dlon.to_radians();

    let c = 2.0 * k.n.sqrt() / (1.0 + k.n);
    let t = (phi.sin().atanh() - c * (c * phi.sin()).atanh()).sinh();
    let xi_p = t.atan2(lambda.cos());
    let eta_p = (lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut xi = xi_p;
    let mut eta = eta_p;
    for (j, a) in k.alpha.iter().enumerate() {
        let m = 2.0 * (j + 1) as f64;
        xi += a * (m * xi_p).sin() * (m * eta_p).cosh();
        eta += a * (m * xi_p).cos() * (m * eta_p).sinh();
    }

    Ok(UtmPoint {
        easting: FALSE_EASTING + k.scale * eta,
        northing: k.scale * xi,
        zone,
    })
}

/// Inverse projection
pub fn from_utm(point: &UtmPoint) -> CalResult<GeoPoint> {
    check_zone(point.zone)?;
    let k = Kruger::wgs84();
    let xi = point.northing / k.scale;
    let eta = (point.easting - FALSE_EASTING) / k.scale;

    let mut xi_p = xi;
    let mut eta_p = eta;
    for (j, b) in k.beta.iter().enumerate() {
        let m = 2.0 * (j + 1) as f64;
        xi_p -= b * (m * xi).sin() * (m * eta).cosh();
        eta_p -= b * (m * xi).cos() * (m * eta).sinh();
    }

    let chi = (xi_p.sin() / eta_p.cosh()).asin();
    let mut phi = chi;
    for (j, d) in k.delta.iter().enumerate() {
        phi += d * (2.0 * (j + 1) as f64 * chi).sin();
    }
    let lambda = eta_p.sinh().atan2(xi_p.cos());

    Ok(GeoPoint::new(
        phi.to_degrees(),
        central_meridian(point.zone) + lambda.to_degrees(),
    ))
}
