//! Top-of-atmosphere radiance synthesis from RT output, a water surface and
//! a blackbody at the skin temperature.

use crate::core::numerics::{interp_many, planck};
use crate::core::rt_driver::RtResult;
use crate::core::spectral::{band_radiance, RadianceUnit, Rsr, Spectrum};
use crate::io::rsr::WaterReflectance;
use crate::types::CalResult;

/// Compose spectral TOA radiance in W m⁻² sr⁻¹ μm⁻¹:
/// `L = up + τ ε B(T_s) + ρ ground_reflected` with `ε = 1 - ρ`.
pub fn toa_radiance(
    rt: &RtResult,
    skin_temp: f64,
    water: &WaterReflectance,
) -> CalResult<Spectrum> {
    let unit = RadianceUnit::WPerM2SrUm;
    let grid = rt.grid();
    let upwelled = rt.upwelled.to_unit(unit);
    let ground = rt.ground_reflected.to_unit(unit);

    let rho = interp_many(grid.micrometers(), &water.wavelengths, &water.reflectance)?;
    let per_m_to_per_um = RadianceUnit::WPerM2SrM.factor_to(unit);

    let values: Vec<f64> = grid
        .meters()
        .iter()
        .enumerate()
        .map(|(i, &wavelength)| {
            let emissivity = 1.0 - rho[i];
            let blackbody = planck(wavelength, skin_temp) * per_m_to_per_um;
            upwelled.values()[i]
                + rt.transmittance[i] * emissivity * blackbody
                + rho[i] * ground.values()[i]
        })
        .collect();

    Spectrum::new(grid.clone(), values, unit)
}

/// Band radiances (W m⁻² sr⁻¹ μm⁻¹) for each `(band, rsr)`
pub fn band_radiances(toa: &Spectrum, rsrs: &[(u8, &Rsr)]) -> CalResult<Vec<(u8, f64)>> {
    let toa = toa.to_unit(RadianceUnit::WPerM2SrUm);
    rsrs.iter()
        .map(|(band, rsr)| Ok((*band, band_radiance(&toa, rsr)?)))
        .collect()
}

/// Modeled band radiances for an RT result and skin temperature
pub fn modeled_radiances(
    rt: &RtResult,
    skin_temp: f64,
    water: &WaterReflectance,
    rsrs: &[(u8, &Rsr)],
) -> CalResult<Vec<(u8, f64)>> {
    let toa = toa_radiance(rt, skin_temp, water)?;
    let bands = band_radiances(&toa, rsrs)?;
    for (band, value) in &bands {
        log::debug!("Band {} modeled radiance {:.4} W m-2 sr-1 um-1", band, value);
    }
    Ok(bands)
}
