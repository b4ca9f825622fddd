//! Modeled-radiance uncertainty from an ensemble of perturbed inputs.
//!
//! The ensemble is the cross product of skin temperatures
//! `{T_s - σ, T_s, T_s + σ}` and atmospheres `{nominal, lat±, lon±}`, where
//! the shifted atmospheres are re-read from the reanalysis with the sample
//! point moved by a fraction of the grid spacing. Skin perturbations only
//! enter the radiance synthesis, so each atmosphere costs one RT run.

use crate::core::numerics::std_dev;
use crate::core::radiance::modeled_radiances;
use crate::core::rt_driver::{DeckParams, RtDriver, RtResult};
use crate::core::spectral::Rsr;
use crate::io::rsr::WaterReflectance;
use crate::types::{AtmosphericProfile, CalError, CalResult, CancelToken};
use std::collections::BTreeMap;

/// Perturbation plan
#[derive(Debug, Clone)]
pub struct UncertaintyParams {
    /// Skin temperature 1σ (K)
    pub skin_sigma: f64,
    /// Sample point shift as a fraction of the grid spacing
    pub shift_grid_units: f64,
    /// Reanalysis grid spacing (lat, lon) in degrees
    pub grid_spacing_deg: (f64, f64),
}

/// One displaced sample location
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialShift {
    /// Run-directory tag
    pub tag: &'static str,
    pub dlat: f64,
    pub dlon: f64,
}

impl UncertaintyParams {
    pub fn spatial_shifts(&self) -> Vec<SpatialShift> {
        let dlat = self.shift_grid_units * self.grid_spacing_deg.0;
        let dlon = self.shift_grid_units * self.grid_spacing_deg.1;
        vec![
            SpatialShift { tag: "lat+", dlat, dlon: 0.0 },
            SpatialShift { tag: "lat-", dlat: -dlat, dlon: 0.0 },
            SpatialShift { tag: "lon+", dlat: 0.0, dlon },
            SpatialShift { tag: "lon-", dlat: 0.0, dlon: -dlon },
        ]
    }

    pub fn skin_temperatures(&self, skin_temp: f64) -> [f64; 3] {
        [skin_temp - self.skin_sigma, skin_temp, skin_temp + self.skin_sigma]
    }
}

/// A shifted atmosphere ready for the RT engine
#[derive(Debug, Clone)]
pub struct PerturbedAtmosphere {
    pub tag: &'static str,
    pub profile: AtmosphericProfile,
    pub deck: DeckParams,
}

/// Everything needed to run and synthesise one ensemble
pub struct UncertaintyEstimator<'a> {
    pub driver: &'a RtDriver,
    pub water: &'a WaterReflectance,
    pub rsrs: &'a [(u8, &'a Rsr)],
    pub params: UncertaintyParams,
}

impl<'a> UncertaintyEstimator<'a> {
    /// RT runs for the shifted atmospheres, each in its own tagged directory
    pub fn run_perturbed(
        &self,
        scene_id: &str,
        buoy_id: &str,
        atmospheres: &[PerturbedAtmosphere],
        cancel: &CancelToken,
    ) -> CalResult<Vec<RtResult>> {
        let run = |atmo: &PerturbedAtmosphere| {
            self.driver.run(
                scene_id,
                buoy_id,
                Some(atmo.tag),
                &atmo.profile,
                &atmo.deck,
                cancel,
            )
        };

        #[cfg(feature = "parallel")]
        let results: CalResult<Vec<RtResult>> = {
            use rayon::prelude::*;
            atmospheres.par_iter().map(run).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let results: CalResult<Vec<RtResult>> = atmospheres.iter().map(run).collect();

        results
    }

    /// Per-band population standard deviation over the ensemble built from
    /// `nominal` and `perturbed` RT results
    pub fn band_sigma(
        &self,
        nominal: &RtResult,
        perturbed: &[RtResult],
        skin_temp: f64,
    ) -> CalResult<Vec<(u8, f64)>> {
        let mut samples: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
        for rt in std::iter::once(nominal).chain(perturbed) {
            for temp in self.params.skin_temperatures(skin_temp) {
                for (band, value) in modeled_radiances(rt, temp, self.water, self.rsrs)? {
                    samples.entry(band).or_default().push(value);
                }
            }
        }

        samples
            .into_iter()
            .map(|(band, values)| {
                let sigma = std_dev(&values).ok_or_else(|| {
                    CalError::InvalidInput(format!("empty ensemble for band {}", band))
                })?;
                log::debug!("Band {} sigma {:.5} over {} members", band, sigma, values.len());
                Ok((band, sigma))
            })
            .collect()
    }

    /// Run the shifted atmospheres and reduce the full ensemble
    pub fn estimate(
        &self,
        scene_id: &str,
        buoy_id: &str,
        nominal: &RtResult,
        atmospheres: &[PerturbedAtmosphere],
        skin_temp: f64,
        cancel: &CancelToken,
    ) -> CalResult<Vec<(u8, f64)>> {
        log::info!(
            "Uncertainty for {} / {}: {} atmospheres x 3 skin temperatures",
            scene_id,
            buoy_id,
            atmospheres.len() + 1
        );
        let perturbed = self.run_perturbed(scene_id, buoy_id, atmospheres, cancel)?;
        self.band_sigma(nominal, &perturbed, skin_temp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rt_driver::{parse_tape7, RtEngine};
    use crate::types::GeoPoint;
    use std::fmt::Write as _;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Transmittance grows with the first profile temperature so shifted
    /// atmospheres give different results
    struct ProfileEngine {
        workdirs: Mutex<Vec<String>>,
    }

    fn tape7(trans: f64) -> String {
        let mut out = String::from("  FREQ TOT_TRANS PTH_THRML ... TOTAL_RAD\n");
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

    impl RtEngine for ProfileEngine {
        fn run(&self, workdir: &Path, _deck: &str, cancel: &CancelToken) -> CalResult<String> {
            cancel.check()?;
            let atmo = std::fs::read_to_string(workdir.join("atmo.txt"))?;
            let profile = AtmosphericProfile::from_text(&atmo)?;
            if let Ok(mut dirs) = self.workdirs.lock() {
                dirs.push(workdir.display().to_string());
            }
            Ok(tape7(0.5 + (profile.temperature[0] - 280.0) / 100.0))
        }
    }

    fn profile(surface_temp: f64) -> AtmosphericProfile {
        AtmosphericProfile::new(
            vec![0.0, 1.0, 2.0],
            vec![1013.0, 900.0, 800.0],
            vec![surface_temp, surface_temp - 6.5, surface_temp - 13.0],
            vec![60.0, 50.0, 40.0],
        )
        .unwrap()
    }

    fn params() -> UncertaintyParams {
        UncertaintyParams {
            skin_sigma: 0.305,
            shift_grid_units: 0.5,
            grid_spacing_deg: (0.5, 0.625),
        }
    }

    #[test]
    fn test_spatial_shifts() {
        let shifts = params().spatial_shifts();
        assert_eq!(shifts.len(), 4);
        assert_eq!(shifts[0].dlat, 0.25);
        assert_eq!(shifts[3].dlon, -0.3125);
        let tags: Vec<_> = shifts.iter().map(|s| s.tag).collect();
        assert_eq!(tags, vec!["lat+", "lat-", "lon+", "lon-"]);
    }

    #[test]
    fn test_skin_only_ensemble() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ProfileEngine {
            workdirs: Mutex::new(Vec::new()),
        });
        let driver = RtDriver::new(engine, dir.path().to_path_buf(), true);
        let rsr = Rsr::new(vec![10.6, 10.9, 11.19], vec![0.0, 1.0, 0.0]).unwrap();
        let rsrs = [(10u8, &rsr)];
        let estimator = UncertaintyEstimator {
            driver: &driver,
            water: WaterReflectance::water(),
            rsrs: &rsrs,
            params: params(),
        };

        let nominal = parse_tape7(&tape7(0.8)).unwrap();
        let sigma = estimator.band_sigma(&nominal, &[], 290.0).unwrap();
        assert_eq!(sigma.len(), 1);

        // Three equally spaced samples: σ = sqrt(2/3) times the half-step
        let low = modeled_radiances(&nominal, 290.0 - 0.305, WaterReflectance::water(), &rsrs).unwrap()[0].1;
        let high = modeled_radiances(&nominal, 290.0 + 0.305, WaterReflectance::water(), &rsrs).unwrap()[0].1;
        let expected = (high - low) / 2.0 * (2.0_f64 / 3.0).sqrt();
        assert!((sigma[0].1 - expected).abs() < 0.01 * expected);
    }

    #[test]
    fn test_full_ensemble_uses_tagged_workdirs() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ProfileEngine {
            workdirs: Mutex::new(Vec::new()),
        });
        let driver = RtDriver::new(engine.clone(), dir.path().to_path_buf(), true);
        let rsr = Rsr::new(vec![10.6, 10.9, 11.19], vec![0.0, 1.0, 0.0]).unwrap();
        let rsrs = [(10u8, &rsr)];
        let estimator = UncertaintyEstimator {
            driver: &driver,
            water: WaterReflectance::water(),
            rsrs: &rsrs,
            params: params(),
        };

        let deck = DeckParams::new(GeoPoint::new(38.5, -74.7), 165, 290.0);
        let atmospheres: Vec<PerturbedAtmosphere> = estimator
            .params
            .spatial_shifts()
            .into_iter()
            .enumerate()
            .map(|(i, shift)| PerturbedAtmosphere {
                tag: shift.tag,
                profile: profile(285.0 + i as f64),
                deck: deck.clone(),
            })
            .collect();

        let nominal = parse_tape7(&tape7(0.55)).unwrap();
        let skin_only = estimator.band_sigma(&nominal, &[], 290.0).unwrap();
        let sigma = estimator
            .estimate("SCENE", "44009", &nominal, &atmospheres, 290.0, &CancelToken::new())
            .unwrap();
        assert!(sigma[0].1 > skin_only[0].1);

        let mut dirs = engine.workdirs.lock().unwrap().clone();
        dirs.sort();
        assert_eq!(dirs.len(), 4);
        assert!(dirs[0].ends_with("SCENE_44009_lat+"));
        assert!(dirs[3].ends_with("SCENE_44009_lon-"));
    }

    #[test]
    fn test_cancel_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ProfileEngine {
            workdirs: Mutex::new(Vec::new()),
        });
        let driver = RtDriver::new(engine, dir.path().to_path_buf(), true);
        let rsr = Rsr::new(vec![10.6, 10.9, 11.19], vec![0.0, 1.0, 0.0]).unwrap();
        let rsrs = [(10u8, &rsr)];
        let estimator = UncertaintyEstimator {
            driver: &driver,
            water: WaterReflectance::water(),
            rsrs: &rsrs,
            params: params(),
        };
        let atmospheres = vec![PerturbedAtmosphere {
            tag: "lat+",
            profile: profile(285.0),
            deck: DeckParams::new(GeoPoint::new(38.5, -74.7), 165, 290.0),
        }];
        let token = CancelToken::new();
        token.cancel();
        let result = estimator.run_perturbed("SCENE", "44009", &atmospheres, &token);
        assert!(matches!(result, Err(CalError::Cancelled)));
    }
}
