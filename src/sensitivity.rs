//! Perturbation studies around a chosen design.
//!
//! Every study rebuilds the stack from a perturbed copy of the configuration
//! and reports normal-incidence contrast (per spectral sample and white) plus
//! white contrast at a set of monitor directions, each relative to the
//! unperturbed reference in dB.

use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::{OpticsError, Result};
use crate::geometry::{PolarizerPair, ViewingAngle};
use crate::leakage::LeakageEvaluator;
use crate::stack::{Stack, StackBuilder, StackParams};

/// Oblique directions at which white contrast is monitored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorSet {
    /// Polar angle shared by every monitor.
    pub theta_deg: f64,
    /// Monitor azimuths, in reporting order.
    pub phis_deg: Vec<f64>,
}

impl Default for MonitorSet {
    fn default() -> Self {
        Self {
            theta_deg: 30.0,
            phis_deg: vec![45.0, 135.0, -45.0, -135.0],
        }
    }
}

impl MonitorSet {
    /// Validated viewing angles, one per azimuth.
    pub fn angles(&self) -> Result<Vec<ViewingAngle>> {
        self.phis_deg
            .iter()
            .map(|&phi| ViewingAngle::new(self.theta_deg, phi))
            .collect()
    }
}

/// Monochromatic contrast at one spectral sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleContrast {
    /// Spectral key, e.g. `"G"`.
    pub key: String,
    pub wavelength_nm: f64,
    pub cr: f64,
}

/// Contrast at normal incidence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NormalContrast {
    /// One entry per spectral sample, in table order.
    pub samples: Vec<SampleContrast>,
    /// Spectrally weighted contrast.
    pub white: f64,
}

/// White contrast at one monitor direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorContrast {
    /// Azimuth as listed in the monitor set, before reduction to `[0, 360)`.
    pub phi_deg: f64,
    pub cr: f64,
}

/// Normal and monitor contrast of one stack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContrastSnapshot {
    pub normal: NormalContrast,
    /// In monitor-set order.
    pub monitors: Vec<MonitorContrast>,
}

/// A snapshot with its changes against the reference, `10 log10(CR / CR_ref)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerturbedContrast {
    pub snapshot: ContrastSnapshot,
    /// White normal-incidence change (dB).
    pub normal_rel_db: f64,
    /// Per-monitor change (dB), aligned with `snapshot.monitors`.
    pub monitor_rel_db: Vec<f64>,
}

impl PerturbedContrast {
    fn relative_to(snapshot: ContrastSnapshot, reference: &ContrastSnapshot) -> Self {
        let normal_rel_db = decibels(snapshot.normal.white, reference.normal.white);
        let monitor_rel_db = snapshot
            .monitors
            .iter()
            .zip(&reference.monitors)
            .map(|(m, r)| decibels(m.cr, r.cr))
            .collect();
        Self {
            snapshot,
            normal_rel_db,
            monitor_rel_db,
        }
    }
}

fn decibels(value: f64, reference: f64) -> f64 {
    10.0 * (value / reference).log10()
}

/// Element rotated on its own in [`RotationMode::Misalign`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanTarget {
    /// Exit polarizer.
    PolOut,
    /// Liquid-crystal director.
    Lc,
    /// A-plate axes.
    A,
}

/// How a scan angle is applied to the assembled panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationMode {
    /// Rotate one element independently.
    Misalign(ScanTarget),
    /// Rotate the A-plate together with the exit polarizer.
    APolOut,
    /// Rotate the LC, the A-plate, and the exit polarizer together.
    LcAPolOut,
}

impl RotationMode {
    /// Lab-frame rotations `(exit polarizer, LC, A-plate)` for scan angle `delta`.
    pub fn offsets(self, delta: f64) -> (f64, f64, f64) {
        match self {
            RotationMode::Misalign(ScanTarget::PolOut) => (delta, 0.0, 0.0),
            RotationMode::Misalign(ScanTarget::Lc) => (0.0, delta, 0.0),
            RotationMode::Misalign(ScanTarget::A) => (0.0, 0.0, delta),
            RotationMode::APolOut => (delta, 0.0, delta),
            RotationMode::LcAPolOut => (delta, delta, delta),
        }
    }
}

/// One scan angle of a misalignment study.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MisalignmentRow {
    /// Scan angle (deg).
    pub delta_deg: f64,
    /// Lab-frame rotation applied to the exit polarizer.
    pub pol_out_offset_deg: f64,
    /// Lab-frame rotation applied to the LC director.
    pub lc_offset_deg: f64,
    /// Lab-frame rotation applied to the A-plates.
    pub a_offset_deg: f64,
    pub contrast: PerturbedContrast,
}

/// One birefringence scale of an LC retardation study.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LcRetardationRow {
    /// Multiplier on the LC birefringence.
    pub scale: f64,
    /// Resulting LC retardation (nm) at the reference wavelength.
    pub lc_retardation_nm: f64,
    pub contrast: PerturbedContrast,
}

/// Monochromatic contrast of a fixed stack at one wavelength.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispersionRow {
    pub wavelength_nm: f64,
    /// Contrast at normal incidence.
    pub normal_cr: f64,
    /// Contrast per monitor direction.
    pub monitor_cr: Vec<f64>,
    /// Mean of `monitor_cr`; NaN when there are no monitors.
    pub monitor_mean_cr: f64,
}

/// Statistics of the target-angle contrast under random assembly errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToleranceSummary {
    /// Number of Monte Carlo draws.
    pub draws: usize,
    /// Standard deviation of each azimuth error (deg).
    pub sigma_deg: f64,
    /// Contrast of the unperturbed design.
    pub nominal_cr: f64,
    pub mean_cr: f64,
    pub min_cr: f64,
    /// Nearest-rank 5th percentile.
    pub p5_cr: f64,
}

/// Runs perturbation studies against one reference configuration.
#[derive(Clone, Debug)]
pub struct SensitivityStudy<'a> {
    config: &'a SimulationConfig,
    monitors: MonitorSet,
}

impl<'a> SensitivityStudy<'a> {
    /// Study around `config` with the default monitor set.
    pub fn new(config: &'a SimulationConfig) -> Self {
        Self {
            config,
            monitors: MonitorSet::default(),
        }
    }

    pub fn with_monitors(mut self, monitors: MonitorSet) -> Self {
        self.monitors = monitors;
        self
    }

    /// Normal-incidence contrast of a fixed stack.
    pub fn normal_contrast(
        &self,
        stack: &Stack,
        polarizers: &PolarizerPair,
    ) -> Result<NormalContrast> {
        normal_contrast(&LeakageEvaluator::from_config(self.config), stack, polarizers)
    }

    /// Normal and monitor contrast of the stack `config` builds for `params`.
    pub fn snapshot(
        &self,
        config: &SimulationConfig,
        params: &StackParams,
    ) -> Result<ContrastSnapshot> {
        let stack = StackBuilder::new(config).build(params)?;
        let polarizers = config.polarizers();
        let evaluator = LeakageEvaluator::from_config(config);
        let normal = normal_contrast(&evaluator, &stack, &polarizers)?;
        let monitors = self
            .monitors
            .angles()?
            .iter()
            .zip(&self.monitors.phis_deg)
            .map(|(angle, &phi_deg)| {
                Ok(MonitorContrast {
                    phi_deg,
                    cr: evaluator.contrast(angle, &stack, &polarizers)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ContrastSnapshot { normal, monitors })
    }

    /// Contrast while rotating panel elements by each of `deltas` (deg).
    pub fn misalignment_scan(
        &self,
        params: &StackParams,
        mode: RotationMode,
        deltas: &[f64],
    ) -> Result<Vec<MisalignmentRow>> {
        let reference = self.snapshot(self.config, params)?;
        let rows = deltas
            .iter()
            .map(|&delta| {
                let (pol_out, lc, a) = mode.offsets(delta);
                let perturbed = self.rotated(pol_out, lc, a);
                let snapshot = self.snapshot(&perturbed, params)?;
                Ok(MisalignmentRow {
                    delta_deg: delta,
                    pol_out_offset_deg: pol_out,
                    lc_offset_deg: lc,
                    a_offset_deg: a,
                    contrast: PerturbedContrast::relative_to(snapshot, &reference),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!("misalignment scan ({mode:?}) over {} angles finished", rows.len());
        Ok(rows)
    }

    /// Contrast while scaling the LC birefringence at fixed cell gap.
    pub fn lc_retardation_scan(
        &self,
        params: &StackParams,
        scales: &[f64],
    ) -> Result<Vec<LcRetardationRow>> {
        let reference = self.snapshot(&self.with_lc_scale(1.0), params)?;
        let rows = scales
            .iter()
            .map(|&scale| {
                let scaled = self.with_lc_scale(scale);
                let snapshot = self.snapshot(&scaled, params)?;
                Ok(LcRetardationRow {
                    scale,
                    lc_retardation_nm: self.config.materials.lc_retardation_nm * scale,
                    contrast: PerturbedContrast::relative_to(snapshot, &reference),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        info!("LC retardation scan over {} scales finished", rows.len());
        Ok(rows)
    }

    /// Monochromatic normal and monitor contrast of a fixed stack per wavelength.
    pub fn dispersion_sweep(
        &self,
        stack: &Stack,
        polarizers: &PolarizerPair,
        wavelengths_nm: &[f64],
    ) -> Result<Vec<DispersionRow>> {
        let evaluator = LeakageEvaluator::from_config(self.config);
        let angles = self.monitors.angles()?;
        wavelengths_nm
            .iter()
            .map(|&wavelength_nm| {
                let normal_cr = evaluator.contrast_mono(
                    &ViewingAngle::normal(),
                    stack,
                    polarizers,
                    wavelength_nm,
                )?;
                let monitor_cr = angles
                    .iter()
                    .map(|angle| evaluator.contrast_mono(angle, stack, polarizers, wavelength_nm))
                    .collect::<Result<Vec<_>>>()?;
                let monitor_mean_cr = if monitor_cr.is_empty() {
                    f64::NAN
                } else {
                    monitor_cr.iter().sum::<f64>() / monitor_cr.len() as f64
                };
                Ok(DispersionRow {
                    wavelength_nm,
                    normal_cr,
                    monitor_cr,
                    monitor_mean_cr,
                })
            })
            .collect()
    }

    /// Monte Carlo of independent Gaussian azimuth errors (deg) on the LC,
    /// the A-plate, and the exit polarizer.
    pub fn assembly_tolerance(
        &self,
        params: &StackParams,
        sigma_deg: f64,
        draws: usize,
        seed: u64,
    ) -> Result<ToleranceSummary> {
        if draws == 0 {
            return Err(OpticsError::grid_empty("draws"));
        }
        let normal = Normal::new(0.0, sigma_deg).map_err(|_| OpticsError::InvalidAngle {
            name: "sigma",
            value: sigma_deg,
        })?;
        let mut rng = SmallRng::seed_from_u64(seed);
        let offsets: Vec<(f64, f64, f64)> = (0..draws)
            .map(|_| {
                (
                    normal.sample(&mut rng),
                    normal.sample(&mut rng),
                    normal.sample(&mut rng),
                )
            })
            .collect();

        let target = self.config.target;
        let cr_at = |config: &SimulationConfig| -> Result<f64> {
            let stack = StackBuilder::new(config).build(params)?;
            LeakageEvaluator::from_config(config).contrast(&target, &stack, &config.polarizers())
        };
        let nominal_cr = cr_at(self.config)?;
        let mut values = offsets
            .par_iter()
            .map(|&(pol_out, lc, a)| cr_at(&self.rotated(pol_out, lc, a)))
            .collect::<Result<Vec<f64>>>()?;

        values.sort_by(|a, b| a.total_cmp(b));
        let mean_cr = values.iter().sum::<f64>() / draws as f64;
        let p5_index = (0.05 * (draws - 1) as f64).round() as usize;
        info!("assembly tolerance: {draws} draws at sigma {sigma_deg} deg, mean CR {mean_cr:.2}");
        Ok(ToleranceSummary {
            draws,
            sigma_deg,
            nominal_cr,
            mean_cr,
            min_cr: values[0],
            p5_cr: values[p5_index],
        })
    }

    /// Copy of the configuration with the given lab-frame rotations applied.
    ///
    /// The upper A-plate follows the exit polarizer, so its offset is
    /// corrected to keep the requested A rotation independent of `pol_out`.
    fn rotated(&self, pol_out: f64, lc: f64, a: f64) -> SimulationConfig {
        let mut config = self.config.clone();
        let alignment = &mut config.alignment;
        alignment.pol_out_deg += pol_out;
        alignment.upper_a_offset_deg += a - pol_out;
        alignment.lower_a_offset_deg += a;
        alignment.lc_offset_deg += lc;
        config
    }

    fn with_lc_scale(&self, scale: f64) -> SimulationConfig {
        let mut config = self.config.clone();
        config.materials.lc_birefringence_scale = scale;
        config
    }
}

/// Normal-incidence contrast per spectral sample and white.
pub fn normal_contrast(
    evaluator: &LeakageEvaluator,
    stack: &Stack,
    polarizers: &PolarizerPair,
) -> Result<NormalContrast> {
    let normal = ViewingAngle::normal();
    let samples = evaluator
        .spectrum()
        .samples()
        .iter()
        .map(|sample| {
            Ok(SampleContrast {
                key: sample.key.clone(),
                wavelength_nm: sample.wavelength_nm,
                cr: evaluator.contrast_mono(&normal, stack, polarizers, sample.wavelength_nm)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(NormalContrast {
        samples,
        white: evaluator.contrast(&normal, stack, polarizers)?,
    })
}
