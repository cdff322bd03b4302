//! Stage-by-stage polarization diagnostics.
//!
//! Stokes parameters are taken in a transverse basis `(u, v)` with
//! `v = k x u`, so `(u, v, k)` is right-handed. With `Eu = u.E` and
//! `Ev = v.E`:
//!
//! ```text
//! S0 = |Eu|^2 + |Ev|^2      S1 = |Eu|^2 - |Ev|^2
//! S2 = 2 Re(Eu Ev*)         S3 = 2 Im(Eu Ev*)
//! ```

use std::str::FromStr;

use nalgebra::{Complex, Vector3};
use serde::{Deserialize, Serialize};

use crate::config::SimulationConfig;
use crate::error::{OpticsError, Result};
use crate::geometry::{lab_reference, PolarizerPair, ViewingAngle};
use crate::leakage::{contrast_ratio, propagate};
use crate::progress::ProgressRow;
use crate::retarder::{enforce_transverse, to_field, Field};
use crate::spectrum::{DispersionMode, SpectralWeights};
use crate::stack::Stack;

/// Label of the state right after the entrance polarizer.
pub const ENTRANCE_STAGE: &str = "POL_in";

const S0_FLOOR: f64 = 1e-30;

/// Choice of the transverse reference axis `u`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasisMode {
    /// Lab `x` projected onto the transverse plane (lab `y` near grazing along `x`).
    #[default]
    Lab,
    /// Entrance polarizer transmission eigenstate.
    PolIn,
    /// Exit polarizer transmission eigenstate.
    PolOut,
}

impl FromStr for BasisMode {
    type Err = OpticsError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "lab" => Ok(BasisMode::Lab),
            "pol_in" => Ok(BasisMode::PolIn),
            "pol_out" => Ok(BasisMode::PolOut),
            other => Err(OpticsError::unknown_name("Stokes basis", other)),
        }
    }
}

/// Orthonormal transverse basis `(u, v)` for propagation `k`.
pub fn transverse_basis(
    k: &Vector3<f64>,
    mode: BasisMode,
    polarizers: &PolarizerPair,
) -> Result<(Vector3<f64>, Vector3<f64>)> {
    let u = match mode {
        BasisMode::Lab => lab_reference(k),
        BasisMode::PolIn => polarizers.eigenstates(k)?.0,
        BasisMode::PolOut => polarizers.eigenstates(k)?.1,
    };
    let v = k.cross(&u).normalize();
    Ok((u, v))
}

/// Unnormalized Stokes vector.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StokesVector {
    /// Total intensity.
    pub s0: f64,
    /// `|Eu|^2 - |Ev|^2`.
    pub s1: f64,
    /// `2 Re(Eu Ev*)`.
    pub s2: f64,
    /// `2 Im(Eu Ev*)`.
    pub s3: f64,
}

impl StokesVector {
    pub fn new(s0: f64, s1: f64, s2: f64, s3: f64) -> Self {
        Self { s0, s1, s2, s3 }
    }

    /// Stokes vector of `field` in the basis `(u, v)`.
    pub fn from_field(field: &Field, u: &Vector3<f64>, v: &Vector3<f64>) -> Self {
        let eu: Complex<f64> = to_field(u).dot(field);
        let ev: Complex<f64> = to_field(v).dot(field);
        let cross = eu * ev.conj();
        Self {
            s0: eu.norm_sqr() + ev.norm_sqr(),
            s1: eu.norm_sqr() - ev.norm_sqr(),
            s2: 2.0 * cross.re,
            s3: 2.0 * cross.im,
        }
    }

    /// `(s1, s2, s3)` divided by `S0`.
    pub fn normalized(&self) -> [f64; 3] {
        let s0 = self.s0.max(S0_FLOOR);
        [self.s1 / s0, self.s2 / s0, self.s3 / s0]
    }

    /// `S0^2 - (S1^2 + S2^2 + S3^2)`; zero for a fully polarized state.
    pub fn polarization_defect(&self) -> f64 {
        self.s0 * self.s0 - (self.s1 * self.s1 + self.s2 * self.s2 + self.s3 * self.s3)
    }

    fn scaled_add(self, weight: f64, other: &StokesVector) -> Self {
        Self {
            s0: self.s0 + weight * other.s0,
            s1: self.s1 + weight * other.s1,
            s2: self.s2 + weight * other.s2,
            s3: self.s3 + weight * other.s3,
        }
    }
}

/// Stokes vector of one stage at one spectral sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StokesPoint {
    /// `POL_in` or `el#<i>_<kind>`.
    pub stage: String,
    /// Spectral key of the sample.
    pub key: String,
    pub wavelength_nm: f64,
    pub stokes: StokesVector,
}

/// Spectrally weighted Stokes vector of one stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WhiteStokes {
    pub stage: String,
    /// Weight-summed Stokes components over the spectral samples.
    pub weighted: StokesVector,
}

impl WhiteStokes {
    /// Normalized `(s1, s2, s3)` of the weighted vector.
    pub fn normalized(&self) -> [f64; 3] {
        self.weighted.normalized()
    }
}

/// Traces the polarization state through a fixed stack.
#[derive(Clone, Debug, PartialEq)]
pub struct StokesTracer {
    spectrum: SpectralWeights,
    dispersion: DispersionMode,
    basis: BasisMode,
}

impl StokesTracer {
    pub fn new(spectrum: SpectralWeights, dispersion: DispersionMode, basis: BasisMode) -> Self {
        Self {
            spectrum,
            dispersion,
            basis,
        }
    }

    /// Tracer using the spectrum and dispersion of `config`.
    pub fn from_config(config: &SimulationConfig, basis: BasisMode) -> Self {
        Self::new(config.spectrum.clone(), config.dispersion.clone(), basis)
    }

    /// Stokes vectors stage-major: every sample of `POL_in`, then every
    /// sample after layer 0, and so on.
    pub fn trace(
        &self,
        angle: &ViewingAngle,
        stack: &Stack,
        polarizers: &PolarizerPair,
    ) -> Result<Vec<StokesPoint>> {
        let k = angle.direction();
        let (o1, _) = polarizers.eigenstates(&k)?;
        let (u, v) = transverse_basis(&k, self.basis, polarizers)?;
        let samples = self.spectrum.samples();
        let start = to_field(&o1);

        // per_sample[s][stage]
        let per_sample: Vec<Vec<StokesVector>> = samples
            .iter()
            .map(|sample| {
                let mut states = Vec::with_capacity(stack.len() + 1);
                states.push(StokesVector::from_field(&enforce_transverse(&start, &k), &u, &v));
                propagate(
                    angle,
                    &k,
                    &start,
                    stack,
                    sample.wavelength_nm,
                    &self.dispersion,
                    |_, field| states.push(StokesVector::from_field(field, &u, &v)),
                );
                states
            })
            .collect();

        let mut points = Vec::with_capacity(samples.len() * (stack.len() + 1));
        for stage in 0..=stack.len() {
            let label = stage_name(stack, stage);
            for (sample, states) in samples.iter().zip(&per_sample) {
                points.push(StokesPoint {
                    stage: label.clone(),
                    key: sample.key.clone(),
                    wavelength_nm: sample.wavelength_nm,
                    stokes: states[stage],
                });
            }
        }
        Ok(points)
    }

    /// Spectrally weighted trace, one entry per stage.
    pub fn trace_white(
        &self,
        angle: &ViewingAngle,
        stack: &Stack,
        polarizers: &PolarizerPair,
    ) -> Result<Vec<WhiteStokes>> {
        let points = self.trace(angle, stack, polarizers)?;
        let samples = self.spectrum.samples();
        Ok(points
            .chunks(samples.len())
            .map(|stage| WhiteStokes {
                stage: stage[0].stage.clone(),
                weighted: stage
                    .iter()
                    .zip(samples)
                    .fold(StokesVector::default(), |acc, (point, sample)| {
                        acc.scaled_add(sample.weight, &point.stokes)
                    }),
            })
            .collect())
    }
}

fn stage_name(stack: &Stack, stage: usize) -> String {
    match stage {
        0 => ENTRANCE_STAGE.to_string(),
        n => stack
            .stage_label(n - 1)
            .unwrap_or_else(|| format!("el#{}", n - 1)),
    }
}

/// Relation between the recorded output polarization of a stage and the analyzer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerAlignment {
    /// Analyzer transmission azimuth in the `(u, v)` plane (deg).
    pub analyzer_deg: f64,
    /// Azimuth of the polarization ellipse major axis, `atan2(s2, s1) / 2` (deg).
    pub polarization_deg: f64,
    /// Deviation of `(analyzer - polarization) mod 180` from 90 deg.
    pub orthogonality_error_deg: f64,
    /// Normalized circular component of the stored state.
    pub s3: f64,
    /// Leakage an ideal analyzer would pass for the stored state.
    pub predicted_leakage: f64,
    pub predicted_cr: f64,
}

/// Compares the stored Stokes state of `stage` with the analyzer at `angle`.
pub fn analyzer_alignment(
    row: &ProgressRow,
    stage: &str,
    angle: &ViewingAngle,
    polarizers: &PolarizerPair,
    basis: BasisMode,
    cr0: f64,
) -> Result<AnalyzerAlignment> {
    let [s1, s2, s3] = row.stokes_at(stage)?;
    let k = angle.direction();
    let (u, v) = transverse_basis(&k, basis, polarizers)?;
    let (_, o2) = polarizers.eigenstates(&k)?;

    let analyzer_deg = o2.dot(&v).atan2(o2.dot(&u)).to_degrees();
    let polarization_deg = 0.5 * s2.atan2(s1).to_degrees();
    let delta = (analyzer_deg - polarization_deg).rem_euclid(180.0);

    let alpha = analyzer_deg.to_radians();
    let transmitted = 0.5 * (1.0 + s1 * (2.0 * alpha).cos() + s2 * (2.0 * alpha).sin());
    let predicted_leakage = 0.5 * transmitted;
    Ok(AnalyzerAlignment {
        analyzer_deg,
        polarization_deg,
        orthogonality_error_deg: (delta - 90.0).abs(),
        s3,
        predicted_leakage,
        predicted_cr: contrast_ratio(predicted_leakage, cr0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::absorption_axes;
    use crate::optimizer::{SearchPoint, UpdateEvent};
    use crate::stack::{StackBuilder, StackParams, Topology};
    use approx::assert_relative_eq;

    fn fixture() -> (SimulationConfig, Stack) {
        let config = SimulationConfig::default().with_topology(Topology::Symmetric);
        let stack = StackBuilder::new(&config)
            .build(&StackParams::new(1.0, 50.0))
            .unwrap();
        (config, stack)
    }

    #[test]
    fn basis_names_parse() {
        assert_eq!("pol_out".parse::<BasisMode>().unwrap(), BasisMode::PolOut);
        assert!("diagonal".parse::<BasisMode>().is_err());
    }

    #[test]
    fn bases_are_right_handed_and_transverse() {
        let pair = absorption_axes(0.0, 0.0);
        let k = ViewingAngle::new(40.0, 120.0).unwrap().direction();
        for mode in [BasisMode::Lab, BasisMode::PolIn, BasisMode::PolOut] {
            let (u, v) = transverse_basis(&k, mode, &pair).unwrap();
            assert_relative_eq!(u.dot(&k), 0.0, epsilon = 1e-12);
            assert_relative_eq!(u.dot(&v), 0.0, epsilon = 1e-12);
            assert_relative_eq!(u.cross(&v).dot(&k), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn circular_sign_follows_convention() {
        let u = Vector3::x();
        let v = Vector3::y();
        let field = Field::new(
            Complex::new(1.0, 0.0),
            Complex::new(0.0, -1.0),
            Complex::new(0.0, 0.0),
        );
        let stokes = StokesVector::from_field(&field, &u, &v);
        assert_relative_eq!(stokes.s0, 2.0);
        assert_relative_eq!(stokes.s3, 2.0);
    }

    #[test]
    fn traced_states_are_fully_polarized() {
        let (config, stack) = fixture();
        let tracer = StokesTracer::from_config(&config, BasisMode::PolIn);
        let angle = ViewingAngle::new(30.0, 45.0).unwrap();
        let points = tracer.trace(&angle, &stack, &config.polarizers()).unwrap();
        assert_eq!(points.len(), (stack.len() + 1) * config.spectrum.len());
        for point in &points {
            assert!(point.stokes.polarization_defect().abs() < 1e-9);
        }
        let first = &points[0];
        assert_eq!(first.stage, ENTRANCE_STAGE);
        assert_relative_eq!(first.stokes.s1, first.stokes.s0, epsilon = 1e-12);
        assert_eq!(points.last().map(|p| p.stage.as_str()), Some("el#4_C"));
    }

    #[test]
    fn white_trace_is_weighted_average() {
        let (config, stack) = fixture();
        let tracer = StokesTracer::from_config(&config, BasisMode::Lab);
        let angle = ViewingAngle::new(50.0, 10.0).unwrap();
        let pair = config.polarizers();
        let points = tracer.trace(&angle, &stack, &pair).unwrap();
        let white = tracer.trace_white(&angle, &stack, &pair).unwrap();
        assert_eq!(white.len(), stack.len() + 1);
        let expected: f64 = points[3..6]
            .iter()
            .zip(config.spectrum.samples())
            .map(|(p, s)| s.weight * p.stokes.s2)
            .sum();
        assert_eq!(white[1].stage, "el#0_C");
        assert_relative_eq!(white[1].weighted.s2, expected, epsilon = 1e-14);
    }

    #[test]
    fn analyzer_alignment_predicts_leakage_of_recorded_state() {
        let (config, stack) = fixture();
        let pair = config.polarizers();
        let angle = config.target;
        let tracer = StokesTracer::from_config(&config, BasisMode::PolIn);
        let white = tracer.trace_white(&angle, &stack, &pair).unwrap();
        let row = ProgressRow::from_event(&UpdateEvent {
            update_idx: 0,
            point: SearchPoint {
                params: StackParams::new(1.0, 50.0),
                cr: 0.0,
                grid_index: 0,
            },
        })
        .with_stokes(&white);
        let report = analyzer_alignment(&row, "POL_in", &angle, &pair, BasisMode::PolIn, 1000.0)
            .unwrap();
        // Directly behind the entrance polarizer the state is along u.
        assert_relative_eq!(report.polarization_deg, 0.0, epsilon = 1e-9);
        assert!(report.predicted_cr > 0.0 && report.predicted_cr <= 1000.0);
        assert!(matches!(
            analyzer_alignment(&row, "el#7_A", &angle, &pair, BasisMode::PolIn, 1000.0),
            Err(OpticsError::MissingColumn { .. })
        ));
    }
}
