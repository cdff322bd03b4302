//! Dark-state leakage and contrast ratio of a stack between crossed O-type polarizers.
//!
//! For each spectral sample the field starts as the entrance eigenstate, passes
//! every layer in order (retarder operator followed by removal of the
//! longitudinal component) and is projected onto the exit eigenstate. No
//! Fresnel losses are modelled, so leakage is meaningful for contrast
//! comparisons only.

use nalgebra::Vector3;

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::geometry::{axis_azimuth, PolarizerPair, ViewingAngle};
use crate::retardation::{in_plane_retardation, normal_retardation};
use crate::retarder::{enforce_transverse, to_field, Field, RetarderOperator};
use crate::spectrum::{DispersionMode, SpectralWeights};
use crate::stack::{OpticalLayer, Stack};

/// Contrast ratio `1 / (Tleak + 1 / CR0)`.
pub fn contrast_ratio(t_leak: f64, cr0: f64) -> f64 {
    1.0 / (t_leak + 1.0 / cr0)
}

/// Oblique retardation (rad) of `layer` at `wavelength_nm` for viewing direction `angle`.
pub fn layer_retardation(
    layer: &OpticalLayer,
    angle: &ViewingAngle,
    wavelength_nm: f64,
    dispersion: &DispersionMode,
) -> f64 {
    let (no, ne) = dispersion.indices(layer, wavelength_nm);
    if layer.kind().is_in_plane() {
        let phi_rel = angle.phi_deg() - axis_azimuth(&layer.axis());
        in_plane_retardation(
            angle.theta_deg(),
            phi_rel,
            wavelength_nm,
            layer.thickness(),
            no,
            ne,
        )
    } else {
        normal_retardation(angle.theta_deg(), wavelength_nm, layer.thickness(), no, ne)
    }
}

/// Propagates `start` through `stack`, calling `visit(layer_index, field)` after each layer.
pub(crate) fn propagate<F>(
    angle: &ViewingAngle,
    k: &Vector3<f64>,
    start: &Field,
    stack: &Stack,
    wavelength_nm: f64,
    dispersion: &DispersionMode,
    mut visit: F,
) -> Field
where
    F: FnMut(usize, &Field),
{
    let mut field = *start;
    for (index, layer) in stack.iter().enumerate() {
        let gamma = layer_retardation(layer, angle, wavelength_nm, dispersion);
        let operator = RetarderOperator::new(k, &layer.axis(), gamma);
        field = enforce_transverse(&operator.apply(&field), k);
        visit(index, &field);
    }
    field
}

/// Evaluates leakage and contrast for fixed spectral and dispersion settings.
#[derive(Clone, Debug, PartialEq)]
pub struct LeakageEvaluator {
    spectrum: SpectralWeights,
    dispersion: DispersionMode,
    cr0: f64,
}

impl LeakageEvaluator {
    pub fn new(spectrum: SpectralWeights, dispersion: DispersionMode, cr0: f64) -> Self {
        Self {
            spectrum,
            dispersion,
            cr0,
        }
    }

    /// Evaluator using the spectrum, dispersion, and CR0 of `config`.
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self::new(
            config.spectrum.clone(),
            config.dispersion.clone(),
            config.cr0,
        )
    }

    /// Spectral table used for white quantities.
    pub fn spectrum(&self) -> &SpectralWeights {
        &self.spectrum
    }

    /// Dispersion model applied to every layer.
    pub fn dispersion(&self) -> &DispersionMode {
        &self.dispersion
    }

    /// Contrast ceiling from non-polarizer contributions.
    pub fn cr0(&self) -> f64 {
        self.cr0
    }

    /// Leakage intensity at a single wavelength.
    pub fn leakage_mono(
        &self,
        angle: &ViewingAngle,
        stack: &Stack,
        polarizers: &PolarizerPair,
        wavelength_nm: f64,
    ) -> Result<f64> {
        let k = angle.direction();
        let (o1, o2) = polarizers.eigenstates(&k)?;
        Ok(self.mono_intensity(angle, &k, &o1, &o2, stack, wavelength_nm))
    }

    /// Spectrally weighted ("white") leakage intensity.
    pub fn leakage(
        &self,
        angle: &ViewingAngle,
        stack: &Stack,
        polarizers: &PolarizerPair,
    ) -> Result<f64> {
        let k = angle.direction();
        let (o1, o2) = polarizers.eigenstates(&k)?;
        Ok(self
            .spectrum
            .samples()
            .iter()
            .map(|s| s.weight * self.mono_intensity(angle, &k, &o1, &o2, stack, s.wavelength_nm))
            .sum())
    }

    /// White contrast ratio.
    pub fn contrast(
        &self,
        angle: &ViewingAngle,
        stack: &Stack,
        polarizers: &PolarizerPair,
    ) -> Result<f64> {
        Ok(contrast_ratio(
            self.leakage(angle, stack, polarizers)?,
            self.cr0,
        ))
    }

    /// Single-wavelength contrast ratio.
    pub fn contrast_mono(
        &self,
        angle: &ViewingAngle,
        stack: &Stack,
        polarizers: &PolarizerPair,
        wavelength_nm: f64,
    ) -> Result<f64> {
        Ok(contrast_ratio(
            self.leakage_mono(angle, stack, polarizers, wavelength_nm)?,
            self.cr0,
        ))
    }

    fn mono_intensity(
        &self,
        angle: &ViewingAngle,
        k: &Vector3<f64>,
        o1: &Vector3<f64>,
        o2: &Vector3<f64>,
        stack: &Stack,
        wavelength_nm: f64,
    ) -> f64 {
        let exit = propagate(
            angle,
            k,
            &to_field(o1),
            stack,
            wavelength_nm,
            &self.dispersion,
            |_, _| {},
        );
        to_field(o2).dot(&exit).norm_sqr()
    }
}
