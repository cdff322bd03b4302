//! Spectral sampling and birefringence dispersion.
//!
//! White (spectrally averaged) leakage is a weighted sum over a small set of
//! reference wavelengths. Layer indices are stored at the green reference
//! wavelength; a [`DispersionMode`] rescales the birefringence at every other
//! wavelength.

use std::borrow::Cow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OpticsError, Result};
use crate::stack::{LayerKind, OpticalLayer};

/// Wavelengths (nm) at which dispersion scale tables are tabulated: B, G, R.
pub const DISPERSION_REFERENCE_NM: [f64; 3] = [450.0, 546.0, 610.0];

/// One weighted wavelength of a spectral table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectralSample {
    /// Short key such as `"G"`; used to label per-wavelength outputs.
    pub key: String,
    /// Wavelength in nanometres.
    pub wavelength_nm: f64,
    /// Integration weight.
    pub weight: f64,
}

/// Normalized spectral weight table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SpectralSample>", into = "Vec<SpectralSample>")]
pub struct SpectralWeights {
    samples: Vec<SpectralSample>,
}

impl SpectralWeights {
    /// Builds a table after checking that weights are positive and sum to one.
    pub fn new(samples: Vec<SpectralSample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(OpticsError::InvalidWeights { slack: 1.0 });
        }
        for sample in &samples {
            if !(sample.weight > 0.0) {
                return Err(OpticsError::InvalidWeights {
                    slack: sample.weight,
                });
            }
            if !(sample.wavelength_nm > 0.0) || !sample.wavelength_nm.is_finite() {
                return Err(OpticsError::InvalidWeights {
                    slack: sample.wavelength_nm,
                });
            }
        }
        let sum: f64 = samples.iter().map(|s| s.weight).sum();
        let slack = (sum - 1.0).abs();
        if slack > 1e-8 {
            return Err(OpticsError::InvalidWeights { slack });
        }
        Ok(Self { samples })
    }

    /// Blue/green/red table used for "white" evaluation.
    pub fn rgb() -> Self {
        Self {
            samples: vec![
                SpectralSample {
                    key: "B".to_string(),
                    wavelength_nm: 450.0,
                    weight: 0.25,
                },
                SpectralSample {
                    key: "G".to_string(),
                    wavelength_nm: 546.0,
                    weight: 0.5,
                },
                SpectralSample {
                    key: "R".to_string(),
                    wavelength_nm: 610.0,
                    weight: 0.25,
                },
            ],
        }
    }

    /// Single wavelength carrying the full weight.
    pub fn monochromatic(wavelength_nm: f64) -> Result<Self> {
        Self::new(vec![SpectralSample {
            key: format!("{wavelength_nm}nm"),
            wavelength_nm,
            weight: 1.0,
        }])
    }

    /// Iterates over the samples in table order.
    pub fn samples(&self) -> &[SpectralSample] {
        &self.samples
    }

    /// Number of wavelengths in the table.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Always `false` for a validated table.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl Default for SpectralWeights {
    fn default() -> Self {
        Self::rgb()
    }
}

impl TryFrom<Vec<SpectralSample>> for SpectralWeights {
    type Error = OpticsError;

    fn try_from(samples: Vec<SpectralSample>) -> Result<Self> {
        Self::new(samples)
    }
}

impl From<SpectralWeights> for Vec<SpectralSample> {
    fn from(weights: SpectralWeights) -> Self {
        weights.samples
    }
}

/// Birefringence scale factors at the B/G/R reference wavelengths, per layer kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DispersionTable {
    /// Liquid-crystal cell scale factors.
    pub lc: [f64; 3],
    /// A-plate scale factors.
    pub a: [f64; 3],
    /// C-plate and protective-film scale factors.
    pub c: [f64; 3],
}

impl DispersionTable {
    /// No dispersion: the birefringence is the same at every wavelength.
    pub fn flat() -> Self {
        Self {
            lc: [1.0; 3],
            a: [1.0; 3],
            c: [1.0; 3],
        }
    }

    /// Films share the liquid crystal's normal dispersion.
    pub fn matched() -> Self {
        let normal = [1.06, 1.0, 0.97];
        Self {
            lc: normal,
            a: normal,
            c: normal,
        }
    }

    /// Strongly dispersive liquid crystal against nearly flat films.
    pub fn mismatched() -> Self {
        Self {
            lc: [1.09, 1.0, 0.96],
            a: [1.01, 1.0, 0.995],
            c: [1.01, 1.0, 0.995],
        }
    }

    /// Scale factor for `kind` at `wavelength_nm`, linearly interpolated
    /// between the reference wavelengths and clamped outside them.
    pub fn scale(&self, kind: LayerKind, wavelength_nm: f64) -> f64 {
        let y = match kind {
            LayerKind::Lc => &self.lc,
            LayerKind::A => &self.a,
            LayerKind::C => &self.c,
        };
        let x = &DISPERSION_REFERENCE_NM;
        if wavelength_nm <= x[0] {
            return y[0];
        }
        if wavelength_nm >= x[2] {
            return y[2];
        }
        let i = if wavelength_nm < x[1] { 0 } else { 1 };
        let t = (wavelength_nm - x[i]) / (x[i + 1] - x[i]);
        y[i] + t * (y[i + 1] - y[i])
    }
}

/// Dispersion model applied to every layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DispersionMode {
    /// Birefringence fixed at its reference value.
    Flat,
    /// [`DispersionTable::matched`].
    Matched,
    /// [`DispersionTable::mismatched`].
    Mismatched,
    /// A table supplied by the caller.
    Current(DispersionTable),
}

impl Default for DispersionMode {
    fn default() -> Self {
        DispersionMode::Matched
    }
}

impl DispersionMode {
    /// Resolves the scale table for this mode.
    pub fn table(&self) -> Cow<'_, DispersionTable> {
        match self {
            DispersionMode::Flat => Cow::Owned(DispersionTable::flat()),
            DispersionMode::Matched => Cow::Owned(DispersionTable::matched()),
            DispersionMode::Mismatched => Cow::Owned(DispersionTable::mismatched()),
            DispersionMode::Current(table) => Cow::Borrowed(table),
        }
    }

    /// Resolves a mode name; `current` selects `configured`.
    pub fn from_name(name: &str, configured: &DispersionTable) -> Result<Self> {
        match name {
            "current" => Ok(DispersionMode::Current(configured.clone())),
            other => other.parse(),
        }
    }

    /// Returns `(no, ne)` of `layer` at `wavelength_nm`.
    pub fn indices(&self, layer: &OpticalLayer, wavelength_nm: f64) -> (f64, f64) {
        let no = layer.ordinary_index();
        let dn = layer.extraordinary_index() - no;
        let scale = match self {
            DispersionMode::Flat => 1.0,
            mode => mode.table().scale(layer.kind(), wavelength_nm),
        };
        (no, no + dn * scale)
    }
}

impl FromStr for DispersionMode {
    type Err = OpticsError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "flat" => Ok(DispersionMode::Flat),
            "matched" => Ok(DispersionMode::Matched),
            "mismatched" => Ok(DispersionMode::Mismatched),
            other => Err(OpticsError::unknown_name("dispersion mode", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rgb_weights_are_normalized() {
        let weights = SpectralWeights::rgb();
        let sum: f64 = weights.samples().iter().map(|s| s.weight).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
        assert_eq!(weights.len(), 3);
    }

    #[test]
    fn unnormalized_weights_are_rejected() {
        let samples = vec![
            SpectralSample {
                key: "G".into(),
                wavelength_nm: 546.0,
                weight: 0.7,
            },
            SpectralSample {
                key: "R".into(),
                wavelength_nm: 610.0,
                weight: 0.7,
            },
        ];
        assert!(matches!(
            SpectralWeights::new(samples),
            Err(OpticsError::InvalidWeights { .. })
        ));
        assert!(SpectralWeights::new(Vec::new()).is_err());
    }

    #[test]
    fn scale_interpolates_and_clamps() {
        let table = DispersionTable::matched();
        assert_relative_eq!(table.scale(LayerKind::Lc, 546.0), 1.0);
        assert_relative_eq!(table.scale(LayerKind::Lc, 400.0), 1.06);
        assert_relative_eq!(table.scale(LayerKind::Lc, 700.0), 0.97);
        let mid = table.scale(LayerKind::A, 498.0);
        assert_relative_eq!(mid, 1.03, epsilon = 1e-12);
    }

    #[test]
    fn mismatched_dispersion_depends_on_layer_kind() {
        let axis = nalgebra::Vector3::x();
        let lc = OpticalLayer::new(LayerKind::Lc, axis, 3000.0, 1.5, 1.6).unwrap();
        let a = OpticalLayer::new(LayerKind::A, axis, 3000.0, 1.5, 1.6).unwrap();
        let mode = DispersionMode::Mismatched;

        let (lc_no, lc_ne) = mode.indices(&lc, 450.0);
        let (a_no, a_ne) = mode.indices(&a, 450.0);
        assert_eq!(lc_no, 1.5);
        assert_eq!(a_no, 1.5);
        assert_relative_eq!(lc_ne - lc_no, 0.1 * 1.09, epsilon = 1e-12);
        assert_relative_eq!(a_ne - a_no, 0.1 * 1.01, epsilon = 1e-12);
        assert!((lc_ne - lc_no) - (a_ne - a_no) > 1e-3);

        let (_, lc_green) = mode.indices(&lc, 546.0);
        let (_, a_green) = mode.indices(&a, 546.0);
        assert_relative_eq!(lc_green, a_green, epsilon = 1e-12);
        let (flat_no, flat_ne) = DispersionMode::Flat.indices(&lc, 450.0);
        assert_eq!(flat_no, 1.5);
        assert_relative_eq!(flat_ne, 1.6, epsilon = 1e-12);
    }

    #[test]
    fn current_resolves_to_configured_table() {
        let table = DispersionTable::mismatched();
        let mode = DispersionMode::from_name("current", &table).unwrap();
        assert_eq!(mode.table().into_owned(), table);
        assert!(matches!(
            "rainbow".parse::<DispersionMode>(),
            Err(OpticsError::UnknownName { .. })
        ));
    }
}
