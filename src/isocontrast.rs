//! Contrast ratio sampled over the viewing hemisphere.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{OpticsError, Result};
use crate::geometry::{PolarizerPair, ViewingAngle};
use crate::leakage::LeakageEvaluator;
use crate::optimizer::ParameterRange;
use crate::stack::Stack;

/// Angular sampling of an iso-contrast grid (degrees).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AngularSampling {
    /// Largest polar angle, inclusive; must stay below 90.
    pub theta_max_deg: f64,
    /// Polar step.
    pub dtheta_deg: f64,
    /// Azimuth step over `[0, 360)`.
    pub dphi_deg: f64,
}

impl Default for AngularSampling {
    fn default() -> Self {
        Self {
            theta_max_deg: 60.0,
            dtheta_deg: 5.0,
            dphi_deg: 5.0,
        }
    }
}

impl AngularSampling {
    /// Sampling up to `theta_max_deg` with the given steps.
    pub fn new(theta_max_deg: f64, dtheta_deg: f64, dphi_deg: f64) -> Self {
        Self {
            theta_max_deg,
            dtheta_deg,
            dphi_deg,
        }
    }

    /// Polar nodes `0, dtheta, ..., theta_max`.
    pub fn thetas(&self) -> Result<Vec<f64>> {
        if !(self.theta_max_deg < 90.0) {
            return Err(OpticsError::InvalidAngle {
                name: "theta_max",
                value: self.theta_max_deg,
            });
        }
        ParameterRange::new(0.0, self.theta_max_deg, self.dtheta_deg).values("theta")
    }

    /// Azimuth nodes `0, dphi, ...` below 360.
    pub fn phis(&self) -> Result<Vec<f64>> {
        if !(self.dphi_deg > 0.0) || !self.dphi_deg.is_finite() {
            return Err(OpticsError::grid_empty("phi"));
        }
        let limit = 360.0 - 1e-9 * self.dphi_deg;
        Ok((0..)
            .map(|i| i as f64 * self.dphi_deg)
            .take_while(|phi| *phi < limit)
            .collect())
    }
}

/// CR values with rows indexed by theta and columns by phi.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IsoContrastGrid {
    /// Row coordinates.
    pub thetas_deg: Vec<f64>,
    /// Column coordinates.
    pub phis_deg: Vec<f64>,
    /// White contrast, `thetas_deg.len()` by `phis_deg.len()`.
    pub values: DMatrix<f64>,
}

impl IsoContrastGrid {
    /// White contrast over the grid.
    pub fn compute(
        evaluator: &LeakageEvaluator,
        stack: &Stack,
        polarizers: &PolarizerPair,
        sampling: &AngularSampling,
    ) -> Result<Self> {
        Self::compute_with(sampling, |angle| {
            evaluator.contrast(angle, stack, polarizers)
        })
    }

    /// Single-wavelength contrast over the grid.
    pub fn compute_mono(
        evaluator: &LeakageEvaluator,
        stack: &Stack,
        polarizers: &PolarizerPair,
        sampling: &AngularSampling,
        wavelength_nm: f64,
    ) -> Result<Self> {
        Self::compute_with(sampling, |angle| {
            evaluator.contrast_mono(angle, stack, polarizers, wavelength_nm)
        })
    }

    fn compute_with<F>(sampling: &AngularSampling, cr: F) -> Result<Self>
    where
        F: Fn(&ViewingAngle) -> Result<f64> + Sync,
    {
        let thetas = sampling.thetas()?;
        let phis = sampling.phis()?;
        let rows = thetas
            .par_iter()
            .map(|&theta| {
                phis.iter()
                    .map(|&phi| cr(&ViewingAngle::new(theta, phi)?))
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        let values = DMatrix::from_fn(thetas.len(), phis.len(), |i, j| rows[i][j]);
        Ok(Self {
            thetas_deg: thetas,
            phis_deg: phis,
            values,
        })
    }

    /// Lowest contrast on the grid.
    pub fn min(&self) -> f64 {
        self.values.min()
    }

    /// Highest contrast on the grid.
    pub fn max(&self) -> f64 {
        self.values.max()
    }

    /// Share of grid nodes with CR at or above `threshold`.
    pub fn fraction_at_least(&self, threshold: f64) -> f64 {
        let hits = self.values.iter().filter(|&&cr| cr >= threshold).count();
        hits as f64 / self.values.len() as f64
    }
}
