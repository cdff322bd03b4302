//! Immutable configuration consumed by the stack builder, evaluators, and optimizer.
//!
//! Parsing and defaulting of user input belongs to the outer driver; these
//! types only carry already-decided values. Every struct offers `Default`
//! plus consuming `with_*` overrides.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OpticsError, Result};
use crate::geometry::{absorption_axes, PolarizerPair, ViewingAngle};
use crate::optimizer::HistoryFilter;
use crate::spectrum::{DispersionMode, SpectralWeights};
use crate::stack::Topology;

/// Reference azimuth of an in-plane axis relative to the entrance polarizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisBase {
    /// Along the absorption axis (0 deg).
    Absorption,
    /// Along the transmission axis (90 deg).
    Transmission,
}

impl AxisBase {
    /// Base azimuth in degrees.
    pub fn azimuth_deg(self) -> f64 {
        match self {
            AxisBase::Absorption => 0.0,
            AxisBase::Transmission => 90.0,
        }
    }
}

impl FromStr for AxisBase {
    type Err = OpticsError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "abs" => Ok(AxisBase::Absorption),
            "tran" => Ok(AxisBase::Transmission),
            other => Err(OpticsError::unknown_name("axis basis", other)),
        }
    }
}

/// Selects which A-plate material (birefringence) a single-A topology uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum APlateKind {
    Upper,
    Lower,
}

impl FromStr for APlateKind {
    type Err = OpticsError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "upper" => Ok(APlateKind::Upper),
            "lower" => Ok(APlateKind::Lower),
            other => Err(OpticsError::unknown_name("A-plate kind", other)),
        }
    }
}

/// Global polarizer-pair rotations and per-layer azimuth offsets (degrees).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Alignment {
    /// Rotation of the entrance polarizer; couples the LC and lower A-plate.
    pub pol_in_deg: f64,
    /// Rotation of the exit polarizer; couples the upper A-plate.
    pub pol_out_deg: f64,
    /// LC director offset from its coupled polarizer.
    pub lc_offset_deg: f64,
    /// Lower A-plate offset from the entrance polarizer.
    pub lower_a_offset_deg: f64,
    /// Upper A-plate offset from the exit polarizer.
    pub upper_a_offset_deg: f64,
}

impl Alignment {
    /// Absorption axes implied by the polarizer rotations.
    pub fn polarizers(&self) -> PolarizerPair {
        absorption_axes(self.pol_in_deg, self.pol_out_deg)
    }
}

/// Protective (TAC-like) films placed directly inside each polarizer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveFilms {
    /// Films on each side; zero disables them.
    pub count: usize,
    /// Physical thickness of each film.
    pub thickness_nm: f64,
    /// Signed thickness-direction birefringence; negative behaves as -C.
    pub birefringence: f64,
}

impl ProtectiveFilms {
    /// No protective films.
    pub fn none() -> Self {
        Self {
            count: 0,
            ..Self::tac()
        }
    }

    /// One 40 um TAC film per side (about -40 nm thickness retardation).
    pub fn tac() -> Self {
        Self {
            count: 1,
            thickness_nm: 40_000.0,
            birefringence: -0.001,
        }
    }
}

impl Default for ProtectiveFilms {
    fn default() -> Self {
        Self::none()
    }
}

/// Material constants for every layer role. Birefringences are reference (green) values.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialConstants {
    /// Ordinary index shared by all layers.
    pub ordinary_index: f64,
    /// Target LC retardation `d * dn` (nm).
    pub lc_retardation_nm: f64,
    /// LC birefringence; with `lc_retardation_nm` fixes the cell gap.
    pub lc_birefringence: f64,
    /// Multiplies the LC birefringence at fixed thickness.
    pub lc_birefringence_scale: f64,
    /// A-plate retardation at `A_scale = 1` (nm), per plate.
    pub a_retardation_nm: f64,
    /// Birefringence of the upper A-plate material.
    pub upper_a_birefringence: f64,
    /// Birefringence of the lower A-plate material.
    pub lower_a_birefringence: f64,
    /// Magnitude of the C-plate birefringence; the sign follows the requested retardation.
    pub c_birefringence: f64,
    /// Films placed inside each polarizer.
    pub protective_films: ProtectiveFilms,
}

impl Default for MaterialConstants {
    fn default() -> Self {
        Self {
            ordinary_index: 1.5,
            lc_retardation_nm: 340.0,
            lc_birefringence: 0.1,
            lc_birefringence_scale: 1.0,
            a_retardation_nm: 137.5,
            upper_a_birefringence: 0.004,
            lower_a_birefringence: 0.0035,
            c_birefringence: 0.005,
            protective_films: ProtectiveFilms::none(),
        }
    }
}

impl MaterialConstants {
    /// Birefringence of the A-plate material `kind`.
    pub fn a_birefringence(&self, kind: APlateKind) -> f64 {
        match kind {
            APlateKind::Upper => self.upper_a_birefringence,
            APlateKind::Lower => self.lower_a_birefringence,
        }
    }
}

/// Whether grid evaluation may use the rayon thread pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Execution {
    Sequential,
    #[default]
    Parallel,
}

/// Aggregated configuration for one modelling session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Viewing direction at which contrast is optimized.
    pub target: ViewingAngle,
    /// Contrast ceiling set by everything except polarizer leakage.
    pub cr0: f64,
    /// Wavelengths and weights of white leakage.
    pub spectrum: SpectralWeights,
    /// Birefringence dispersion applied to every layer.
    pub dispersion: DispersionMode,
    /// Arrangement of films around the LC cell.
    pub topology: Topology,
    /// Reference azimuth of the LC director.
    pub lc_basis: AxisBase,
    /// Polarizer rotations and per-layer offsets.
    pub alignment: Alignment,
    /// Indices, birefringences, and reference retardations.
    pub materials: MaterialConstants,
    /// Stride/cap applied to the best-update history.
    pub history: HistoryFilter,
    /// Whether grid chunks are evaluated on the rayon pool.
    pub execution: Execution,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            target: ViewingAngle::new(30.0, 45.0).unwrap_or_else(|_| ViewingAngle::normal()),
            cr0: 1000.0,
            spectrum: SpectralWeights::rgb(),
            dispersion: DispersionMode::Matched,
            topology: Topology::LcAC,
            lc_basis: AxisBase::Absorption,
            alignment: Alignment::default(),
            materials: MaterialConstants::default(),
            history: HistoryFilter::default(),
            execution: Execution::Parallel,
        }
    }
}

impl SimulationConfig {
    /// Absorption axes of the configured polarizer pair.
    pub fn polarizers(&self) -> PolarizerPair {
        self.alignment.polarizers()
    }

    /// Overrides the target viewing angle.
    pub fn with_target(mut self, target: ViewingAngle) -> Self {
        self.target = target;
        self
    }

    /// Overrides the contrast ceiling.
    pub fn with_cr0(mut self, cr0: f64) -> Self {
        self.cr0 = cr0;
        self
    }

    /// Overrides the spectral weight table.
    pub fn with_spectrum(mut self, spectrum: SpectralWeights) -> Self {
        self.spectrum = spectrum;
        self
    }

    /// Overrides the dispersion model.
    pub fn with_dispersion(mut self, dispersion: DispersionMode) -> Self {
        self.dispersion = dispersion;
        self
    }

    /// Overrides the stack topology.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Overrides the LC director reference azimuth.
    pub fn with_lc_basis(mut self, basis: AxisBase) -> Self {
        self.lc_basis = basis;
        self
    }

    /// Overrides polarizer rotations and layer offsets.
    pub fn with_alignment(mut self, alignment: Alignment) -> Self {
        self.alignment = alignment;
        self
    }

    /// Overrides material constants.
    pub fn with_materials(mut self, materials: MaterialConstants) -> Self {
        self.materials = materials;
        self
    }

    /// Overrides the update-history filter.
    pub fn with_history(mut self, history: HistoryFilter) -> Self {
        self.history = history;
        self
    }

    /// Selects sequential or parallel grid evaluation.
    pub fn with_execution(mut self, execution: Execution) -> Self {
        self.execution = execution;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selectors_parse_from_names() {
        assert_eq!("abs".parse::<AxisBase>().unwrap(), AxisBase::Absorption);
        assert_eq!("tran".parse::<AxisBase>().unwrap().azimuth_deg(), 90.0);
        assert_eq!("lower".parse::<APlateKind>().unwrap(), APlateKind::Lower);
        assert!("sideways".parse::<AxisBase>().is_err());
    }

    #[test]
    fn builder_overrides_keep_other_defaults() {
        let config = SimulationConfig::default()
            .with_cr0(5000.0)
            .with_execution(Execution::Sequential);
        assert_eq!(config.cr0, 5000.0);
        assert_eq!(config.execution, Execution::Sequential);
        assert_eq!(config.topology, Topology::LcAC);
        assert_eq!(config.target.theta_deg(), 30.0);
    }

    #[test]
    fn default_polarizers_are_crossed() {
        let pair = SimulationConfig::default().polarizers();
        assert!(pair.c1.dot(&pair.c2).abs() < 1e-15);
    }
}
