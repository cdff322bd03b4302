//! Layer records, stacks, and the template-driven stack builder.

use std::fmt;
use std::str::FromStr;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::{APlateKind, AxisBase, SimulationConfig};
use crate::error::{OpticsError, Result};
use crate::geometry::{axis_from_azimuth, rotate_z, PARALLEL_TOLERANCE};

/// Axes whose norm is this close to one are stored as given, so a
/// serialized layer loads back bit-for-bit.
const UNIT_NORM_TOLERANCE: f64 = 1e-12;

/// Optical role of a uniaxial layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerKind {
    /// Film with an in-plane optic axis.
    #[serde(rename = "A")]
    A,
    /// Liquid-crystal cell with an in-plane director.
    #[serde(rename = "LC")]
    Lc,
    /// Film with its optic axis along the stack normal.
    #[serde(rename = "C")]
    C,
}

impl LayerKind {
    /// Name used in serialized records and stage labels.
    pub fn as_str(self) -> &'static str {
        match self {
            LayerKind::A => "A",
            LayerKind::Lc => "LC",
            LayerKind::C => "C",
        }
    }

    /// Whether the optic axis lies in the film plane.
    pub fn is_in_plane(self) -> bool {
        matches!(self, LayerKind::A | LayerKind::Lc)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerKind {
    type Err = OpticsError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "A" => Ok(LayerKind::A),
            "LC" => Ok(LayerKind::Lc),
            "C" => Ok(LayerKind::C),
            other => Err(OpticsError::invalid_stack(format!(
                "unknown layer kind `{other}`"
            ))),
        }
    }
}

/// A single uniaxial layer. Thickness is in nanometres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "LayerRecord")]
pub struct OpticalLayer {
    kind: LayerKind,
    axis: [f64; 3],
    thickness: f64,
    ordinary_index: f64,
    extraordinary_index: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LayerRecord {
    kind: String,
    axis: [f64; 3],
    thickness: f64,
    ordinary_index: f64,
    extraordinary_index: f64,
}

impl TryFrom<LayerRecord> for OpticalLayer {
    type Error = OpticsError;

    fn try_from(record: LayerRecord) -> Result<Self> {
        let kind = record.kind.parse()?;
        let [x, y, z] = record.axis;
        Self::new(
            kind,
            Vector3::new(x, y, z),
            record.thickness,
            record.ordinary_index,
            record.extraordinary_index,
        )
    }
}

impl OpticalLayer {
    /// Validates and constructs a layer; an axis that is not already unit
    /// length is normalized.
    pub fn new(
        kind: LayerKind,
        axis: Vector3<f64>,
        thickness: f64,
        ordinary_index: f64,
        extraordinary_index: f64,
    ) -> Result<Self> {
        if !thickness.is_finite() || thickness <= 0.0 {
            return Err(OpticsError::invalid_stack(format!(
                "{kind} layer thickness must be positive, found {thickness}"
            )));
        }
        let norm = axis.norm();
        if !norm.is_finite() || norm < PARALLEL_TOLERANCE {
            return Err(OpticsError::invalid_stack(format!(
                "{kind} layer axis must be non-zero"
            )));
        }
        for index in [ordinary_index, extraordinary_index] {
            if !index.is_finite() || index <= 0.0 {
                return Err(OpticsError::invalid_stack(format!(
                    "{kind} layer index must be positive, found {index}"
                )));
            }
        }
        let axis = if (norm - 1.0).abs() < UNIT_NORM_TOLERANCE {
            axis
        } else {
            axis / norm
        };
        Ok(Self {
            kind,
            axis: [axis.x, axis.y, axis.z],
            thickness,
            ordinary_index,
            extraordinary_index,
        })
    }

    /// Optical role of the layer.
    pub fn kind(&self) -> LayerKind {
        self.kind
    }

    /// Unit optic axis in the lab frame.
    pub fn axis(&self) -> Vector3<f64> {
        Vector3::new(self.axis[0], self.axis[1], self.axis[2])
    }

    /// Thickness in nanometres.
    pub fn thickness(&self) -> f64 {
        self.thickness
    }

    /// Ordinary index at the reference wavelength.
    pub fn ordinary_index(&self) -> f64 {
        self.ordinary_index
    }

    /// Extraordinary index at the reference wavelength.
    pub fn extraordinary_index(&self) -> f64 {
        self.extraordinary_index
    }

    /// Reference birefringence `ne - no`.
    pub fn birefringence(&self) -> f64 {
        self.extraordinary_index - self.ordinary_index
    }

    /// Reference retardation `d * (ne - no)` in nanometres.
    pub fn retardation_nm(&self) -> f64 {
        self.thickness * self.birefringence()
    }
}

/// Ordered, immutable sequence of layers in the direction of light travel.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Stack {
    layers: Vec<OpticalLayer>,
}

impl Stack {
    /// Wraps already-validated layers, first layer nearest the entrance polarizer.
    pub fn new(layers: Vec<OpticalLayer>) -> Self {
        Self { layers }
    }

    /// Layers in propagation order.
    pub fn layers(&self) -> &[OpticalLayer] {
        &self.layers
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the stack has no layers (a bare polarizer pair).
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Iterates over the layers in propagation order.
    pub fn iter(&self) -> impl Iterator<Item = &OpticalLayer> {
        self.layers.iter()
    }

    /// Diagnostic stage label of the layer at `index`, e.g. `el#1_A`.
    pub fn stage_label(&self, index: usize) -> Option<String> {
        self.layers
            .get(index)
            .map(|layer| format!("el#{index}_{}", layer.kind))
    }
}

/// Named arrangement of compensation films around the LC cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topology {
    /// LC / A / C
    LcAC,
    /// C / A / LC
    CaLc,
    /// C / A / LC / A / C
    Symmetric,
}

const TOPOLOGY_ALIASES: &[(&str, Topology)] = &[
    ("LC_AC", Topology::LcAC),
    ("LC/A/C", Topology::LcAC),
    ("LAC", Topology::LcAC),
    ("CA_LC", Topology::CaLc),
    ("C/A/LC", Topology::CaLc),
    ("CA_LC_AC", Topology::Symmetric),
    ("C/A/LC/A/C", Topology::Symmetric),
    ("ex2", Topology::Symmetric),
    ("realistic", Topology::Symmetric),
];

impl Topology {
    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            Topology::LcAC => "LC_AC",
            Topology::CaLc => "CA_LC",
            Topology::Symmetric => "CA_LC_AC",
        }
    }

    fn roles(self) -> &'static [LayerRole] {
        match self {
            Topology::LcAC => &[LayerRole::Lc, LayerRole::UpperA, LayerRole::UpperC],
            Topology::CaLc => &[LayerRole::LowerC, LayerRole::LowerA, LayerRole::Lc],
            Topology::Symmetric => &[
                LayerRole::LowerC,
                LayerRole::LowerA,
                LayerRole::Lc,
                LayerRole::UpperA,
                LayerRole::UpperC,
            ],
        }
    }
}

impl FromStr for Topology {
    type Err = OpticsError;

    fn from_str(name: &str) -> Result<Self> {
        TOPOLOGY_ALIASES
            .iter()
            .find(|(alias, _)| *alias == name)
            .map(|(_, topology)| *topology)
            .ok_or_else(|| OpticsError::unknown_name("topology", name))
    }
}

/// Slot of the canonical film sequence, entrance side first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerRole {
    EntranceFilm,
    LowerC,
    LowerA,
    Lc,
    UpperA,
    UpperC,
    ExitFilm,
}

/// Which rotation a slot's in-plane axis follows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisCoupling {
    EntrancePolarizer,
    ExitPolarizer,
    /// Axis fixed along the stack normal.
    Normal,
}

impl LayerRole {
    const ORDER: [LayerRole; 7] = [
        LayerRole::EntranceFilm,
        LayerRole::LowerC,
        LayerRole::LowerA,
        LayerRole::Lc,
        LayerRole::UpperA,
        LayerRole::UpperC,
        LayerRole::ExitFilm,
    ];

    /// Layer kind placed in this slot.
    pub fn kind(self) -> LayerKind {
        match self {
            LayerRole::LowerA | LayerRole::UpperA => LayerKind::A,
            LayerRole::Lc => LayerKind::Lc,
            LayerRole::EntranceFilm | LayerRole::LowerC | LayerRole::UpperC | LayerRole::ExitFilm => {
                LayerKind::C
            }
        }
    }

    /// Polarizer whose rotation this slot's axis follows.
    pub fn coupling(self) -> AxisCoupling {
        match self {
            LayerRole::LowerA | LayerRole::Lc => AxisCoupling::EntrancePolarizer,
            LayerRole::UpperA => AxisCoupling::ExitPolarizer,
            _ => AxisCoupling::Normal,
        }
    }
}

/// Presence flag for one slot of the canonical sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TemplateSlot {
    pub role: LayerRole,
    /// Whether the topology uses this slot.
    pub present: bool,
}

/// Canonical slot sequence with the slots of one topology switched on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackTemplate {
    slots: Vec<TemplateSlot>,
}

impl StackTemplate {
    /// Template for `topology`, with protective films on both sides when requested.
    pub fn new(topology: Topology, with_films: bool) -> Self {
        let active = topology.roles();
        let slots = LayerRole::ORDER
            .iter()
            .map(|&role| {
                let present = match role {
                    LayerRole::EntranceFilm | LayerRole::ExitFilm => with_films,
                    _ => active.contains(&role),
                };
                TemplateSlot { role, present }
            })
            .collect();
        Self { slots }
    }

    /// Every canonical slot, present or not.
    pub fn slots(&self) -> &[TemplateSlot] {
        &self.slots
    }

    /// Present roles in physical order.
    pub fn active_roles(&self) -> impl Iterator<Item = LayerRole> + '_ {
        self.slots.iter().filter(|s| s.present).map(|s| s.role)
    }
}

/// Free film parameters of one candidate stack.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackParams {
    /// Multiplier on the configured A-plate retardation.
    pub a_scale: f64,
    /// Signed C-plate thickness retardation (nm); the sign selects +C / -C.
    pub c_retardation_nm: f64,
    /// Base azimuth of the A-plate axis.
    pub a_base: AxisBase,
    /// A-plate material for single-A topologies.
    pub a_kind: APlateKind,
}

impl StackParams {
    /// Parameters with absorption-axis base and the upper A-plate material.
    pub fn new(a_scale: f64, c_retardation_nm: f64) -> Self {
        Self {
            a_scale,
            c_retardation_nm,
            a_base: AxisBase::Absorption,
            a_kind: APlateKind::Upper,
        }
    }

    pub fn with_a_base(mut self, a_base: AxisBase) -> Self {
        self.a_base = a_base;
        self
    }

    pub fn with_a_kind(mut self, a_kind: APlateKind) -> Self {
        self.a_kind = a_kind;
        self
    }
}

/// Builds fresh stacks for one configuration.
#[derive(Clone, Debug)]
pub struct StackBuilder<'a> {
    config: &'a SimulationConfig,
    template: StackTemplate,
}

impl<'a> StackBuilder<'a> {
    pub fn new(config: &'a SimulationConfig) -> Self {
        let with_films = config.materials.protective_films.count > 0;
        Self {
            config,
            template: StackTemplate::new(config.topology, with_films),
        }
    }

    /// Slot template derived from the configured topology.
    pub fn template(&self) -> &StackTemplate {
        &self.template
    }

    /// Builds the stack for `params`; zero A_scale or zero C retardation omits those slots.
    pub fn build(&self, params: &StackParams) -> Result<Stack> {
        if !params.a_scale.is_finite() || params.a_scale < 0.0 {
            return Err(OpticsError::invalid_stack(format!(
                "A_scale must be non-negative, found {}",
                params.a_scale
            )));
        }
        if !params.c_retardation_nm.is_finite() {
            return Err(OpticsError::invalid_stack(
                "C-plate retardation must be finite",
            ));
        }

        let mut layers = Vec::new();
        for role in self.template.active_roles() {
            match role {
                LayerRole::EntranceFilm | LayerRole::ExitFilm => {
                    let films = &self.config.materials.protective_films;
                    for _ in 0..films.count {
                        layers.push(self.protective_film()?);
                    }
                }
                LayerRole::LowerC | LayerRole::UpperC => {
                    if params.c_retardation_nm != 0.0 {
                        layers.push(self.c_plate(params.c_retardation_nm)?);
                    }
                }
                LayerRole::LowerA | LayerRole::UpperA => {
                    if params.a_scale != 0.0 {
                        layers.push(self.a_plate(role, params)?);
                    }
                }
                LayerRole::Lc => layers.push(self.lc_cell()?),
            }
        }
        Ok(Stack::new(layers))
    }

    fn in_plane_axis(&self, role: LayerRole, base: AxisBase) -> Vector3<f64> {
        let alignment = &self.config.alignment;
        let rotation = match (role.coupling(), role) {
            (AxisCoupling::EntrancePolarizer, LayerRole::Lc) => {
                alignment.pol_in_deg + alignment.lc_offset_deg
            }
            (AxisCoupling::EntrancePolarizer, _) => {
                alignment.pol_in_deg + alignment.lower_a_offset_deg
            }
            (AxisCoupling::ExitPolarizer, _) => {
                alignment.pol_out_deg + alignment.upper_a_offset_deg
            }
            (AxisCoupling::Normal, _) => 0.0,
        };
        rotate_z(&axis_from_azimuth(base.azimuth_deg()), rotation)
    }

    fn lc_cell(&self) -> Result<OpticalLayer> {
        let m = &self.config.materials;
        let thickness = m.lc_retardation_nm / m.lc_birefringence;
        OpticalLayer::new(
            LayerKind::Lc,
            self.in_plane_axis(LayerRole::Lc, self.config.lc_basis),
            thickness,
            m.ordinary_index,
            m.ordinary_index + m.lc_birefringence * m.lc_birefringence_scale,
        )
    }

    fn a_plate(&self, role: LayerRole, params: &StackParams) -> Result<OpticalLayer> {
        let m = &self.config.materials;
        let kind = match (self.config.topology, role) {
            (Topology::Symmetric, LayerRole::LowerA) => APlateKind::Lower,
            (Topology::Symmetric, _) => APlateKind::Upper,
            _ => params.a_kind,
        };
        let dn = m.a_birefringence(kind);
        let thickness = m.a_retardation_nm * params.a_scale / dn;
        OpticalLayer::new(
            LayerKind::A,
            self.in_plane_axis(role, params.a_base),
            thickness,
            m.ordinary_index,
            m.ordinary_index + dn,
        )
    }

    fn c_plate(&self, retardation_nm: f64) -> Result<OpticalLayer> {
        let m = &self.config.materials;
        let dn = m.c_birefringence.copysign(retardation_nm);
        OpticalLayer::new(
            LayerKind::C,
            Vector3::z(),
            retardation_nm / dn,
            m.ordinary_index,
            m.ordinary_index + dn,
        )
    }

    fn protective_film(&self) -> Result<OpticalLayer> {
        let m = &self.config.materials;
        let films = &m.protective_films;
        OpticalLayer::new(
            LayerKind::C,
            Vector3::z(),
            films.thickness_nm,
            m.ordinary_index,
            m.ordinary_index + films.birefringence,
        )
    }
}
