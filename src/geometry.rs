//! Propagation directions, in-plane axes, and ideal O-type polarizers.
//!
//! The stack normal is the lab `z` axis. A viewing direction is described by
//! the polar angle `theta` (from the normal) and the azimuth `phi` (in the
//! stack plane, measured from `x`), both in degrees.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{OpticsError, Result};

/// Norms below this are treated as zero when normalizing derived vectors.
pub(crate) const PARALLEL_TOLERANCE: f64 = 1e-12;

/// A validated viewing direction in degrees.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawAngle")]
pub struct ViewingAngle {
    theta_deg: f64,
    phi_deg: f64,
}

#[derive(Deserialize)]
struct RawAngle {
    theta_deg: f64,
    phi_deg: f64,
}

impl TryFrom<RawAngle> for ViewingAngle {
    type Error = OpticsError;

    fn try_from(raw: RawAngle) -> Result<Self> {
        Self::new(raw.theta_deg, raw.phi_deg)
    }
}

impl ViewingAngle {
    /// Validates `theta` in `[0, 90)` and reduces `phi` into `[0, 360)`.
    pub fn new(theta_deg: f64, phi_deg: f64) -> Result<Self> {
        if !theta_deg.is_finite() || !(0.0..90.0).contains(&theta_deg) {
            return Err(OpticsError::InvalidAngle {
                name: "theta",
                value: theta_deg,
            });
        }
        if !phi_deg.is_finite() {
            return Err(OpticsError::InvalidAngle {
                name: "phi",
                value: phi_deg,
            });
        }
        Ok(Self {
            theta_deg,
            phi_deg: phi_deg.rem_euclid(360.0),
        })
    }

    /// The stack normal.
    pub fn normal() -> Self {
        Self {
            theta_deg: 0.0,
            phi_deg: 0.0,
        }
    }

    /// Polar angle from the stack normal (degrees).
    pub fn theta_deg(&self) -> f64 {
        self.theta_deg
    }

    /// Azimuth in the stack plane, reduced into `[0, 360)` (degrees).
    pub fn phi_deg(&self) -> f64 {
        self.phi_deg
    }

    /// Unit propagation vector for this direction.
    pub fn direction(&self) -> Vector3<f64> {
        let theta = self.theta_deg.to_radians();
        let phi = self.phi_deg.to_radians();
        Vector3::new(
            theta.sin() * phi.cos(),
            theta.sin() * phi.sin(),
            theta.cos(),
        )
    }
}

/// Converts `(theta, phi)` in degrees into a unit propagation vector.
pub fn direction(theta_deg: f64, phi_deg: f64) -> Result<Vector3<f64>> {
    Ok(ViewingAngle::new(theta_deg, phi_deg)?.direction())
}

/// Unit in-plane vector at the given lab azimuth (degrees).
pub fn axis_from_azimuth(azimuth_deg: f64) -> Vector3<f64> {
    let a = azimuth_deg.to_radians();
    Vector3::new(a.cos(), a.sin(), 0.0)
}

/// Lab azimuth (degrees) of the in-plane projection of `axis`.
pub fn axis_azimuth(axis: &Vector3<f64>) -> f64 {
    axis.y.atan2(axis.x).to_degrees()
}

/// Rotates `v` about the stack normal by `angle_deg`.
pub fn rotate_z(v: &Vector3<f64>, angle_deg: f64) -> Vector3<f64> {
    let (s, c) = angle_deg.to_radians().sin_cos();
    Vector3::new(c * v.x - s * v.y, s * v.x + c * v.y, v.z)
}

/// Unit vector orthogonal to `k`, built from lab `x` (or lab `y` when `x` is close to `k`).
pub fn lab_reference(k: &Vector3<f64>) -> Vector3<f64> {
    let mut reference = Vector3::x();
    if reference.dot(k).abs() > 0.95 {
        reference = Vector3::y();
    }
    (reference - k * reference.dot(k)).normalize()
}

/// Absorption axes of the entrance and exit polarizers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PolarizerPair {
    /// Entrance polarizer absorption axis.
    pub c1: Vector3<f64>,
    /// Exit polarizer (analyzer) absorption axis.
    pub c2: Vector3<f64>,
}

impl PolarizerPair {
    /// Transmitted eigenstates `(o1, o2)` of both polarizers for direction `k`.
    pub fn eigenstates(&self, k: &Vector3<f64>) -> Result<(Vector3<f64>, Vector3<f64>)> {
        Ok((
            transmission_eigenstate(k, &self.c1)?,
            transmission_eigenstate(k, &self.c2)?,
        ))
    }
}

/// Builds the absorption axes from two independent rotations (degrees).
///
/// The unrotated pair is crossed: `c1` along `x`, `c2` along `y`.
pub fn absorption_axes(rotation_in_deg: f64, rotation_out_deg: f64) -> PolarizerPair {
    PolarizerPair {
        c1: axis_from_azimuth(rotation_in_deg),
        c2: axis_from_azimuth(90.0 + rotation_out_deg),
    }
}

/// Polarization transmitted by an ideal O-type polarizer: `normalize(k x c)`.
pub fn transmission_eigenstate(k: &Vector3<f64>, c: &Vector3<f64>) -> Result<Vector3<f64>> {
    let o = k.cross(c);
    let norm = o.norm();
    if norm < PARALLEL_TOLERANCE {
        return Err(OpticsError::degenerate("transmission eigenstate"));
    }
    Ok(o / norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn direction_is_unit_and_reduces_phi() {
        let k = direction(37.0, 400.0).unwrap();
        assert_relative_eq!(k.norm(), 1.0, epsilon = 1e-15);
        let reduced = ViewingAngle::new(37.0, 400.0).unwrap();
        assert_relative_eq!(reduced.phi_deg(), 40.0, epsilon = 1e-12);
        assert_relative_eq!(ViewingAngle::new(10.0, -90.0).unwrap().phi_deg(), 270.0);
    }

    #[test]
    fn grazing_and_negative_theta_are_rejected() {
        assert!(matches!(
            direction(90.0, 0.0),
            Err(OpticsError::InvalidAngle { name: "theta", .. })
        ));
        assert!(direction(-1.0, 0.0).is_err());
        assert!(direction(10.0, f64::NAN).is_err());
    }

    #[test]
    fn crossed_pair_at_normal_incidence_passes_orthogonal_states() {
        let pair = absorption_axes(0.0, 0.0);
        let k = Vector3::z();
        let (o1, o2) = pair.eigenstates(&k).unwrap();
        assert_relative_eq!(o1, Vector3::y(), epsilon = 1e-15);
        assert_relative_eq!(o1.dot(&o2), 0.0, epsilon = 1e-15);
    }

    #[test]
    fn eigenstate_is_transverse_off_axis() {
        let pair = absorption_axes(3.0, -2.0);
        let k = direction(55.0, 123.0).unwrap();
        let (o1, o2) = pair.eigenstates(&k).unwrap();
        assert_relative_eq!(o1.dot(&k), 0.0, epsilon = 1e-14);
        assert_relative_eq!(o2.dot(&k), 0.0, epsilon = 1e-14);
        assert_relative_eq!(o1.dot(&pair.c1), 0.0, epsilon = 1e-14);
    }

    #[test]
    fn parallel_axis_is_degenerate() {
        let k = Vector3::x();
        let result = transmission_eigenstate(&k, &Vector3::x());
        assert!(matches!(result, Err(OpticsError::DegenerateAxis { .. })));
    }

    #[test]
    fn azimuth_round_trips_through_rotation() {
        let axis = rotate_z(&axis_from_azimuth(10.0), 25.0);
        assert_relative_eq!(axis_azimuth(&axis), 35.0, epsilon = 1e-12);
    }
}
