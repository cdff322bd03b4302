//! Oblique-incidence phase retardation of uniaxial layers.
//!
//! Both formulas compare the normal wave-vector components of the
//! extraordinary and ordinary waves inside the layer (Applied Optics 2006,
//! Eq. 3a/3b). With `s = sin(theta)` and `phi'` the azimuth of the plane of
//! incidence relative to the in-plane optic axis:
//!
//! ```text
//! A / LC : G = 2 pi d / lambda * [ ne sqrt(1 - s^2 cos^2 phi' / no^2 - s^2 sin^2 phi' / ne^2)
//!                                 - no sqrt(1 - s^2 / no^2) ]
//! C      : G = 2 pi d / lambda * no * [ sqrt(1 - s^2 / ne^2) - sqrt(1 - s^2 / no^2) ]
//! ```

use std::f64::consts::PI;

/// Radicand floor used by the normal-axis formula near grazing incidence.
pub const RADICAND_FLOOR: f64 = 1e-18;

/// Lower bound on `cos(theta)` for the normal-axis formula.
///
/// `cos(theta)` never divides here; the clamp only keeps `sin^2(theta)`
/// strictly below one at and beyond grazing incidence.
pub const COS_FLOOR: f64 = 1e-9;

/// Retardation (radians) of a layer whose optic axis lies in the film plane.
///
/// `phi_rel_deg` is the azimuth of the plane of incidence measured from the
/// layer's optic axis. Lengths share a unit (nanometres throughout the crate).
pub fn in_plane_retardation(
    theta_deg: f64,
    phi_rel_deg: f64,
    wavelength: f64,
    thickness: f64,
    no: f64,
    ne: f64,
) -> f64 {
    let s2 = theta_deg.to_radians().sin().powi(2);
    let (sin_p, cos_p) = phi_rel_deg.to_radians().sin_cos();

    // Both radicands are non-negative for real incidence; clamp rounding noise.
    let extraordinary = (1.0 - s2 * cos_p * cos_p / (no * no) - s2 * sin_p * sin_p / (ne * ne))
        .max(0.0)
        .sqrt();
    let ordinary = (1.0 - s2 / (no * no)).max(0.0).sqrt();

    2.0 * PI * thickness / wavelength * (ne * extraordinary - no * ordinary)
}

/// Retardation (radians) of a layer whose optic axis is the stack normal.
///
/// Independent of azimuth. Vanishes at normal incidence and carries the sign
/// of `ne - no` (+C / -C) off axis.
pub fn normal_retardation(
    theta_deg: f64,
    wavelength: f64,
    thickness: f64,
    no: f64,
    ne: f64,
) -> f64 {
    let cos_t = theta_deg.to_radians().cos().max(COS_FLOOR);
    let s2 = 1.0 - cos_t * cos_t;

    let extraordinary = (1.0 - s2 / (ne * ne)).max(RADICAND_FLOOR).sqrt();
    let ordinary = (1.0 - s2 / (no * no)).max(RADICAND_FLOOR).sqrt();

    2.0 * PI * thickness / wavelength * no * (extraordinary - ordinary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn in_plane_normal_incidence_is_thickness_times_birefringence() {
        let expected = 2.0 * PI * 1000.0 * 0.1 / 550.0;
        for phi in [0.0, 17.0, 45.0, 90.0, 233.0] {
            let gamma = in_plane_retardation(0.0, phi, 550.0, 1000.0, 1.5, 1.6);
            assert_relative_eq!(gamma, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn in_plane_depends_on_azimuth_off_axis() {
        let along = in_plane_retardation(40.0, 0.0, 550.0, 1000.0, 1.5, 1.6);
        let across = in_plane_retardation(40.0, 90.0, 550.0, 1000.0, 1.5, 1.6);
        // Across the axis the extraordinary wave sees ne in the plane of incidence.
        assert!(across > along);
        let mirrored = in_plane_retardation(40.0, -90.0, 550.0, 1000.0, 1.5, 1.6);
        assert_relative_eq!(across, mirrored, epsilon = 1e-12);
    }

    #[test]
    fn normal_axis_vanishes_on_axis_and_follows_sign() {
        assert_relative_eq!(normal_retardation(0.0, 550.0, 1000.0, 1.5, 1.6), 0.0);
        let positive = normal_retardation(30.0, 550.0, 1000.0, 1.5, 1.51);
        let negative = normal_retardation(30.0, 550.0, 1000.0, 1.5, 1.49);
        assert!(positive > 0.0);
        assert!(negative < 0.0);
    }

    #[test]
    fn cos_clamp_bounds_sine_at_and_past_grazing() {
        let grazing = normal_retardation(90.0, 550.0, 1000.0, 1.5, 1.49);
        let beyond = normal_retardation(95.0, 550.0, 1000.0, 1.5, 1.49);
        assert_eq!(grazing, beyond);
        let s2 = 1.0 - COS_FLOOR * COS_FLOOR;
        let expected = 2.0 * PI * 1000.0 / 550.0
            * 1.5
            * ((1.0 - s2 / (1.49 * 1.49)).sqrt() - (1.0 - s2 / (1.5 * 1.5)).sqrt());
        assert_relative_eq!(grazing, expected, epsilon = 1e-12);
        let near = normal_retardation(89.9, 550.0, 1000.0, 1.5, 1.49);
        assert_relative_eq!(grazing, near, max_relative = 1e-3);
    }

    #[test]
    fn normal_axis_is_finite_near_grazing_incidence() {
        let gamma = normal_retardation(89.999_999_9, 550.0, 1000.0, 1.0, 1.0);
        assert!(gamma.is_finite());
        let gamma = normal_retardation(90.0, 550.0, 1000.0, 1.5, 0.9);
        assert!(gamma.is_finite());
        let gamma = in_plane_retardation(89.9, 0.0, 550.0, 1000.0, 0.99, 1.0);
        assert!(gamma.is_finite());
    }
}
