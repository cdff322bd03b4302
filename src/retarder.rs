//! Three-component field propagation through a single uniaxial layer.

use nalgebra::{Complex, Matrix3, Vector3};

use crate::geometry::{lab_reference, PARALLEL_TOLERANCE};

/// Complex electric field vector in the lab frame.
pub type Field = Vector3<Complex<f64>>;

/// Lifts a real vector into a field.
pub fn to_field(v: &Vector3<f64>) -> Field {
    v.map(|x| Complex::new(x, 0.0))
}

/// Linear map applying a phase retardation between the two transverse eigenmodes.
///
/// With `u` the optic axis projected onto the plane orthogonal to `k`,
/// `v = k x u`, the operator is
/// `exp(+i G/2) u u^T + exp(-i G/2) v v^T + k k^T`.
/// The longitudinal part passes through unchanged; callers strip it.
#[derive(Clone, Debug, PartialEq)]
pub struct RetarderOperator {
    matrix: Matrix3<Complex<f64>>,
    u: Vector3<f64>,
    v: Vector3<f64>,
}

impl RetarderOperator {
    /// Builds the operator for propagation `k`, optic axis `axis`, and retardation `gamma` (rad).
    pub fn new(k: &Vector3<f64>, axis: &Vector3<f64>, gamma: f64) -> Self {
        let projected = axis - k * axis.dot(k);
        // An axis along k has no transverse projection; any transverse vector works.
        let u = if projected.norm() < PARALLEL_TOLERANCE {
            lab_reference(k)
        } else {
            projected.normalize()
        };
        let v = k.cross(&u);

        let pu = (u * u.transpose()).map(|x| Complex::new(x, 0.0));
        let pv = (v * v.transpose()).map(|x| Complex::new(x, 0.0));
        let pk = (k * k.transpose()).map(|x| Complex::new(x, 0.0));

        let half = 0.5 * gamma;
        let matrix = pu * Complex::new(half.cos(), half.sin())
            + pv * Complex::new(half.cos(), -half.sin())
            + pk;

        Self { matrix, u, v }
    }

    /// Applies the operator to a field.
    pub fn apply(&self, field: &Field) -> Field {
        self.matrix * field
    }

    /// The 3x3 complex matrix.
    pub fn matrix(&self) -> &Matrix3<Complex<f64>> {
        &self.matrix
    }

    /// Transverse eigenmode carrying the `+G/2` phase.
    pub fn u(&self) -> &Vector3<f64> {
        &self.u
    }

    /// Transverse eigenmode carrying the `-G/2` phase.
    pub fn v(&self) -> &Vector3<f64> {
        &self.v
    }
}

/// Removes the component of `field` along `k`.
pub fn enforce_transverse(field: &Field, k: &Vector3<f64>) -> Field {
    let kc = to_field(k);
    field - kc * kc.dot(field)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{axis_from_azimuth, direction};
    use approx::assert_relative_eq;

    fn assert_field_eq(a: &Field, b: &Field) {
        for i in 0..3 {
            assert_relative_eq!(a[i].re, b[i].re, epsilon = 1e-12);
            assert_relative_eq!(a[i].im, b[i].im, epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_retardation_is_identity_on_transverse_plane() {
        let k = direction(35.0, 70.0).unwrap();
        let op = RetarderOperator::new(&k, &axis_from_azimuth(20.0), 0.0);
        for e in [*op.u(), *op.v(), (op.u() + op.v() * 2.0) / 5f64.sqrt()] {
            let field = to_field(&e);
            assert_field_eq(&op.apply(&field), &field);
        }
    }

    #[test]
    fn eigenmodes_pick_up_opposite_phases() {
        let k = direction(20.0, 10.0).unwrap();
        let gamma = 0.7;
        let op = RetarderOperator::new(&k, &axis_from_azimuth(60.0), gamma);
        let out_u = op.apply(&to_field(op.u()));
        let out_v = op.apply(&to_field(op.v()));
        let half = 0.5 * gamma;
        let phase_u = Complex::new(half.cos(), half.sin());
        let phase_v = Complex::new(half.cos(), -half.sin());
        assert_field_eq(&out_u, &(to_field(op.u()) * phase_u));
        assert_field_eq(&out_v, &(to_field(op.v()) * phase_v));
    }

    #[test]
    fn basis_is_orthonormal_and_transverse() {
        let k = direction(50.0, 200.0).unwrap();
        let op = RetarderOperator::new(&k, &Vector3::new(0.3, -0.4, 0.8), 1.0);
        assert_relative_eq!(op.u().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(op.v().norm(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(op.u().dot(&k), 0.0, epsilon = 1e-12);
        assert_relative_eq!(op.u().dot(op.v()), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn axis_along_k_falls_back_to_transverse_reference() {
        let k = Vector3::z();
        let op = RetarderOperator::new(&k, &Vector3::z(), 0.4);
        assert_relative_eq!(op.u().dot(&k), 0.0, epsilon = 1e-15);
        assert!(op.matrix().iter().all(|c| c.re.is_finite() && c.im.is_finite()));
    }

    #[test]
    fn transverse_projection_removes_longitudinal_part() {
        let k = direction(45.0, 30.0).unwrap();
        let field = Field::new(
            Complex::new(1.0, 0.5),
            Complex::new(-0.2, 0.1),
            Complex::new(0.3, -0.7),
        );
        let projected = enforce_transverse(&field, &k);
        assert!(to_field(&k).dot(&projected).norm_sqr().sqrt() < 1e-14);
    }
}
