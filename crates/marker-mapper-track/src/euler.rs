//! XYZ Euler angles of a rotation matrix.

use std::f64::consts::FRAC_PI_2;

use nalgebra::{Matrix3, Rotation3};

/// Decompose `R = Rz(tz) · Ry(ty) · Rx(tx)` into `[tx, ty, tz]`.
///
/// Away from gimbal lock the angles come from the usual arctangent/arcsine
/// formulas. When `R[2,0]` reaches `-1` or `1`, `tx` is fixed to zero and
/// `ty` to `±π/2`, leaving `tz` to absorb the remaining rotation.
pub fn matrix_to_xyz_euler(r: &Matrix3<f64>) -> [f64; 3] {
    let r20 = r[(2, 0)];
    if r20 < 1.0 {
        if r20 > -1.0 {
            let ty = (-r20).asin();
            let tz = r[(1, 0)].atan2(r[(0, 0)]);
            let tx = r[(2, 1)].atan2(r[(2, 2)]);
            [tx, ty, tz]
        } else {
            let tz = -(-r[(1, 2)]).atan2(r[(1, 1)]);
            [0.0, FRAC_PI_2, tz]
        }
    } else {
        let tz = (-r[(1, 2)]).atan2(r[(1, 1)]);
        [0.0, -FRAC_PI_2, tz]
    }
}

/// Inverse of [`matrix_to_xyz_euler`].
pub fn xyz_euler_to_matrix(angles: [f64; 3]) -> Matrix3<f64> {
    Rotation3::from_euler_angles(angles[0], angles[1], angles[2]).into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn generic_matrices_round_trip() {
        for angles in [
            [0.1, -0.2, 0.3],
            [-2.5, 1.2, 3.0],
            [3.1, -1.5, -0.7],
            [0.0, 0.0, 0.0],
        ] {
            let m = xyz_euler_to_matrix(angles);
            assert!(m[(2, 0)].abs() < 1.0);
            let back = matrix_to_xyz_euler(&m);
            assert_relative_eq!(back[0], angles[0], epsilon = 1e-12);
            assert_relative_eq!(back[1], angles[1], epsilon = 1e-12);
            assert_relative_eq!(back[2], angles[2], epsilon = 1e-12);
            assert_relative_eq!(xyz_euler_to_matrix(back), m, epsilon = 1e-12);
        }
    }

    #[test]
    fn lower_gimbal_lock_branch() {
        // Rz(0.3) · Ry(π/2): R[2,0] = -1
        let (s, c) = 0.3_f64.sin_cos();
        #[rustfmt::skip]
        let m = Matrix3::new(
            0.0, -s, c,
            0.0, c, s,
            -1.0, 0.0, 0.0,
        );
        let angles = matrix_to_xyz_euler(&m);
        assert_eq!(angles[0], 0.0);
        assert_eq!(angles[1], FRAC_PI_2);
        assert_relative_eq!(angles[2], 0.3, epsilon = 1e-15);
        assert_relative_eq!(xyz_euler_to_matrix(angles), m, epsilon = 1e-12);
    }

    #[test]
    fn upper_gimbal_lock_branch() {
        // Rz(-0.8) · Ry(-π/2): R[2,0] = 1
        let (s, c) = (-0.8_f64).sin_cos();
        #[rustfmt::skip]
        let m = Matrix3::new(
            0.0, -s, -c,
            0.0, c, -s,
            1.0, 0.0, 0.0,
        );
        let angles = matrix_to_xyz_euler(&m);
        assert_eq!(angles[0], 0.0);
        assert_eq!(angles[1], -FRAC_PI_2);
        assert_relative_eq!(angles[2], -0.8, epsilon = 1e-15);
        assert_relative_eq!(xyz_euler_to_matrix(angles), m, epsilon = 1e-12);
    }

    #[test]
    fn entries_past_the_boundary_use_the_singular_branch() {
        let mut m = Matrix3::identity();
        m[(2, 0)] = 1.0 + 1e-12;
        assert_eq!(matrix_to_xyz_euler(&m)[1], -FRAC_PI_2);
        m[(2, 0)] = -1.0 - 1e-12;
        assert_eq!(matrix_to_xyz_euler(&m)[1], FRAC_PI_2);
    }
}
