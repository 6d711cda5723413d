//! Pinhole camera with four-term radial-tangential distortion.
//!
//! Projection follows the usual convention: camera-frame point → normalized
//! coordinates `(x/z, y/z)` → distortion → pixels via `K`.

use nalgebra::{Matrix3, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics in pixel units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Square-pixel intrinsics from sensor geometry, principal point at the image centre.
    ///
    /// `sensor_width_mm / width_px` is the pixel pitch; the focal length is
    /// converted to pixels with it.
    pub fn from_sensor(width_px: u32, height_px: u32, sensor_width_mm: f64, focal_mm: f64) -> Self {
        let pitch_mm = sensor_width_mm / width_px as f64;
        let f = focal_mm / pitch_mm;
        Self {
            fx: f,
            fy: f,
            cx: width_px as f64 / 2.0,
            cy: height_px as f64 / 2.0,
        }
    }

    pub fn from_matrix(k: &Matrix3<f64>) -> Self {
        Self {
            fx: k[(0, 0)],
            fy: k[(1, 1)],
            cx: k[(0, 2)],
            cy: k[(1, 2)],
        }
    }

    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Returns `true` when all entries are finite and focal lengths non-zero.
    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx.abs() > 1e-12
            && self.fy.abs() > 1e-12
    }

    #[inline]
    pub fn normalized_to_pixel(&self, n: [f64; 2]) -> Point2<f64> {
        Point2::new(self.fx * n[0] + self.cx, self.fy * n[1] + self.cy)
    }

    #[inline]
    pub fn pixel_to_normalized(&self, p: &Point2<f64>) -> [f64; 2] {
        [(p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy]
    }
}

/// Radial-tangential coefficients `(k1, k2, p1, p2)`.
///
/// Serialized as a plain 4-array in the usual `[k1, k2, p1, p2]` order.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
}

impl Distortion {
    pub const NONE: Distortion = Distortion {
        k1: 0.0,
        k2: 0.0,
        p1: 0.0,
        p2: 0.0,
    };

    pub fn is_zero(&self) -> bool {
        *self == Self::NONE
    }

    pub fn distort(&self, n: [f64; 2]) -> [f64; 2] {
        let [x, y] = n;
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        [x * radial + x_tan, y * radial + y_tan]
    }

    /// Fixed-point inversion of [`Distortion::distort`].
    pub fn undistort(&self, d: [f64; 2], max_iters: usize) -> Option<[f64; 2]> {
        if self.is_zero() {
            return Some(d);
        }
        let [mut x, mut y] = d;
        for _ in 0..max_iters.max(1) {
            let r2 = x * x + y * y;
            let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }
            let dx_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
            let dy_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
            let x_next = (d[0] - dx_tan) / radial;
            let y_next = (d[1] - dy_tan) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }
            let step = (x_next - x).hypot(y_next - y);
            x = x_next;
            y = y_next;
            if step <= 1e-14 {
                break;
            }
        }
        Some([x, y])
    }
}

impl From<[f64; 4]> for Distortion {
    fn from(v: [f64; 4]) -> Self {
        Self {
            k1: v[0],
            k2: v[1],
            p1: v[2],
            p2: v[3],
        }
    }
}

impl From<Distortion> for [f64; 4] {
    fn from(d: Distortion) -> Self {
        [d.k1, d.k2, d.p1, d.p2]
    }
}

/// Intrinsics + distortion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub intrinsics: CameraIntrinsics,
    #[serde(default)]
    pub distortion: Distortion,
}

/// Iterations used when inverting the distortion model.
const UNDISTORT_ITERS: usize = 20;

impl CameraModel {
    pub fn new(intrinsics: CameraIntrinsics, distortion: Distortion) -> Self {
        Self {
            intrinsics,
            distortion,
        }
    }

    pub fn pinhole(intrinsics: CameraIntrinsics) -> Self {
        Self::new(intrinsics, Distortion::NONE)
    }

    /// Project a camera-frame point to pixels.
    ///
    /// Returns `None` for points at or behind the image plane.
    #[inline]
    pub fn project_point(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z.is_nan() || p.z <= 1e-12 {
            return None;
        }
        let n = [p.x / p.z, p.y / p.z];
        let px = self.intrinsics.normalized_to_pixel(self.distortion.distort(n));
        (px.x.is_finite() && px.y.is_finite()).then_some(px)
    }

    pub fn project_points(&self, points: &[Point3<f64>]) -> Option<Vec<Point2<f64>>> {
        points.iter().map(|p| self.project_point(p)).collect()
    }

    /// Map an observed pixel to undistorted normalized coordinates.
    pub fn undistort_normalized(&self, pixel: &Point2<f64>) -> Option<[f64; 2]> {
        let d = self.intrinsics.pixel_to_normalized(pixel);
        self.distortion.undistort(d, UNDISTORT_ITERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn camera() -> CameraModel {
        CameraModel::new(
            CameraIntrinsics {
                fx: 800.0,
                fy: 780.0,
                cx: 640.0,
                cy: 360.0,
            },
            Distortion::from([-0.12, 0.03, 0.001, -0.0005]),
        )
    }

    #[test]
    fn sensor_intrinsics_match_pixel_pitch() {
        let k = CameraIntrinsics::from_sensor(1920, 1080, 36.0, 35.0);
        assert_relative_eq!(k.fx, 35.0 / (36.0 / 1920.0), epsilon = 1e-9);
        assert_relative_eq!(k.fy, k.fx);
        assert_relative_eq!(k.cx, 960.0);
        assert_relative_eq!(k.cy, 540.0);
        let m = k.matrix();
        assert_eq!(m[(2, 2)], 1.0);
        assert_eq!(CameraIntrinsics::from_matrix(&m), k);
    }

    #[test]
    fn projects_optical_axis_to_principal_point() {
        let cam = camera();
        let px = cam.project_point(&Point3::new(0.0, 0.0, 2.0)).expect("in front");
        assert_relative_eq!(px, Point2::new(640.0, 360.0), epsilon = 1e-12);
    }

    #[test]
    fn points_behind_camera_do_not_project() {
        let cam = camera();
        assert!(cam.project_point(&Point3::new(0.1, 0.1, -1.0)).is_none());
        assert!(cam.project_point(&Point3::new(0.1, 0.1, 0.0)).is_none());
    }

    #[test]
    fn undistort_inverts_projection() {
        let cam = camera();
        for p in [
            Point3::new(0.2, -0.1, 1.5),
            Point3::new(-0.4, 0.25, 2.0),
            Point3::new(0.0, 0.3, 0.9),
        ] {
            let px = cam.project_point(&p).expect("projects");
            let n = cam.undistort_normalized(&px).expect("undistorts");
            assert_relative_eq!(n[0], p.x / p.z, epsilon = 1e-9);
            assert_relative_eq!(n[1], p.y / p.z, epsilon = 1e-9);
        }
    }

    #[test]
    fn distortion_serializes_as_array() {
        let d = Distortion::from([0.1, 0.2, 0.3, 0.4]);
        assert_eq!(serde_json::to_string(&d).unwrap(), "[0.1,0.2,0.3,0.4]");
    }
}
