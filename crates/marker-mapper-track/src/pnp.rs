//! Perspective-n-point for marker corner sets.
//!
//! [`IterativePnp`] initializes from the undistorted correspondences and then
//! minimizes pixel reprojection error through the full camera model with
//! Levenberg-Marquardt. Coplanar point sets (a single marker, or several
//! markers on one plane) start from a plane homography; spread-out sets with
//! at least six points start from a normalized DLT.

use log::debug;
use marker_mapper_core::{estimate_homography, CameraModel, RigidTransform};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{
    storage::Owned, DMatrix, DVector, Dyn, Matrix3, Matrix3x4, Matrix4, Point2, Point3, Rotation3,
    Vector3,
};
use serde::{Deserialize, Serialize};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Minimum number of correspondences accepted by any solver.
pub const MIN_CORRESPONDENCES: usize = 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PnpError {
    #[error("need at least 4 correspondences, got {0}")]
    InsufficientCorrespondences(usize),
    #[error("{object} object points but {image} image points")]
    MismatchedLengths { object: usize, image: usize },
    #[error("object points are collinear or coincident")]
    Degenerate,
    #[error("image point {0} could not be undistorted")]
    Undistortion(usize),
    #[error("could not initialize the camera pose")]
    Initialization,
    #[error("pose refinement produced non-finite values")]
    NonFinite,
}

/// Camera pose mapping base-frame points into the camera frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>,
    /// Root-mean-square corner reprojection error in pixels.
    pub rms_error: f64,
}

impl CameraPose {
    pub fn transform(&self) -> RigidTransform {
        RigidTransform::from_vectors(&self.rvec, &self.tvec)
    }
}

/// A pose solver over matched object/image points.
pub trait PnpSolver {
    fn solve(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraModel,
    ) -> Result<CameraPose, PnpError>;
}

impl<S: PnpSolver + ?Sized> PnpSolver for &S {
    fn solve(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraModel,
    ) -> Result<CameraPose, PnpError> {
        (**self).solve(object, image, camera)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpParams {
    /// Levenberg-Marquardt patience; the evaluation cap is `max_iterations * 7`.
    pub max_iterations: usize,
    /// Eigenvalue ratio of the object point scatter below which an axis is flat.
    pub planarity_tolerance: f64,
    /// Relative cost decrease and step length that count as converged.
    pub convergence_epsilon: f64,
}

impl Default for PnpParams {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            planarity_tolerance: 1e-6,
            convergence_epsilon: 1e-12,
        }
    }
}

/// Closed-form initialization followed by Levenberg-Marquardt refinement.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IterativePnp {
    pub params: PnpParams,
}

impl IterativePnp {
    pub fn new(params: PnpParams) -> Self {
        Self { params }
    }
}

impl PnpSolver for IterativePnp {
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip_all, fields(points = object.len()))
    )]
    fn solve(
        &self,
        object: &[Point3<f64>],
        image: &[Point2<f64>],
        camera: &CameraModel,
    ) -> Result<CameraPose, PnpError> {
        if object.len() != image.len() {
            return Err(PnpError::MismatchedLengths {
                object: object.len(),
                image: image.len(),
            });
        }
        if object.len() < MIN_CORRESPONDENCES {
            return Err(PnpError::InsufficientCorrespondences(object.len()));
        }

        let layout = PointLayout::analyze(object, self.params.planarity_tolerance)?;
        let normalized = image
            .iter()
            .enumerate()
            .map(|(i, p)| {
                camera
                    .undistort_normalized(p)
                    .map(|n| Point2::new(n[0], n[1]))
                    .ok_or(PnpError::Undistortion(i))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (rotation, translation) = if layout.planar || object.len() < 6 {
            planar_initial_pose(object, &normalized, &layout)?
        } else {
            dlt_initial_pose(object, &normalized)?
        };

        let refined = refine(
            object,
            image,
            camera,
            rotation,
            translation,
            &self.params,
        )?;
        let pose = RigidTransform::from_parts(&refined.rotation, &refined.translation);
        let rms_error = (refined.cost / object.len() as f64).sqrt();
        debug!(
            "pnp: {} points, {} init, {} evaluations, rms {:.4}px",
            object.len(),
            if layout.planar || object.len() < 6 { "planar" } else { "dlt" },
            refined.evaluations,
            rms_error
        );

        let rvec = pose.rvec();
        let tvec = pose.translation();
        if !rms_error.is_finite() || rvec.iter().chain(tvec.iter()).any(|v| !v.is_finite()) {
            return Err(PnpError::NonFinite);
        }
        Ok(CameraPose {
            rvec,
            tvec,
            rms_error,
        })
    }
}

/// Centroid and principal axes of the object points.
#[derive(Clone, Debug)]
struct PointLayout {
    centroid: Point3<f64>,
    /// Columns are the principal axes, largest spread first, right-handed.
    basis: Matrix3<f64>,
    planar: bool,
}

impl PointLayout {
    fn analyze(object: &[Point3<f64>], tolerance: f64) -> Result<Self, PnpError> {
        let n = object.len() as f64;
        let centroid = Point3::from(
            object
                .iter()
                .fold(Vector3::zeros(), |acc, p| acc + p.coords)
                / n,
        );
        let mut scatter = Matrix3::zeros();
        for p in object {
            let d = p - centroid;
            scatter += d * d.transpose();
        }

        let eig = scatter.symmetric_eigen();
        let mut order = [0usize, 1, 2];
        order.sort_by(|&a, &b| eig.eigenvalues[b].total_cmp(&eig.eigenvalues[a]));
        let spread = order.map(|i| eig.eigenvalues[i].max(0.0));
        if !spread[0].is_finite() || spread[0] <= f64::EPSILON || spread[1] <= tolerance * spread[0] {
            return Err(PnpError::Degenerate);
        }

        let e0 = eig.eigenvectors.column(order[0]).into_owned();
        let e1 = eig.eigenvectors.column(order[1]).into_owned();
        let e2 = e0.cross(&e1);
        Ok(Self {
            centroid,
            basis: Matrix3::from_columns(&[e0, e1, e2]),
            planar: spread[2] <= tolerance * spread[0],
        })
    }
}

/// Pose from the homography between the best-fit object plane and the image.
///
/// With `H ~ [r1 r2 t]` in plane coordinates, the scale is the mean norm of
/// the first two columns and the sign is chosen so the plane lies in front of
/// the camera.
fn planar_initial_pose(
    object: &[Point3<f64>],
    normalized: &[Point2<f64>],
    layout: &PointLayout,
) -> Result<(Rotation3<f64>, Vector3<f64>), PnpError> {
    let e0 = layout.basis.column(0);
    let e1 = layout.basis.column(1);
    let plane: Vec<Point2<f64>> = object
        .iter()
        .map(|p| {
            let d = p - layout.centroid;
            Point2::new(e0.dot(&d), e1.dot(&d))
        })
        .collect();

    let h = estimate_homography(&plane, normalized)
        .ok_or(PnpError::Initialization)?
        .h;
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();
    let scale = (h1.norm() + h2.norm()) / 2.0;
    if !scale.is_finite() || scale <= 1e-12 {
        return Err(PnpError::Initialization);
    }

    let (mut r1, mut r2, mut t) = (h1 / scale, h2 / scale, h3 / scale);
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    let plane_to_camera = nearest_rotation(&Matrix3::from_columns(&[r1, r2, r3]))?;

    // object = centroid + basis * plane
    let rotation = plane_to_camera * layout.basis.transpose();
    let translation = t - rotation * layout.centroid.coords;
    Ok((Rotation3::from_matrix_unchecked(rotation), translation))
}

/// Normalized DLT for `[R | t]`, projected back onto SO(3).
fn dlt_initial_pose(
    object: &[Point3<f64>],
    normalized: &[Point2<f64>],
) -> Result<(Rotation3<f64>, Vector3<f64>), PnpError> {
    let n = object.len();
    let centroid = object
        .iter()
        .fold(Vector3::zeros(), |acc, p| acc + p.coords)
        / n as f64;
    let mean_dist = object
        .iter()
        .map(|p| (p.coords - centroid).norm())
        .sum::<f64>()
        / n as f64;
    if mean_dist <= f64::EPSILON {
        return Err(PnpError::Degenerate);
    }
    let s = 3.0_f64.sqrt() / mean_dist;
    #[rustfmt::skip]
    let t_object = Matrix4::new(
        s, 0.0, 0.0, -s * centroid.x,
        0.0, s, 0.0, -s * centroid.y,
        0.0, 0.0, s, -s * centroid.z,
        0.0, 0.0, 0.0, 1.0,
    );

    let mut a = DMatrix::<f64>::zeros(2 * n, 12);
    for (i, (p, q)) in object.iter().zip(normalized).enumerate() {
        let v = (p.coords - centroid) * s;
        let (x, y, z) = (v.x, v.y, v.z);
        let (u, w) = (q.x, q.y);

        let r0 = 2 * i;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = z;
        a[(r0, 3)] = 1.0;
        a[(r0, 8)] = -u * x;
        a[(r0, 9)] = -u * y;
        a[(r0, 10)] = -u * z;
        a[(r0, 11)] = -u;

        let r1 = 2 * i + 1;
        a[(r1, 4)] = x;
        a[(r1, 5)] = y;
        a[(r1, 6)] = z;
        a[(r1, 7)] = 1.0;
        a[(r1, 8)] = -w * x;
        a[(r1, 9)] = -w * y;
        a[(r1, 10)] = -w * z;
        a[(r1, 11)] = -w;
    }

    let svd = a.svd(false, true);
    let v_t = svd.v_t.ok_or(PnpError::Initialization)?;
    let (min_idx, _) = svd.singular_values.argmin();
    let coeffs: Vec<f64> = v_t.row(min_idx).iter().copied().collect();
    let p = Matrix3x4::from_row_slice(&coeffs) * t_object;

    let m = p.fixed_view::<3, 3>(0, 0).into_owned();
    let mut scale = (m.row(0).norm() + m.row(1).norm() + m.row(2).norm()) / 3.0;
    // keep the object centroid in front of the camera
    let depth = m.row(2).transpose().dot(&centroid) + p[(2, 3)];
    if depth < 0.0 {
        scale = -scale;
    }
    if !scale.is_finite() || scale.abs() <= 1e-12 {
        return Err(PnpError::Initialization);
    }
    let rotation = nearest_rotation(&(m / scale))?;
    let translation = p.column(3).into_owned() / scale;
    Ok((Rotation3::from_matrix_unchecked(rotation), translation))
}

/// Closest proper rotation in the Frobenius sense.
fn nearest_rotation(m: &Matrix3<f64>) -> Result<Matrix3<f64>, PnpError> {
    let svd = m.svd(true, true);
    let (Some(mut u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PnpError::Initialization);
    };
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
        r = u * v_t;
    }
    Ok(r)
}

#[derive(Debug)]
struct Refined {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    /// Sum of squared pixel residuals.
    cost: f64,
    evaluations: usize,
}

/// Pose reprojection problem over `[ω | t]`, where the rotation is
/// `exp(ω) · base` and `t` is the translation.
struct PoseProblem<'a> {
    object: &'a [Point3<f64>],
    image: &'a [Point2<f64>],
    camera: &'a CameraModel,
    base: Rotation3<f64>,
    params: DVector<f64>,
}

/// Residual assigned to every coordinate while a point is behind the camera.
const BEHIND_CAMERA_RESIDUAL: f64 = 1e6;

impl PoseProblem<'_> {
    fn pose(&self, x: &DVector<f64>) -> (Rotation3<f64>, Vector3<f64>) {
        let step = Rotation3::new(Vector3::new(x[0], x[1], x[2]));
        (step * self.base, Vector3::new(x[3], x[4], x[5]))
    }

    fn residuals_at(&self, x: &DVector<f64>) -> Option<DVector<f64>> {
        let (rot, t) = self.pose(x);
        let mut r = DVector::zeros(2 * self.object.len());
        for (i, (p, seen)) in self.object.iter().zip(self.image).enumerate() {
            let px = self.camera.project_point(&(rot * p + t))?;
            r[2 * i] = px.x - seen.x;
            r[2 * i + 1] = px.y - seen.y;
        }
        Some(r)
    }

    fn penalized_residuals(&self, x: &DVector<f64>) -> DVector<f64> {
        self.residuals_at(x).unwrap_or_else(|| {
            DVector::from_element(2 * self.object.len(), BEHIND_CAMERA_RESIDUAL)
        })
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for PoseProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.penalized_residuals(&self.params))
    }

    /// Central differences.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        const STEP: f64 = 1e-6;
        let mut columns = Vec::with_capacity(6);
        for k in 0..6 {
            let mut plus = self.params.clone();
            let mut minus = self.params.clone();
            plus[k] += STEP;
            minus[k] -= STEP;
            columns.push(
                (self.penalized_residuals(&plus) - self.penalized_residuals(&minus)) / (2.0 * STEP),
            );
        }
        Some(DMatrix::from_columns(&columns))
    }
}

/// Levenberg-Marquardt from the `levenberg-marquardt` crate, starting at the
/// closed-form pose.
fn refine(
    object: &[Point3<f64>],
    image: &[Point2<f64>],
    camera: &CameraModel,
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    params: &PnpParams,
) -> Result<Refined, PnpError> {
    let mut x0 = DVector::zeros(6);
    x0.fixed_rows_mut::<3>(3).copy_from(&translation);
    let problem = PoseProblem {
        object,
        image,
        camera,
        base: rotation,
        params: x0,
    };
    if problem.residuals_at(&problem.params).is_none() {
        return Err(PnpError::Initialization);
    }

    let tol = params.convergence_epsilon.max(f64::EPSILON);
    let lm = LevenbergMarquardt::new()
        .with_ftol(tol)
        .with_xtol(tol)
        .with_gtol(tol)
        .with_patience(params.max_iterations.max(1));
    let (problem, report) = lm.minimize(problem);
    debug!("pnp: lm stopped with {:?}", report.termination);

    let x = problem.params();
    let residuals = problem.residuals_at(&x).ok_or(PnpError::NonFinite)?;
    let cost = residuals.norm_squared();
    if !cost.is_finite() {
        return Err(PnpError::NonFinite);
    }
    let (rotation, translation) = problem.pose(&x);
    Ok(Refined {
        rotation,
        translation,
        cost,
        evaluations: report.number_of_evaluations,
    })
}
