//! Camera tracking against a resolved marker map.
//!
//! For each frame, the corners of every mapped marker in view are paired with
//! their base-frame positions ([`build_correspondences`]), a PnP solve gives
//! the camera pose ([`IterativePnp`] by default, any [`PnpSolver`] works), and
//! the pose is written out as XYZ Euler angles plus translation
//! ([`TrackingRecord`]). Axis sign corrections for downstream tools live in a
//! single [`CoordinateConvention`].
//!
//! Frames that cannot be solved are reported per frame and never abort a
//! sequence.

mod convention;
mod correspondence;
mod euler;
mod extractor;
mod pnp;

pub use convention::CoordinateConvention;
pub use correspondence::{build_correspondences, Correspondences};
pub use euler::{matrix_to_xyz_euler, xyz_euler_to_matrix};
pub use extractor::{
    write_tracking_lines, CameraPoseExtractor, FrameTrack, TrackError, TrackingRecord,
};
pub use pnp::{CameraPose, IterativePnp, PnpError, PnpParams, PnpSolver, MIN_CORRESPONDENCES};
