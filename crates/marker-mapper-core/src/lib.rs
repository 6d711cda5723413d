//! Core types for building fiducial marker maps.
//!
//! This crate is purely geometric: rigid transforms, a pinhole camera with
//! radial-tangential distortion, per-frame marker observations and the
//! insertion-ordered [`MarkerMap`]. It does not depend on any detector or
//! image type; frames arrive as already-detected corners and poses.
//!
//! Logging goes through the `log` facade. [`init_with_level`] installs a
//! small stderr logger; with the `tracing` feature, [`init_tracing`] installs
//! a `tracing-subscriber` instead.

mod camera;
mod frame;
mod homography;
mod logger;
mod map;
mod transform;

pub mod synthetic;

pub use camera::{CameraIntrinsics, CameraModel, Distortion};
pub use frame::{marker_corners, FrameError, FrameRecord, MarkerId, MarkerObservation};
pub use homography::{estimate_homography, homography_from_4pt, Homography};
pub use map::{MapEntry, MapError, MarkerMap};
pub use transform::{RigidTransform, TransformError, RIGID_TOLERANCE};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, parse_level};
