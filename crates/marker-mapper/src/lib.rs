//! High-level facade crate for the `marker-mapper-*` workspace.
//!
//! This crate provides:
//! - re-exports of the geometry, resolution and tracking crates
//! - JSON configuration, frame store and report files ([`io`])
//! - an end-to-end run from detector output to a marker map and a camera
//!   track ([`pipeline`])
//! - the `marker-mapper` command line tool (feature `cli`, on by default)
//!
//! ## Quickstart
//!
//! ```no_run
//! use marker_mapper::io::{FrameStore, MarkerMapperConfig};
//! use marker_mapper::pipeline;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MarkerMapperConfig::load_json("run.json")?;
//! let frames = FrameStore::load_json(&config.frames_path)?;
//! let output = pipeline::run(&config, &frames.frames)?;
//! println!(
//!     "mapped {} markers, tracked {} frames",
//!     output.map.len(),
//!     output.tracked_count()
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - `marker_mapper::core`: transforms, camera model, frames, the marker map,
//!   synthetic scenes.
//! - `marker_mapper::solve`: chaining lookup, reprojection scoring, local
//!   search and the multi-pass resolver.
//! - `marker_mapper::track`: correspondences, PnP, Euler output and the
//!   tracking line format.

pub use marker_mapper_core as core;
pub use marker_mapper_solve as solve;
pub use marker_mapper_track as track;

pub use marker_mapper_core::{CameraModel, FrameRecord, MarkerId, MarkerMap, RigidTransform};
pub use marker_mapper_solve::{MapResolver, ResolveReport, ResolverParams};
pub use marker_mapper_track::{CameraPoseExtractor, CoordinateConvention, TrackingRecord};

pub mod io;
pub mod pipeline;

/// Install a `tracing` subscriber and forward `log` records to it.
///
/// `RUST_LOG` overrides `level` when set.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool, level: log::LevelFilter) {
    // Ignore errors if a logger was already installed.
    let _ = tracing_log::LogTracer::init();
    marker_mapper_core::init_tracing(json, level);
}
