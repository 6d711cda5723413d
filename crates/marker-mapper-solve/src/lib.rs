//! Marker map resolution.
//!
//! Grows a [`MarkerMap`](marker_mapper_core::MarkerMap) outward from the base
//! marker using frames in which an unmapped marker is seen next to a mapped
//! one:
//!
//! - [`solve_base_to_target`] turns one such frame into a closed-form
//!   base-to-marker candidate,
//! - [`ReprojectionScorer`] measures a candidate against every frame, with an
//!   early exit once a bound is exceeded,
//! - [`optimize_marker`] hill-climbs from the candidates with random
//!   perturbations drawn from a [`JitterSource`],
//! - [`MapResolver`] repeats this over all candidate ids, pass after pass,
//!   until the map stops growing.
//!
//! ```no_run
//! use marker_mapper_core::{synthetic::chain_scene, MarkerMap};
//! use marker_mapper_solve::{MapResolver, ReprojectionScorer, ResolverParams, RngJitter};
//!
//! let scene = chain_scene();
//! let frames = scene.frames();
//! let resolver = MapResolver::new(
//!     ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size),
//!     ResolverParams::default(),
//! );
//! let mut map = MarkerMap::new(0);
//! let report = resolver.resolve(&mut map, &[1, 2, 3, 4], &mut RngJitter::seeded(0));
//! println!("unresolved: {:?}", report.unresolved);
//! ```

mod jitter;
mod reference;
mod resolver;
mod scoring;
mod search;

pub use jitter::{JitterSource, RngJitter, SequenceJitter};
pub use reference::{camera_to_base, solve_base_to_target};
pub use resolver::{MapResolver, PassReport, ResolveReport, ResolverParams};
pub use scoring::ReprojectionScorer;
pub use search::{optimize_marker, random_perturbation, MarkerEstimate, SearchParams};
