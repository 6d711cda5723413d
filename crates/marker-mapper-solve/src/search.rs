//! Randomized local search for one unresolved marker.
//!
//! Every frame that sees the target next to a mapped marker yields a
//! closed-form candidate. Each candidate is scored, then jittered a fixed
//! number of times; a proposal replaces the current best only when it scores
//! strictly lower, with the best error so far used as the scorer's bound.

use log::debug;
use marker_mapper_core::{MarkerId, MarkerMap, RigidTransform};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::jitter::JitterSource;
use crate::reference::solve_base_to_target;
use crate::scoring::ReprojectionScorer;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Tunables of the per-marker search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Per-axis magnitude of the axis-angle perturbation, radians.
    pub rotation_jitter: [f64; 3],
    /// Per-axis magnitude of the translation perturbation, map units.
    pub translation_jitter: [f64; 3],
    /// Jittered proposals evaluated per closed-form candidate.
    pub perturbation_rounds: usize,
    /// Sentinel error a candidate has to beat to resolve the marker.
    pub initial_error_bound: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            rotation_jitter: [0.1; 3],
            translation_jitter: [0.1; 3],
            perturbation_rounds: 1,
            initial_error_bound: 1e7,
        }
    }
}

/// Outcome of [`optimize_marker`] for a marker that resolved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkerEstimate {
    pub id: MarkerId,
    pub base_to_marker: RigidTransform,
    /// Reprojection error of `base_to_marker`, summed over all scored frames.
    pub error: f64,
    /// Frames that produced a closed-form candidate.
    pub contributing_frames: usize,
    /// Scorer calls, candidates and perturbations together.
    pub evaluations: usize,
    /// Perturbations that improved on the best pose at the time.
    pub accepted_perturbations: usize,
}

/// Random rigid perturbation with components drawn from `jitter`.
///
/// Each rotation and translation component is `u * magnitude` for a fresh
/// `u` in `[-1, 1]`; rotation components are drawn first.
pub fn random_perturbation<J: JitterSource + ?Sized>(
    params: &SearchParams,
    jitter: &mut J,
) -> RigidTransform {
    let rvec = scaled_sample(&params.rotation_jitter, jitter);
    let tvec = scaled_sample(&params.translation_jitter, jitter);
    RigidTransform::from_vectors(&rvec, &tvec)
}

fn scaled_sample<J: JitterSource + ?Sized>(magnitude: &[f64; 3], jitter: &mut J) -> Vector3<f64> {
    let mut v = Vector3::zeros();
    for (out, m) in v.iter_mut().zip(magnitude) {
        *out = jitter.next_unit() * m;
    }
    v
}

/// Best base-to-target pose reachable from the current map, if any beats
/// `params.initial_error_bound`.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip_all, fields(target = target_id))
)]
pub fn optimize_marker<J: JitterSource + ?Sized>(
    scorer: &ReprojectionScorer<'_>,
    map: &MarkerMap,
    target_id: MarkerId,
    params: &SearchParams,
    jitter: &mut J,
) -> Option<MarkerEstimate> {
    let mut best: Option<RigidTransform> = None;
    let mut best_err = params.initial_error_bound;
    let mut contributing_frames = 0;
    let mut evaluations = 0;
    let mut accepted_perturbations = 0;

    for frame in scorer.frames().iter().filter(|f| f.contains(target_id)) {
        let Some(candidate) = solve_base_to_target(frame, map, target_id) else {
            continue;
        };
        contributing_frames += 1;

        let err = scorer.score(&candidate, map, target_id, best_err);
        evaluations += 1;
        if err < best_err {
            best_err = err;
            best = Some(candidate);
        }

        for _ in 0..params.perturbation_rounds {
            let proposal = candidate * random_perturbation(params, jitter);
            let err = scorer.score(&proposal, map, target_id, best_err);
            evaluations += 1;
            if err < best_err {
                best_err = err;
                best = Some(proposal);
                accepted_perturbations += 1;
            }
        }
    }

    debug!(
        "marker {target_id}: {contributing_frames} candidate frames, {evaluations} evaluations, best error {best_err:.6}"
    );

    best.map(|base_to_marker| MarkerEstimate {
        id: target_id,
        base_to_marker,
        error: best_err,
        contributing_frames,
        evaluations,
        accepted_perturbations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::SequenceJitter;
    use approx::assert_relative_eq;
    use marker_mapper_core::synthetic::chain_scene;

    #[test]
    fn perturbation_scales_each_component() {
        let params = SearchParams {
            rotation_jitter: [0.1, 0.2, 0.3],
            translation_jitter: [1.0, 2.0, 3.0],
            ..SearchParams::default()
        };
        let mut jitter = SequenceJitter::new(vec![1.0, -1.0, 0.5, 0.5, 0.0, -1.0]);
        let p = random_perturbation(&params, &mut jitter);
        assert_relative_eq!(p.rvec(), Vector3::new(0.1, -0.2, 0.15), epsilon = 1e-12);
        assert_relative_eq!(p.translation(), Vector3::new(0.5, 0.0, -3.0), epsilon = 1e-12);
        assert_eq!(jitter.consumed(), 6);
    }

    #[test]
    fn exact_observations_resolve_to_ground_truth() {
        let scene = chain_scene();
        let frames = scene.frames();
        let scorer = ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size);
        let map = MarkerMap::new(0);

        let est = optimize_marker(&scorer, &map, 1, &SearchParams::default(), &mut SequenceJitter::new(vec![0.7, -0.4, 0.9]))
            .expect("marker 1 is co-visible with the base");
        assert_eq!(est.id, 1);
        // frames 0, 1 and 5 see marker 1 next to the base
        assert_eq!(est.contributing_frames, 3);
        assert_eq!(est.evaluations, 6);
        assert_eq!(est.accepted_perturbations, 0);
        assert!(est.error < 1e-12);
        assert_relative_eq!(
            *est.base_to_marker.matrix(),
            *scene.marker_pose(1).unwrap().matrix(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn identity_perturbations_are_never_accepted() {
        let scene = chain_scene();
        let frames = scene.noisy_frames(0.8, 0.01, 0.003);
        let scorer = ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size);
        let map = MarkerMap::new(0);
        let params = SearchParams {
            perturbation_rounds: 3,
            ..SearchParams::default()
        };

        let mut jitter = SequenceJitter::zeros();
        let est = optimize_marker(&scorer, &map, 1, &params, &mut jitter).expect("resolves");
        assert_eq!(est.accepted_perturbations, 0);
        assert_eq!(est.evaluations, est.contributing_frames * 4);
        assert_eq!(jitter.consumed(), est.contributing_frames * 3 * 6);
    }

    #[test]
    fn result_never_scores_worse_than_any_raw_candidate() {
        let scene = chain_scene();
        let frames = scene.noisy_frames(0.8, 0.01, 0.003);
        let scorer = ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size);
        let map = MarkerMap::new(0);
        let params = SearchParams {
            rotation_jitter: [0.005; 3],
            translation_jitter: [0.002; 3],
            perturbation_rounds: 8,
            ..SearchParams::default()
        };

        let mut jitter = SequenceJitter::new(vec![0.3, -0.8, 0.1, 0.95, -0.2, 0.6, -0.5]);
        let est = optimize_marker(&scorer, &map, 1, &params, &mut jitter).expect("resolves");
        let full = scorer.score(&est.base_to_marker, &map, 1, f64::INFINITY);
        assert_eq!(full, est.error);

        for frame in frames.iter().filter(|f| f.contains(1)) {
            let raw = solve_base_to_target(frame, &map, 1).expect("base co-visible");
            let raw_err = scorer.score(&raw, &map, 1, f64::INFINITY);
            assert!(est.error <= raw_err, "{} > {}", est.error, raw_err);
        }
    }

    #[test]
    fn unreachable_or_hopeless_markers_stay_unresolved() {
        let scene = chain_scene();
        let frames = scene.frames();
        let scorer = ReprojectionScorer::new(&frames, &scene.camera, scene.marker_size);
        let map = MarkerMap::new(0);
        let mut jitter = SequenceJitter::zeros();

        // 4 is never seen next to the base
        assert!(optimize_marker(&scorer, &map, 4, &SearchParams::default(), &mut jitter).is_none());

        // nothing beats a negative sentinel
        let params = SearchParams {
            initial_error_bound: -1.0,
            ..SearchParams::default()
        };
        assert!(optimize_marker(&scorer, &map, 1, &params, &mut jitter).is_none());
    }
}
