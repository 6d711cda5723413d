//! Multi-pass growth of the marker map.
//!
//! A pass walks the candidate ids in order and runs the local search for every
//! id not yet mapped. Resolved markers are appended immediately, so later ids
//! in the same pass can already chain through them. Markers only reachable
//! through a marker resolved later in the order need another pass; the
//! resolver stops at the first pass that adds nothing.

use log::{debug, info, warn};
use marker_mapper_core::{MarkerId, MarkerMap};
use serde::{Deserialize, Serialize};

use crate::jitter::JitterSource;
use crate::scoring::ReprojectionScorer;
use crate::search::{optimize_marker, MarkerEstimate, SearchParams};

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverParams {
    pub search: SearchParams,
    /// Upper bound on graph-growth passes.
    pub max_passes: usize,
}

impl Default for ResolverParams {
    fn default() -> Self {
        Self {
            search: SearchParams::default(),
            max_passes: 6,
        }
    }
}

/// Entries added to the map by one pass, in insertion order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub resolved: Vec<MarkerEstimate>,
}

impl PassReport {
    pub fn resolved_ids(&self) -> Vec<MarkerId> {
        self.resolved.iter().map(|e| e.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Summary of a full resolution run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolveReport {
    pub passes: Vec<PassReport>,
    /// Candidate ids still missing from the map, in candidate order.
    pub unresolved: Vec<MarkerId>,
    /// `true` when a pass found nothing left to do before the pass limit.
    pub converged: bool,
}

impl ResolveReport {
    pub fn resolved_count(&self) -> usize {
        self.passes.iter().map(|p| p.resolved.len()).sum()
    }
}

/// Drives [`optimize_marker`] over the candidate ids.
#[derive(Clone, Debug)]
pub struct MapResolver<'a> {
    scorer: ReprojectionScorer<'a>,
    params: ResolverParams,
}

impl<'a> MapResolver<'a> {
    pub fn new(scorer: ReprojectionScorer<'a>, params: ResolverParams) -> Self {
        Self { scorer, params }
    }

    /// One sweep over `candidate_ids`; returns the newly appended entries.
    ///
    /// Ids already in the map, the base included, are skipped and never
    /// replaced.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(mapped = map.len(), candidates = candidate_ids.len()))
    )]
    pub fn resolve_pass<J: JitterSource + ?Sized>(
        &self,
        map: &mut MarkerMap,
        candidate_ids: &[MarkerId],
        jitter: &mut J,
    ) -> PassReport {
        let mut report = PassReport::default();
        for &id in candidate_ids {
            if map.contains(id) {
                continue;
            }
            let Some(estimate) = optimize_marker(&self.scorer, map, id, &self.params.search, jitter)
            else {
                debug!("marker {id}: no candidate this pass");
                continue;
            };
            if let Err(err) = map.insert(id, estimate.base_to_marker) {
                warn!("marker {id}: {err}");
                continue;
            }
            debug!(
                "marker {id}: resolved from {} frames, error {:.6}",
                estimate.contributing_frames, estimate.error
            );
            report.resolved.push(estimate);
        }
        report
    }

    /// Repeat [`Self::resolve_pass`] until a pass adds nothing, every
    /// candidate is mapped, or `max_passes` is reached.
    pub fn resolve<J: JitterSource + ?Sized>(
        &self,
        map: &mut MarkerMap,
        candidate_ids: &[MarkerId],
        jitter: &mut J,
    ) -> ResolveReport {
        let mut report = ResolveReport::default();
        for pass in 1..=self.params.max_passes {
            if candidate_ids.iter().all(|&id| map.contains(id)) {
                report.converged = true;
                break;
            }
            let delta = self.resolve_pass(map, candidate_ids, jitter);
            info!(
                "pass {pass}: resolved {} markers {:?}, map size {}",
                delta.resolved.len(),
                delta.resolved_ids(),
                map.len()
            );
            let stalled = delta.is_empty();
            report.passes.push(delta);
            if stalled {
                report.converged = true;
                break;
            }
        }
        if !report.converged && candidate_ids.iter().all(|&id| map.contains(id)) {
            report.converged = true;
        }

        for &id in candidate_ids {
            if !map.contains(id) && !report.unresolved.contains(&id) {
                report.unresolved.push(id);
            }
        }
        if !report.unresolved.is_empty() {
            warn!(
                "{} markers left unresolved after {} passes: {:?}",
                report.unresolved.len(),
                report.passes.len(),
                report.unresolved
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jitter::{RngJitter, SequenceJitter};
    use approx::assert_relative_eq;
    use marker_mapper_core::synthetic::chain_scene;
    use marker_mapper_core::RigidTransform;

    fn resolver<'a>(
        frames: &'a [marker_mapper_core::FrameRecord],
        scene: &'a marker_mapper_core::synthetic::SyntheticScene,
        max_passes: usize,
    ) -> MapResolver<'a> {
        MapResolver::new(
            ReprojectionScorer::new(frames, &scene.camera, scene.marker_size),
            ResolverParams {
                max_passes,
                ..ResolverParams::default()
            },
        )
    }

    #[test]
    fn later_markers_use_entries_from_the_same_pass() {
        let scene = chain_scene();
        let frames = scene.frames();
        let mut map = MarkerMap::new(0);
        let report = resolver(&frames, &scene, 6).resolve(
            &mut map,
            &[0, 1, 2, 3, 4],
            &mut RngJitter::seeded(3),
        );

        assert_eq!(report.passes.len(), 1);
        assert_eq!(report.passes[0].resolved_ids(), vec![1, 2, 3, 4]);
        assert!(report.converged);
        assert!(report.unresolved.is_empty());
        assert_eq!(map.ids().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
        for (id, truth) in &scene.markers {
            assert_relative_eq!(*map.get(*id).unwrap().matrix(), *truth.matrix(), epsilon = 1e-8);
        }
    }

    #[test]
    fn reverse_order_needs_a_second_pass() {
        let scene = chain_scene();
        let frames = scene.frames();
        let mut map = MarkerMap::new(0);
        let report = resolver(&frames, &scene, 6).resolve(
            &mut map,
            &[4, 3, 2, 1],
            &mut SequenceJitter::new(vec![0.2, -0.6]),
        );

        let deltas: Vec<Vec<MarkerId>> = report.passes.iter().map(PassReport::resolved_ids).collect();
        assert_eq!(deltas, vec![vec![2, 1], vec![4, 3]]);
        assert!(report.converged);
        assert_eq!(report.resolved_count(), 4);
        assert_eq!(map.ids().collect::<Vec<_>>(), vec![0, 2, 1, 4, 3]);
    }

    #[test]
    fn pass_limit_reports_leftovers() {
        let scene = chain_scene();
        let frames = scene.frames();
        let mut map = MarkerMap::new(0);
        let report = resolver(&frames, &scene, 1).resolve(
            &mut map,
            &[4, 3, 2, 1, 3],
            &mut SequenceJitter::zeros(),
        );
        assert_eq!(report.passes.len(), 1);
        assert!(!report.converged);
        assert_eq!(report.unresolved, vec![4, 3]);
    }

    #[test]
    fn pass_after_convergence_changes_nothing() {
        let scene = chain_scene();
        let frames = scene.frames();
        let resolver = resolver(&frames, &scene, 6);
        let mut map = MarkerMap::new(0);
        let mut jitter = RngJitter::seeded(9);
        resolver.resolve(&mut map, &[4, 3, 2, 1], &mut jitter);

        let before = map.clone();
        let extra = resolver.resolve_pass(&mut map, &[4, 3, 2, 1], &mut jitter);
        assert!(extra.is_empty());
        assert_eq!(map, before);
    }

    #[test]
    fn base_entry_is_never_replaced() {
        let scene = chain_scene();
        let frames = scene.frames();
        let mut map = MarkerMap::new(0);
        let report = resolver(&frames, &scene, 6).resolve(
            &mut map,
            &[0, 1, 0, 2],
            &mut RngJitter::seeded(1),
        );
        assert!(report.passes.iter().all(|p| !p.resolved_ids().contains(&0)));
        assert_eq!(map.get(0), Some(&RigidTransform::identity()));
        assert_eq!(map.base_id(), 0);
    }
}
