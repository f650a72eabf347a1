//! Minimal causal cut set computation.
//!
//! Searches scenario subsets, smallest first, for intervention sets whose
//! replayed outcome satisfies every tier law and preserves every
//! invariant. Supersets of an already-qualifying set are pruned: the
//! output contains minimal sets only, ranked by intervention count
//! ascending and projected gain descending. No candidate is surfaced
//! without a deterministic replay proof.

use serde::{Deserialize, Serialize};

use crate::counterfactual::{CompositionEngine, CompositionResult, Scenario};
use crate::rsr::{compute_shape_rsr, mean_rsr_over_shapes, tier_law, Rsr};
use crate::trace::ShapeTraceResult;

/// Upper bound on the scenario catalog size; the subset search is
/// exponential and the catalog is supposed to stay small.
const MAX_SCENARIOS: usize = 8;

// ---------------------------------------------------------------------------
// CausalCutSet
// ---------------------------------------------------------------------------

/// One intervention set that restores compliance, with its replay proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalCutSet {
    /// The interventions, by scenario name.
    pub interventions: Vec<String>,
    pub intervention_count: usize,
    /// Global RSR gain over baseline, in millionths.
    pub projected_gain_millionths: i64,
    pub projected_global_rsr: Rsr,
    pub all_tiers_compliant: bool,
    pub invariants_preserved: bool,
    /// True only when a second deterministic replay reproduced the same
    /// digest.
    pub verified_via_replay: bool,
    pub replay_digest: String,
}

// ---------------------------------------------------------------------------
// CutSetComputer
// ---------------------------------------------------------------------------

/// Searches composition space for the smallest compliant intervention
/// sets.
#[derive(Debug, Clone)]
pub struct CutSetComputer {
    engine: CompositionEngine,
}

impl CutSetComputer {
    pub fn new(engine: CompositionEngine) -> Self {
        Self { engine }
    }

    /// Compute the ranked minimal cut sets for a run.
    pub fn compute(
        &self,
        scenarios: &[Scenario],
        traces: &[ShapeTraceResult],
    ) -> Vec<CausalCutSet> {
        let scenarios = &scenarios[..scenarios.len().min(MAX_SCENARIOS)];
        let baseline = self.baseline_global_rsr(traces);
        let mut qualifying: Vec<(Vec<usize>, CausalCutSet)> = Vec::new();

        for subset in subsets_by_size(scenarios.len()) {
            if qualifying.iter().any(|(q, _)| is_superset(&subset, q)) {
                continue;
            }
            let chosen: Vec<Scenario> =
                subset.iter().map(|i| scenarios[*i].clone()).collect();
            let result = self.engine.compose(&chosen, traces, baseline);
            let compliant = self.all_tiers_compliant(&result, traces);
            let invariants = result.invariants_preserved(self.engine.catalog());
            if !compliant || !invariants {
                continue;
            }
            // Replay proof: a second deterministic replay must reproduce
            // the digest before the candidate may be offered.
            let replay = self.engine.compose(&chosen, traces, baseline);
            let verified = replay.replay_digest == result.replay_digest;
            if !verified {
                continue;
            }
            qualifying.push((
                subset,
                CausalCutSet {
                    interventions: result.scenarios.clone(),
                    intervention_count: chosen.len(),
                    projected_gain_millionths: result.delta_millionths,
                    projected_global_rsr: result.projected_global_rsr,
                    all_tiers_compliant: compliant,
                    invariants_preserved: invariants,
                    verified_via_replay: verified,
                    replay_digest: result.replay_digest,
                },
            ));
        }

        let mut ranked: Vec<CausalCutSet> =
            qualifying.into_iter().map(|(_, cut)| cut).collect();
        ranked.sort_by(|a, b| {
            a.intervention_count
                .cmp(&b.intervention_count)
                .then_with(|| b.projected_gain_millionths.cmp(&a.projected_gain_millionths))
                .then_with(|| a.interventions.cmp(&b.interventions))
        });
        ranked
    }

    fn baseline_global_rsr(&self, traces: &[ShapeTraceResult]) -> Rsr {
        mean_rsr_over_shapes(traces.iter().filter_map(|trace| {
            self.engine
                .catalog()
                .shape(&trace.shape_id)
                .map(|decl| compute_shape_rsr(decl, trace))
        }))
    }

    /// Every shape's combined projection must meet its tier's minimum RSR.
    /// Shapes without losses are held to their baseline.
    fn all_tiers_compliant(
        &self,
        result: &CompositionResult,
        traces: &[ShapeTraceResult],
    ) -> bool {
        traces.iter().all(|trace| {
            let Some(decl) = self.engine.catalog().shape(&trace.shape_id) else {
                return true;
            };
            let projected = result
                .combined_per_shape
                .iter()
                .find(|p| p.shape_id == decl.id)
                .map(|p| p.projected)
                .unwrap_or_else(|| compute_shape_rsr(decl, trace));
            projected >= tier_law(decl.criticality).min_rsr
        })
    }
}

/// All non-empty subsets of `0..n`, ordered by size then lexicographically.
fn subsets_by_size(n: usize) -> Vec<Vec<usize>> {
    let mut subsets: Vec<Vec<usize>> = (1u32..(1 << n))
        .map(|mask| (0..n).filter(|i| mask & (1 << i) != 0).collect())
        .collect();
    subsets.sort_by(|a, b| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    subsets
}

fn is_superset(candidate: &[usize], smaller: &[usize]) -> bool {
    smaller.iter().all(|i| candidate.contains(i))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counterfactual::default_scenarios;
    use crate::loss::LossClass;
    use crate::shape::builtin_catalog;
    use crate::stage::{Handoff, PipelineStage};
    use crate::trace::{HandoffLoss, StageEvidence};

    fn computer() -> CutSetComputer {
        CutSetComputer::new(CompositionEngine::new(builtin_catalog()))
    }

    fn summarization_victim(run_id: &str) -> ShapeTraceResult {
        ShapeTraceResult::new("PAGINATION_CAPABILITY", run_id)
            .with_evidence(StageEvidence::new(
                PipelineStage::Emission,
                &["page_size", "page_cursor", "total_count", "boundary_controls"],
            ))
            .with_loss(HandoffLoss::new(
                Handoff::DistillationToComposition,
                LossClass::Summarization,
                &["page_state_binding"],
            ))
    }

    #[test]
    fn single_intervention_suffices_when_one_loss_dominates() {
        let cuts = computer().compute(&default_scenarios(), &[summarization_victim("run-1")]);
        assert!(!cuts.is_empty());
        assert_eq!(cuts[0].intervention_count, 1);
        assert!(cuts[0].all_tiers_compliant);
        assert!(cuts[0].invariants_preserved);
    }

    #[test]
    fn every_offered_cut_set_is_replay_verified() {
        let cuts = computer().compute(&default_scenarios(), &[summarization_victim("run-1")]);
        assert!(cuts.iter().all(|c| c.verified_via_replay));
        assert!(cuts.iter().all(|c| c.replay_digest.starts_with("sha256:")));
    }

    #[test]
    fn supersets_of_qualifying_sets_are_pruned() {
        let cuts = computer().compute(&default_scenarios(), &[summarization_victim("run-1")]);
        // Both summarization_removed and full_attribute_preservation fix
        // the single loss on their own; no returned set should contain
        // more than one of them.
        for cut in &cuts {
            assert_eq!(cut.intervention_count, 1, "non-minimal set {:?}", cut.interventions);
        }
    }

    #[test]
    fn ranking_prefers_fewer_interventions_then_higher_gain() {
        let cuts = computer().compute(&default_scenarios(), &[summarization_victim("run-1")]);
        for pair in cuts.windows(2) {
            assert!(
                pair[0].intervention_count < pair[1].intervention_count
                    || (pair[0].intervention_count == pair[1].intervention_count
                        && pair[0].projected_gain_millionths
                            >= pair[1].projected_gain_millionths)
            );
        }
    }

    #[test]
    fn unfixable_violation_yields_no_cut_sets() {
        // A structural collapse on a foundational shape is not neutralized
        // by summarization removal, and the shapes below threshold keep
        // the tiers non-compliant for that subset.
        let trace = ShapeTraceResult::new("STATIC_DISPLAY_CAPABILITY", "run-1")
            .with_evidence(StageEvidence::new(
                PipelineStage::Emission,
                &["layout_tree", "content_slots"],
            ))
            .with_loss(HandoffLoss::new(
                Handoff::CompositionToWireframe,
                LossClass::StructuralCollapse,
                &["typography_scale"],
            ));
        let cuts = computer().compute(&[Scenario::SummarizationRemoved], &[trace]);
        assert!(cuts.is_empty());
    }

    #[test]
    fn full_preservation_rescues_a_foundational_collapse() {
        let trace = ShapeTraceResult::new("STATIC_DISPLAY_CAPABILITY", "run-1")
            .with_evidence(StageEvidence::new(
                PipelineStage::Emission,
                &["layout_tree", "content_slots"],
            ))
            .with_loss(HandoffLoss::new(
                Handoff::CompositionToWireframe,
                LossClass::StructuralCollapse,
                &["typography_scale"],
            ));
        let cuts = computer().compute(&default_scenarios(), &[trace]);
        assert!(!cuts.is_empty());
        assert_eq!(
            cuts[0].interventions,
            vec!["full_attribute_preservation".to_string()]
        );
    }

    #[test]
    fn invariant_victim_requires_invariant_preserving_set() {
        let trace = ShapeTraceResult::new("THEME_TOKEN_INVARIANT", "run-1")
            .with_evidence(StageEvidence::new(
                PipelineStage::Emission,
                &["token_references"],
            ))
            .with_loss(HandoffLoss::new(
                Handoff::WireframeToPixelRender,
                LossClass::Transformation,
                &["no_raw_color_literals"],
            ));
        let cuts = computer().compute(&default_scenarios(), &[trace]);
        assert!(!cuts.is_empty());
        assert!(cuts.iter().all(|c| c.invariants_preserved));
        // Summarization removal alone leaves the transformation loss in
        // place and must not qualify.
        assert!(cuts
            .iter()
            .all(|c| c.interventions != vec!["summarization_removed".to_string()]));
    }

    #[test]
    fn subsets_enumerate_smallest_first() {
        let subsets = subsets_by_size(3);
        assert_eq!(subsets.len(), 7);
        assert_eq!(subsets[0], vec![0]);
        assert_eq!(subsets[1], vec![1]);
        assert_eq!(subsets[2], vec![2]);
        assert_eq!(subsets[3], vec![0, 1]);
        assert_eq!(subsets.last().unwrap(), &vec![0, 1, 2]);
    }
}
