//! Counterfactual composition of hypothetical interventions.
//!
//! A scenario is a named hypothetical intervention against the pipeline
//! ("summarization removed", "full attribute preservation"). The engine
//! replays scenarios against each shape with a detected loss, projects the
//! RSR the shape would have achieved, and measures how scenarios combine:
//! more than the sum of their parts (synergy), less (interference), or
//! neither. Compositions are computed on demand and never persisted.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rsr::{mean_rsr_over_shapes, Rsr};
use crate::shape::{ShapeCatalog, ShapeDeclaration, ShapeKind};
use crate::trace::{HandoffLoss, ShapeTraceResult};

/// Interaction-effect tolerance: one percent, in millionths.
const INTERACTION_TOLERANCE: i64 = 10_000;

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// A named hypothetical intervention.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scenario {
    /// Stage summarization never ran: summarization and truncation losses
    /// are neutralized.
    SummarizationRemoved,
    /// Every attribute is carried end to end: all losses are neutralized.
    FullAttributePreservation,
    /// Invariant enforcement is injected: losses on invariant-kind shapes
    /// are neutralized. Applies to invariant shapes only.
    InvariantBypass,
    /// The named attributes are pinned through every handoff: losses
    /// confined to those attributes are neutralized.
    AttributePinning(Vec<String>),
}

impl Scenario {
    /// Display name used in reports and rankings.
    pub fn name(&self) -> String {
        match self {
            Self::SummarizationRemoved => "summarization_removed".to_string(),
            Self::FullAttributePreservation => "full_attribute_preservation".to_string(),
            Self::InvariantBypass => "invariant_bypass".to_string(),
            Self::AttributePinning(attrs) => {
                format!("attribute_pinning[{}]", attrs.join(","))
            }
        }
    }

    /// Whether the scenario can apply to this shape at all.
    pub fn applies_to(&self, decl: &ShapeDeclaration) -> bool {
        match self {
            Self::InvariantBypass => decl.kind == ShapeKind::Invariant,
            _ => true,
        }
    }

    /// Whether replaying this scenario removes the given loss.
    fn neutralizes(&self, decl: &ShapeDeclaration, loss: &HandoffLoss) -> bool {
        match self {
            Self::FullAttributePreservation => true,
            Self::SummarizationRemoved => matches!(
                loss.loss_class,
                crate::loss::LossClass::Summarization | crate::loss::LossClass::Truncation
            ),
            Self::InvariantBypass => decl.kind == ShapeKind::Invariant,
            Self::AttributePinning(attrs) => {
                !loss.attributes_lost.is_empty()
                    && loss.attributes_lost.iter().all(|a| attrs.contains(a))
            }
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// The default scenario catalog searched by the cut-set computer.
pub fn default_scenarios() -> Vec<Scenario> {
    vec![
        Scenario::SummarizationRemoved,
        Scenario::FullAttributePreservation,
        Scenario::InvariantBypass,
    ]
}

// ---------------------------------------------------------------------------
// Projections
// ---------------------------------------------------------------------------

/// Projected outcome for one shape under one set of interventions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeProjection {
    pub shape_id: String,
    pub baseline: Rsr,
    pub projected: Rsr,
    /// `projected - baseline` in millionths.
    pub delta_millionths: i64,
    /// Losses the interventions did not neutralize.
    pub remaining_losses: Vec<HandoffLoss>,
}

/// Projected outcome for one shape under one single scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioProjection {
    pub scenario: String,
    pub shape_id: String,
    pub baseline: Rsr,
    pub projected: Rsr,
    pub delta_millionths: i64,
}

/// How two or more scenarios combine on one shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InteractionKind {
    Synergy,
    Interference,
    Neutral,
}

impl InteractionKind {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Synergy => "synergy",
            Self::Interference => "interference",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measured interaction effect for one shape observed under two or more
/// scenarios.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionEffect {
    pub shape_id: String,
    pub scenarios: Vec<String>,
    pub kind: InteractionKind,
    /// Sum of each scenario's individual delta, in millionths.
    pub individual_sum_millionths: i64,
    /// Delta when all scenarios are applied together, in millionths.
    pub combined_millionths: i64,
}

// ---------------------------------------------------------------------------
// CompositionResult
// ---------------------------------------------------------------------------

/// The combined effect of a scenario set over one run's violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositionResult {
    pub scenarios: Vec<String>,
    /// Shapes with at least one detected loss: the replay targets.
    pub targets: Vec<String>,
    pub baseline_global_rsr: Rsr,
    pub projected_global_rsr: Rsr,
    /// `projected - baseline` in millionths.
    pub delta_millionths: i64,
    /// Per-scenario, per-shape replays.
    pub projections: Vec<ScenarioProjection>,
    /// The best projection per target shape across the scenario set.
    pub best_per_shape: BTreeMap<String, Rsr>,
    /// Combined (all scenarios at once) projection per shape.
    pub combined_per_shape: Vec<ShapeProjection>,
    pub interaction_effects: Vec<InteractionEffect>,
    /// Digest of the replay content; identical replays produce identical
    /// digests.
    pub replay_digest: String,
}

impl CompositionResult {
    /// Whether every invariant-kind target ended the replay with zero
    /// remaining losses.
    pub fn invariants_preserved(&self, catalog: &ShapeCatalog) -> bool {
        self.combined_per_shape.iter().all(|p| {
            catalog
                .shape(&p.shape_id)
                .map(|d| d.kind != ShapeKind::Invariant || p.remaining_losses.is_empty())
                .unwrap_or(true)
        })
    }
}

// ---------------------------------------------------------------------------
// CompositionEngine
// ---------------------------------------------------------------------------

/// Replays hypothetical interventions against trace evidence.
#[derive(Debug, Clone)]
pub struct CompositionEngine {
    catalog: ShapeCatalog,
}

impl CompositionEngine {
    pub fn new(catalog: ShapeCatalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &ShapeCatalog {
        &self.catalog
    }

    /// Replay each scenario against each shape with a detected loss and
    /// combine the projections.
    pub fn compose(
        &self,
        scenarios: &[Scenario],
        traces: &[ShapeTraceResult],
        baseline_global_rsr: Rsr,
    ) -> CompositionResult {
        let mut targets: Vec<String> = Vec::new();
        let mut projections: Vec<ScenarioProjection> = Vec::new();
        let mut best_per_shape: BTreeMap<String, Rsr> = BTreeMap::new();
        let mut combined_per_shape: Vec<ShapeProjection> = Vec::new();
        let mut interaction_effects: Vec<InteractionEffect> = Vec::new();
        let mut all_rates: Vec<Rsr> = Vec::new();

        for trace in traces {
            let Some(decl) = self.catalog.shape(&trace.shape_id) else {
                continue;
            };
            let baseline = crate::rsr::compute_shape_rsr(decl, trace);
            if trace.handoff_losses.is_empty() {
                // Not a target; the shape contributes its baseline to the
                // projected global.
                all_rates.push(baseline);
                continue;
            }
            targets.push(decl.id.clone());

            let applicable: Vec<&Scenario> = scenarios
                .iter()
                .filter(|s| s.applies_to(decl))
                .collect();

            let mut individual_deltas: Vec<(String, i64)> = Vec::new();
            let mut best = baseline;
            for scenario in &applicable {
                let projected =
                    self.project(decl, trace, std::slice::from_ref(*scenario)).projected;
                let delta = projected.delta_millionths(baseline);
                individual_deltas.push((scenario.name(), delta));
                best = best.max(projected);
                projections.push(ScenarioProjection {
                    scenario: scenario.name(),
                    shape_id: decl.id.clone(),
                    baseline,
                    projected,
                    delta_millionths: delta,
                });
            }
            best_per_shape.insert(decl.id.clone(), best);
            all_rates.push(best);

            let owned: Vec<Scenario> = applicable.iter().map(|s| (*s).clone()).collect();
            let combined = self.project(decl, trace, &owned);
            let combined_delta = combined.projected.delta_millionths(baseline);
            if applicable.len() >= 2 {
                let individual_sum: i64 = individual_deltas.iter().map(|(_, d)| d).sum();
                let kind = if combined_delta > individual_sum + INTERACTION_TOLERANCE {
                    InteractionKind::Synergy
                } else if combined_delta < individual_sum - INTERACTION_TOLERANCE {
                    InteractionKind::Interference
                } else {
                    InteractionKind::Neutral
                };
                interaction_effects.push(InteractionEffect {
                    shape_id: decl.id.clone(),
                    scenarios: individual_deltas.iter().map(|(n, _)| n.clone()).collect(),
                    kind,
                    individual_sum_millionths: individual_sum,
                    combined_millionths: combined_delta,
                });
            }
            combined_per_shape.push(combined);
        }

        let projected_global_rsr = mean_rsr_over_shapes(all_rates);
        let scenario_names: Vec<String> = scenarios.iter().map(|s| s.name()).collect();
        let replay_digest = digest_replay(&scenario_names, &combined_per_shape);

        CompositionResult {
            scenarios: scenario_names,
            targets,
            baseline_global_rsr,
            projected_global_rsr,
            delta_millionths: projected_global_rsr.delta_millionths(baseline_global_rsr),
            projections,
            best_per_shape,
            combined_per_shape,
            interaction_effects,
            replay_digest,
        }
    }

    /// Project one shape's outcome with a set of scenarios applied
    /// together: neutralized losses vanish and their lost attributes are
    /// restored at the shape's final required stage.
    fn project(
        &self,
        decl: &ShapeDeclaration,
        trace: &ShapeTraceResult,
        scenarios: &[Scenario],
    ) -> ShapeProjection {
        let baseline = crate::rsr::compute_shape_rsr(decl, trace);
        let mut restored: BTreeSet<&str> = BTreeSet::new();
        let mut remaining: Vec<HandoffLoss> = Vec::new();
        for loss in &trace.handoff_losses {
            if scenarios.iter().any(|s| s.neutralizes(decl, loss)) {
                restored.extend(loss.attributes_lost.iter().map(|a| a.as_str()));
            } else {
                remaining.push(loss.clone());
            }
        }
        let present_at_final: usize = decl
            .required_attributes
            .iter()
            .filter(|a| {
                restored.contains(a.as_str())
                    || trace
                        .evidence_at(decl.must_reach)
                        .is_some_and(|e| e.attributes_present.contains(*a))
            })
            .count();
        let projected = Rsr::from_ratio(present_at_final, decl.required_attributes.len());
        ShapeProjection {
            shape_id: decl.id.clone(),
            baseline,
            projected: projected.max(baseline),
            delta_millionths: projected.max(baseline).delta_millionths(baseline),
            remaining_losses: remaining,
        }
    }
}

/// Deterministic digest of a replay: scenario names plus the combined
/// per-shape projections in order.
fn digest_replay(scenarios: &[String], combined: &[ShapeProjection]) -> String {
    let mut hasher = Sha256::new();
    for name in scenarios {
        hasher.update(name.as_bytes());
        hasher.update(b",");
    }
    for projection in combined {
        hasher.update(b"|");
        hasher.update(projection.shape_id.as_bytes());
        hasher.update(b":");
        hasher.update(projection.projected.millionths().to_be_bytes());
        hasher.update(b":");
        hasher.update((projection.remaining_losses.len() as u64).to_be_bytes());
    }
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
