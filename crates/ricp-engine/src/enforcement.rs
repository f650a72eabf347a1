//! Survival-rate enforcement engine.
//!
//! Consumes the run's trace results and the upstream gate result, measures
//! every catalog shape against its tier law, and produces the binding
//! decision for the run. The action is determined by strict precedence:
//! any foundational violation blocks everything; otherwise any interactive
//! violation forks execution; otherwise the run proceeds with warnings at
//! most. Ties always resolve toward the more severe action.
//!
//! The decision is fail-closed and non-overridable: no caller-supplied
//! configuration can soften a threshold, and the emitted proof record
//! asserts that the computation used no inference and no softening.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::budget::BudgetMatrix;
use crate::repair::{RepairDirective, RepairDirectiveGenerator};
use crate::rsr::{evaluate_shape, mean_rsr_over_shapes, Rsr, RsrResult};
use crate::shape::{Criticality, ShapeCatalog};
use crate::trace::{GateResult, GateVerdict, ShapeTraceResult};
use crate::tracks::{ExecutionTrack, ForkDecision, TteController};

// ---------------------------------------------------------------------------
// EnforcementAction
// ---------------------------------------------------------------------------

/// The binding overall action for one run, in severity order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EnforcementAction {
    /// No enforcement-grade violation; degradations are reported only.
    WarnOnly,
    /// Interactive violation: execution forks into shadow and remediated
    /// tracks while canonical proceeds.
    ForkTte,
    /// Foundational violation: nothing executes.
    BlockAll,
}

impl EnforcementAction {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WarnOnly => "warn_only",
            Self::ForkTte => "fork_tte",
            Self::BlockAll => "block_all",
        }
    }
}

impl fmt::Display for EnforcementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TierReport
// ---------------------------------------------------------------------------

/// Aggregated RSR outcomes for one criticality tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierReport {
    pub tier: Criticality,
    pub results: Vec<RsrResult>,
    /// Shapes in this tier that failed their law.
    pub violations: Vec<RsrResult>,
    pub all_met: bool,
}

impl TierReport {
    fn from_results(tier: Criticality, results: Vec<RsrResult>) -> Self {
        let violations: Vec<RsrResult> = results
            .iter()
            .filter(|r| r.is_violation())
            .cloned()
            .collect();
        let all_met = violations.is_empty();
        Self {
            tier,
            results,
            violations,
            all_met,
        }
    }
}

// ---------------------------------------------------------------------------
// DecisionProof
// ---------------------------------------------------------------------------

/// Proof record attached to every decision. The three assertions are fixed
/// at construction; the digest binds them to the decision content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionProof {
    /// The computation consumed evidence as-is; nothing absent was inferred.
    pub no_inference: bool,
    /// No threshold was relaxed relative to the tier laws.
    pub no_softening: bool,
    /// No caller can override the decision.
    pub non_overridable: bool,
    /// SHA-256 over the canonical decision content.
    pub decision_digest: String,
}

// ---------------------------------------------------------------------------
// EnforcementDecision
// ---------------------------------------------------------------------------

/// Binding outcome for one run. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnforcementDecision {
    pub run_id: String,
    /// Per-shape outcomes in shape-id order.
    pub shape_results: Vec<RsrResult>,
    /// Per-tier aggregation, most severe tier first.
    pub tier_reports: Vec<TierReport>,
    /// Mean RSR over the run's shapes (distinct from any per-shape
    /// weakest-link rate).
    pub global_rsr: Rsr,
    pub action: EnforcementAction,
    pub fork_decision: ForkDecision,
    pub tracks: Vec<ExecutionTrack>,
    /// Directives generated for every violated shape.
    pub repair_directives: Vec<RepairDirective>,
    /// Whether the canonical track may execute at all.
    pub canonical_allowed: bool,
    pub proof: DecisionProof,
}

impl EnforcementDecision {
    /// Violations in a given tier.
    pub fn violations_in(&self, tier: Criticality) -> &[RsrResult] {
        self.tier_reports
            .iter()
            .find(|r| r.tier == tier)
            .map(|r| r.violations.as_slice())
            .unwrap_or(&[])
    }

    fn has_foundational_violation(&self) -> bool {
        !self.violations_in(Criticality::Foundational).is_empty()
    }

    /// Whether wireframe-level execution may proceed. There is no looser
    /// rule for later pipeline stages than for the run as a whole.
    pub fn is_wire_execution_allowed(&self) -> bool {
        self.action != EnforcementAction::BlockAll
            && !self.has_foundational_violation()
            && self.canonical_allowed
    }

    /// Whether pixel-level execution may proceed. Same rule as wire
    /// execution: there is no independent looser rule for later stages.
    pub fn is_pixel_execution_allowed(&self) -> bool {
        self.is_wire_execution_allowed()
    }
}

// ---------------------------------------------------------------------------
// EnforcementEngine
// ---------------------------------------------------------------------------

/// Applies tier laws to a run's trace results and decides the outcome.
#[derive(Debug, Clone)]
pub struct EnforcementEngine {
    catalog: ShapeCatalog,
    budgets: BudgetMatrix,
    tte: TteController,
    repair: RepairDirectiveGenerator,
}

impl EnforcementEngine {
    pub fn new(catalog: ShapeCatalog, budgets: BudgetMatrix) -> Self {
        Self {
            catalog,
            budgets,
            tte: TteController,
            repair: RepairDirectiveGenerator,
        }
    }

    pub fn catalog(&self) -> &ShapeCatalog {
        &self.catalog
    }

    pub fn budgets(&self) -> &BudgetMatrix {
        &self.budgets
    }

    /// Compute the binding decision for one run.
    pub fn decide(
        &self,
        traces: &[ShapeTraceResult],
        gate: &GateResult,
        run_id: &str,
    ) -> EnforcementDecision {
        // 1. Per-shape RSR, in shape-id order. Traces for shapes outside the
        //    catalog carry no law and are ignored.
        let by_shape: BTreeMap<&str, &ShapeTraceResult> = traces
            .iter()
            .map(|t| (t.shape_id.as_str(), t))
            .collect();
        let mut shape_results: Vec<RsrResult> = Vec::new();
        for decl in self.catalog.iter() {
            if let Some(trace) = by_shape.get(decl.id.as_str()).copied() {
                shape_results.push(evaluate_shape(decl, trace));
            }
        }

        // 2. Tier aggregation, most severe tier first.
        let tier_reports: Vec<TierReport> = Criticality::ALL
            .into_iter()
            .map(|tier| {
                TierReport::from_results(
                    tier,
                    shape_results
                        .iter()
                        .filter(|r| r.criticality == tier)
                        .cloned()
                        .collect(),
                )
            })
            .collect();

        // 3. Strict precedence.
        let foundational = &tier_reports[0].violations;
        let interactive = &tier_reports[1].violations;
        let action = if !foundational.is_empty() {
            EnforcementAction::BlockAll
        } else if !interactive.is_empty() {
            EnforcementAction::ForkTte
        } else {
            EnforcementAction::WarnOnly
        };

        // 4. Fork decision and track creation. Every violated shape gets a
        //    directive; remediated tracks pick theirs up by shape id.
        let repair_directives: Vec<RepairDirective> = shape_results
            .iter()
            .filter(|r| r.is_violation())
            .filter_map(|r| {
                let decl = self.catalog.shape(&r.shape_id)?;
                let trace = by_shape.get(r.shape_id.as_str()).copied()?;
                Some(self.repair.generate(decl, trace))
            })
            .collect();
        let fork_decision = self.tte.decide_fork(foundational, interactive);
        let tracks = self
            .tte
            .create_tracks(&fork_decision, run_id, &repair_directives, gate);

        // 5. Canonical permission. A failing gate that blocks downstream is
        //    as binding as a foundational violation.
        let gate_blocks = gate.verdict == GateVerdict::Fail && gate.blocks_downstream;
        let canonical_allowed = match action {
            EnforcementAction::WarnOnly => !gate_blocks,
            EnforcementAction::ForkTte => {
                foundational.is_empty() && !fork_decision.blocks_canonical() && !gate_blocks
            }
            EnforcementAction::BlockAll => false,
        };

        let global_rsr = mean_rsr_over_shapes(shape_results.iter().map(|r| r.rsr));

        // 6. Proof record binding the decision content.
        let decision_digest = digest_decision(run_id, action, &shape_results, canonical_allowed);
        let proof = DecisionProof {
            no_inference: true,
            no_softening: true,
            non_overridable: true,
            decision_digest,
        };

        EnforcementDecision {
            run_id: run_id.to_string(),
            shape_results,
            tier_reports,
            global_rsr,
            action,
            fork_decision,
            tracks,
            repair_directives,
            canonical_allowed,
            proof,
        }
    }
}

/// SHA-256 over the canonical decision content: run id, action, ordered
/// per-shape outcomes, and the canonical permission bit.
fn digest_decision(
    run_id: &str,
    action: EnforcementAction,
    shape_results: &[RsrResult],
    canonical_allowed: bool,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(run_id.as_bytes());
    hasher.update(b"|");
    hasher.update(action.as_str().as_bytes());
    for result in shape_results {
        hasher.update(b"|");
        hasher.update(result.shape_id.as_bytes());
        hasher.update(b":");
        hasher.update(result.rsr.millionths().to_be_bytes());
        hasher.update(if result.met { b"+" } else { b"-" });
    }
    hasher.update(b"|");
    hasher.update(if canonical_allowed { b"1" } else { b"0" });
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
