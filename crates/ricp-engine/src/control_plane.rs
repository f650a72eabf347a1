//! Per-run orchestration of the control plane.
//!
//! One run is synchronous and single-threaded: the firewall pre-check can
//! veto before enforcement runs at all; mortality, invariant validation,
//! enforcement, repair generation, and the counterfactual search each
//! consume the complete output of their dependency. The result is a
//! structured report; rendering is a downstream concern and never happens
//! here.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::BudgetMatrix;
use crate::counterfactual::{default_scenarios, CompositionEngine, CompositionResult};
use crate::cut_set::{CausalCutSet, CutSetComputer};
use crate::enforcement::{EnforcementDecision, EnforcementEngine};
use crate::fingerprint::FingerprintCollector;
use crate::firewall::{FingerprintOccurrence, PredictiveBlock};
use crate::invariant_validator::{InvariantValidator, InvariantViolation};
use crate::mortality::MortalityAnalysis;
use crate::repair::RepairDirective;
use crate::shape::{ShapeCatalog, ShapeKind};
use crate::store::{ControlPlaneStores, StoreError};
use crate::trace::{GateResult, ShapeTraceResult};

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Structured outcome of one run: everything reporting collaborators need,
/// no rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    /// Preemptive blocks from the fingerprint firewall.
    pub predictive_blocks: Vec<PredictiveBlock>,
    /// True when the firewall vetoed the run before enforcement ran.
    pub vetoed: bool,
    /// The binding decision; absent only on a firewall veto.
    pub decision: Option<EnforcementDecision>,
    pub invariant_violations: Vec<InvariantViolation>,
    pub mortality: MortalityAnalysis,
    pub repair_directives: Vec<RepairDirective>,
    /// Counterfactual compositions evaluated over the violation set.
    pub compositions: Vec<CompositionResult>,
    /// Ranked minimal cut sets, smallest first.
    pub cut_sets: Vec<CausalCutSet>,
}

// ---------------------------------------------------------------------------
// ControlPlane
// ---------------------------------------------------------------------------

/// Owns the decision components and the in-memory store state for a
/// sequence of runs.
#[derive(Debug, Clone)]
pub struct ControlPlane {
    engine: EnforcementEngine,
    collector: FingerprintCollector,
    validator: InvariantValidator,
    composition: CompositionEngine,
    stores: ControlPlaneStores,
}

impl ControlPlane {
    pub fn new(catalog: ShapeCatalog, budgets: BudgetMatrix) -> Self {
        Self {
            engine: EnforcementEngine::new(catalog.clone(), budgets),
            collector: FingerprintCollector,
            validator: InvariantValidator,
            composition: CompositionEngine::new(catalog),
            stores: ControlPlaneStores::default(),
        }
    }

    /// Construct with the shipped catalog and budget matrix.
    pub fn with_builtin_catalog() -> Self {
        Self::new(crate::shape::builtin_catalog(), BudgetMatrix::builtin())
    }

    /// Construct with store state read in full from `root`.
    pub fn load(catalog: ShapeCatalog, budgets: BudgetMatrix, root: &Path) -> Self {
        let mut plane = Self::new(catalog, budgets);
        plane.stores = ControlPlaneStores::load(root);
        plane
    }

    /// Rewrite all store state in full under `root`.
    pub fn persist(&self, root: &Path) -> Result<(), StoreError> {
        self.stores.persist(root)
    }

    pub fn stores(&self) -> &ControlPlaneStores {
        &self.stores
    }

    /// Execute one run over the supplied trace evidence.
    pub fn execute_run(
        &mut self,
        run_id: &str,
        traces: &[ShapeTraceResult],
        gate: &GateResult,
    ) -> RunReport {
        let catalog = self.engine.catalog().clone();

        // Fingerprint every handoff and consult history before anything
        // else: an exact match with a non-safe entry vetoes the run.
        let fingerprints = self.collector.collect_all(&catalog, traces);
        let predictive_blocks: Vec<PredictiveBlock> = fingerprints
            .iter()
            .filter_map(|fp| self.stores.fingerprints.check_hash(fp))
            .collect();
        let vetoed = !predictive_blocks.is_empty();

        // Longitudinal bookkeeping happens regardless of the veto: the run
        // was observed even if it never executes.
        self.stores
            .mortality
            .record_run(&catalog, self.engine.budgets(), traces);
        let invariant_violations = self.validator.validate(&catalog, traces);

        // Append this run's fingerprint outcomes to the index.
        let invariant_shapes: Vec<&str> = invariant_violations
            .iter()
            .map(|v| v.shape_id.as_str())
            .collect();
        for fingerprint in &fingerprints {
            let shapes_lost: Vec<String> = traces
                .iter()
                .filter(|t| !t.losses_at(fingerprint.handoff).is_empty())
                .map(|t| t.shape_id.clone())
                .collect();
            let invariant_violated = traces.iter().any(|t| {
                !t.losses_at(fingerprint.handoff).is_empty()
                    && (invariant_shapes.contains(&t.shape_id.as_str())
                        || catalog
                            .shape(&t.shape_id)
                            .is_some_and(|d| d.kind == ShapeKind::Invariant))
            });
            let occurrence = FingerprintOccurrence {
                run_id: run_id.to_string(),
                handoff: fingerprint.handoff,
                loss_observed: !shapes_lost.is_empty(),
                invariant_violated,
                shapes_lost,
            };
            self.stores.fingerprints.record(fingerprint, occurrence);
        }

        if vetoed {
            debug!(run_id, blocks = predictive_blocks.len(), "run vetoed by firewall");
            return RunReport {
                run_id: run_id.to_string(),
                predictive_blocks,
                vetoed: true,
                decision: None,
                invariant_violations,
                mortality: self.stores.mortality.analysis(),
                repair_directives: Vec::new(),
                compositions: Vec::new(),
                cut_sets: Vec::new(),
            };
        }

        // The binding decision.
        let decision = self.engine.decide(traces, gate, run_id);
        debug!(
            run_id,
            action = %decision.action,
            canonical_allowed = decision.canonical_allowed,
            "enforcement decision computed"
        );

        // Remediation intelligence over the violation set.
        let repair_directives = decision.repair_directives.clone();
        let scenarios = default_scenarios();
        let has_violations = !repair_directives.is_empty() || !invariant_violations.is_empty();
        let (compositions, cut_sets) = if has_violations {
            let composition =
                self.composition
                    .compose(&scenarios, traces, decision.global_rsr);
            let cut_sets =
                CutSetComputer::new(self.composition.clone()).compute(&scenarios, traces);
            (vec![composition], cut_sets)
        } else {
            (Vec::new(), Vec::new())
        };

        RunReport {
            run_id: run_id.to_string(),
            predictive_blocks,
            vetoed: false,
            decision: Some(decision),
            invariant_violations,
            mortality: self.stores.mortality.analysis(),
            repair_directives,
            compositions,
            cut_sets,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
