//! Per-handoff degradation budgets.
//!
//! Each (handoff, shape-category) pair carries a code-defined budget: how
//! many attributes may degrade, which loss classes are tolerated, and which
//! are fatal. The matrix is frozen at construction. An unmodeled pair
//! resolves to a zero-tolerance budget: lookups fail closed, never open.
//! There is no runtime configuration surface for any value here.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::loss::LossClass;
use crate::shape::ShapeCategory;
use crate::stage::Handoff;

// ---------------------------------------------------------------------------
// HandoffBudget
// ---------------------------------------------------------------------------

/// Allowed vs. fatal degradation for one (handoff, category) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffBudget {
    /// Maximum attributes that may degrade before the budget is exceeded.
    pub max_attributes_degraded: usize,
    /// Loss classes absorbed without penalty.
    pub tolerated_losses: BTreeSet<LossClass>,
    /// Loss classes that kill the shape at this handoff outright.
    pub fatal_losses: BTreeSet<LossClass>,
    /// Minimum required attributes that must remain present.
    pub min_required_attributes: usize,
}

impl HandoffBudget {
    /// A budget that tolerates nothing: every class fatal, zero degradation.
    pub fn zero_tolerance() -> Self {
        Self {
            max_attributes_degraded: 0,
            tolerated_losses: BTreeSet::new(),
            fatal_losses: LossClass::ALL.into_iter().collect(),
            min_required_attributes: usize::MAX,
        }
    }

    fn new(
        max_attributes_degraded: usize,
        tolerated: &[LossClass],
        fatal: &[LossClass],
        min_required_attributes: usize,
    ) -> Self {
        Self {
            max_attributes_degraded,
            tolerated_losses: tolerated.iter().copied().collect(),
            fatal_losses: fatal.iter().copied().collect(),
            min_required_attributes,
        }
    }
}

// ---------------------------------------------------------------------------
// BudgetMatrix
// ---------------------------------------------------------------------------

/// The frozen budget matrix. Every (handoff x category) pair in the shipped
/// matrix is defined explicitly; anything outside it is fatal by default.
#[derive(Debug, Clone)]
pub struct BudgetMatrix {
    entries: BTreeMap<(Handoff, ShapeCategory), HandoffBudget>,
    fatal_default: HandoffBudget,
}

impl BudgetMatrix {
    /// Build a matrix from explicit entries.
    pub fn new(entries: BTreeMap<(Handoff, ShapeCategory), HandoffBudget>) -> Self {
        Self {
            entries,
            fatal_default: HandoffBudget::zero_tolerance(),
        }
    }

    /// The shipped matrix: all five handoffs times all three categories.
    ///
    /// Control-category rows are zero-tolerance everywhere. Early handoffs
    /// absorb summarization; the two realization handoffs absorb almost
    /// nothing because losses there are unrecoverable downstream.
    pub fn builtin() -> Self {
        use LossClass::*;

        let mut entries = BTreeMap::new();
        for handoff in Handoff::ALL {
            // Budgets tighten as the pipeline approaches emission.
            let (stateful, stateless): (HandoffBudget, HandoffBudget) = match handoff {
                Handoff::IntakeToDistillation | Handoff::DistillationToComposition => (
                    HandoffBudget::new(2, &[Summarization, Truncation], &[TotalOmission, SchemaMismatch], 1),
                    HandoffBudget::new(3, &[Summarization, Truncation, PartialOmission], &[TotalOmission, SchemaMismatch], 1),
                ),
                Handoff::CompositionToWireframe => (
                    HandoffBudget::new(1, &[Summarization], &[TotalOmission, StructuralCollapse, SchemaMismatch], 2),
                    HandoffBudget::new(2, &[Summarization, Truncation], &[TotalOmission, SchemaMismatch], 1),
                ),
                Handoff::WireframeToPixelRender | Handoff::PixelRenderToEmission => (
                    HandoffBudget::new(0, &[], &[TotalOmission, PartialOmission, StructuralCollapse, DependencySkip, SchemaMismatch], 2),
                    HandoffBudget::new(1, &[Summarization], &[TotalOmission, StructuralCollapse, SchemaMismatch], 2),
                ),
            };
            entries.insert((handoff, ShapeCategory::Stateful), stateful);
            entries.insert((handoff, ShapeCategory::Stateless), stateless);
            entries.insert(
                (handoff, ShapeCategory::Control),
                HandoffBudget::zero_tolerance(),
            );
        }
        Self::new(entries)
    }

    /// Budget for a (handoff, category) pair; zero-tolerance if unmodeled.
    pub fn budget_for(&self, handoff: Handoff, category: ShapeCategory) -> &HandoffBudget {
        self.entries
            .get(&(handoff, category))
            .unwrap_or(&self.fatal_default)
    }

    /// Whether `class` is fatal at this handoff for this category.
    ///
    /// A class that is neither tolerated nor listed fatal resolves as fatal:
    /// the matrix fails closed.
    pub fn is_fatal_loss(
        &self,
        handoff: Handoff,
        category: ShapeCategory,
        class: LossClass,
    ) -> bool {
        let budget = self.budget_for(handoff, category);
        budget.fatal_losses.contains(&class) || !budget.tolerated_losses.contains(&class)
    }

    /// Whether `class` is explicitly tolerated at this handoff.
    pub fn is_tolerated_loss(
        &self,
        handoff: Handoff,
        category: ShapeCategory,
        class: LossClass,
    ) -> bool {
        self.budget_for(handoff, category)
            .tolerated_losses
            .contains(&class)
    }

    /// Whether every (handoff x category) pair has an explicit entry.
    pub fn is_exhaustive(&self) -> bool {
        Handoff::ALL.iter().all(|h| {
            ShapeCategory::ALL
                .iter()
                .all(|c| self.entries.contains_key(&(*h, *c)))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
