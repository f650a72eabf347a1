//! Zero-tolerance validation of invariant-kind shapes.
//!
//! Runs independently of the enforcement engine: every invariant shape
//! whose trace shows any handoff loss, or that the tracer marked dead,
//! is flagged. There is no tolerated loss class for an invariant and no
//! path that suppresses a flag once raised.

use serde::{Deserialize, Serialize};

use crate::loss::LossClass;
use crate::shape::{ShapeCatalog, ShapeKind};
use crate::stage::Handoff;
use crate::trace::ShapeTraceResult;

// ---------------------------------------------------------------------------
// InvariantViolation
// ---------------------------------------------------------------------------

/// One invariant-kind shape that failed to survive with zero loss.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvariantViolation {
    pub shape_id: String,
    /// The handoff where the loss occurred, when the violation is a
    /// handoff-level loss rather than a survival failure.
    pub handoff: Option<Handoff>,
    pub loss_class: Option<LossClass>,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// InvariantValidator
// ---------------------------------------------------------------------------

/// Flags invariant shapes that took any loss at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvariantValidator;

impl InvariantValidator {
    /// Collect every invariant violation in the run. An empty vector means
    /// every invariant survived untouched.
    pub fn validate(
        &self,
        catalog: &ShapeCatalog,
        traces: &[ShapeTraceResult],
    ) -> Vec<InvariantViolation> {
        let mut violations = Vec::new();
        for trace in traces {
            let Some(decl) = catalog.shape(&trace.shape_id) else {
                continue;
            };
            if decl.kind != ShapeKind::Invariant {
                continue;
            }
            for loss in &trace.handoff_losses {
                violations.push(InvariantViolation {
                    shape_id: decl.id.clone(),
                    handoff: Some(loss.handoff),
                    loss_class: Some(loss.loss_class),
                    detail: format!(
                        "invariant {} took {} at {}",
                        decl.id, loss.loss_class, loss.handoff
                    ),
                });
            }
            if trace.handoff_losses.is_empty() && !trace.survived {
                violations.push(InvariantViolation {
                    shape_id: decl.id.clone(),
                    handoff: None,
                    loss_class: None,
                    detail: format!("invariant {} did not survive the pipeline", decl.id),
                });
            }
        }
        violations
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::builtin_catalog;
    use crate::trace::HandoffLoss;

    #[test]
    fn clean_invariant_produces_no_violations() {
        let catalog = builtin_catalog();
        let traces = vec![ShapeTraceResult::new("AUTH_FLOW_INVARIANT", "run-1")];
        assert!(InvariantValidator.validate(&catalog, &traces).is_empty());
    }

    #[test]
    fn any_loss_class_flags_an_invariant() {
        let catalog = builtin_catalog();
        // Summarization is tolerated for interactive capabilities, never for
        // an invariant.
        let traces = vec![ShapeTraceResult::new("THEME_TOKEN_INVARIANT", "run-1")
            .with_loss(HandoffLoss::new(
                Handoff::DistillationToComposition,
                LossClass::Summarization,
                &[],
            ))];
        let violations = InvariantValidator.validate(&catalog, &traces);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].shape_id, "THEME_TOKEN_INVARIANT");
        assert_eq!(violations[0].loss_class, Some(LossClass::Summarization));
    }

    #[test]
    fn capability_losses_are_not_invariant_violations() {
        let catalog = builtin_catalog();
        let traces = vec![ShapeTraceResult::new("PAGINATION_CAPABILITY", "run-1")
            .with_loss(HandoffLoss::new(
                Handoff::DistillationToComposition,
                LossClass::TotalOmission,
                &["page_size"],
            ))];
        assert!(InvariantValidator.validate(&catalog, &traces).is_empty());
    }

    #[test]
    fn dead_invariant_without_losses_is_flagged() {
        let catalog = builtin_catalog();
        let mut trace = ShapeTraceResult::new("AUTH_FLOW_INVARIANT", "run-1");
        trace.survived = false;
        let violations = InvariantValidator.validate(&catalog, &[trace]);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].handoff, None);
    }

    #[test]
    fn one_violation_per_loss() {
        let catalog = builtin_catalog();
        let traces = vec![ShapeTraceResult::new("AUTH_FLOW_INVARIANT", "run-1")
            .with_loss(HandoffLoss::new(
                Handoff::IntakeToDistillation,
                LossClass::Truncation,
                &[],
            ))
            .with_loss(HandoffLoss::new(
                Handoff::CompositionToWireframe,
                LossClass::Transformation,
                &[],
            ))];
        assert_eq!(InvariantValidator.validate(&catalog, &traces).len(), 2);
    }
}
