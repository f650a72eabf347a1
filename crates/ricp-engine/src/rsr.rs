//! Requirement Survival Rate computation and tier laws.
//!
//! RSR is the fraction of a shape's required structural attributes still
//! present at the furthest stage the shape must reach. All arithmetic uses
//! fixed-point millionths (1_000_000 = 1.0) so comparisons against tier
//! thresholds are exact and serialization is deterministic.
//!
//! Two aggregations exist and are deliberately distinct:
//! - the enforcement engine's global RSR is the mean over shapes
//!   ([`mean_rsr_over_shapes`]);
//! - the mortality tracker's per-shape overall rate is the minimum over
//!   handoffs (weakest link; see the mortality module).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::loss::LossClass;
use crate::shape::{Criticality, ShapeDeclaration, ShapeKind};
use crate::trace::{HandoffLoss, ShapeTraceResult};

/// Fixed-point scale: 1_000_000 millionths = 1.0.
pub const MILLION: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Rsr
// ---------------------------------------------------------------------------

/// A survival rate in [0, 1], stored as millionths.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Rsr(i64);

impl Rsr {
    pub const ZERO: Rsr = Rsr(0);
    pub const FULL: Rsr = Rsr(MILLION);

    /// Construct from millionths, clamped into [0, 1_000_000].
    pub fn from_millionths(value: i64) -> Self {
        Self(value.clamp(0, MILLION))
    }

    /// Exact ratio `numerator / denominator`. A zero denominator means there
    /// was nothing to lose and resolves to `FULL`.
    pub fn from_ratio(numerator: usize, denominator: usize) -> Self {
        if denominator == 0 {
            return Self::FULL;
        }
        let numerator = numerator.min(denominator) as i64;
        Self::from_millionths(numerator * MILLION / denominator as i64)
    }

    pub fn millionths(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MILLION as f64
    }

    /// Signed difference `self - other` in millionths.
    pub fn delta_millionths(self, other: Rsr) -> i64 {
        self.0 - other.0
    }
}

impl fmt::Display for Rsr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.as_f64())
    }
}

/// Mean RSR over a set of per-shape rates. An empty set resolves to `FULL`:
/// with nothing tracked, nothing was lost.
pub fn mean_rsr_over_shapes<I: IntoIterator<Item = Rsr>>(rates: I) -> Rsr {
    let mut sum: i64 = 0;
    let mut count: i64 = 0;
    for rate in rates {
        sum += rate.millionths();
        count += 1;
    }
    if count == 0 {
        Rsr::FULL
    } else {
        Rsr::from_millionths(sum / count)
    }
}

// ---------------------------------------------------------------------------
// Tier laws
// ---------------------------------------------------------------------------

/// The fixed survival law for one criticality tier. Constants, never
/// runtime-configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierLaw {
    pub tier: Criticality,
    pub min_rsr: Rsr,
    pub tolerated_losses: &'static [LossClass],
}

/// Law for `Foundational`: full survival, no tolerated loss class.
const FOUNDATIONAL_LAW: TierLaw = TierLaw {
    tier: Criticality::Foundational,
    min_rsr: Rsr::FULL,
    tolerated_losses: &[],
};

/// Law for `Interactive`: >= 0.95, only summarization tolerated.
const INTERACTIVE_LAW: TierLaw = TierLaw {
    tier: Criticality::Interactive,
    min_rsr: Rsr(950_000),
    tolerated_losses: &[LossClass::Summarization],
};

/// Law for `Enhancement`: >= 0.70, light losses tolerated.
const ENHANCEMENT_LAW: TierLaw = TierLaw {
    tier: Criticality::Enhancement,
    min_rsr: Rsr(700_000),
    tolerated_losses: &[
        LossClass::PartialOmission,
        LossClass::Truncation,
        LossClass::Summarization,
    ],
};

/// The law governing a criticality tier.
pub fn tier_law(tier: Criticality) -> TierLaw {
    match tier {
        Criticality::Foundational => FOUNDATIONAL_LAW,
        Criticality::Interactive => INTERACTIVE_LAW,
        Criticality::Enhancement => ENHANCEMENT_LAW,
    }
}

// ---------------------------------------------------------------------------
// RsrResult
// ---------------------------------------------------------------------------

/// Per-shape RSR outcome measured against the shape's tier law.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RsrResult {
    pub shape_id: String,
    pub criticality: Criticality,
    pub rsr: Rsr,
    /// The tier's minimum RSR this shape was held to.
    pub threshold: Rsr,
    /// Whether the shape met its law: threshold reached and no untolerated
    /// loss observed.
    pub met: bool,
    /// Losses whose class the shape forbids or the tier law does not
    /// tolerate.
    pub untolerated_losses: Vec<HandoffLoss>,
}

impl RsrResult {
    pub fn is_violation(&self) -> bool {
        !self.met
    }
}

/// Compute one shape's RSR from its trace: required attributes present at
/// the furthest stage the shape must reach, over all required attributes.
/// A missing evidence record at that stage counts as nothing preserved.
pub fn compute_shape_rsr(decl: &ShapeDeclaration, trace: &ShapeTraceResult) -> Rsr {
    let required = &decl.required_attributes;
    let present = match trace.evidence_at(decl.must_reach) {
        Some(evidence) => required
            .iter()
            .filter(|a| evidence.attributes_present.contains(*a))
            .count(),
        None => 0,
    };
    Rsr::from_ratio(present, required.len())
}

/// Evaluate one shape against its tier law.
pub fn evaluate_shape(decl: &ShapeDeclaration, trace: &ShapeTraceResult) -> RsrResult {
    let law = tier_law(decl.criticality);
    let rsr = compute_shape_rsr(decl, trace);
    let untolerated: Vec<HandoffLoss> = trace
        .handoff_losses
        .iter()
        .filter(|loss| {
            decl.forbidden_losses.contains(&loss.loss_class)
                || !law.tolerated_losses.contains(&loss.loss_class)
        })
        .cloned()
        .collect();
    // Invariant-kind shapes forbid every class, so any loss at all fails
    // them regardless of the attribute count at the final stage.
    let invariant_broken = decl.kind == ShapeKind::Invariant && !trace.handoff_losses.is_empty();
    let met = rsr >= law.min_rsr && untolerated.is_empty() && !invariant_broken && trace.survived;
    RsrResult {
        shape_id: decl.id.clone(),
        criticality: decl.criticality,
        rsr,
        threshold: law.min_rsr,
        met,
        untolerated_losses: untolerated,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ShapeCategory;
    use crate::stage::{Handoff, PipelineStage};
    use crate::trace::StageEvidence;

    fn pagination_decl() -> ShapeDeclaration {
        ShapeDeclaration::capability(
            "PAGINATION_CAPABILITY",
            ShapeCategory::Stateful,
            Criticality::Interactive,
            &["page_size", "page_cursor", "total_count", "boundary_controls", "page_state_binding"],
            PipelineStage::Emission,
            &[LossClass::TotalOmission],
        )
    }

    #[test]
    fn from_ratio_is_exact() {
        assert_eq!(Rsr::from_ratio(4, 5).millionths(), 800_000);
        assert_eq!(Rsr::from_ratio(5, 5), Rsr::FULL);
        assert_eq!(Rsr::from_ratio(0, 5), Rsr::ZERO);
        assert_eq!(Rsr::from_ratio(0, 0), Rsr::FULL);
    }

    #[test]
    fn from_millionths_clamps() {
        assert_eq!(Rsr::from_millionths(2 * MILLION), Rsr::FULL);
        assert_eq!(Rsr::from_millionths(-5), Rsr::ZERO);
    }

    #[test]
    fn mean_over_shapes_is_a_mean_not_a_min() {
        let mean = mean_rsr_over_shapes([Rsr::FULL, Rsr::from_millionths(500_000)]);
        assert_eq!(mean.millionths(), 750_000);
        assert_eq!(mean_rsr_over_shapes([]), Rsr::FULL);
    }

    #[test]
    fn four_of_five_attributes_is_point_eight() {
        let decl = pagination_decl();
        let trace = ShapeTraceResult::new("PAGINATION_CAPABILITY", "run-1").with_evidence(
            StageEvidence::new(
                PipelineStage::Emission,
                &["page_size", "page_cursor", "total_count", "boundary_controls"],
            ),
        );
        let rsr = compute_shape_rsr(&decl, &trace);
        assert_eq!(rsr.millionths(), 800_000);
        let result = evaluate_shape(&decl, &trace);
        assert!(result.is_violation());
        assert_eq!(result.threshold, Rsr::from_millionths(950_000));
    }

    #[test]
    fn missing_final_stage_evidence_is_zero() {
        let decl = pagination_decl();
        let trace = ShapeTraceResult::new("PAGINATION_CAPABILITY", "run-1");
        assert_eq!(compute_shape_rsr(&decl, &trace), Rsr::ZERO);
    }

    #[test]
    fn foundational_law_is_zero_tolerance() {
        let law = tier_law(Criticality::Foundational);
        assert_eq!(law.min_rsr, Rsr::FULL);
        assert!(law.tolerated_losses.is_empty());
    }

    #[test]
    fn interactive_tolerates_only_summarization() {
        let law = tier_law(Criticality::Interactive);
        assert_eq!(law.tolerated_losses, &[LossClass::Summarization]);
    }

    #[test]
    fn tolerated_loss_does_not_violate() {
        let decl = ShapeDeclaration::capability(
            "S",
            ShapeCategory::Stateless,
            Criticality::Interactive,
            &["a"],
            PipelineStage::Emission,
            &[LossClass::TotalOmission],
        );
        let trace = ShapeTraceResult::new("S", "run-1")
            .with_evidence(StageEvidence::new(PipelineStage::Emission, &["a"]))
            .with_loss(HandoffLoss::new(
                Handoff::IntakeToDistillation,
                LossClass::Summarization,
                &[],
            ));
        let result = evaluate_shape(&decl, &trace);
        assert!(result.met);
        assert!(result.untolerated_losses.is_empty());
    }

    #[test]
    fn forbidden_loss_violates_even_at_full_rsr() {
        let decl = ShapeDeclaration::capability(
            "S",
            ShapeCategory::Stateless,
            Criticality::Interactive,
            &["a"],
            PipelineStage::Emission,
            &[LossClass::StructuralCollapse],
        );
        let trace = ShapeTraceResult::new("S", "run-1")
            .with_evidence(StageEvidence::new(PipelineStage::Emission, &["a"]))
            .with_loss(HandoffLoss::new(
                Handoff::CompositionToWireframe,
                LossClass::StructuralCollapse,
                &[],
            ));
        let result = evaluate_shape(&decl, &trace);
        assert_eq!(result.rsr, Rsr::FULL);
        assert!(result.is_violation());
        assert_eq!(result.untolerated_losses.len(), 1);
    }

    #[test]
    fn invariant_fails_on_any_loss() {
        let decl = ShapeDeclaration::invariant(
            "I",
            ShapeCategory::Control,
            Criticality::Foundational,
            &["a"],
            PipelineStage::Emission,
        );
        let trace = ShapeTraceResult::new("I", "run-1")
            .with_evidence(StageEvidence::new(PipelineStage::Emission, &["a"]))
            .with_loss(HandoffLoss::new(
                Handoff::IntakeToDistillation,
                LossClass::Summarization,
                &[],
            ));
        assert!(evaluate_shape(&decl, &trace).is_violation());
    }
}
