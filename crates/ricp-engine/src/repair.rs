//! Minimal repair directive generation.
//!
//! When enforcement blocks or forks, each violated shape receives one
//! advisory directive describing the smallest structural change that would
//! have prevented the observed loss. Directives are output only: always
//! read-only, never executed by the control plane.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::loss::LossClass;
use crate::shape::{ShapeDeclaration, ShapeKind};
use crate::stage::PipelineStage;
use crate::trace::{HandoffLoss, ShapeTraceResult};

// ---------------------------------------------------------------------------
// RepairType
// ---------------------------------------------------------------------------

/// The kind of structural repair a directive recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RepairType {
    /// Re-assert an invariant the pipeline dropped. Invariant-kind shapes
    /// always receive this type.
    EnforceInvariant,
    /// Stop an attribute from being omitted at the loss site.
    PreventOmission,
    /// Keep nested structure from being flattened.
    PreserveStructure,
    /// Pin an attribute whose dependency link was skipped.
    ProtectAttribute,
    /// Add an extraction signal so the tracer can see the attribute at all.
    AddExtractionSignal,
}

impl RepairType {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EnforceInvariant => "enforce_invariant",
            Self::PreventOmission => "prevent_omission",
            Self::PreserveStructure => "preserve_structure",
            Self::ProtectAttribute => "protect_attribute",
            Self::AddExtractionSignal => "add_extraction_signal",
        }
    }
}

impl fmt::Display for RepairType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// StructuralDiffClass
// ---------------------------------------------------------------------------

/// Coarse classification of the structural diff behind a loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StructuralDiffClass {
    Omission,
    Truncation,
    Transformation,
    Collapse,
}

impl StructuralDiffClass {
    /// Classify a loss class into its structural diff family.
    pub fn from_loss(class: LossClass) -> Self {
        match class {
            LossClass::TotalOmission | LossClass::PartialOmission | LossClass::DependencySkip => {
                Self::Omission
            }
            LossClass::Truncation | LossClass::Summarization => Self::Truncation,
            LossClass::Transformation | LossClass::SchemaMismatch => Self::Transformation,
            LossClass::StructuralCollapse => Self::Collapse,
        }
    }

    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Omission => "omission",
            Self::Truncation => "truncation",
            Self::Transformation => "transformation",
            Self::Collapse => "collapse",
        }
    }
}

impl fmt::Display for StructuralDiffClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// RepairDirective
// ---------------------------------------------------------------------------

/// One advisory fix recommendation for one violated shape.
///
/// `readonly` and `automatic_execution` are fixed at construction: the
/// directive is evidence for a human, not an executable action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairDirective {
    pub directive_id: String,
    pub shape_id: String,
    pub repair_type: RepairType,
    pub diff_class: StructuralDiffClass,
    /// The losses this directive responds to.
    pub loss_evidence: Vec<HandoffLoss>,
    /// Structural change the directive recommends.
    pub structural_change: String,
    /// Human-readable explanation of why the repair targets this site.
    pub rationale: String,
    /// The stage where the repair should land.
    pub location: PipelineStage,
    /// Always true.
    pub readonly: bool,
    /// Always false.
    pub automatic_execution: bool,
}

// ---------------------------------------------------------------------------
// RepairDirectiveGenerator
// ---------------------------------------------------------------------------

/// Generates minimal repair directives from observed losses.
#[derive(Debug, Clone, Copy, Default)]
pub struct RepairDirectiveGenerator;

impl RepairDirectiveGenerator {
    /// Produce the directive for one violated shape.
    ///
    /// The repair site is the first handoff where loss was detected; absent
    /// any handoff-level loss, the shortfall is attributed to the final
    /// required stage. A collapse is repaired at the handoff's source stage,
    /// everything else at its target.
    pub fn generate(
        &self,
        decl: &ShapeDeclaration,
        trace: &ShapeTraceResult,
    ) -> RepairDirective {
        match trace.first_loss() {
            Some(loss) => self.directive_for_loss(decl, trace, loss),
            None => self.directive_for_shortfall(decl, trace),
        }
    }

    fn directive_for_loss(
        &self,
        decl: &ShapeDeclaration,
        trace: &ShapeTraceResult,
        loss: &HandoffLoss,
    ) -> RepairDirective {
        let diff_class = StructuralDiffClass::from_loss(loss.loss_class);
        let repair_type = if decl.kind == ShapeKind::Invariant {
            RepairType::EnforceInvariant
        } else {
            match loss.loss_class {
                LossClass::TotalOmission | LossClass::PartialOmission => RepairType::PreventOmission,
                LossClass::StructuralCollapse => RepairType::PreserveStructure,
                LossClass::DependencySkip => RepairType::ProtectAttribute,
                _ => RepairType::AddExtractionSignal,
            }
        };
        let location = if loss.loss_class == LossClass::StructuralCollapse {
            loss.handoff.source()
        } else {
            loss.handoff.target()
        };
        let lost = if loss.attributes_lost.is_empty() {
            "structure".to_string()
        } else {
            loss.attributes_lost.join(", ")
        };
        RepairDirective {
            directive_id: format!("mrd:{}:{}", trace.run_id, decl.id),
            shape_id: decl.id.clone(),
            repair_type,
            diff_class,
            loss_evidence: trace.handoff_losses.clone(),
            structural_change: format!(
                "carry {lost} across {} without {}",
                loss.handoff,
                loss.loss_class.as_str()
            ),
            rationale: format!(
                "{} lost {} ({}) at {}; earliest loss site determines the minimal repair",
                decl.id, lost, loss.loss_class, loss.handoff
            ),
            location,
            readonly: true,
            automatic_execution: false,
        }
    }

    fn directive_for_shortfall(
        &self,
        decl: &ShapeDeclaration,
        trace: &ShapeTraceResult,
    ) -> RepairDirective {
        let missing: Vec<String> = match trace.evidence_at(decl.must_reach) {
            Some(evidence) => decl
                .required_attributes
                .iter()
                .filter(|a| !evidence.attributes_present.contains(*a))
                .cloned()
                .collect(),
            None => decl.required_attributes.iter().cloned().collect(),
        };
        let repair_type = if decl.kind == ShapeKind::Invariant {
            RepairType::EnforceInvariant
        } else {
            RepairType::PreventOmission
        };
        RepairDirective {
            directive_id: format!("mrd:{}:{}", trace.run_id, decl.id),
            shape_id: decl.id.clone(),
            repair_type,
            diff_class: StructuralDiffClass::Omission,
            loss_evidence: Vec::new(),
            structural_change: format!(
                "restore {} in the {} artifact",
                missing.join(", "),
                decl.must_reach
            ),
            rationale: format!(
                "{} reached {} missing {} required attribute(s) with no handoff-level loss recorded",
                decl.id,
                decl.must_reach,
                missing.len()
            ),
            location: decl.must_reach,
            readonly: true,
            automatic_execution: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Criticality, ShapeCategory};
    use crate::stage::Handoff;
    use crate::trace::StageEvidence;

    fn capability(forbidden: &[LossClass]) -> ShapeDeclaration {
        ShapeDeclaration::capability(
            "CAP",
            ShapeCategory::Stateful,
            Criticality::Interactive,
            &["a", "b"],
            PipelineStage::Emission,
            forbidden,
        )
    }

    #[test]
    fn invariant_always_gets_enforce_invariant() {
        let decl = ShapeDeclaration::invariant(
            "INV",
            ShapeCategory::Control,
            Criticality::Foundational,
            &["a"],
            PipelineStage::Emission,
        );
        let trace = ShapeTraceResult::new("INV", "run-1").with_loss(HandoffLoss::new(
            Handoff::CompositionToWireframe,
            LossClass::Truncation,
            &["a"],
        ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert_eq!(directive.repair_type, RepairType::EnforceInvariant);
    }

    #[test]
    fn omission_maps_to_prevent_omission() {
        let decl = capability(&[LossClass::TotalOmission]);
        let trace = ShapeTraceResult::new("CAP", "run-1").with_loss(HandoffLoss::new(
            Handoff::DistillationToComposition,
            LossClass::PartialOmission,
            &["a"],
        ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert_eq!(directive.repair_type, RepairType::PreventOmission);
        assert_eq!(directive.location, PipelineStage::Composition);
    }

    #[test]
    fn collapse_repairs_at_source_stage() {
        let decl = capability(&[LossClass::StructuralCollapse]);
        let trace = ShapeTraceResult::new("CAP", "run-1").with_loss(HandoffLoss::new(
            Handoff::CompositionToWireframe,
            LossClass::StructuralCollapse,
            &[],
        ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert_eq!(directive.repair_type, RepairType::PreserveStructure);
        assert_eq!(directive.location, PipelineStage::Composition);
        assert_eq!(directive.diff_class, StructuralDiffClass::Collapse);
    }

    #[test]
    fn dependency_skip_maps_to_protect_attribute() {
        let decl = capability(&[LossClass::DependencySkip]);
        let trace = ShapeTraceResult::new("CAP", "run-1").with_loss(HandoffLoss::new(
            Handoff::WireframeToPixelRender,
            LossClass::DependencySkip,
            &["b"],
        ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert_eq!(directive.repair_type, RepairType::ProtectAttribute);
    }

    #[test]
    fn transformation_falls_back_to_extraction_signal() {
        let decl = capability(&[LossClass::TotalOmission]);
        let trace = ShapeTraceResult::new("CAP", "run-1").with_loss(HandoffLoss::new(
            Handoff::PixelRenderToEmission,
            LossClass::Transformation,
            &[],
        ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert_eq!(directive.repair_type, RepairType::AddExtractionSignal);
    }

    #[test]
    fn shortfall_without_losses_targets_final_stage() {
        let decl = capability(&[LossClass::TotalOmission]);
        let trace = ShapeTraceResult::new("CAP", "run-1")
            .with_evidence(StageEvidence::new(PipelineStage::Emission, &["a"]));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert_eq!(directive.location, PipelineStage::Emission);
        assert_eq!(directive.repair_type, RepairType::PreventOmission);
        assert!(directive.structural_change.contains('b'));
    }

    #[test]
    fn directives_are_advisory_only() {
        let decl = capability(&[LossClass::TotalOmission]);
        let trace = ShapeTraceResult::new("CAP", "run-1").with_loss(HandoffLoss::new(
            Handoff::IntakeToDistillation,
            LossClass::TotalOmission,
            &["a", "b"],
        ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert!(directive.readonly);
        assert!(!directive.automatic_execution);
    }

    #[test]
    fn earliest_loss_site_wins() {
        let decl = capability(&[LossClass::TotalOmission]);
        let trace = ShapeTraceResult::new("CAP", "run-1")
            .with_loss(HandoffLoss::new(
                Handoff::PixelRenderToEmission,
                LossClass::Truncation,
                &["b"],
            ))
            .with_loss(HandoffLoss::new(
                Handoff::IntakeToDistillation,
                LossClass::PartialOmission,
                &["a"],
            ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        assert_eq!(directive.location, PipelineStage::Distillation);
    }
}
