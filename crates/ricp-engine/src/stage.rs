//! Ordered pipeline stages and the handoffs between them.
//!
//! The upstream content pipeline is a fixed sequence of six stages. The
//! control plane never executes a stage; it only reasons about what each
//! stage's artifact preserved. Handoffs are the transitions between two
//! consecutive stages and are the unit at which degradation is budgeted,
//! fingerprinted, and counted.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PipelineStage
// ---------------------------------------------------------------------------

/// One ordered step of the content pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Raw requirement intake.
    Intake,
    /// Requirement distillation into structured shapes.
    Distillation,
    /// Composition of the structured plan.
    Composition,
    /// Wireframe-level realization.
    Wireframe,
    /// Pixel-level realization.
    PixelRender,
    /// Final artifact emission.
    Emission,
}

impl PipelineStage {
    /// All stages in pipeline order.
    pub const ALL: [PipelineStage; 6] = [
        PipelineStage::Intake,
        PipelineStage::Distillation,
        PipelineStage::Composition,
        PipelineStage::Wireframe,
        PipelineStage::PixelRender,
        PipelineStage::Emission,
    ];

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        match self {
            Self::Intake => 0,
            Self::Distillation => 1,
            Self::Composition => 2,
            Self::Wireframe => 3,
            Self::PixelRender => 4,
            Self::Emission => 5,
        }
    }

    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Distillation => "distillation",
            Self::Composition => "composition",
            Self::Wireframe => "wireframe",
            Self::PixelRender => "pixel_render",
            Self::Emission => "emission",
        }
    }

    /// Stages from `Intake` through `last`, inclusive.
    pub fn through(last: PipelineStage) -> &'static [PipelineStage] {
        &STAGE_ORDER[..=last.index()]
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static STAGE_ORDER: [PipelineStage; 6] = PipelineStage::ALL;

// ---------------------------------------------------------------------------
// Handoff
// ---------------------------------------------------------------------------

/// The transition between two consecutive pipeline stages.
///
/// Six stages give exactly five handoffs. Budgets, fingerprints, and
/// mortality counters are all keyed by handoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Handoff {
    IntakeToDistillation,
    DistillationToComposition,
    CompositionToWireframe,
    WireframeToPixelRender,
    PixelRenderToEmission,
}

impl Handoff {
    /// All handoffs in pipeline order.
    pub const ALL: [Handoff; 5] = [
        Handoff::IntakeToDistillation,
        Handoff::DistillationToComposition,
        Handoff::CompositionToWireframe,
        Handoff::WireframeToPixelRender,
        Handoff::PixelRenderToEmission,
    ];

    /// Zero-based position in the pipeline.
    pub fn index(self) -> usize {
        match self {
            Self::IntakeToDistillation => 0,
            Self::DistillationToComposition => 1,
            Self::CompositionToWireframe => 2,
            Self::WireframeToPixelRender => 3,
            Self::PixelRenderToEmission => 4,
        }
    }

    /// The stage this handoff departs from.
    pub fn source(self) -> PipelineStage {
        PipelineStage::ALL[self.index()]
    }

    /// The stage this handoff arrives at.
    pub fn target(self) -> PipelineStage {
        PipelineStage::ALL[self.index() + 1]
    }

    /// The handoff between two consecutive stages, if they are consecutive.
    pub fn between(source: PipelineStage, target: PipelineStage) -> Option<Handoff> {
        if target.index() == source.index() + 1 {
            Some(Self::ALL[source.index()])
        } else {
            None
        }
    }

    /// The handoff whose target is `stage`, if any (`Intake` has none).
    pub fn leading_to(stage: PipelineStage) -> Option<Handoff> {
        stage.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Handoffs a shape crosses to reach `stage` from `Intake`.
    pub fn crossed_to_reach(stage: PipelineStage) -> &'static [Handoff] {
        &HANDOFF_ORDER[..stage.index()]
    }

    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IntakeToDistillation => "intake_to_distillation",
            Self::DistillationToComposition => "distillation_to_composition",
            Self::CompositionToWireframe => "composition_to_wireframe",
            Self::WireframeToPixelRender => "wireframe_to_pixel_render",
            Self::PixelRenderToEmission => "pixel_render_to_emission",
        }
    }
}

impl fmt::Display for Handoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static HANDOFF_ORDER: [Handoff; 5] = Handoff::ALL;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
