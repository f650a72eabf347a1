//! Inbound trace evidence and gate results.
//!
//! These records are produced by the external extraction/tracing layer and
//! the upstream gate check. The control plane consumes them read-only: it
//! never infers evidence that is not present, and it treats
//! `structural_signals` as an opaque bag it may hash but never interpret.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::loss::LossClass;
use crate::stage::{Handoff, PipelineStage};

// ---------------------------------------------------------------------------
// StageEvidence
// ---------------------------------------------------------------------------

/// What the tracer extracted for one shape from one stage's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageEvidence {
    pub stage: PipelineStage,
    /// Attribute names found present in the artifact.
    pub attributes_present: BTreeSet<String>,
    /// Opaque extraction signals; hashed, never interpreted.
    pub structural_signals: BTreeMap<String, String>,
    /// Whether the stage applied summarization while producing its artifact.
    pub summarization_applied: bool,
    /// Compression ratio in millionths (1_000_000 = no compression), when
    /// summarization was applied.
    pub summarization_ratio_millionths: Option<i64>,
}

impl StageEvidence {
    pub fn new(stage: PipelineStage, attributes: &[&str]) -> Self {
        Self {
            stage,
            attributes_present: attributes.iter().map(|a| (*a).to_string()).collect(),
            structural_signals: BTreeMap::new(),
            summarization_applied: false,
            summarization_ratio_millionths: None,
        }
    }

    pub fn with_summarization(mut self, ratio_millionths: i64) -> Self {
        self.summarization_applied = true;
        self.summarization_ratio_millionths = Some(ratio_millionths);
        self
    }
}

// ---------------------------------------------------------------------------
// HandoffLoss
// ---------------------------------------------------------------------------

/// One detected structural loss at one handoff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffLoss {
    pub handoff: Handoff,
    pub loss_class: LossClass,
    /// Attributes entirely absent after the handoff.
    pub attributes_lost: Vec<String>,
    /// Attributes still present but degraded.
    pub attributes_degraded: Vec<String>,
    /// Tracer-provided description of the loss.
    pub detail: String,
}

impl HandoffLoss {
    pub fn new(handoff: Handoff, loss_class: LossClass, lost: &[&str]) -> Self {
        Self {
            handoff,
            loss_class,
            attributes_lost: lost.iter().map(|a| (*a).to_string()).collect(),
            attributes_degraded: Vec::new(),
            detail: String::new(),
        }
    }

    pub fn with_degraded(mut self, degraded: &[&str]) -> Self {
        self.attributes_degraded = degraded.iter().map(|a| (*a).to_string()).collect();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = detail.into();
        self
    }
}

// ---------------------------------------------------------------------------
// ShapeTraceResult
// ---------------------------------------------------------------------------

/// Aggregated evidence for one shape across all stages, for one run.
/// Produced once per run by the tracer; read-only to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeTraceResult {
    pub shape_id: String,
    pub run_id: String,
    /// Per-stage extraction evidence, keyed by stage.
    pub stage_evidence: BTreeMap<PipelineStage, StageEvidence>,
    /// Losses the tracer detected at handoffs, in pipeline order.
    pub handoff_losses: Vec<HandoffLoss>,
    /// Tracer's own survival assessment for the shape.
    pub survived: bool,
}

impl ShapeTraceResult {
    pub fn new(shape_id: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            shape_id: shape_id.into(),
            run_id: run_id.into(),
            stage_evidence: BTreeMap::new(),
            handoff_losses: Vec::new(),
            survived: true,
        }
    }

    pub fn with_evidence(mut self, evidence: StageEvidence) -> Self {
        self.stage_evidence.insert(evidence.stage, evidence);
        self
    }

    pub fn with_loss(mut self, loss: HandoffLoss) -> Self {
        self.handoff_losses.push(loss);
        if loss_is_terminal(&self.handoff_losses) {
            self.survived = false;
        }
        self
    }

    /// Evidence extracted at `stage`, if the tracer produced any.
    pub fn evidence_at(&self, stage: PipelineStage) -> Option<&StageEvidence> {
        self.stage_evidence.get(&stage)
    }

    /// Losses detected at `handoff`.
    pub fn losses_at(&self, handoff: Handoff) -> Vec<&HandoffLoss> {
        self.handoff_losses
            .iter()
            .filter(|l| l.handoff == handoff)
            .collect()
    }

    /// The earliest-handoff loss, if any loss was detected.
    pub fn first_loss(&self) -> Option<&HandoffLoss> {
        self.handoff_losses.iter().min_by_key(|l| l.handoff)
    }
}

fn loss_is_terminal(losses: &[HandoffLoss]) -> bool {
    losses
        .iter()
        .any(|l| l.loss_class == LossClass::TotalOmission)
}

// ---------------------------------------------------------------------------
// GateResult
// ---------------------------------------------------------------------------

/// Verdict of the upstream gate check that precedes enforcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GateVerdict {
    Pass,
    Warn,
    Fail,
}

impl GateVerdict {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Warn => "warn",
            Self::Fail => "fail",
        }
    }
}

impl fmt::Display for GateVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an upstream gate check, supplied at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateResult {
    pub gate_id: String,
    pub verdict: GateVerdict,
    pub fatal_violations: Vec<String>,
    /// Whether the gate demands that downstream execution stop.
    pub blocks_downstream: bool,
}

impl GateResult {
    pub fn passing(gate_id: impl Into<String>) -> Self {
        Self {
            gate_id: gate_id.into(),
            verdict: GateVerdict::Pass,
            fatal_violations: Vec::new(),
            blocks_downstream: false,
        }
    }

    pub fn failing(gate_id: impl Into<String>, violations: &[&str]) -> Self {
        Self {
            gate_id: gate_id.into(),
            verdict: GateVerdict::Fail,
            fatal_violations: violations.iter().map(|v| (*v).to_string()).collect(),
            blocks_downstream: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
