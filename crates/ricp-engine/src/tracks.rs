//! Triple-track execution: isolated canonical, shadow, and remediated
//! tracks.
//!
//! The fork decision is a pure function of tier results. A foundational
//! violation blocks everything and creates no tracks; an interactive
//! violation forks into one shadow track plus one remediated track per
//! violated shape; a clean run proceeds on a single canonical track.
//!
//! Tracks are always isolated: a track's inputs are cloned at creation and
//! the only data crossing track boundaries is the run id and the
//! originating gate result. Promoted and abandoned are terminal states;
//! a track is never resurrected.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::repair::RepairDirective;
use crate::rsr::RsrResult;
use crate::trace::GateResult;

// ---------------------------------------------------------------------------
// TrackKind / TrackStatus
// ---------------------------------------------------------------------------

/// The three execution track kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    /// The canonical lineage track.
    Canonical,
    /// Continues under the old constraints, informational only.
    Shadow,
    /// Carries a repair directive for one violated shape.
    Remediated,
}

impl TrackKind {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Canonical => "canonical",
            Self::Shadow => "shadow",
            Self::Remediated => "remediated",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an execution track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    Pending,
    Executing,
    Passed,
    Abandoned,
    Promoted,
}

impl TrackStatus {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Passed => "passed",
            Self::Abandoned => "abandoned",
            Self::Promoted => "promoted",
        }
    }

    /// Whether no further transition may leave this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Abandoned | Self::Promoted)
    }
}

impl fmt::Display for TrackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TrackError
// ---------------------------------------------------------------------------

/// Errors from track lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackError {
    /// The requested transition is not part of the lifecycle machine.
    IllegalTransition {
        track_id: String,
        from: TrackStatus,
        to: TrackStatus,
    },
    /// The track is in a terminal status and can never change again.
    TerminalStatus {
        track_id: String,
        status: TrackStatus,
    },
}

impl fmt::Display for TrackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IllegalTransition { track_id, from, to } => {
                write!(f, "track {track_id}: illegal transition {from} -> {to}")
            }
            Self::TerminalStatus { track_id, status } => {
                write!(f, "track {track_id}: status {status} is terminal")
            }
        }
    }
}

impl std::error::Error for TrackError {}

// ---------------------------------------------------------------------------
// ExecutionTrack
// ---------------------------------------------------------------------------

/// One isolated execution context created by the fork decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionTrack {
    pub track_id: String,
    pub run_id: String,
    pub kind: TrackKind,
    pub status: TrackStatus,
    /// Always true: no track may read another track's state.
    pub isolated: bool,
    /// Whether the track has been found eligible for promotion. Only
    /// remediated tracks ever flip this.
    pub promotable: bool,
    /// The directive a remediated track carries; absent on other kinds.
    pub repair_directive: Option<RepairDirective>,
    /// The gate result the track was created under; the only cross-track
    /// input besides the run id.
    pub origin_gate: Option<GateResult>,
}

impl ExecutionTrack {
    fn new(run_id: &str, kind: TrackKind, status: TrackStatus, suffix: &str) -> Self {
        Self {
            track_id: format!("{run_id}:{}:{suffix}", kind.as_str()),
            run_id: run_id.to_string(),
            kind,
            status,
            isolated: true,
            promotable: false,
            repair_directive: None,
            origin_gate: None,
        }
    }

    /// Advance the track through its lifecycle machine.
    ///
    /// Legal transitions: Pending -> Executing, Executing -> Passed,
    /// Pending/Executing -> Abandoned, Passed -> Abandoned, and
    /// Passed -> Promoted for remediated tracks only (the promotion
    /// controller owns that last edge).
    pub fn transition(&mut self, to: TrackStatus) -> Result<(), TrackError> {
        if self.status.is_terminal() {
            return Err(TrackError::TerminalStatus {
                track_id: self.track_id.clone(),
                status: self.status,
            });
        }
        let legal = matches!(
            (self.status, to),
            (TrackStatus::Pending, TrackStatus::Executing)
                | (TrackStatus::Executing, TrackStatus::Passed)
                | (TrackStatus::Pending, TrackStatus::Abandoned)
                | (TrackStatus::Executing, TrackStatus::Abandoned)
                | (TrackStatus::Passed, TrackStatus::Abandoned)
        ) || (self.status == TrackStatus::Passed
            && to == TrackStatus::Promoted
            && self.kind == TrackKind::Remediated);
        if !legal {
            return Err(TrackError::IllegalTransition {
                track_id: self.track_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ForkDecision
// ---------------------------------------------------------------------------

/// Outcome of the pure fork decision over tier results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForkDecision {
    /// No violation: a single canonical track proceeds.
    ProceedCanonical,
    /// Interactive violation: shadow plus one remediated track per shape.
    Fork { remediated_shapes: Vec<String> },
    /// Foundational violation: nothing executes, no tracks exist.
    BlockEverything,
}

impl ForkDecision {
    /// Whether the decision blocks the canonical track.
    pub fn blocks_canonical(&self) -> bool {
        matches!(self, Self::BlockEverything)
    }
}

// ---------------------------------------------------------------------------
// TteController
// ---------------------------------------------------------------------------

/// Creates and manages execution tracks from the fork decision.
#[derive(Debug, Clone, Copy, Default)]
pub struct TteController;

impl TteController {
    /// The pure fork decision. Foundational violations dominate; interactive
    /// violations fork; anything else proceeds canonically.
    pub fn decide_fork(
        &self,
        foundational_violations: &[RsrResult],
        interactive_violations: &[RsrResult],
    ) -> ForkDecision {
        if !foundational_violations.is_empty() {
            return ForkDecision::BlockEverything;
        }
        if !interactive_violations.is_empty() {
            return ForkDecision::Fork {
                remediated_shapes: interactive_violations
                    .iter()
                    .map(|v| v.shape_id.clone())
                    .collect(),
            };
        }
        ForkDecision::ProceedCanonical
    }

    /// Materialize tracks for a fork decision. Each remediated track carries
    /// the directive generated for its shape; every track gets its own clone
    /// of the originating gate result.
    pub fn create_tracks(
        &self,
        decision: &ForkDecision,
        run_id: &str,
        directives: &[RepairDirective],
        origin_gate: &GateResult,
    ) -> Vec<ExecutionTrack> {
        match decision {
            ForkDecision::BlockEverything => Vec::new(),
            ForkDecision::ProceedCanonical => {
                let mut track =
                    ExecutionTrack::new(run_id, TrackKind::Canonical, TrackStatus::Passed, "0");
                track.origin_gate = Some(origin_gate.clone());
                vec![track]
            }
            ForkDecision::Fork { remediated_shapes } => {
                let mut tracks = Vec::with_capacity(remediated_shapes.len() + 1);
                let mut shadow =
                    ExecutionTrack::new(run_id, TrackKind::Shadow, TrackStatus::Executing, "0");
                shadow.origin_gate = Some(origin_gate.clone());
                tracks.push(shadow);
                for (i, shape_id) in remediated_shapes.iter().enumerate() {
                    let mut track = ExecutionTrack::new(
                        run_id,
                        TrackKind::Remediated,
                        TrackStatus::Pending,
                        &i.to_string(),
                    );
                    track.origin_gate = Some(origin_gate.clone());
                    track.repair_directive = directives
                        .iter()
                        .find(|d| &d.shape_id == shape_id)
                        .cloned();
                    tracks.push(track);
                }
                tracks
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rsr::Rsr;
    use crate::shape::Criticality;

    fn violation(shape_id: &str, tier: Criticality) -> RsrResult {
        RsrResult {
            shape_id: shape_id.to_string(),
            criticality: tier,
            rsr: Rsr::from_millionths(800_000),
            threshold: Rsr::from_millionths(950_000),
            met: false,
            untolerated_losses: Vec::new(),
        }
    }

    #[test]
    fn foundational_violation_blocks_everything() {
        let decision = TteController.decide_fork(
            &[violation("F", Criticality::Foundational)],
            &[violation("I", Criticality::Interactive)],
        );
        assert_eq!(decision, ForkDecision::BlockEverything);
        assert!(decision.blocks_canonical());
        let tracks =
            TteController.create_tracks(&decision, "run-1", &[], &GateResult::passing("g"));
        assert!(tracks.is_empty());
    }

    #[test]
    fn interactive_violation_forks_shadow_plus_remediated() {
        let decision = TteController.decide_fork(
            &[],
            &[
                violation("A", Criticality::Interactive),
                violation("B", Criticality::Interactive),
            ],
        );
        let tracks =
            TteController.create_tracks(&decision, "run-1", &[], &GateResult::passing("g"));
        assert_eq!(tracks.len(), 3);
        assert_eq!(tracks[0].kind, TrackKind::Shadow);
        assert_eq!(tracks[0].status, TrackStatus::Executing);
        assert!(tracks[1..]
            .iter()
            .all(|t| t.kind == TrackKind::Remediated && t.status == TrackStatus::Pending));
    }

    #[test]
    fn clean_run_creates_single_passed_canonical() {
        let decision = TteController.decide_fork(&[], &[]);
        let tracks =
            TteController.create_tracks(&decision, "run-1", &[], &GateResult::passing("g"));
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].kind, TrackKind::Canonical);
        assert_eq!(tracks[0].status, TrackStatus::Passed);
    }

    #[test]
    fn every_track_is_isolated() {
        let decision = TteController.decide_fork(&[], &[violation("A", Criticality::Interactive)]);
        let tracks =
            TteController.create_tracks(&decision, "run-1", &[], &GateResult::passing("g"));
        assert!(tracks.iter().all(|t| t.isolated));
    }

    #[test]
    fn lifecycle_happy_path() {
        let mut track = ExecutionTrack::new("run-1", TrackKind::Remediated, TrackStatus::Pending, "0");
        track.transition(TrackStatus::Executing).unwrap();
        track.transition(TrackStatus::Passed).unwrap();
        track.transition(TrackStatus::Promoted).unwrap();
        assert_eq!(track.status, TrackStatus::Promoted);
    }

    #[test]
    fn promoted_is_terminal() {
        let mut track = ExecutionTrack::new("run-1", TrackKind::Remediated, TrackStatus::Passed, "0");
        track.transition(TrackStatus::Promoted).unwrap();
        let err = track.transition(TrackStatus::Abandoned).unwrap_err();
        assert!(matches!(err, TrackError::TerminalStatus { .. }));
    }

    #[test]
    fn abandoned_is_terminal() {
        let mut track = ExecutionTrack::new("run-1", TrackKind::Shadow, TrackStatus::Executing, "0");
        track.transition(TrackStatus::Abandoned).unwrap();
        let err = track.transition(TrackStatus::Executing).unwrap_err();
        assert!(matches!(err, TrackError::TerminalStatus { .. }));
    }

    #[test]
    fn only_remediated_tracks_reach_promoted() {
        let mut canonical =
            ExecutionTrack::new("run-1", TrackKind::Canonical, TrackStatus::Passed, "0");
        let err = canonical.transition(TrackStatus::Promoted).unwrap_err();
        assert!(matches!(err, TrackError::IllegalTransition { .. }));
    }

    #[test]
    fn skipping_executing_is_illegal() {
        let mut track = ExecutionTrack::new("run-1", TrackKind::Remediated, TrackStatus::Pending, "0");
        let err = track.transition(TrackStatus::Passed).unwrap_err();
        assert!(matches!(err, TrackError::IllegalTransition { .. }));
    }

    #[test]
    fn remediated_tracks_carry_their_shape_directive() {
        use crate::loss::LossClass;
        use crate::repair::RepairDirectiveGenerator;
        use crate::shape::{ShapeCategory, ShapeDeclaration};
        use crate::stage::{Handoff, PipelineStage};
        use crate::trace::{HandoffLoss, ShapeTraceResult};

        let decl = ShapeDeclaration::capability(
            "A",
            ShapeCategory::Stateful,
            Criticality::Interactive,
            &["x"],
            PipelineStage::Emission,
            &[LossClass::TotalOmission],
        );
        let trace = ShapeTraceResult::new("A", "run-1").with_loss(HandoffLoss::new(
            Handoff::IntakeToDistillation,
            LossClass::PartialOmission,
            &["x"],
        ));
        let directive = RepairDirectiveGenerator.generate(&decl, &trace);
        let decision = TteController.decide_fork(&[], &[violation("A", Criticality::Interactive)]);
        let tracks = TteController.create_tracks(
            &decision,
            "run-1",
            std::slice::from_ref(&directive),
            &GateResult::passing("g"),
        );
        let remediated = tracks.iter().find(|t| t.kind == TrackKind::Remediated).unwrap();
        assert_eq!(
            remediated.repair_directive.as_ref().map(|d| d.shape_id.as_str()),
            Some("A")
        );
    }
}
