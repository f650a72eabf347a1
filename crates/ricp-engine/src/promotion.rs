//! Promotion of remediated tracks into the canonical lineage.
//!
//! Eligibility is deterministic and all conditions are required: only a
//! remediated track that passed, with every gate verdict at pass, every
//! foundational and interactive RSR law met, and no untolerated loss may
//! be promoted. Each failing condition is recorded as a typed blocker.
//!
//! The canonical lineage is an append-only hash chain: every promoted run
//! appends an entry carrying the content hash of its predecessor, so a
//! reader can verify the lineage has not been rewritten.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rsr::RsrResult;
use crate::shape::Criticality;
use crate::trace::{GateResult, GateVerdict};
use crate::tracks::{ExecutionTrack, TrackKind, TrackStatus};

// ---------------------------------------------------------------------------
// PromotionBlocker
// ---------------------------------------------------------------------------

/// Why a track is not eligible for promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PromotionBlockerKind {
    /// The track is not a remediated track, or has not passed.
    TrackType,
    /// An attached gate result is not a pass.
    GateFailure,
    /// A foundational or interactive RSR law is unmet.
    RsrViolation,
    /// A shape carries a loss its law does not tolerate.
    UntoleratedLoss,
}

impl PromotionBlockerKind {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrackType => "track_type",
            Self::GateFailure => "gate_failure",
            Self::RsrViolation => "rsr_violation",
            Self::UntoleratedLoss => "untolerated_loss",
        }
    }
}

impl fmt::Display for PromotionBlockerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One typed eligibility failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionBlocker {
    pub kind: PromotionBlockerKind,
    pub detail: String,
}

/// Eligibility outcome: eligible only with zero blockers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionEligibility {
    pub eligible: bool,
    pub blockers: Vec<PromotionBlocker>,
}

// ---------------------------------------------------------------------------
// PromotionError
// ---------------------------------------------------------------------------

/// Errors from a promotion attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromotionError {
    /// Eligibility failed at attempt time; the blockers are attached.
    NotEligible {
        track_id: String,
        blockers: Vec<PromotionBlocker>,
    },
    /// The track is already in a terminal status.
    TerminalStatus {
        track_id: String,
        status: TrackStatus,
    },
}

impl fmt::Display for PromotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotEligible { track_id, blockers } => {
                write!(
                    f,
                    "track {track_id} not eligible for promotion ({} blocker(s))",
                    blockers.len()
                )
            }
            Self::TerminalStatus { track_id, status } => {
                write!(f, "track {track_id} is terminal ({status})")
            }
        }
    }
}

impl std::error::Error for PromotionError {}

// ---------------------------------------------------------------------------
// CanonicalLineage
// ---------------------------------------------------------------------------

/// One promoted run in the canonical lineage chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineageEntry {
    /// Monotonically increasing sequence number (0-indexed).
    pub sequence: u64,
    pub run_id: String,
    pub track_id: String,
    /// Content hash of the preceding entry (all-zeros for the first).
    pub predecessor_hash: String,
    /// Content hash of this entry.
    pub entry_hash: String,
}

impl LineageEntry {
    fn compute_hash(sequence: u64, run_id: &str, track_id: &str, predecessor: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(sequence.to_be_bytes());
        hasher.update(b"|");
        hasher.update(run_id.as_bytes());
        hasher.update(b"|");
        hasher.update(track_id.as_bytes());
        hasher.update(b"|");
        hasher.update(predecessor.as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }
}

/// The append-only list of promoted run ids, hash-chained for
/// tamper-evidence.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CanonicalLineage {
    entries: Vec<LineageEntry>,
}

const GENESIS_HASH: &str = "sha256:0000000000000000000000000000000000000000000000000000000000000000";

impl CanonicalLineage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a promoted run. Returns the new entry.
    pub fn append(&mut self, run_id: &str, track_id: &str) -> LineageEntry {
        let sequence = self.entries.len() as u64;
        let predecessor_hash = self
            .entries
            .last()
            .map(|e| e.entry_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let entry_hash = LineageEntry::compute_hash(sequence, run_id, track_id, &predecessor_hash);
        let entry = LineageEntry {
            sequence,
            run_id: run_id.to_string(),
            track_id: track_id.to_string(),
            predecessor_hash,
            entry_hash,
        };
        self.entries.push(entry.clone());
        entry
    }

    pub fn entries(&self) -> &[LineageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Verify the hash chain end to end.
    pub fn verify_chain(&self) -> bool {
        let mut predecessor = GENESIS_HASH.to_string();
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.sequence != i as u64 || entry.predecessor_hash != predecessor {
                return false;
            }
            let expected = LineageEntry::compute_hash(
                entry.sequence,
                &entry.run_id,
                &entry.track_id,
                &entry.predecessor_hash,
            );
            if entry.entry_hash != expected {
                return false;
            }
            predecessor = entry.entry_hash.clone();
        }
        true
    }
}

// ---------------------------------------------------------------------------
// PromotionController
// ---------------------------------------------------------------------------

/// Evaluates promotion eligibility and performs the atomic promotion.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromotionController;

impl PromotionController {
    /// Deterministic eligibility check. Every condition is required; each
    /// failure is a typed blocker.
    pub fn eligibility(
        &self,
        track: &ExecutionTrack,
        gate_results: &[GateResult],
        rsr_results: &[RsrResult],
    ) -> PromotionEligibility {
        let mut blockers = Vec::new();

        if track.kind != TrackKind::Remediated {
            blockers.push(PromotionBlocker {
                kind: PromotionBlockerKind::TrackType,
                detail: format!("track kind is {}, only remediated tracks promote", track.kind),
            });
        }
        if track.status != TrackStatus::Passed {
            blockers.push(PromotionBlocker {
                kind: PromotionBlockerKind::TrackType,
                detail: format!("track status is {}, promotion requires passed", track.status),
            });
        }
        for gate in gate_results {
            if gate.verdict != GateVerdict::Pass {
                blockers.push(PromotionBlocker {
                    kind: PromotionBlockerKind::GateFailure,
                    detail: format!("gate {} verdict is {}", gate.gate_id, gate.verdict),
                });
            }
        }
        for result in rsr_results {
            let enforced_tier = matches!(
                result.criticality,
                Criticality::Foundational | Criticality::Interactive
            );
            if enforced_tier && !result.met {
                blockers.push(PromotionBlocker {
                    kind: PromotionBlockerKind::RsrViolation,
                    detail: format!(
                        "{} at {} below {} law",
                        result.shape_id, result.rsr, result.criticality
                    ),
                });
            }
            if !result.untolerated_losses.is_empty() {
                blockers.push(PromotionBlocker {
                    kind: PromotionBlockerKind::UntoleratedLoss,
                    detail: format!(
                        "{} carries {} untolerated loss(es)",
                        result.shape_id,
                        result.untolerated_losses.len()
                    ),
                });
            }
        }

        PromotionEligibility {
            eligible: blockers.is_empty(),
            blockers,
        }
    }

    /// Re-check eligibility and promote atomically: either the track flips
    /// to promoted and the lineage gains an entry, or nothing changes.
    pub fn attempt_promotion(
        &self,
        track: &mut ExecutionTrack,
        gate_results: &[GateResult],
        rsr_results: &[RsrResult],
        lineage: &mut CanonicalLineage,
    ) -> Result<(), PromotionError> {
        if track.status.is_terminal() {
            return Err(PromotionError::TerminalStatus {
                track_id: track.track_id.clone(),
                status: track.status,
            });
        }
        let eligibility = self.eligibility(track, gate_results, rsr_results);
        if !eligibility.eligible {
            return Err(PromotionError::NotEligible {
                track_id: track.track_id.clone(),
                blockers: eligibility.blockers,
            });
        }
        track
            .transition(TrackStatus::Promoted)
            .map_err(|_| PromotionError::TerminalStatus {
                track_id: track.track_id.clone(),
                status: track.status,
            })?;
        track.promotable = true;
        lineage.append(&track.run_id, &track.track_id);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
