//! Predictive fingerprint firewall.
//!
//! Maintains a global append-only index keyed by fingerprint hash. Each
//! occurrence appends to the entry's outcome log and recomputes a strictly
//! deterministic verdict. A run whose fingerprint exactly matches a
//! non-safe entry is blocked preemptively, citing the first non-safe
//! historical occurrence as evidence. This is an exact-match circuit
//! breaker: no similarity metric, no probability threshold, and no history
//! means no block.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::fingerprint::CausalFingerprint;
use crate::stage::Handoff;

// ---------------------------------------------------------------------------
// FingerprintVerdict
// ---------------------------------------------------------------------------

/// Deterministic verdict for one fingerprint hash, ordered by severity.
/// Within an index lifetime a verdict only ever moves away from `Safe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FingerprintVerdict {
    Safe,
    CausedLoss,
    CausedInvariantViolation,
}

impl FingerprintVerdict {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::CausedLoss => "caused_loss",
            Self::CausedInvariantViolation => "caused_invariant_violation",
        }
    }
}

impl fmt::Display for FingerprintVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FingerprintOccurrence
// ---------------------------------------------------------------------------

/// One observed occurrence of a fingerprint hash in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintOccurrence {
    pub run_id: String,
    pub handoff: Handoff,
    /// Shape ids that lost attributes at this handoff in this run.
    pub shapes_lost: Vec<String>,
    pub loss_observed: bool,
    pub invariant_violated: bool,
}

impl FingerprintOccurrence {
    fn is_safe(&self) -> bool {
        !self.loss_observed && !self.invariant_violated
    }
}

// ---------------------------------------------------------------------------
// FingerprintIndexEntry
// ---------------------------------------------------------------------------

/// Historical aggregate for one fingerprint hash. Append-only: occurrences
/// are never removed and the verdict is never downgraded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintIndexEntry {
    pub hash: String,
    pub occurrences: Vec<FingerprintOccurrence>,
    pub verdict: FingerprintVerdict,
}

impl FingerprintIndexEntry {
    /// Recompute the verdict from the full occurrence history: any
    /// invariant violation ever dominates; any loss ever comes next.
    fn recompute_verdict(&self) -> FingerprintVerdict {
        if self.occurrences.iter().any(|o| o.invariant_violated) {
            FingerprintVerdict::CausedInvariantViolation
        } else if self.occurrences.iter().any(|o| o.loss_observed) {
            FingerprintVerdict::CausedLoss
        } else {
            FingerprintVerdict::Safe
        }
    }

    pub fn loss_occurrences(&self) -> usize {
        self.occurrences.iter().filter(|o| o.loss_observed).count()
    }

    pub fn invariant_violation_occurrences(&self) -> usize {
        self.occurrences
            .iter()
            .filter(|o| o.invariant_violated)
            .count()
    }

    /// The first occurrence with a non-safe outcome, the evidence cited by
    /// a preemptive block.
    fn first_non_safe(&self) -> Option<&FingerprintOccurrence> {
        self.occurrences.iter().find(|o| !o.is_safe())
    }
}

// ---------------------------------------------------------------------------
// PredictiveBlock
// ---------------------------------------------------------------------------

/// Decision kind for a firewall hit. A closed single-variant enum keeps
/// the wire format explicit about what the firewall can decide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirewallDecision {
    BlockPreemptively,
}

impl fmt::Display for FirewallDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("block_preemptively")
    }
}

/// A preemptive block issued before enforcement runs, carrying the exact
/// historical match as evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictiveBlock {
    pub decision: FirewallDecision,
    pub hash: String,
    pub handoff: Handoff,
    /// Run id of the first non-safe historical occurrence.
    pub matched_run_id: String,
    pub verdict: FingerprintVerdict,
    pub evidence: FingerprintOccurrence,
}

// ---------------------------------------------------------------------------
// FingerprintIndex
// ---------------------------------------------------------------------------

/// The global fingerprint index: append-only across runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FingerprintIndex {
    entries: BTreeMap<String, FingerprintIndexEntry>,
}

impl FingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one occurrence and recompute the entry's verdict. The verdict
    /// is monotone: a recomputation can never move it back toward `Safe`.
    pub fn record(&mut self, fingerprint: &CausalFingerprint, occurrence: FingerprintOccurrence) {
        let entry = self
            .entries
            .entry(fingerprint.hash.clone())
            .or_insert_with(|| FingerprintIndexEntry {
                hash: fingerprint.hash.clone(),
                occurrences: Vec::new(),
                verdict: FingerprintVerdict::Safe,
            });
        entry.occurrences.push(occurrence);
        entry.verdict = entry.verdict.max(entry.recompute_verdict());
    }

    pub fn entry(&self, hash: &str) -> Option<&FingerprintIndexEntry> {
        self.entries.get(hash)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact-match circuit breaker: block when this fingerprint's hash has
    /// a non-safe history. Unknown hashes never block.
    pub fn check_hash(&self, fingerprint: &CausalFingerprint) -> Option<PredictiveBlock> {
        let entry = self.entries.get(&fingerprint.hash)?;
        if entry.verdict == FingerprintVerdict::Safe {
            return None;
        }
        let evidence = entry.first_non_safe()?.clone();
        warn!(
            hash = %fingerprint.hash,
            handoff = %fingerprint.handoff,
            matched_run = %evidence.run_id,
            verdict = %entry.verdict,
            "preemptive block: fingerprint matches non-safe history"
        );
        Some(PredictiveBlock {
            decision: FirewallDecision::BlockPreemptively,
            hash: fingerprint.hash.clone(),
            handoff: fingerprint.handoff,
            matched_run_id: evidence.run_id.clone(),
            verdict: entry.verdict,
            evidence,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
