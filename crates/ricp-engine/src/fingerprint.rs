//! Causal fingerprints: content-addressed hashes of handoff
//! transformations.
//!
//! A fingerprint is computed only from structural fields: the handoff,
//! sorted shape-id lists, sorted lost/degraded attribute lists, and the
//! summarization invocation. Free-text content never enters the hash, so
//! the same structural transformation always produces the same hash with
//! no incidental entropy. Hashes are SHA-256 truncated to 16 bytes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::shape::{ShapeCatalog, ShapeKind};
use crate::stage::{Handoff, PipelineStage};
use crate::trace::ShapeTraceResult;

/// Truncated digest length in bytes.
const FINGERPRINT_BYTES: usize = 16;

// ---------------------------------------------------------------------------
// CausalFingerprint
// ---------------------------------------------------------------------------

/// Content hash of one handoff's structural transformation, with the
/// structural fields it was computed from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CausalFingerprint {
    /// `sha256:<32 hex chars>`, truncated digest over the canonical
    /// structural encoding.
    pub hash: String,
    pub handoff: Handoff,
    pub source_stage: PipelineStage,
    pub target_stage: PipelineStage,
    /// Shape ids with evidence at the source stage, sorted.
    pub input_shapes: Vec<String>,
    /// Shape ids with evidence at the target stage, sorted.
    pub output_shapes: Vec<String>,
    /// Attributes lost at this handoff across all shapes, sorted.
    pub lost_attributes: Vec<String>,
    /// Attributes degraded at this handoff across all shapes, sorted.
    pub degraded_attributes: Vec<String>,
    pub summarization_applied: bool,
    pub summarization_ratio_millionths: Option<i64>,
    /// Invariant-kind shapes among the inputs, sorted.
    pub invariant_shapes_present: Vec<String>,
}

// ---------------------------------------------------------------------------
// FingerprintCollector
// ---------------------------------------------------------------------------

/// Derives one fingerprint per handoff from the run's trace data.
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintCollector;

impl FingerprintCollector {
    /// Fingerprint a single handoff.
    pub fn collect(
        &self,
        catalog: &ShapeCatalog,
        traces: &[ShapeTraceResult],
        handoff: Handoff,
    ) -> CausalFingerprint {
        let mut input_shapes = BTreeSet::new();
        let mut output_shapes = BTreeSet::new();
        let mut lost = BTreeSet::new();
        let mut degraded = BTreeSet::new();
        let mut invariants = BTreeSet::new();
        let mut summarization_applied = false;
        let mut summarization_ratio: Option<i64> = None;

        for trace in traces {
            if trace.evidence_at(handoff.source()).is_some() {
                input_shapes.insert(trace.shape_id.clone());
                if catalog
                    .shape(&trace.shape_id)
                    .is_some_and(|d| d.kind == ShapeKind::Invariant)
                {
                    invariants.insert(trace.shape_id.clone());
                }
            }
            if trace.evidence_at(handoff.target()).is_some() {
                output_shapes.insert(trace.shape_id.clone());
            }
            if let Some(evidence) = trace.evidence_at(handoff.target()) {
                if evidence.summarization_applied {
                    summarization_applied = true;
                    // The strongest compression observed wins: smallest ratio.
                    summarization_ratio = match (summarization_ratio, evidence.summarization_ratio_millionths)
                    {
                        (Some(a), Some(b)) => Some(a.min(b)),
                        (a, b) => a.or(b),
                    };
                }
            }
            for loss in trace.losses_at(handoff) {
                lost.extend(loss.attributes_lost.iter().cloned());
                degraded.extend(loss.attributes_degraded.iter().cloned());
            }
        }

        let input_shapes: Vec<String> = input_shapes.into_iter().collect();
        let output_shapes: Vec<String> = output_shapes.into_iter().collect();
        let lost_attributes: Vec<String> = lost.into_iter().collect();
        let degraded_attributes: Vec<String> = degraded.into_iter().collect();
        let invariant_shapes_present: Vec<String> = invariants.into_iter().collect();

        let hash = fingerprint_hash(
            handoff,
            &input_shapes,
            &output_shapes,
            &lost_attributes,
            &degraded_attributes,
            summarization_applied,
            summarization_ratio,
            &invariant_shapes_present,
        );

        CausalFingerprint {
            hash,
            handoff,
            source_stage: handoff.source(),
            target_stage: handoff.target(),
            input_shapes,
            output_shapes,
            lost_attributes,
            degraded_attributes,
            summarization_applied,
            summarization_ratio_millionths: summarization_ratio,
            invariant_shapes_present,
        }
    }

    /// Fingerprint every handoff of the pipeline, in order.
    pub fn collect_all(
        &self,
        catalog: &ShapeCatalog,
        traces: &[ShapeTraceResult],
    ) -> Vec<CausalFingerprint> {
        Handoff::ALL
            .iter()
            .map(|h| self.collect(catalog, traces, *h))
            .collect()
    }
}

/// Canonical structural encoding, hashed and truncated.
#[allow(clippy::too_many_arguments)]
fn fingerprint_hash(
    handoff: Handoff,
    input_shapes: &[String],
    output_shapes: &[String],
    lost: &[String],
    degraded: &[String],
    summarization_applied: bool,
    summarization_ratio: Option<i64>,
    invariants: &[String],
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(handoff.as_str().as_bytes());
    for section in [input_shapes, output_shapes, lost, degraded, invariants] {
        hasher.update(b"|");
        for item in section {
            hasher.update(item.as_bytes());
            hasher.update(b",");
        }
    }
    hasher.update(b"|");
    hasher.update(if summarization_applied { b"1" } else { b"0" });
    if let Some(ratio) = summarization_ratio {
        hasher.update(ratio.to_be_bytes());
    }
    let digest = hasher.finalize();
    format!("sha256:{}", hex::encode(&digest[..FINGERPRINT_BYTES]))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
