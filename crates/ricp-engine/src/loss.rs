//! Loss-class taxonomy for structural degradation.
//!
//! Every detected degradation at a handoff is classified into exactly one
//! of eight ordinal classes, from total omission (the strongest possible
//! loss) down to schema mismatch. The ordinal rank is stable and is part of
//! the canonical serialization of budgets, fingerprints, and directives.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// LossClass
// ---------------------------------------------------------------------------

/// Severity taxonomy of a structural loss, L0 through L7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LossClass {
    /// L0: the shape's content is entirely absent from the target artifact.
    TotalOmission,
    /// L1: some required attributes are absent from the target artifact.
    PartialOmission,
    /// L2: content survives but is cut short.
    Truncation,
    /// L3: content survives in compressed, summarized form.
    Summarization,
    /// L4: content survives but its meaning was rewritten.
    Transformation,
    /// L5: nested structure was flattened into an undifferentiated blob.
    StructuralCollapse,
    /// L6: a declared dependency between attributes was dropped.
    DependencySkip,
    /// L7: content survives under a schema the consumer cannot read.
    SchemaMismatch,
}

impl LossClass {
    /// All loss classes in ordinal order.
    pub const ALL: [LossClass; 8] = [
        LossClass::TotalOmission,
        LossClass::PartialOmission,
        LossClass::Truncation,
        LossClass::Summarization,
        LossClass::Transformation,
        LossClass::StructuralCollapse,
        LossClass::DependencySkip,
        LossClass::SchemaMismatch,
    ];

    /// Ordinal rank: 0 for `TotalOmission` through 7 for `SchemaMismatch`.
    pub fn rank(self) -> u8 {
        match self {
            Self::TotalOmission => 0,
            Self::PartialOmission => 1,
            Self::Truncation => 2,
            Self::Summarization => 3,
            Self::Transformation => 4,
            Self::StructuralCollapse => 5,
            Self::DependencySkip => 6,
            Self::SchemaMismatch => 7,
        }
    }

    /// The `L<n>` label used in evidence records.
    pub fn label(self) -> &'static str {
        match self {
            Self::TotalOmission => "L0",
            Self::PartialOmission => "L1",
            Self::Truncation => "L2",
            Self::Summarization => "L3",
            Self::Transformation => "L4",
            Self::StructuralCollapse => "L5",
            Self::DependencySkip => "L6",
            Self::SchemaMismatch => "L7",
        }
    }

    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TotalOmission => "total_omission",
            Self::PartialOmission => "partial_omission",
            Self::Truncation => "truncation",
            Self::Summarization => "summarization",
            Self::Transformation => "transformation",
            Self::StructuralCollapse => "structural_collapse",
            Self::DependencySkip => "dependency_skip",
            Self::SchemaMismatch => "schema_mismatch",
        }
    }

    /// Whether this class is an omission (total or partial).
    pub fn is_omission(self) -> bool {
        matches!(self, Self::TotalOmission | Self::PartialOmission)
    }
}

impl fmt::Display for LossClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.label(), self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_are_dense_and_ordered() {
        for (i, class) in LossClass::ALL.iter().enumerate() {
            assert_eq!(class.rank() as usize, i);
        }
    }

    #[test]
    fn labels_match_ranks() {
        for class in LossClass::ALL {
            assert_eq!(class.label(), format!("L{}", class.rank()));
        }
    }

    #[test]
    fn enum_ordering_matches_rank_ordering() {
        let mut sorted = LossClass::ALL;
        sorted.sort();
        assert_eq!(sorted, LossClass::ALL);
    }

    #[test]
    fn omission_covers_exactly_l0_and_l1() {
        let omissions: Vec<LossClass> = LossClass::ALL
            .into_iter()
            .filter(|c| c.is_omission())
            .collect();
        assert_eq!(
            omissions,
            vec![LossClass::TotalOmission, LossClass::PartialOmission]
        );
    }

    #[test]
    fn display_carries_label_and_name() {
        assert_eq!(
            LossClass::StructuralCollapse.to_string(),
            "L5:structural_collapse"
        );
    }
}
