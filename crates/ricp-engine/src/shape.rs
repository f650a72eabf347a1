//! Shape declarations and the frozen shape catalog.
//!
//! A shape is a named requirement capability or invariant tracked across
//! the pipeline. Declarations are code-defined static data: the catalog is
//! built once at construction, validated, and never mutated afterwards.
//! There is no runtime registration path; catalog changes ship as new
//! catalog data, not as setter calls.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::loss::LossClass;
use crate::stage::PipelineStage;

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// Whether a shape describes stateful behavior, stateless presentation, or
/// control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShapeCategory {
    Stateful,
    Stateless,
    Control,
}

impl ShapeCategory {
    /// All categories, in canonical order.
    pub const ALL: [ShapeCategory; 3] = [
        ShapeCategory::Stateful,
        ShapeCategory::Stateless,
        ShapeCategory::Control,
    ];

    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stateful => "stateful",
            Self::Stateless => "stateless",
            Self::Control => "control",
        }
    }
}

impl fmt::Display for ShapeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a shape is a hard invariant or a capability.
///
/// Invariants tolerate zero loss of any class; capabilities are governed by
/// their criticality tier's law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShapeKind {
    Invariant,
    Capability,
}

impl ShapeKind {
    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invariant => "invariant",
            Self::Capability => "capability",
        }
    }
}

impl fmt::Display for ShapeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Criticality tier of a shape. Each tier carries its own survival law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Criticality {
    /// Zero tolerance: the shape must survive fully or the run is blocked.
    Foundational,
    /// Narrow tolerance: high survival required, forking on violation.
    Interactive,
    /// Loose tolerance: degradation is reported, not enforced.
    Enhancement,
}

impl Criticality {
    /// All tiers, most severe first.
    pub const ALL: [Criticality; 3] = [
        Criticality::Foundational,
        Criticality::Interactive,
        Criticality::Enhancement,
    ];

    /// Stable string name used in logs and canonical serialization.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Foundational => "foundational",
            Self::Interactive => "interactive",
            Self::Enhancement => "enhancement",
        }
    }
}

impl fmt::Display for Criticality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ShapeDeclaration
// ---------------------------------------------------------------------------

/// A single shape declaration: one named capability or invariant, its
/// required structural attributes, how far down the pipeline it must
/// survive, and which loss classes it forbids outright.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeDeclaration {
    /// Unique shape identifier, e.g. `PAGINATION_CAPABILITY`.
    pub id: String,
    pub category: ShapeCategory,
    pub kind: ShapeKind,
    pub criticality: Criticality,
    /// Attributes that must be present for the shape to count as preserved.
    pub required_attributes: BTreeSet<String>,
    /// Attributes tracked but not counted against survival.
    pub optional_attributes: BTreeSet<String>,
    /// The furthest stage the shape must reach intact.
    pub must_reach: PipelineStage,
    /// Loss classes this shape forbids at any handoff. For an invariant this
    /// covers every class.
    pub forbidden_losses: BTreeSet<LossClass>,
}

impl ShapeDeclaration {
    /// Declare a capability shape.
    pub fn capability(
        id: impl Into<String>,
        category: ShapeCategory,
        criticality: Criticality,
        required: &[&str],
        must_reach: PipelineStage,
        forbidden: &[LossClass],
    ) -> Self {
        Self {
            id: id.into(),
            category,
            kind: ShapeKind::Capability,
            criticality,
            required_attributes: required.iter().map(|a| (*a).to_string()).collect(),
            optional_attributes: BTreeSet::new(),
            must_reach,
            forbidden_losses: forbidden.iter().copied().collect(),
        }
    }

    /// Declare an invariant shape. Invariants forbid every loss class.
    pub fn invariant(
        id: impl Into<String>,
        category: ShapeCategory,
        criticality: Criticality,
        required: &[&str],
        must_reach: PipelineStage,
    ) -> Self {
        Self {
            id: id.into(),
            category,
            kind: ShapeKind::Invariant,
            criticality,
            required_attributes: required.iter().map(|a| (*a).to_string()).collect(),
            optional_attributes: BTreeSet::new(),
            must_reach,
            forbidden_losses: LossClass::ALL.into_iter().collect(),
        }
    }

    /// Attach optional attributes to the declaration.
    pub fn with_optional(mut self, optional: &[&str]) -> Self {
        self.optional_attributes = optional.iter().map(|a| (*a).to_string()).collect();
        self
    }
}

// ---------------------------------------------------------------------------
// CatalogError
// ---------------------------------------------------------------------------

/// Configuration-integrity errors surfaced by catalog validation. These are
/// never auto-corrected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogError {
    /// A declaration carries no required attributes.
    EmptyRequiredAttributes { shape_id: String },
    /// A declaration carries no forbidden-loss classes at all.
    EmptyForbiddenLosses { shape_id: String },
    /// An invariant declaration fails to forbid every loss class.
    IncompleteInvariantForbiddance {
        shape_id: String,
        missing: Vec<LossClass>,
    },
    /// Two declarations share an id.
    DuplicateShapeId { shape_id: String },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequiredAttributes { shape_id } => {
                write!(f, "shape {shape_id} declares no required attributes")
            }
            Self::EmptyForbiddenLosses { shape_id } => {
                write!(f, "shape {shape_id} declares no forbidden loss classes")
            }
            Self::IncompleteInvariantForbiddance { shape_id, missing } => write!(
                f,
                "invariant shape {shape_id} fails to forbid {} loss class(es)",
                missing.len()
            ),
            Self::DuplicateShapeId { shape_id } => {
                write!(f, "duplicate shape id {shape_id}")
            }
        }
    }
}

impl std::error::Error for CatalogError {}

// ---------------------------------------------------------------------------
// ShapeCatalog
// ---------------------------------------------------------------------------

/// The frozen catalog of shape declarations.
///
/// Constructed once from static data; exposes lookups only. Construction
/// validates every declaration and fails closed on the first defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeCatalog {
    shapes: std::collections::BTreeMap<String, ShapeDeclaration>,
}

impl ShapeCatalog {
    /// Build and validate a catalog from a declaration list.
    pub fn new(declarations: Vec<ShapeDeclaration>) -> Result<Self, CatalogError> {
        let mut shapes = std::collections::BTreeMap::new();
        for decl in declarations {
            if shapes.contains_key(&decl.id) {
                return Err(CatalogError::DuplicateShapeId { shape_id: decl.id });
            }
            shapes.insert(decl.id.clone(), decl);
        }
        let catalog = Self { shapes };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Validate every declaration: non-empty required attributes, non-empty
    /// forbidden-loss list, and complete forbiddance for invariants.
    pub fn validate(&self) -> Result<(), CatalogError> {
        for decl in self.shapes.values() {
            if decl.required_attributes.is_empty() {
                return Err(CatalogError::EmptyRequiredAttributes {
                    shape_id: decl.id.clone(),
                });
            }
            if decl.forbidden_losses.is_empty() {
                return Err(CatalogError::EmptyForbiddenLosses {
                    shape_id: decl.id.clone(),
                });
            }
            if decl.kind == ShapeKind::Invariant {
                let missing: Vec<LossClass> = LossClass::ALL
                    .into_iter()
                    .filter(|c| !decl.forbidden_losses.contains(c))
                    .collect();
                if !missing.is_empty() {
                    return Err(CatalogError::IncompleteInvariantForbiddance {
                        shape_id: decl.id.clone(),
                        missing,
                    });
                }
            }
        }
        Ok(())
    }

    /// Look up a declaration by id.
    pub fn shape(&self, id: &str) -> Option<&ShapeDeclaration> {
        self.shapes.get(id)
    }

    /// All declarations in a category, in id order.
    pub fn shapes_by_category(&self, category: ShapeCategory) -> Vec<&ShapeDeclaration> {
        self.shapes
            .values()
            .filter(|d| d.category == category)
            .collect()
    }

    /// All declarations in a criticality tier, in id order.
    pub fn shapes_by_criticality(&self, tier: Criticality) -> Vec<&ShapeDeclaration> {
        self.shapes
            .values()
            .filter(|d| d.criticality == tier)
            .collect()
    }

    /// Whether `shape_id` must still be intact at `stage`.
    pub fn must_survive_to(&self, shape_id: &str, stage: PipelineStage) -> bool {
        self.shapes
            .get(shape_id)
            .is_some_and(|d| stage <= d.must_reach)
    }

    /// Iterate all declarations in id order.
    pub fn iter(&self) -> impl Iterator<Item = &ShapeDeclaration> {
        self.shapes.values()
    }

    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Built-in catalog
// ---------------------------------------------------------------------------

/// The shapes tracked for the upstream content pipeline, as shipped.
pub fn builtin_catalog() -> ShapeCatalog {
    use Criticality::*;
    use LossClass::*;
    use PipelineStage::*;
    use ShapeCategory::*;

    let declarations = vec![
        ShapeDeclaration::capability(
            "STATIC_DISPLAY_CAPABILITY",
            Stateless,
            Foundational,
            &["layout_tree", "content_slots", "typography_scale"],
            Emission,
            &LossClass::ALL,
        ),
        ShapeDeclaration::capability(
            "NAVIGATION_CAPABILITY",
            Control,
            Foundational,
            &["route_table", "link_targets", "active_state"],
            Emission,
            &LossClass::ALL,
        ),
        ShapeDeclaration::capability(
            "PAGINATION_CAPABILITY",
            Stateful,
            Interactive,
            &[
                "page_size",
                "page_cursor",
                "total_count",
                "boundary_controls",
                "page_state_binding",
            ],
            Emission,
            &[TotalOmission, PartialOmission, StructuralCollapse, SchemaMismatch],
        ),
        ShapeDeclaration::capability(
            "FORM_VALIDATION_CAPABILITY",
            Stateful,
            Interactive,
            &["field_rules", "error_surface", "submit_guard"],
            Emission,
            &[TotalOmission, StructuralCollapse, DependencySkip, SchemaMismatch],
        ),
        ShapeDeclaration::capability(
            "RESPONSIVE_LAYOUT_CAPABILITY",
            Stateless,
            Enhancement,
            &["breakpoint_map", "fluid_columns"],
            PixelRender,
            &[TotalOmission, SchemaMismatch],
        )
        .with_optional(&["container_queries"]),
        ShapeDeclaration::capability(
            "MOTION_CAPABILITY",
            Stateless,
            Enhancement,
            &["transition_specs", "reduced_motion_fallback"],
            PixelRender,
            &[TotalOmission],
        ),
        ShapeDeclaration::invariant(
            "AUTH_FLOW_INVARIANT",
            Control,
            Foundational,
            &["guarded_routes", "session_check", "redirect_contract"],
            Emission,
        ),
        ShapeDeclaration::invariant(
            "THEME_TOKEN_INVARIANT",
            Stateless,
            Interactive,
            &["token_references", "no_raw_color_literals"],
            Emission,
        ),
    ];

    // The builtin data is validated by construction; a defect here is a
    // build-time bug, not a runtime condition.
    ShapeCatalog::new(declarations).unwrap_or_else(|e| panic!("builtin catalog invalid: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_capability(id: &str) -> ShapeDeclaration {
        ShapeDeclaration::capability(
            id,
            ShapeCategory::Stateless,
            Criticality::Enhancement,
            &["attr_a"],
            PipelineStage::Emission,
            &[LossClass::TotalOmission],
        )
    }

    #[test]
    fn builtin_catalog_validates() {
        let catalog = builtin_catalog();
        assert!(catalog.validate().is_ok());
        assert!(catalog.len() >= 8);
    }

    #[test]
    fn invariant_ctor_forbids_every_class() {
        let decl = ShapeDeclaration::invariant(
            "X_INVARIANT",
            ShapeCategory::Control,
            Criticality::Foundational,
            &["a"],
            PipelineStage::Emission,
        );
        assert_eq!(decl.forbidden_losses.len(), LossClass::ALL.len());
    }

    #[test]
    fn empty_required_attributes_rejected() {
        let mut decl = minimal_capability("EMPTY_REQ");
        decl.required_attributes.clear();
        let err = ShapeCatalog::new(vec![decl]).unwrap_err();
        assert_eq!(
            err,
            CatalogError::EmptyRequiredAttributes {
                shape_id: "EMPTY_REQ".to_string()
            }
        );
    }

    #[test]
    fn empty_forbidden_losses_rejected() {
        let mut decl = minimal_capability("EMPTY_FORBID");
        decl.forbidden_losses.clear();
        let err = ShapeCatalog::new(vec![decl]).unwrap_err();
        assert_eq!(
            err,
            CatalogError::EmptyForbiddenLosses {
                shape_id: "EMPTY_FORBID".to_string()
            }
        );
    }

    #[test]
    fn invariant_with_gap_in_forbiddance_rejected() {
        let mut decl = ShapeDeclaration::invariant(
            "GAPPY_INVARIANT",
            ShapeCategory::Control,
            Criticality::Foundational,
            &["a"],
            PipelineStage::Emission,
        );
        decl.forbidden_losses.remove(&LossClass::Summarization);
        let err = ShapeCatalog::new(vec![decl]).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::IncompleteInvariantForbiddance { ref shape_id, ref missing }
                if shape_id == "GAPPY_INVARIANT" && missing == &vec![LossClass::Summarization]
        ));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let err =
            ShapeCatalog::new(vec![minimal_capability("DUP"), minimal_capability("DUP")])
                .unwrap_err();
        assert_eq!(
            err,
            CatalogError::DuplicateShapeId {
                shape_id: "DUP".to_string()
            }
        );
    }

    #[test]
    fn must_survive_to_respects_target_stage() {
        let catalog = builtin_catalog();
        assert!(catalog.must_survive_to("RESPONSIVE_LAYOUT_CAPABILITY", PipelineStage::Wireframe));
        assert!(catalog.must_survive_to("RESPONSIVE_LAYOUT_CAPABILITY", PipelineStage::PixelRender));
        assert!(!catalog.must_survive_to("RESPONSIVE_LAYOUT_CAPABILITY", PipelineStage::Emission));
        assert!(!catalog.must_survive_to("NO_SUCH_SHAPE", PipelineStage::Intake));
    }

    #[test]
    fn category_and_tier_queries_filter() {
        let catalog = builtin_catalog();
        for decl in catalog.shapes_by_category(ShapeCategory::Control) {
            assert_eq!(decl.category, ShapeCategory::Control);
        }
        let foundational = catalog.shapes_by_criticality(Criticality::Foundational);
        assert!(foundational.iter().any(|d| d.id == "STATIC_DISPLAY_CAPABILITY"));
        assert!(foundational.iter().any(|d| d.id == "AUTH_FLOW_INVARIANT"));
    }
}
