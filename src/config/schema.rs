use crate::anchor::{AnchorSpec, Occurrence};
use crate::locate::TargetLocator;
use crate::marker;
use crate::transform::Transform;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

/// A declarative patch set: metadata plus an ordered list of units.
///
/// Order is the caller's responsibility; units are executed strictly in
/// list order with no dependency analysis.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct PatchSet {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub units: Vec<PatchUnit>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One self-contained patch: target, anchors, transforms, and the unit id
/// doubling as the idempotency marker embedded in the patched text.
#[derive(Debug, Deserialize, Clone)]
pub struct PatchUnit {
    pub id: String,
    pub target: TargetLocator,
    #[serde(default)]
    pub anchors: Vec<AnchorSpec>,
    #[serde(default)]
    pub transforms: Vec<Transform>,
    /// A critical unit's failure halts the whole run.
    #[serde(default)]
    pub critical: bool,
}

impl PatchSet {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.units.is_empty() {
            issues.push(ValidationIssue::EmptyUnitList);
        }

        let mut seen_ids = HashSet::new();
        for unit in &self.units {
            if unit.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    unit_id: None,
                    field: "id",
                });
                continue;
            }
            if !seen_ids.insert(unit.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId {
                    id: unit.id.clone(),
                });
            }

            if unit.transforms.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    unit_id: Some(unit.id.clone()),
                    field: "transforms",
                });
                continue;
            }

            for (idx, anchor) in unit.anchors.iter().enumerate() {
                validate_anchor(&mut issues, &unit.id, idx, anchor);
            }

            for (idx, transform) in unit.transforms.iter().enumerate() {
                validate_transform(&mut issues, unit, idx, transform);
            }

            // The marker must ride on the first transform, so a run that
            // crashed mid-unit is still detected as applied on retry.
            if !marker::first_transform_carries_marker(&unit.transforms, &unit.id) {
                issues.push(ValidationIssue::InvalidUnit {
                    unit_id: unit.id.clone(),
                    message: "idempotency marker (the unit id) must appear in the first \
                              transform's payload"
                        .to_string(),
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

fn validate_anchor(
    issues: &mut Vec<ValidationIssue>,
    unit_id: &str,
    idx: usize,
    anchor: &AnchorSpec,
) {
    match anchor {
        AnchorSpec::Literal {
            pattern,
            occurrence,
        } => {
            if pattern.is_empty() {
                issues.push(ValidationIssue::InvalidUnit {
                    unit_id: unit_id.to_string(),
                    message: format!("anchor #{idx} has an empty pattern"),
                });
            }
            check_occurrence(issues, unit_id, idx, *occurrence);
        }
        AnchorSpec::Regex {
            pattern,
            occurrence,
        } => {
            if let Err(e) = Regex::new(pattern) {
                issues.push(ValidationIssue::InvalidUnit {
                    unit_id: unit_id.to_string(),
                    message: format!("anchor #{idx} has an invalid regex: {e}"),
                });
            }
            check_occurrence(issues, unit_id, idx, *occurrence);
        }
        AnchorSpec::BoundedRegion {
            start_pattern,
            end_pattern,
        } => {
            if start_pattern.is_empty() || end_pattern.is_empty() {
                issues.push(ValidationIssue::InvalidUnit {
                    unit_id: unit_id.to_string(),
                    message: format!("anchor #{idx} has an empty region pattern"),
                });
            }
        }
    }
}

fn check_occurrence(
    issues: &mut Vec<ValidationIssue>,
    unit_id: &str,
    idx: usize,
    occurrence: Occurrence,
) {
    if occurrence == Occurrence::Nth(0) {
        issues.push(ValidationIssue::InvalidUnit {
            unit_id: unit_id.to_string(),
            message: format!("anchor #{idx}: occurrence nth is 1-based; nth = 0 is invalid"),
        });
    }
}

fn validate_transform(
    issues: &mut Vec<ValidationIssue>,
    unit: &PatchUnit,
    idx: usize,
    transform: &Transform,
) {
    if transform.payload().is_empty() {
        issues.push(ValidationIssue::InvalidUnit {
            unit_id: unit.id.clone(),
            message: format!("transform #{idx} has an empty payload"),
        });
    }

    if let Some(anchor_idx) = transform.anchor_index() {
        match unit.anchors.get(anchor_idx) {
            None => issues.push(ValidationIssue::InvalidUnit {
                unit_id: unit.id.clone(),
                message: format!(
                    "transform #{idx} references anchor #{anchor_idx} but the unit declares {}",
                    unit.anchors.len()
                ),
            }),
            Some(anchor) => {
                if matches!(transform, Transform::RegexSubstitute { .. })
                    && !matches!(anchor, AnchorSpec::Regex { .. })
                {
                    issues.push(ValidationIssue::InvalidUnit {
                        unit_id: unit.id.clone(),
                        message: format!(
                            "transform #{idx} is a regex-substitute but anchor #{anchor_idx} \
                             is not a regex anchor"
                        ),
                    });
                }
            }
        }
    }

    if let Some(scope_idx) = transform.scope_index() {
        match unit.anchors.get(scope_idx) {
            None => issues.push(ValidationIssue::InvalidUnit {
                unit_id: unit.id.clone(),
                message: format!(
                    "transform #{idx} scopes to anchor #{scope_idx} but the unit declares {}",
                    unit.anchors.len()
                ),
            }),
            Some(anchor) => {
                if !matches!(anchor, AnchorSpec::BoundedRegion { .. }) {
                    issues.push(ValidationIssue::InvalidUnit {
                        unit_id: unit.id.clone(),
                        message: format!(
                            "transform #{idx} scope anchor #{scope_idx} must be a bounded region"
                        ),
                    });
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    EmptyUnitList,
    MissingField {
        unit_id: Option<String>,
        field: &'static str,
    },
    DuplicateId {
        id: String,
    },
    InvalidUnit {
        unit_id: String,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::EmptyUnitList => write!(f, "patch set contains no units"),
            ValidationIssue::MissingField { unit_id, field } => match unit_id {
                Some(id) => write!(f, "unit '{id}' missing required field '{field}'"),
                None => write!(f, "unit missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId { id } => {
                write!(f, "unit id '{id}' is not unique within the patch set")
            }
            ValidationIssue::InvalidUnit { unit_id, message } => {
                write!(f, "unit '{unit_id}' has invalid configuration: {message}")
            }
        }
    }
}
