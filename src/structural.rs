//! Structural sanity checks for individual extraction instances.
//!
//! Catches the extraction errors voting cannot see from a single source:
//! offset gaps, overlapping fields, declared sizes that contradict the data
//! type, unrecognized type codes, and payload-length mismatches. Findings are
//! surfaced to operators; they never block voting.

use crate::fingerprint::is_known_scalar;
use crate::types::{DataType, FieldDescriptor, MessageDefinition, PayloadLength};
use serde::Serialize;
use std::fmt;

/// Category of a structural finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Empty,
    Gap,
    Overlap,
    SizeMismatch,
    TypeInvalid,
    LengthMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Warning => write!(f, "WARNING"),
        }
    }
}

/// One structural finding in a message definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureIssue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub field_name: String,
    pub byte_offset: i64,
    pub message: String,
}

/// Result of validating one message definition. Gaps may be intentional
/// padding, so only overlaps count as errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureReport {
    pub message_name: String,
    pub is_valid: bool,
    pub issues: Vec<StructureIssue>,
}

impl StructureReport {
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .count()
    }
}

/// Validate structural integrity of a single message definition.
///
/// Checks, over fixed-offset top-level fields in offset order:
/// 1. gaps between consecutive fields (warning)
/// 2. overlapping fields (error)
/// 3. declared size vs size computed from the type (warning)
/// 4. unrecognized scalar type codes (warning)
/// 5. declared fixed payload length vs computed span (warning)
pub fn validate_structure(message: &MessageDefinition) -> StructureReport {
    let mut issues = Vec::new();

    if message.fields.is_empty() && message.repeated_groups.is_empty() {
        return StructureReport {
            message_name: message.name.clone(),
            is_valid: true,
            issues: vec![StructureIssue {
                kind: IssueKind::Empty,
                severity: Severity::Warning,
                field_name: String::new(),
                byte_offset: 0,
                message: "Message has no fields".to_string(),
            }],
        };
    }

    let mut fixed_fields: Vec<(&FieldDescriptor, i64)> = message
        .fields
        .iter()
        .filter_map(|f| f.byte_offset.fixed().map(|offset| (f, offset)))
        .collect();
    fixed_fields.sort_by_key(|(_, offset)| *offset);

    let mut expected_offset: i64 = 0;
    for (field, byte_offset) in fixed_fields {
        let computed_size = field_size_without_override(field) as i64;

        if byte_offset > expected_offset {
            let gap = byte_offset - expected_offset;
            issues.push(StructureIssue {
                kind: IssueKind::Gap,
                severity: Severity::Warning,
                field_name: field.name.clone(),
                byte_offset,
                message: format!(
                    "Gap of {} bytes before field '{}' at offset {} (expected {})",
                    gap, field.name, byte_offset, expected_offset
                ),
            });
        }

        if byte_offset < expected_offset {
            issues.push(StructureIssue {
                kind: IssueKind::Overlap,
                severity: Severity::Error,
                field_name: field.name.clone(),
                byte_offset,
                message: format!(
                    "Field '{}' at offset {} overlaps with previous field (expected offset >= {})",
                    field.name, byte_offset, expected_offset
                ),
            });
        }

        if let Some(declared) = field.size_bytes {
            if declared as i64 != computed_size {
                issues.push(StructureIssue {
                    kind: IssueKind::SizeMismatch,
                    severity: Severity::Warning,
                    field_name: field.name.clone(),
                    byte_offset,
                    message: format!(
                        "Field '{}' declared size ({}) differs from computed size ({}) for type {}",
                        field.name, declared, computed_size, field.data_type
                    ),
                });
            }
        }

        let base_code = match &field.data_type {
            DataType::Scalar(code) => code,
            DataType::Array { array_of, .. } => array_of,
        };
        if !is_known_scalar(base_code) {
            issues.push(StructureIssue {
                kind: IssueKind::TypeInvalid,
                severity: Severity::Warning,
                field_name: field.name.clone(),
                byte_offset,
                message: format!(
                    "Field '{}' has unrecognized type '{}'",
                    field.name, field.data_type
                ),
            });
        }

        expected_offset = byte_offset + computed_size;
    }

    if let Some(PayloadLength::Fixed(declared)) = &message.payload_length {
        if expected_offset != *declared as i64 && message.repeated_groups.is_empty() {
            issues.push(StructureIssue {
                kind: IssueKind::LengthMismatch,
                severity: Severity::Warning,
                field_name: String::new(),
                byte_offset: expected_offset,
                message: format!(
                    "Computed payload length ({}) differs from declared ({})",
                    expected_offset, declared
                ),
            });
        }
    }

    let is_valid = issues.iter().all(|i| i.severity != Severity::Error);

    StructureReport {
        message_name: message.name.clone(),
        is_valid,
        issues,
    }
}

/// Size computed from the type alone, ignoring a declared override, so the
/// override can be checked against it.
fn field_size_without_override(field: &FieldDescriptor) -> u32 {
    let (_, computed) = crate::fingerprint::normalize_data_type(&field.data_type);
    computed
}

/// Validate every message of an extraction file.
pub fn validate_all(messages: &[MessageDefinition]) -> Vec<StructureReport> {
    messages.iter().map(validate_structure).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, FieldDescriptor, MessageDefinition};

    fn scalar(code: &str) -> DataType {
        DataType::Scalar(code.to_string())
    }

    fn message(fields: Vec<FieldDescriptor>) -> MessageDefinition {
        let mut msg = MessageDefinition::new("X-TEST-MSG");
        msg.fields = fields;
        msg
    }

    #[test]
    fn test_clean_structure() {
        let msg = message(vec![
            FieldDescriptor::new("iTOW", 0, scalar("U4")),
            FieldDescriptor::new("flags", 4, scalar("X1")),
            FieldDescriptor::new("numSV", 5, scalar("U1")),
        ]);
        let report = validate_structure(&msg);
        assert!(report.is_valid);
        assert!(report.issues.is_empty());
    }

    #[test]
    fn test_gap_is_warning() {
        let msg = message(vec![
            FieldDescriptor::new("iTOW", 0, scalar("U4")),
            FieldDescriptor::new("flags", 6, scalar("X1")),
        ]);
        let report = validate_structure(&msg);
        assert!(report.is_valid);
        assert_eq!(report.warning_count(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::Gap);
    }

    #[test]
    fn test_overlap_is_error() {
        let msg = message(vec![
            FieldDescriptor::new("iTOW", 0, scalar("U4")),
            FieldDescriptor::new("flags", 2, scalar("X1")),
        ]);
        let report = validate_structure(&msg);
        assert!(!report.is_valid);
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::Overlap);
    }

    #[test]
    fn test_size_mismatch_warning() {
        let mut field = FieldDescriptor::new("flags", 0, scalar("X1"));
        field.size_bytes = Some(2);
        let report = validate_structure(&message(vec![field]));
        assert!(report.is_valid);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::SizeMismatch));
    }

    #[test]
    fn test_unknown_type_warning() {
        let msg = message(vec![FieldDescriptor::new("weird", 0, scalar("Q9"))]);
        let report = validate_structure(&msg);
        assert!(report.is_valid);
        assert!(report.issues.iter().any(|i| i.kind == IssueKind::TypeInvalid));
    }

    #[test]
    fn test_payload_length_mismatch() {
        let mut msg = message(vec![
            FieldDescriptor::new("iTOW", 0, scalar("U4")),
            FieldDescriptor::new("flags", 4, scalar("X1")),
        ]);
        msg.payload_length = Some(crate::types::PayloadLength::Fixed(8));
        let report = validate_structure(&msg);
        assert!(report
            .issues
            .iter()
            .any(|i| i.kind == IssueKind::LengthMismatch));
    }

    #[test]
    fn test_empty_message_single_warning() {
        let report = validate_structure(&MessageDefinition::new("X-EMPTY"));
        assert!(report.is_valid);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].kind, IssueKind::Empty);
    }
}
