//! Structural fingerprinting for message definitions.
//!
//! Computes deterministic fingerprints from message field layouts to enable
//! comparison and voting across multiple extraction sources.
//!
//! A fingerprint covers: normalized field name, byte offset, data type, size.
//! It excludes: description, unit, scale, bitfield bits, enumeration values
//! and the reserved flag - those are secondary annotations merged separately
//! after voting.

use crate::types::{ArrayCount, ByteOffset, DataType, FieldDescriptor, MessageDefinition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Sentinel offset for formula-based (variable position) fields. Sorts after
/// every fixed offset so variable-position fields never collide with fixed
/// ones.
pub const FORMULA_OFFSET: i64 = i64::MAX;

/// Size in bytes of a known scalar type code. Unknown codes default to 1 but
/// remain fingerprint-comparable through their code string.
pub fn scalar_size(code: &str) -> u32 {
    match code {
        "U1" | "I1" | "X1" | "CH" => 1,
        "U2" | "I2" | "X2" => 2,
        "U4" | "I4" | "X4" | "R4" => 4,
        "U8" | "I8" | "X8" | "R8" => 8,
        _ => 1,
    }
}

/// Whether a scalar code is one of the known type codes.
pub fn is_known_scalar(code: &str) -> bool {
    matches!(
        code,
        "U1" | "U2"
            | "U4"
            | "U8"
            | "I1"
            | "I2"
            | "I4"
            | "I8"
            | "X1"
            | "X2"
            | "X4"
            | "X8"
            | "R4"
            | "R8"
            | "CH"
    )
}

/// Normalize a field name for comparison.
///
/// Lowercases, and collapses any reserved-field name to the literal
/// `reserved` - reserved-byte numbering (`reserved0` vs `reserved1` vs
/// `reservedPad`) is a cosmetic convention that varies across sources.
pub fn normalize_field_name(name: &str) -> String {
    let normalized = name.to_lowercase();
    if normalized.starts_with("reserved") {
        return "reserved".to_string();
    }
    normalized
}

/// Normalize a data type into a comparable label and a fixed size in bytes.
///
/// Fixed arrays contribute `base_size * count`; variable-length arrays keep
/// the count expression in the label but contribute size 0, since they never
/// participate in fixed-size comparison.
pub fn normalize_data_type(data_type: &DataType) -> (String, u32) {
    match data_type {
        DataType::Scalar(code) => (code.clone(), scalar_size(code)),
        DataType::Array { array_of, count } => match count {
            ArrayCount::Fixed(n) => (
                format!("{}[{}]", array_of, n),
                scalar_size(array_of) * n,
            ),
            ArrayCount::Variable(expr) => (format!("{}[{}]", array_of, expr), 0),
        },
    }
}

/// Size in bytes of a field's declared data type (explicit override wins).
pub fn field_size(field: &FieldDescriptor) -> u32 {
    let (_, computed) = normalize_data_type(&field.data_type);
    field.size_bytes.unwrap_or(computed)
}

/// Normalized per-field data that participates in the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FieldFingerprint {
    name: String,
    byte_offset: i64,
    data_type: String,
    size: u32,
}

fn compute_field_fingerprint(field: &FieldDescriptor) -> FieldFingerprint {
    let byte_offset = match &field.byte_offset {
        ByteOffset::Fixed(n) => *n,
        ByteOffset::Formula(_) => FORMULA_OFFSET,
    };
    let (data_type, computed_size) = normalize_data_type(&field.data_type);

    FieldFingerprint {
        name: normalize_field_name(&field.name),
        byte_offset,
        data_type,
        size: field.size_bytes.unwrap_or(computed_size),
    }
}

/// Deterministic byte encoding of the sorted field tuples. Unit/record
/// separator bytes keep the encoding unambiguous without depending on any
/// serializer's escaping rules.
fn encode_field_tuples(fingerprints: &[FieldFingerprint]) -> Vec<u8> {
    let mut buf = Vec::new();
    for fp in fingerprints {
        buf.extend_from_slice(fp.name.as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(fp.byte_offset.to_string().as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(fp.data_type.as_bytes());
        buf.push(0x1f);
        buf.extend_from_slice(fp.size.to_string().as_bytes());
        buf.push(0x1e);
    }
    buf
}

fn sorted_field_fingerprints(message: &MessageDefinition) -> Vec<FieldFingerprint> {
    let mut fingerprints: Vec<FieldFingerprint> =
        message.all_fields().map(compute_field_fingerprint).collect();
    fingerprints.sort_by(|a, b| {
        (a.byte_offset, a.name.as_str()).cmp(&(b.byte_offset, b.name.as_str()))
    });
    fingerprints
}

/// Fingerprint of a structure with zero fields. A distinct sentinel rather
/// than the hash of an empty list, so two genuinely empty messages match each
/// other but never accidentally collide with a populated one.
pub fn empty_fingerprint() -> String {
    let digest = Sha256::digest(b"no_fields");
    format!("empty_{}", &hex::encode(digest)[..12])
}

/// Compute the structural fingerprint of a message definition.
///
/// SHA-256 over the deterministically encoded, (offset, name)-sorted field
/// tuples, truncated to a 16-char hex string. Fields of repeated groups are
/// flattened alongside top-level fields, untagged.
pub fn compute_fingerprint(message: &MessageDefinition) -> String {
    let fingerprints = sorted_field_fingerprints(message);
    if fingerprints.is_empty() {
        return empty_fingerprint();
    }

    let digest = Sha256::digest(encode_field_tuples(&fingerprints));
    hex::encode(digest)[..16].to_string()
}

/// Per-field breakdown backing a fingerprint, keeping the original
/// (pre-normalization) name and type for human consumption in diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDetail {
    pub original_name: String,
    pub normalized_name: String,
    pub byte_offset: i64,
    pub original_data_type: String,
    pub normalized_data_type: String,
    pub size: u32,
}

/// Detailed fingerprint: the hash plus the normalized per-field view used for
/// diffing outliers against the consensus structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedFingerprint {
    pub fingerprint: String,
    pub field_count: usize,
    pub fields: Vec<FieldDetail>,
}

/// Compute a fingerprint together with its per-field breakdown.
pub fn compute_detailed_fingerprint(message: &MessageDefinition) -> DetailedFingerprint {
    let mut details: Vec<FieldDetail> = message
        .all_fields()
        .map(|field| {
            let fp = compute_field_fingerprint(field);
            FieldDetail {
                original_name: field.name.clone(),
                normalized_name: fp.name,
                byte_offset: fp.byte_offset,
                original_data_type: field.data_type.to_string(),
                normalized_data_type: fp.data_type,
                size: fp.size,
            }
        })
        .collect();

    details.sort_by(|a, b| {
        (a.byte_offset, a.normalized_name.as_str()).cmp(&(b.byte_offset, b.normalized_name.as_str()))
    });

    DetailedFingerprint {
        fingerprint: compute_fingerprint(message),
        field_count: details.len(),
        fields: details,
    }
}

/// Classification of a single per-offset difference between two structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    MissingInFirst,
    MissingInSecond,
    FieldDiffers,
}

/// One per-offset difference, carrying both sides' original details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDiff {
    pub offset: i64,
    #[serde(rename = "type")]
    pub kind: DiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<FieldDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub second: Option<FieldDetail>,
}

/// Full comparison result between two detailed fingerprints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerprintDiff {
    pub matches: bool,
    pub fingerprint_first: String,
    pub fingerprint_second: String,
    pub field_count_delta: i64,
    pub mismatch_count: usize,
    pub mismatches: Vec<FieldDiff>,
}

/// Compare two detailed fingerprints, aligning fields by byte offset.
///
/// For every offset present in either side, emits one diff record. Fields at
/// the same offset differ when their normalized name, type label or size
/// disagree.
pub fn compare_detailed(first: &DetailedFingerprint, second: &DetailedFingerprint) -> FingerprintDiff {
    use std::collections::BTreeMap;

    let by_offset = |fp: &DetailedFingerprint| -> BTreeMap<i64, FieldDetail> {
        fp.fields
            .iter()
            .map(|f| (f.byte_offset, f.clone()))
            .collect()
    };

    let first_fields = by_offset(first);
    let second_fields = by_offset(second);

    let mut offsets: Vec<i64> = first_fields
        .keys()
        .chain(second_fields.keys())
        .copied()
        .collect();
    offsets.sort_unstable();
    offsets.dedup();

    let mut mismatches = Vec::new();
    for offset in offsets {
        match (first_fields.get(&offset), second_fields.get(&offset)) {
            (None, Some(f2)) => mismatches.push(FieldDiff {
                offset,
                kind: DiffKind::MissingInFirst,
                first: None,
                second: Some(f2.clone()),
            }),
            (Some(f1), None) => mismatches.push(FieldDiff {
                offset,
                kind: DiffKind::MissingInSecond,
                first: Some(f1.clone()),
                second: None,
            }),
            (Some(f1), Some(f2)) => {
                let same = f1.normalized_name == f2.normalized_name
                    && f1.normalized_data_type == f2.normalized_data_type
                    && f1.size == f2.size;
                if !same {
                    mismatches.push(FieldDiff {
                        offset,
                        kind: DiffKind::FieldDiffers,
                        first: Some(f1.clone()),
                        second: Some(f2.clone()),
                    });
                }
            }
            (None, None) => unreachable!(),
        }
    }

    FingerprintDiff {
        matches: mismatches.is_empty(),
        fingerprint_first: first.fingerprint.clone(),
        fingerprint_second: second.fingerprint.clone(),
        field_count_delta: first.field_count as i64 - second.field_count as i64,
        mismatch_count: mismatches.len(),
        mismatches,
    }
}
