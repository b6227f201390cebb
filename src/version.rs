//! Version field detection for message definitions.
//!
//! Heuristically identifies the protocol-version field in a payload. Most
//! versioned messages carry it at offset 0 or 1 with the smallest unsigned
//! type. Absence of a version field is data, not an error: it maps to the
//! implicit version 0 of the legacy format.

use crate::types::{ByteOffset, DataType, FieldDescriptor, MessageDefinition};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

lazy_static! {
    /// Field names that designate a protocol version (anchored, case-insensitive).
    static ref VERSION_FIELD_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"^version$").unwrap(),
        Regex::new(r"^msgver$").unwrap(),
        Regex::new(r"^msg_version$").unwrap(),
        Regex::new(r"^protocolversion$").unwrap(),
        Regex::new(r"^ver$").unwrap(),
    ];

    /// Names that look version-like but are firmware/hardware discriminators,
    /// not protocol version fields.
    static ref FALSE_POSITIVE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"^swversion").unwrap(),
        Regex::new(r"^hwversion").unwrap(),
        Regex::new(r"^romversion").unwrap(),
        Regex::new(r"^fwversion").unwrap(),
        Regex::new(r"^firmware").unwrap(),
    ];

    static ref PAREN_HEX: Regex = Regex::new(r"\(0x([0-9a-fA-F]+)[\s\)]").unwrap();
    static ref ANY_HEX: Regex = Regex::new(r"0x([0-9a-fA-F]+)").unwrap();
    static ref VERSION_ASSIGN: Regex = Regex::new(r"(?i)version\s*[=:]\s*(\d+)").unwrap();
    static ref VERSION_STANDALONE: Regex = Regex::new(r"(?i)version\s+(\d+)\b").unwrap();
}

/// Confidence in a version-field detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionConfidence {
    High,
    Medium,
    Low,
    None,
}

impl fmt::Display for VersionConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionConfidence::High => "high",
            VersionConfidence::Medium => "medium",
            VersionConfidence::Low => "low",
            VersionConfidence::None => "none",
        };
        write!(f, "{}", s)
    }
}

/// Result of version field detection. Absence is modelled as
/// `detected: false`, never as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionFieldInfo {
    pub detected: bool,
    pub field_name: Option<String>,
    pub byte_offset: Option<i64>,
    /// Version value when extractable from the field description.
    pub value: Option<u32>,
    pub confidence: VersionConfidence,
    pub reason: String,
}

impl VersionFieldInfo {
    fn undetected(reason: &str) -> Self {
        VersionFieldInfo {
            detected: false,
            field_name: None,
            byte_offset: None,
            value: None,
            confidence: VersionConfidence::None,
            reason: reason.to_string(),
        }
    }
}

fn matches_version_pattern(name: &str) -> bool {
    let lower = name.to_lowercase();
    VERSION_FIELD_PATTERNS.iter().any(|p| p.is_match(&lower))
}

fn is_false_positive(name: &str) -> bool {
    let lower = name.to_lowercase();
    FALSE_POSITIVE_PATTERNS.iter().any(|p| p.is_match(&lower))
}

/// Base scalar code of a field's type; arrays resolve to their element code.
fn base_type_code(data_type: &DataType) -> &str {
    match data_type {
        DataType::Scalar(code) => code,
        DataType::Array { array_of, .. } => array_of,
    }
}

/// Try to extract a version value from a field description.
///
/// Priority: parenthesized hex literal, any hex literal, `version = N` /
/// `version: N`, standalone `version N`.
fn extract_version_value(field: &FieldDescriptor) -> Option<u32> {
    let desc = field.description.as_deref()?;

    if let Some(caps) = PAREN_HEX.captures(desc) {
        return u32::from_str_radix(&caps[1], 16).ok();
    }
    if let Some(caps) = ANY_HEX.captures(desc) {
        return u32::from_str_radix(&caps[1], 16).ok();
    }
    if let Some(caps) = VERSION_ASSIGN.captures(desc) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = VERSION_STANDALONE.captures(desc) {
        return caps[1].parse().ok();
    }
    None
}

/// Detect the protocol version field of a message.
///
/// Heuristics in priority order:
/// 1. Version-named field at offset 0 or 1 with type U1 - high confidence
/// 2. Version-named field anywhere else (excluding firmware/hardware version
///    false positives) - medium confidence if U1, else low
/// 3. Field at offset 0 whose description mentions both "version" and
///    "message" - medium confidence
/// 4. No match - implicit version 0, confidence none
pub fn detect_version_field(message: &MessageDefinition) -> VersionFieldInfo {
    let fields: Vec<&FieldDescriptor> = message.all_fields().collect();
    if fields.is_empty() {
        return VersionFieldInfo::undetected("No fields in message");
    }

    let mut fields_by_offset: BTreeMap<i64, &FieldDescriptor> = BTreeMap::new();
    for field in &fields {
        if let ByteOffset::Fixed(offset) = field.byte_offset {
            if offset >= 0 {
                fields_by_offset.insert(offset, field);
            }
        }
    }

    // Strategy 1: version-named field at offset 0 or 1 with type U1
    for offset in [0i64, 1] {
        if let Some(field) = fields_by_offset.get(&offset) {
            if matches_version_pattern(&field.name) && base_type_code(&field.data_type) == "U1" {
                return VersionFieldInfo {
                    detected: true,
                    field_name: Some(field.name.clone()),
                    byte_offset: Some(offset),
                    value: extract_version_value(field),
                    confidence: VersionConfidence::High,
                    reason: format!(
                        "Field '{}' at offset {} with type U1",
                        field.name, offset
                    ),
                };
            }
        }
    }

    // Strategy 2: version-named field anywhere, skipping false positives
    for field in &fields {
        if matches_version_pattern(&field.name) && !is_false_positive(&field.name) {
            let offset = field.byte_offset.fixed();
            let confidence = if base_type_code(&field.data_type) == "U1" {
                VersionConfidence::Medium
            } else {
                VersionConfidence::Low
            };
            return VersionFieldInfo {
                detected: true,
                field_name: Some(field.name.clone()),
                byte_offset: offset,
                value: extract_version_value(field),
                confidence,
                reason: format!(
                    "Field '{}' at offset {}",
                    field.name, field.byte_offset
                ),
            };
        }
    }

    // Strategy 3: offset-0 description mentions both version and message
    if let Some(field) = fields_by_offset.get(&0) {
        let desc = field.description.as_deref().unwrap_or("").to_lowercase();
        if desc.contains("version") && desc.contains("message") {
            return VersionFieldInfo {
                detected: true,
                field_name: Some(field.name.clone()),
                byte_offset: Some(0),
                value: extract_version_value(field),
                confidence: VersionConfidence::Medium,
                reason: "Field at offset 0 description mentions version".to_string(),
            };
        }
    }

    VersionFieldInfo::undetected("No version field detected, using implicit version 0")
}

/// Protocol version bucket for a message.
///
/// No version field detected -> 0 (implicit legacy format). Detected with a
/// parseable value -> that value. Detected but unparseable -> 1: the presence
/// of an explicit version field signals a newer revision than its absence,
/// which defaults to 0.
pub fn protocol_version(message: &MessageDefinition) -> u32 {
    let info = detect_version_field(message);
    if !info.detected {
        return 0;
    }
    info.value.unwrap_or(1)
}
