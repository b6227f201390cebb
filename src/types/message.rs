//! Structural data model for binary-protocol message definitions.
//!
//! One `MessageDefinition` is a single source's claim about a message's wire
//! layout. Multiple (potentially disagreeing) definitions of the same message
//! are reconciled by the voting pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Byte offset of a field within a message payload.
///
/// Variable-position fields (e.g. trailing blocks whose position depends on a
/// count field) carry a formula string instead of a fixed integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ByteOffset {
    Fixed(i64),
    Formula(String),
}

impl ByteOffset {
    /// The fixed offset, if this is not a formula.
    pub fn fixed(&self) -> Option<i64> {
        match self {
            ByteOffset::Fixed(n) => Some(*n),
            ByteOffset::Formula(_) => None,
        }
    }
}

impl Default for ByteOffset {
    fn default() -> Self {
        ByteOffset::Fixed(0)
    }
}

impl fmt::Display for ByteOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteOffset::Fixed(n) => write!(f, "{}", n),
            ByteOffset::Formula(s) => write!(f, "{}", s),
        }
    }
}

/// Element count of an array field.
///
/// `Variable` holds the count expression as written by the source
/// ("N", "numCh", "variable", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArrayCount {
    Fixed(u32),
    Variable(String),
}

impl fmt::Display for ArrayCount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayCount::Fixed(n) => write!(f, "{}", n),
            ArrayCount::Variable(s) => write!(f, "{}", s),
        }
    }
}

/// Tagged data type of a field: either a scalar code ("U4", "X1", ...) or an
/// array of a scalar code.
///
/// JSON shapes accepted at the boundary: a bare string for scalars, or
/// `{"array_of": "U1", "count": 4}` for arrays. Anything else is rejected at
/// deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataType {
    Scalar(String),
    Array { array_of: String, count: ArrayCount },
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Scalar(code) => write!(f, "{}", code),
            DataType::Array { array_of, count } => write!(f, "{}[{}]", array_of, count),
        }
    }
}

/// One named bit (or bit range) inside a bitfield-typed field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitSpec {
    pub name: String,
    #[serde(default)]
    pub bit_start: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit_end: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reserved: bool,
}

/// Bit-level breakdown of a field (secondary annotation, excluded from
/// fingerprints).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BitfieldSpec {
    #[serde(default)]
    pub bits: Vec<BitSpec>,
}

/// One entry of an enumerated value table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumValue {
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Enumerated value table of a field (secondary annotation, excluded from
/// fingerprints).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnumerationSpec {
    #[serde(default)]
    pub values: Vec<EnumValue>,
}

/// A single field of a message payload as described by one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default)]
    pub byte_offset: ByteOffset,
    #[serde(default = "FieldDescriptor::default_data_type")]
    pub data_type: DataType,
    /// Explicit size override; when absent the size is derived from the type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitfield: Option<BitfieldSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enumeration: Option<EnumerationSpec>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub reserved: bool,
}

impl FieldDescriptor {
    fn default_data_type() -> DataType {
        DataType::Scalar("U1".to_string())
    }

    /// Minimal descriptor for tests and programmatic construction.
    pub fn new(name: &str, byte_offset: i64, data_type: DataType) -> Self {
        FieldDescriptor {
            name: name.to_string(),
            byte_offset: ByteOffset::Fixed(byte_offset),
            data_type,
            size_bytes: None,
            description: None,
            unit: None,
            scale: None,
            bitfield: None,
            enumeration: None,
            reserved: false,
        }
    }
}

/// A named sub-structure repeated within the payload, either according to a
/// count field or a fill-to-end rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatedGroup {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Name of the field holding the repetition count, when one exists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count_field: Option<String>,
    /// Free-form repeat rule ("numCh", "until end of payload", ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<String>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
}

/// Declared total payload length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadLength {
    Fixed(u32),
    Variable(String),
}

/// One source's structural description of a single protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_length: Option<PayloadLength>,
    #[serde(default)]
    pub fields: Vec<FieldDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub repeated_groups: Vec<RepeatedGroup>,
}

impl MessageDefinition {
    /// Empty definition for tests and programmatic construction.
    pub fn new(name: &str) -> Self {
        MessageDefinition {
            name: name.to_string(),
            class_id: None,
            message_id: None,
            description: None,
            payload_length: None,
            fields: Vec::new(),
            repeated_groups: Vec::new(),
        }
    }

    /// All fields in layout order: top-level fields followed by the fields of
    /// every repeated group, untagged. This is the view fingerprinting sees.
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldDescriptor> {
        self.fields
            .iter()
            .chain(self.repeated_groups.iter().flat_map(|g| g.fields.iter()))
    }

    /// Total field count including repeated-group fields.
    pub fn field_count(&self) -> usize {
        self.all_fields().count()
    }
}
