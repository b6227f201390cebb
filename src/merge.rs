//! Superset merging of secondary annotations.
//!
//! When multiple sources agree on a message structure (same fingerprint),
//! their bitfield and enumeration tables may still differ - one manual
//! documents a bit another omits. Since these annotations do not participate
//! in the fingerprint, the winning structure unions them across all agreeing
//! sources: every documented bit and value is kept, and colliding keys keep
//! the variant with the richer description. Never a lossy intersection.

use crate::types::{BitSpec, ByteOffset, EnumValue, FieldDescriptor, MessageDefinition};
use std::collections::HashMap;

fn description_len(desc: &Option<String>) -> usize {
    desc.as_deref().map(str::len).unwrap_or(0)
}

/// Union bit definitions from several sources, keyed by bit name.
///
/// Reserved bits are skipped; for colliding names the variant with the longer
/// description wins. Result is sorted by (bit_start, name) for determinism.
pub fn merge_bitfield_bits(bits_lists: &[&[BitSpec]]) -> Vec<BitSpec> {
    let mut merged: HashMap<String, BitSpec> = HashMap::new();

    for bits in bits_lists {
        for bit in *bits {
            if bit.name.is_empty() {
                continue;
            }
            if bit.reserved || bit.name.to_lowercase().contains("reserved") {
                continue;
            }

            match merged.get(&bit.name) {
                Some(existing)
                    if description_len(&bit.description)
                        <= description_len(&existing.description) => {}
                _ => {
                    merged.insert(bit.name.clone(), bit.clone());
                }
            }
        }
    }

    let mut result: Vec<BitSpec> = merged.into_values().collect();
    result.sort_by(|a, b| (a.bit_start, a.name.as_str()).cmp(&(b.bit_start, b.name.as_str())));
    result
}

/// Union enumeration values from several sources, keyed by numeric value.
///
/// For colliding values the variant with the longer description wins. Result
/// is sorted by value.
pub fn merge_enum_values(values_lists: &[&[EnumValue]]) -> Vec<EnumValue> {
    let mut merged: HashMap<i64, EnumValue> = HashMap::new();

    for values in values_lists {
        for val in *values {
            match merged.get(&val.value) {
                Some(existing)
                    if description_len(&val.description)
                        <= description_len(&existing.description) => {}
                _ => {
                    merged.insert(val.value, val.clone());
                }
            }
        }
    }

    let mut result: Vec<EnumValue> = merged.into_values().collect();
    result.sort_by_key(|v| v.value);
    result
}

/// Stable sub-identity of a field across agreeing sources.
fn field_key(field: &FieldDescriptor) -> (String, ByteOffset) {
    (field.name.clone(), field.byte_offset.clone())
}

/// Merge bitfields and enumerations from all agreeing sources into the
/// winning structure.
///
/// Only meaningful when more than one instance shares the winning
/// fingerprint. Fields without secondary annotations pass through untouched.
pub fn merge_message_annotations(
    winning: &MessageDefinition,
    agreeing: &[&MessageDefinition],
) -> MessageDefinition {
    if winning.fields.is_empty() {
        return winning.clone();
    }

    // Collect the same field from every agreeing source
    let mut source_fields: HashMap<(String, ByteOffset), Vec<&FieldDescriptor>> = HashMap::new();
    for msg in agreeing {
        for field in &msg.fields {
            source_fields.entry(field_key(field)).or_default().push(field);
        }
    }

    let mut merged = winning.clone();
    for field in &mut merged.fields {
        let Some(variants) = source_fields.get(&field_key(field)) else {
            continue;
        };

        if let Some(bitfield) = &mut field.bitfield {
            let bits_lists: Vec<&[BitSpec]> = variants
                .iter()
                .filter_map(|f| f.bitfield.as_ref())
                .filter(|b| !b.bits.is_empty())
                .map(|b| b.bits.as_slice())
                .collect();
            if !bits_lists.is_empty() {
                bitfield.bits = merge_bitfield_bits(&bits_lists);
            }
        }

        if let Some(enumeration) = &mut field.enumeration {
            let values_lists: Vec<&[EnumValue]> = variants
                .iter()
                .filter_map(|f| f.enumeration.as_ref())
                .filter(|e| !e.values.is_empty())
                .map(|e| e.values.as_slice())
                .collect();
            if !values_lists.is_empty() {
                enumeration.values = merge_enum_values(&values_lists);
            }
        }
    }

    merged
}
