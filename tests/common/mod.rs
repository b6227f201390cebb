//! Common Test Utilities
//!
//! Shared fixture builders for integration tests: extraction files written
//! into temporary inbox directories, plus canned message definitions.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs;
use std::path::Path;

/// Read a JSON file back for assertions.
pub fn read_json(path: &Path) -> anyhow::Result<Value> {
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}

/// Write one extraction file into an inbox directory.
pub fn write_extraction(dir: &Path, filename: &str, source_id: &str, messages: Vec<Value>) {
    let body = json!({
        "source_id": source_id,
        "messages": messages,
    });
    fs::write(
        dir.join(filename),
        serde_json::to_string_pretty(&body).unwrap(),
    )
    .unwrap();
}

/// Position-velocity message with a configurable type for the flags field,
/// so sources can be made to agree or disagree structurally.
pub fn nav_pvt(flags_type: &str) -> Value {
    json!({
        "name": "X-NAV-PVT",
        "class_id": "0x01",
        "message_id": "0x07",
        "description": "Navigation position velocity time solution",
        "payload_length": 6,
        "fields": [
            {"name": "iTOW", "byte_offset": 0, "data_type": "U4", "unit": "ms"},
            {
                "name": "flags",
                "byte_offset": 4,
                "data_type": flags_type,
                "bitfield": {"bits": [
                    {"name": "gnssFixOK", "bit_start": 0, "description": "valid fix"}
                ]}
            },
            {
                "name": "fixType",
                "byte_offset": 5,
                "data_type": "U1",
                "enumeration": {"values": [
                    {"value": 0, "description": "no fix"},
                    {"value": 3, "description": "3D fix"}
                ]}
            }
        ]
    })
}

/// Versioned receiver description message; the leading version field carries
/// the protocol version in its description.
pub fn mon_ver() -> Value {
    json!({
        "name": "X-MON-VER",
        "description": "Receiver and software version",
        "fields": [
            {
                "name": "version",
                "byte_offset": 0,
                "data_type": "U1",
                "description": "Message version (0x01)"
            },
            {
                "name": "swVersion",
                "byte_offset": 1,
                "data_type": {"array_of": "CH", "count": 30}
            }
        ]
    })
}
