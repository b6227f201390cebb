//! Message Definition Type System
//!
//! - `message`: The structural data model for extracted message definitions
//!   (fields, data types, bitfields, enumerations, repeated groups)
//!
//! These types form the ingestion boundary: extraction producers emit JSON
//! records that deserialize into `MessageDefinition`. Unknown `data_type`
//! shapes fail deserialization here instead of propagating ambiguity into
//! fingerprinting and voting.

mod message;

pub use message::*;
