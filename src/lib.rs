//! Multi-Source Message Structure Consensus Engine
//!

pub mod cli;
pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod grouping;
pub mod merge;
pub mod output;
pub mod report;
pub mod structural;
pub mod types;
pub mod version;
pub mod voting;
