//! Grouping of extraction instances for voting.
//!
//! Partitions all extraction instances by (message name, protocol version) so
//! that voting runs within groups of definitions that should be structurally
//! identical. Also hosts the instance inbox loader: a directory of JSON
//! extraction files, one per source.

use crate::errors::{AppError, AppResult};
use crate::fingerprint::{compute_detailed_fingerprint, compute_fingerprint, DetailedFingerprint};
use crate::types::MessageDefinition;
use crate::version::{detect_version_field, protocol_version, VersionFieldInfo};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Group key: (message name, protocol version).
pub type GroupKey = (String, u32);

/// One source's description of one message, with derived identity cached at
/// construction. Immutable for the rest of the run.
#[derive(Debug, Clone)]
pub struct ExtractionInstance {
    pub source_id: String,
    pub message: MessageDefinition,
    pub fingerprint: String,
    pub detailed: DetailedFingerprint,
    pub protocol_version: u32,
    pub version_info: VersionFieldInfo,
}

impl ExtractionInstance {
    /// Build an instance, rejecting malformed records (missing message name
    /// or empty field list) at the boundary.
    pub fn new(source_id: String, message: MessageDefinition) -> AppResult<Self> {
        if message.name.trim().is_empty() {
            return Err(AppError::MalformedInstance {
                source_id,
                reason: "missing message name".to_string(),
            });
        }
        if message.field_count() == 0 {
            return Err(AppError::MalformedInstance {
                source_id,
                reason: format!("message '{}' has an empty field list", message.name),
            });
        }

        let fingerprint = compute_fingerprint(&message);
        let detailed = compute_detailed_fingerprint(&message);
        let version_info = detect_version_field(&message);
        let protocol_version = protocol_version(&message);

        Ok(ExtractionInstance {
            source_id,
            message,
            fingerprint,
            detailed,
            protocol_version,
            version_info,
        })
    }
}

/// All extraction instances sharing a (message name, protocol version) key.
#[derive(Debug, Clone, Default)]
pub struct MessageGroup {
    pub message_name: String,
    pub protocol_version: u32,
    pub instances: Vec<ExtractionInstance>,
}

impl MessageGroup {
    /// Occurrences of each fingerprint, in deterministic fingerprint order.
    pub fn fingerprint_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for instance in &self.instances {
            *counts.entry(instance.fingerprint.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Number of sources in this group.
    pub fn source_count(&self) -> usize {
        self.instances.len()
    }

    /// Number of distinct fingerprints (1 = full agreement).
    pub fn unique_fingerprints(&self) -> usize {
        self.fingerprint_counts().len()
    }
}

/// Partition instances into groups keyed by (message name, protocol version).
///
/// Single pass; groups are created on first use. The resulting map iterates
/// in deterministic key order.
pub fn group_instances(instances: Vec<ExtractionInstance>) -> BTreeMap<GroupKey, MessageGroup> {
    let mut groups: BTreeMap<GroupKey, MessageGroup> = BTreeMap::new();

    for instance in instances {
        let key = (instance.message.name.clone(), instance.protocol_version);
        let group = groups.entry(key.clone()).or_insert_with(|| MessageGroup {
            message_name: key.0,
            protocol_version: key.1,
            instances: Vec::new(),
        });
        group.instances.push(instance);
    }

    groups
}

/// Operator-facing distribution of agreement levels across groups.
/// Informational only; voting does not consume it.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct GroupSummary {
    pub total_groups: usize,
    pub total_instances: usize,
    pub full_agreement: usize,
    pub partial_agreement: usize,
    pub no_consensus: usize,
    pub single_source: usize,
    pub by_protocol_version: BTreeMap<u32, usize>,
}

/// Summarize grouped instances. `majority_threshold` is the agreement ratio
/// separating "majority" from "no consensus" in the distribution.
pub fn summarize_groups(
    groups: &BTreeMap<GroupKey, MessageGroup>,
    majority_threshold: f64,
) -> GroupSummary {
    let mut summary = GroupSummary {
        total_groups: groups.len(),
        total_instances: groups.values().map(|g| g.source_count()).sum(),
        full_agreement: 0,
        partial_agreement: 0,
        no_consensus: 0,
        single_source: 0,
        by_protocol_version: BTreeMap::new(),
    };

    for ((_, version), group) in groups {
        *summary.by_protocol_version.entry(*version).or_insert(0) += 1;

        if group.source_count() == 1 {
            summary.single_source += 1;
        } else if group.unique_fingerprints() == 1 {
            summary.full_agreement += 1;
        } else {
            let max_count = group.fingerprint_counts().values().copied().max().unwrap_or(0);
            if max_count as f64 / group.source_count() as f64 >= majority_threshold {
                summary.partial_agreement += 1;
            } else {
                summary.no_consensus += 1;
            }
        }
    }

    summary
}

/// On-disk shape of one extraction file: one producer's messages.
#[derive(Debug, Deserialize)]
struct ExtractionFile {
    #[serde(default)]
    source_id: Option<String>,
    #[serde(default)]
    messages: Vec<serde_json::Value>,
}

/// Counters from loading an extraction inbox directory.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadStats {
    pub files: usize,
    pub instances: usize,
    pub skipped: usize,
}

/// Load one extraction file into instances.
///
/// Unreadable JSON is a hard error; individual malformed messages are
/// skipped with a warning and counted.
pub fn load_extraction_file(path: &Path) -> AppResult<(Vec<ExtractionInstance>, LoadStats)> {
    let raw = fs::read_to_string(path)?;
    let file: ExtractionFile = serde_json::from_str(&raw)?;

    let source_id = file.source_id.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string())
    });

    let mut instances = Vec::new();
    let mut stats = LoadStats {
        files: 1,
        ..LoadStats::default()
    };

    for value in file.messages {
        let message: MessageDefinition = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping malformed message record in '{}': {}", source_id, e);
                stats.skipped += 1;
                continue;
            }
        };

        match ExtractionInstance::new(source_id.clone(), message) {
            Ok(instance) => {
                instances.push(instance);
                stats.instances += 1;
            }
            Err(e) => {
                warn!("{}", e);
                stats.skipped += 1;
            }
        }
    }

    Ok((instances, stats))
}

/// Load every `*.json` extraction file in a directory into instances.
///
/// The source id is taken from the file's `source_id` field, falling back to
/// the file stem. Malformed messages are skipped with a warning and counted;
/// they are never fatal to the batch.
pub fn load_instances(dir: &Path) -> AppResult<(Vec<ExtractionInstance>, LoadStats)> {
    let pattern = dir.join("*.json");
    let pattern = pattern
        .to_str()
        .ok_or_else(|| AppError::Config(format!("Non-UTF8 extractions path: {}", dir.display())))?;

    let mut instances = Vec::new();
    let mut stats = LoadStats::default();

    let mut paths: Vec<_> = glob::glob(pattern)?.collect::<Result<_, _>>()?;
    paths.sort();

    for path in paths {
        match load_extraction_file(&path) {
            Ok((file_instances, file_stats)) => {
                stats.files += 1;
                stats.instances += file_stats.instances;
                stats.skipped += file_stats.skipped;
                instances.extend(file_instances);
            }
            Err(e) => {
                warn!("Skipping unreadable extraction file {}: {}", path.display(), e);
                stats.skipped += 1;
            }
        }
    }

    info!(
        "Loaded {} instances from {} extraction files ({} skipped)",
        stats.instances, stats.files, stats.skipped
    );

    Ok((instances, stats))
}
