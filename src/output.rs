//! Canonical record output and incremental updates.
//!
//! Persists one canonical JSON record per (message, version) with consensus
//! provenance, plus a manifest of everything written. The consensus block
//! carries enough metadata to absorb a newly produced extraction later
//! without re-voting the whole historical batch.

use crate::errors::{AppError, AppResult};
use crate::grouping::{ExtractionInstance, GroupKey};
use crate::types::{FieldDescriptor, PayloadLength, RepeatedGroup};
use crate::voting::{evaluate_confidence, Confidence, ConsensusResult, VotingConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, warn};

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Compact outlier note persisted inside a canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierNote {
    pub source: String,
    pub fingerprint: String,
    pub discrepancy: String,
}

/// Voting provenance persisted with every canonical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusBlock {
    pub sources: Vec<String>,
    pub agreement_count: usize,
    pub total_count: usize,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub last_validated: String,
    #[serde(default)]
    pub outliers: Vec<OutlierNote>,
}

/// One canonical message definition: the winning structure plus consensus
/// metadata and free-form annotations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub name: String,
    pub protocol_version: u32,
    pub fingerprint: String,
    pub consensus: ConsensusBlock,
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
    #[serde(default)]
    pub annotations: Vec<serde_json::Value>,
}

/// Static notes (evolution warnings, known variants) keyed by
/// `"<name>-v<version>"`, loaded once at startup and injected into the
/// writer.
#[derive(Debug, Clone, Default)]
pub struct AnnotationRegistry {
    annotations: BTreeMap<String, Vec<serde_json::Value>>,
}

impl AnnotationRegistry {
    /// Load the registry from a JSON file; `None` yields an empty registry.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let Some(path) = path else {
            return Ok(AnnotationRegistry::default());
        };
        let raw = fs::read_to_string(path)?;
        let annotations: BTreeMap<String, Vec<serde_json::Value>> = serde_json::from_str(&raw)?;
        Ok(AnnotationRegistry { annotations })
    }

    pub fn lookup(&self, name: &str, version: u32) -> Vec<serde_json::Value> {
        self.annotations
            .get(&format!("{}-v{}", name, version))
            .cloned()
            .unwrap_or_default()
    }
}

/// Filename for a canonical record. Message names come from untrusted
/// extractions, so anything path-hostile is flattened to '_'.
pub fn canonical_filename(message_name: &str, protocol_version: u32) -> String {
    let safe: String = message_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{}-v{}.json", safe, protocol_version)
}

/// Convert a voting result into its canonical output form. `None` when the
/// result has no winning structure to persist.
pub fn canonical_from_result(
    result: &ConsensusResult,
    registry: &AnnotationRegistry,
) -> Option<CanonicalRecord> {
    let winning = result.winning_message.as_ref()?;
    let fingerprint = result.winning_fingerprint.clone()?;

    Some(CanonicalRecord {
        name: result.message_name.clone(),
        protocol_version: result.protocol_version,
        fingerprint,
        consensus: ConsensusBlock {
            sources: result.sources.clone(),
            agreement_count: result.agreement_count,
            total_count: result.total_count,
            confidence: result.confidence,
            confidence_score: round3(result.confidence_score),
            last_validated: result.last_validated.clone(),
            outliers: result
                .outliers
                .iter()
                .map(|o| OutlierNote {
                    source: o.source.clone(),
                    fingerprint: o.fingerprint.clone(),
                    discrepancy: o.discrepancy_summary.clone(),
                })
                .collect(),
        },
        class_id: winning.class_id.clone(),
        message_id: winning.message_id.clone(),
        description: winning.description.clone(),
        payload_length: winning.payload_length.clone(),
        fields: winning.fields.clone(),
        repeated_groups: winning.repeated_groups.clone(),
        annotations: registry.lookup(&result.message_name, result.protocol_version),
    })
}

/// Options controlling the canonical write pass.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub require_consensus: bool,
    pub min_confidence: Option<Confidence>,
    pub workers: usize,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            require_consensus: true,
            min_confidence: None,
            workers: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestConfig {
    pub require_consensus: bool,
    pub min_confidence: Option<Confidence>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub fingerprint: String,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub source_count: usize,
    pub outlier_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestStats {
    pub written: usize,
    pub skipped_no_consensus: usize,
    pub skipped_low_confidence: usize,
}

/// Index of everything the write pass produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub generated_at: String,
    pub config: ManifestConfig,
    pub messages: BTreeMap<String, ManifestEntry>,
    pub stats: ManifestStats,
}

/// Write canonical records for every result passing the consensus and
/// confidence filters; returns the manifest, which is also written to
/// `<output_dir>/manifest.json`.
///
/// Each (message, version) maps to exactly one file, so per-record writes
/// need no coordination; only the manifest accumulator is shared and sits
/// behind a mutex. A failed record write is logged and isolated - the other
/// groups still land.
pub fn write_canonical(
    results: &BTreeMap<GroupKey, ConsensusResult>,
    output_dir: &Path,
    options: &WriteOptions,
    registry: &AnnotationRegistry,
) -> AppResult<Manifest> {
    let messages_dir = output_dir.join("messages");
    fs::create_dir_all(&messages_dir)?;

    let min_rank = options.min_confidence.map(|c| c.rank()).unwrap_or(0);
    let mut stats = ManifestStats::default();
    let mut to_write: Vec<(String, String, CanonicalRecord)> = Vec::new();

    for ((name, version), result) in results {
        if options.require_consensus && !result.has_consensus {
            stats.skipped_no_consensus += 1;
            continue;
        }
        if result.confidence.rank() < min_rank {
            stats.skipped_low_confidence += 1;
            continue;
        }
        let Some(record) = canonical_from_result(result, registry) else {
            stats.skipped_no_consensus += 1;
            continue;
        };
        let key = format!("{}-v{}", name, version);
        let filename = canonical_filename(name, *version);
        to_write.push((key, filename, record));
    }

    let accumulator: Mutex<(BTreeMap<String, ManifestEntry>, usize)> =
        Mutex::new((BTreeMap::new(), 0));

    let write_one = |key: &str, filename: &str, record: &CanonicalRecord| {
        let path = messages_dir.join(filename);
        let written = serde_json::to_string_pretty(record)
            .map_err(AppError::from)
            .and_then(|json| fs::write(&path, json).map_err(AppError::from));

        match written {
            Ok(()) => {
                let entry = ManifestEntry {
                    file: format!("messages/{}", filename),
                    fingerprint: record.fingerprint.clone(),
                    confidence: record.consensus.confidence,
                    confidence_score: record.consensus.confidence_score,
                    source_count: record.consensus.sources.len(),
                    outlier_count: record.consensus.outliers.len(),
                };
                match accumulator.lock() {
                    Ok(mut guard) => {
                        guard.0.insert(key.to_string(), entry);
                        guard.1 += 1;
                    }
                    Err(_) => error!("Manifest accumulator poisoned; entry for {} lost", key),
                }
            }
            Err(e) => {
                // Partial-failure isolation: this record only
                error!("Failed to write canonical record {}: {}", key, e);
            }
        }
    };

    if options.workers <= 1 || to_write.len() <= 1 {
        for (key, filename, record) in &to_write {
            write_one(key, filename, record);
        }
    } else {
        let (work_tx, work_rx) = crossbeam::channel::unbounded();
        for item in &to_write {
            work_tx
                .send(item)
                .map_err(|_| AppError::Processing("write queue closed early".to_string()))?;
        }
        drop(work_tx);

        crossbeam::thread::scope(|scope| {
            for _ in 0..options.workers {
                let work_rx = work_rx.clone();
                let write_one = &write_one;
                scope.spawn(move |_| {
                    for (key, filename, record) in work_rx.iter() {
                        write_one(key, filename, record);
                    }
                });
            }
        })
        .map_err(|_| AppError::Processing("canonical writer panicked".to_string()))?;
    }

    let (messages, written) = accumulator
        .into_inner()
        .map_err(|_| AppError::Processing("manifest accumulator poisoned".to_string()))?;
    stats.written = written;

    let manifest = Manifest {
        generated_at: chrono::Local::now().to_rfc3339(),
        config: ManifestConfig {
            require_consensus: options.require_consensus,
            min_confidence: options.min_confidence,
        },
        messages,
        stats,
    };

    fs::write(
        output_dir.join("manifest.json"),
        serde_json::to_string_pretty(&manifest)?,
    )?;

    Ok(manifest)
}

/// Read an existing canonical record. Corrupted or missing state is treated
/// as "no prior record" so an incremental update falls back to a fresh
/// write instead of crashing.
pub fn load_canonical(path: &Path) -> Option<CanonicalRecord> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return None,
    };
    match serde_json::from_str(&raw) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(
                "Existing canonical record {} is unreadable ({}); treating as no prior record",
                path.display(),
                e
            );
            None
        }
    }
}

/// Fold one new extraction into an existing canonical record without
/// re-voting the historical batch.
///
/// The stored winning fingerprint is treated as authoritative: a matching
/// instance joins the agreeing sources, a mismatching one is recorded as an
/// outlier. Either way the confidence tier and score are recomputed with the
/// same thresholds batch voting uses. Already-known sources are ignored.
pub fn update_with_new_source(
    mut existing: CanonicalRecord,
    instance: &ExtractionInstance,
    config: &VotingConfig,
) -> CanonicalRecord {
    let consensus = &mut existing.consensus;

    if instance.fingerprint == existing.fingerprint {
        if !consensus.sources.contains(&instance.source_id) {
            consensus.sources.push(instance.source_id.clone());
            consensus.agreement_count += 1;
            consensus.total_count += 1;
        }
    } else if !consensus
        .outliers
        .iter()
        .any(|o| o.source == instance.source_id)
    {
        consensus.outliers.push(OutlierNote {
            source: instance.source_id.clone(),
            fingerprint: instance.fingerprint.clone(),
            discrepancy: "Fingerprint mismatch with consensus".to_string(),
        });
        consensus.total_count += 1;
    }

    let (confidence, score) =
        evaluate_confidence(consensus.agreement_count, consensus.total_count, config);
    consensus.confidence = confidence;
    consensus.confidence_score = round3(score);
    consensus.last_validated = today();

    existing
}

/// Canonical record for a message seen for the first time: single-source
/// semantics, same as a one-instance group in batch voting.
pub fn fresh_single_source_record(
    instance: &ExtractionInstance,
    registry: &AnnotationRegistry,
) -> CanonicalRecord {
    let message = &instance.message;
    CanonicalRecord {
        name: message.name.clone(),
        protocol_version: instance.protocol_version,
        fingerprint: instance.fingerprint.clone(),
        consensus: ConsensusBlock {
            sources: vec![instance.source_id.clone()],
            agreement_count: 1,
            total_count: 1,
            confidence: Confidence::SingleSource,
            confidence_score: 0.5,
            last_validated: today(),
            outliers: Vec::new(),
        },
        class_id: message.class_id.clone(),
        message_id: message.message_id.clone(),
        description: message.description.clone(),
        payload_length: message.payload_length.clone(),
        fields: message.fields.clone(),
        repeated_groups: message.repeated_groups.clone(),
        annotations: registry.lookup(&message.name, instance.protocol_version),
    }
}

/// Path of the canonical record for a (message, version) under `output_dir`.
pub fn canonical_path(output_dir: &Path, message_name: &str, protocol_version: u32) -> PathBuf {
    output_dir
        .join("messages")
        .join(canonical_filename(message_name, protocol_version))
}
