//! Majority-rules voting over message groups.
//!
//! Determines the canonical structure of each (message, version) group by
//! counting structural fingerprints, assigning a confidence tier, and
//! diffing every disagreeing source against the winner. Groups are mutually
//! independent, so batch voting fans out across worker threads.

use crate::errors::{AppError, AppResult};
use crate::fingerprint::{compare_detailed, FieldDiff, FingerprintDiff};
use crate::grouping::{GroupKey, MessageGroup};
use crate::merge::merge_message_annotations;
use crate::types::MessageDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Confidence tier of a consensus result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
    SingleSource,
    NoConsensus,
}

impl Confidence {
    /// Total order for minimum-confidence filtering.
    pub fn rank(&self) -> u8 {
        match self {
            Confidence::NoConsensus => 0,
            Confidence::SingleSource => 1,
            Confidence::Low => 2,
            Confidence::Medium => 3,
            Confidence::High => 4,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
            Confidence::SingleSource => "single_source",
            Confidence::NoConsensus => "no_consensus",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for Confidence {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Confidence::High),
            "medium" => Ok(Confidence::Medium),
            "low" => Ok(Confidence::Low),
            "single_source" => Ok(Confidence::SingleSource),
            "no_consensus" => Ok(Confidence::NoConsensus),
            other => Err(AppError::Config(format!(
                "Unknown confidence level '{}' (expected high, medium, low, single_source or no_consensus)",
                other
            ))),
        }
    }
}

/// Voting behaviour configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VotingConfig {
    /// Minimum agreement ratio for consensus.
    pub threshold: f64,
    /// Minimum number of sources for high/medium confidence.
    pub min_sources: usize,
}

impl VotingConfig {
    pub fn new(threshold: f64, min_sources: usize) -> AppResult<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(AppError::Config(
                "voting threshold must be in (0, 1]".to_string(),
            ));
        }
        if min_sources < 1 {
            return Err(AppError::Config(
                "min_sources must be at least 1".to_string(),
            ));
        }
        Ok(VotingConfig {
            threshold,
            min_sources,
        })
    }
}

impl Default for VotingConfig {
    fn default() -> Self {
        VotingConfig {
            threshold: 0.75,
            min_sources: 3,
        }
    }
}

/// An extraction that disagrees with the group's majority structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub source: String,
    pub fingerprint: String,
    pub discrepancy_summary: String,
    pub field_differences: Vec<FieldDiff>,
}

/// Result of voting on one (message, version) group. Computed once per run;
/// read-only for downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub message_name: String,
    pub protocol_version: u32,

    pub has_consensus: bool,
    pub confidence: Confidence,
    pub confidence_score: f64,

    pub winning_fingerprint: Option<String>,
    /// Winning structure after annotation merging, not the first winning
    /// instance verbatim.
    pub winning_message: Option<MessageDefinition>,

    /// Sources agreeing with the winning fingerprint.
    pub sources: Vec<String>,
    pub agreement_count: usize,
    pub total_count: usize,

    pub outliers: Vec<Outlier>,

    /// ISO date this result was computed.
    pub last_validated: String,
}

fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Map an agreement count out of a total onto a confidence tier and score.
///
/// Shared by batch voting and the incremental updater so both paths apply
/// identical thresholds.
pub fn evaluate_confidence(
    agreement: usize,
    total: usize,
    config: &VotingConfig,
) -> (Confidence, f64) {
    if total == 0 {
        return (Confidence::NoConsensus, 0.0);
    }
    if total == 1 {
        // A lone source is informative but never fully trusted
        return (Confidence::SingleSource, 0.5);
    }

    let ratio = agreement as f64 / total as f64;
    if ratio >= 0.9 && total >= config.min_sources {
        (Confidence::High, ratio)
    } else if ratio >= config.threshold && total >= config.min_sources {
        (Confidence::Medium, ratio * 0.9)
    } else if ratio >= config.threshold {
        (Confidence::Low, ratio * 0.7)
    } else {
        (Confidence::NoConsensus, ratio * 0.5)
    }
}

/// Human-readable one-line summary of a structural diff.
fn summarize_differences(diff: &FingerprintDiff) -> String {
    use crate::fingerprint::DiffKind;

    if diff.matches {
        return "No differences".to_string();
    }

    let mut parts = Vec::new();

    if diff.field_count_delta != 0 {
        parts.push(format!("field count differs by {}", diff.field_count_delta));
    }

    for mismatch in diff.mismatches.iter().take(3) {
        match mismatch.kind {
            DiffKind::MissingInFirst => {
                parts.push(format!("missing field at offset {}", mismatch.offset));
            }
            DiffKind::MissingInSecond => {
                parts.push(format!("extra field at offset {}", mismatch.offset));
            }
            DiffKind::FieldDiffers => {
                if let (Some(f1), Some(f2)) = (&mismatch.first, &mismatch.second) {
                    parts.push(format!(
                        "field at offset {}: {}({}) vs {}({})",
                        mismatch.offset,
                        f1.normalized_name,
                        f1.normalized_data_type,
                        f2.normalized_name,
                        f2.normalized_data_type,
                    ));
                }
            }
        }
    }

    if diff.mismatches.len() > 3 {
        parts.push(format!(
            "...and {} more differences",
            diff.mismatches.len() - 3
        ));
    }

    if parts.is_empty() {
        "Unknown differences".to_string()
    } else {
        parts.join("; ")
    }
}

fn empty_result(group: &MessageGroup) -> ConsensusResult {
    ConsensusResult {
        message_name: group.message_name.clone(),
        protocol_version: group.protocol_version,
        has_consensus: false,
        confidence: Confidence::NoConsensus,
        confidence_score: 0.0,
        winning_fingerprint: None,
        winning_message: None,
        sources: Vec::new(),
        agreement_count: 0,
        total_count: 0,
        outliers: Vec::new(),
        last_validated: today(),
    }
}

/// Vote on a single group.
///
/// Empty group yields a zero-score `NoConsensus` result; a lone source yields
/// `SingleSource` at score 0.5. Otherwise the fingerprint with the highest
/// count wins; equal counts are broken deterministically in favour of the
/// lexicographically smallest fingerprint.
pub fn vote_on_group(group: &MessageGroup, config: &VotingConfig) -> ConsensusResult {
    if group.instances.is_empty() {
        return empty_result(group);
    }

    if group.source_count() == 1 {
        let instance = &group.instances[0];
        return ConsensusResult {
            message_name: group.message_name.clone(),
            protocol_version: group.protocol_version,
            has_consensus: true,
            confidence: Confidence::SingleSource,
            confidence_score: 0.5,
            winning_fingerprint: Some(instance.fingerprint.clone()),
            winning_message: Some(instance.message.clone()),
            sources: vec![instance.source_id.clone()],
            agreement_count: 1,
            total_count: 1,
            outliers: Vec::new(),
            last_validated: today(),
        };
    }

    let counts = group.fingerprint_counts();
    let total = group.source_count();

    // BTreeMap iterates fingerprints in lexicographic order; strict greater-than
    // keeps the smallest fingerprint among equal counts
    let mut winning_fingerprint = String::new();
    let mut agreement_count = 0usize;
    for (fingerprint, count) in &counts {
        if *count > agreement_count {
            winning_fingerprint = fingerprint.clone();
            agreement_count = *count;
        }
    }

    let ratio = agreement_count as f64 / total as f64;
    let has_consensus = ratio >= config.threshold;
    let (confidence, confidence_score) = evaluate_confidence(agreement_count, total, config);

    debug!(
        "Group {} v{}: winner {} with {}/{} agreement",
        group.message_name, group.protocol_version, winning_fingerprint, agreement_count, total
    );

    let agreeing: Vec<_> = group
        .instances
        .iter()
        .filter(|i| i.fingerprint == winning_fingerprint)
        .collect();
    let winning_instance = &agreeing[0];

    // Superset-merge secondary annotations across agreeing sources
    let winning_message = if agreeing.len() > 1 {
        let agreeing_messages: Vec<&MessageDefinition> =
            agreeing.iter().map(|i| &i.message).collect();
        merge_message_annotations(&winning_instance.message, &agreeing_messages)
    } else {
        winning_instance.message.clone()
    };

    let sources: Vec<String> = agreeing.iter().map(|i| i.source_id.clone()).collect();

    let outliers: Vec<Outlier> = group
        .instances
        .iter()
        .filter(|i| i.fingerprint != winning_fingerprint)
        .map(|instance| {
            let diff = compare_detailed(&winning_instance.detailed, &instance.detailed);
            Outlier {
                source: instance.source_id.clone(),
                fingerprint: instance.fingerprint.clone(),
                discrepancy_summary: summarize_differences(&diff),
                field_differences: diff.mismatches,
            }
        })
        .collect();

    ConsensusResult {
        message_name: group.message_name.clone(),
        protocol_version: group.protocol_version,
        has_consensus,
        confidence,
        confidence_score,
        winning_fingerprint: Some(winning_fingerprint),
        winning_message: Some(winning_message),
        sources,
        agreement_count,
        total_count: total,
        outliers,
        last_validated: today(),
    }
}

/// Vote on all groups, fanning out across `workers` threads.
///
/// Groups are independent after partitioning, so workers share no mutable
/// state; results are merged into a deterministic key-ordered map.
pub fn vote_on_all_groups(
    groups: &BTreeMap<GroupKey, MessageGroup>,
    config: &VotingConfig,
    workers: usize,
) -> AppResult<BTreeMap<GroupKey, ConsensusResult>> {
    if workers <= 1 || groups.len() <= 1 {
        return Ok(groups
            .iter()
            .map(|(key, group)| (key.clone(), vote_on_group(group, config)))
            .collect());
    }

    let (work_tx, work_rx) = crossbeam::channel::unbounded();
    for entry in groups.iter() {
        work_tx
            .send(entry)
            .map_err(|_| AppError::Processing("voting work queue closed early".to_string()))?;
    }
    drop(work_tx);

    let (result_tx, result_rx) = crossbeam::channel::unbounded();

    crossbeam::thread::scope(|scope| {
        for _ in 0..workers {
            let work_rx = work_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move |_| {
                for (key, group) in work_rx.iter() {
                    let result = vote_on_group(group, config);
                    if result_tx.send((key.clone(), result)).is_err() {
                        break;
                    }
                }
            });
        }
    })
    .map_err(|_| AppError::Processing("voting worker panicked".to_string()))?;
    drop(result_tx);

    Ok(result_rx.iter().collect())
}

/// Filter voting results by consensus requirement and minimum confidence.
pub fn filter_by_consensus(
    results: &BTreeMap<GroupKey, ConsensusResult>,
    require_consensus: bool,
    min_confidence: Option<Confidence>,
) -> BTreeMap<GroupKey, ConsensusResult> {
    let min_rank = min_confidence.map(|c| c.rank()).unwrap_or(0);

    results
        .iter()
        .filter(|(_, result)| {
            if require_consensus && !result.has_consensus {
                return false;
            }
            result.confidence.rank() >= min_rank
        })
        .map(|(key, result)| (key.clone(), result.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{group_instances, ExtractionInstance};
    use crate::types::{BitfieldSpec, BitSpec, DataType, FieldDescriptor, MessageDefinition};

    fn scalar(code: &str) -> DataType {
        DataType::Scalar(code.to_string())
    }

    fn instance(source: &str, name: &str, fields: Vec<FieldDescriptor>) -> ExtractionInstance {
        let mut msg = MessageDefinition::new(name);
        msg.fields = fields;
        ExtractionInstance::new(source.to_string(), msg).unwrap()
    }

    fn pvt_fields(reserved_name: &str) -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::new("iTOW", 0, scalar("U4")),
            FieldDescriptor::new(reserved_name, 4, scalar("U1")),
            FieldDescriptor::new("flags", 5, scalar("X1")),
        ]
    }

    fn group_of(instances: Vec<ExtractionInstance>) -> MessageGroup {
        let mut groups = group_instances(instances);
        assert_eq!(groups.len(), 1, "test instances split across groups");
        groups.pop_first().unwrap().1
    }

    #[test]
    fn test_empty_group_no_consensus() {
        let group = MessageGroup {
            message_name: "X-EMPTY".to_string(),
            protocol_version: 0,
            instances: Vec::new(),
        };
        let result = vote_on_group(&group, &VotingConfig::default());
        assert!(!result.has_consensus);
        assert_eq!(result.confidence, Confidence::NoConsensus);
        assert_eq!(result.confidence_score, 0.0);
        assert!(result.winning_fingerprint.is_none());
    }

    #[test]
    fn test_single_source_half_score() {
        let group = group_of(vec![instance("src-A", "X-NAV-PVT", pvt_fields("reserved0"))]);
        let result = vote_on_group(&group, &VotingConfig::default());
        assert!(result.has_consensus);
        assert_eq!(result.confidence, Confidence::SingleSource);
        assert_eq!(result.confidence_score, 0.5);
        assert_eq!(result.sources, vec!["src-A"]);
    }

    #[test]
    fn test_scenario_reserved_numbering_agrees() {
        // Identical layouts differing only in reserved-field numbering
        let group = group_of(vec![
            instance("src-A", "X-NAV-PVT", pvt_fields("reserved0")),
            instance("src-B", "X-NAV-PVT", pvt_fields("reserved1")),
            instance("src-C", "X-NAV-PVT", pvt_fields("reservedPad")),
        ]);
        let result = vote_on_group(&group, &VotingConfig::default());
        assert!(result.has_consensus);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.agreement_count, 3);
        assert_eq!(result.sources.len(), 3);
        assert!(result.outliers.is_empty());
    }

    #[test]
    fn test_scenario_typed_outlier() {
        // Two sources agree flags is a 1-byte bitfield, one says plain unsigned
        let bitfield = pvt_fields("reserved0");
        let mut unsigned = pvt_fields("reserved0");
        unsigned[2].data_type = scalar("U1");

        let group = group_of(vec![
            instance("src-A", "X-NAV-PVT", bitfield.clone()),
            instance("src-B", "X-NAV-PVT", bitfield),
            instance("src-C", "X-NAV-PVT", unsigned),
        ]);
        let result = vote_on_group(&group, &VotingConfig::default());

        assert_eq!(result.agreement_count, 2);
        assert_eq!(result.outliers.len(), 1);
        let outlier = &result.outliers[0];
        assert_eq!(outlier.source, "src-C");
        assert_eq!(outlier.field_differences.len(), 1);
        let diff = &outlier.field_differences[0];
        assert_eq!(diff.offset, 5);
        assert_eq!(
            diff.first.as_ref().unwrap().normalized_data_type,
            "X1"
        );
        assert_eq!(
            diff.second.as_ref().unwrap().normalized_data_type,
            "U1"
        );
        assert!(outlier.discrepancy_summary.contains("flags(X1) vs flags(U1)"));
    }

    #[test]
    fn test_scenario_even_split_no_consensus() {
        // 2/2 split at threshold 0.75
        let layout_a = pvt_fields("reserved0");
        let mut layout_b = pvt_fields("reserved0");
        layout_b.push(FieldDescriptor::new("extra", 6, scalar("U2")));

        let group = group_of(vec![
            instance("src-A", "X-NAV-PVT", layout_a.clone()),
            instance("src-B", "X-NAV-PVT", layout_a),
            instance("src-C", "X-NAV-PVT", layout_b.clone()),
            instance("src-D", "X-NAV-PVT", layout_b),
        ]);
        let result = vote_on_group(&group, &VotingConfig::default());

        assert!(!result.has_consensus);
        assert_eq!(result.confidence, Confidence::NoConsensus);
        assert_eq!(result.agreement_count, 2);
        assert_eq!(result.total_count, 4);
        // The losing subgroup appears as outliers relative to the nominal winner
        assert_eq!(result.outliers.len(), 2);
        // Tie broken by lexicographically smallest fingerprint
        let counts = group.fingerprint_counts();
        let smallest = counts.keys().next().unwrap();
        assert_eq!(result.winning_fingerprint.as_ref().unwrap(), smallest);
    }

    #[test]
    fn test_confidence_tiers() {
        let config = VotingConfig::default();
        // 10/10 with enough sources
        assert_eq!(
            evaluate_confidence(10, 10, &config),
            (Confidence::High, 1.0)
        );
        // 0.8 agreement with enough sources
        let (tier, score) = evaluate_confidence(4, 5, &config);
        assert_eq!(tier, Confidence::Medium);
        assert!((score - 0.8 * 0.9).abs() < 1e-9);
        // Above threshold but below min_sources
        let (tier, score) = evaluate_confidence(2, 2, &config);
        assert_eq!(tier, Confidence::Low);
        assert!((score - 1.0 * 0.7).abs() < 1e-9);
        // Below threshold
        let (tier, score) = evaluate_confidence(2, 4, &config);
        assert_eq!(tier, Confidence::NoConsensus);
        assert!((score - 0.5 * 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_voting_monotonicity() {
        // Increasing agreement at fixed total never decreases the tier
        let config = VotingConfig::default();
        for total in 2..=8 {
            let mut last_rank = 0;
            for agreement in 1..=total {
                let (tier, _) = evaluate_confidence(agreement, total, &config);
                assert!(
                    tier.rank() >= last_rank,
                    "tier regressed at {}/{}",
                    agreement,
                    total
                );
                last_rank = tier.rank();
            }
        }
    }

    #[test]
    fn test_winning_message_carries_merged_annotations() {
        let mut with_fix_bit = pvt_fields("reserved0");
        with_fix_bit[2].bitfield = Some(BitfieldSpec {
            bits: vec![BitSpec {
                name: "gnssFixOK".to_string(),
                bit_start: 0,
                bit_end: None,
                description: Some("valid fix".to_string()),
                reserved: false,
            }],
        });
        let mut with_diff_bit = pvt_fields("reserved0");
        with_diff_bit[2].bitfield = Some(BitfieldSpec {
            bits: vec![BitSpec {
                name: "diffSoln".to_string(),
                bit_start: 1,
                bit_end: None,
                description: Some("differential applied".to_string()),
                reserved: false,
            }],
        });

        let group = group_of(vec![
            instance("src-A", "X-NAV-PVT", with_fix_bit),
            instance("src-B", "X-NAV-PVT", with_diff_bit),
        ]);
        let result = vote_on_group(&group, &VotingConfig::default());

        let winning = result.winning_message.unwrap();
        let bits = &winning.fields[2].bitfield.as_ref().unwrap().bits;
        let names: Vec<&str> = bits.iter().map(|b| b.name.as_str()).collect();
        assert_eq!(names, vec!["gnssFixOK", "diffSoln"]);
    }

    #[test]
    fn test_parallel_voting_matches_sequential() {
        let mut instances = Vec::new();
        for msg_idx in 0..6 {
            let name = format!("X-TST-{:02}", msg_idx);
            for src in ["src-A", "src-B", "src-C"] {
                instances.push(instance(src, &name, pvt_fields("reserved0")));
            }
        }
        let groups = group_instances(instances);
        let config = VotingConfig::default();

        let mut sequential = vote_on_all_groups(&groups, &config, 1).unwrap();
        let mut parallel = vote_on_all_groups(&groups, &config, 4).unwrap();

        // Dates aside, results must be identical regardless of worker count
        assert_eq!(sequential.len(), parallel.len());
        for (seq, par) in sequential.values_mut().zip(parallel.values_mut()) {
            seq.last_validated.clear();
            par.last_validated.clear();
            assert_eq!(seq, par);
        }
    }

    #[test]
    fn test_filter_by_consensus() {
        let group = group_of(vec![instance("src-A", "X-NAV-PVT", pvt_fields("reserved0"))]);
        let result = vote_on_group(&group, &VotingConfig::default());
        let mut results = BTreeMap::new();
        results.insert(("X-NAV-PVT".to_string(), 0u32), result);

        let all = filter_by_consensus(&results, true, None);
        assert_eq!(all.len(), 1);

        let high_only = filter_by_consensus(&results, true, Some(Confidence::High));
        assert!(high_only.is_empty());

        let at_least_single = filter_by_consensus(&results, true, Some(Confidence::SingleSource));
        assert_eq!(at_least_single.len(), 1);
    }

    #[test]
    fn test_voting_config_validation() {
        assert!(VotingConfig::new(0.75, 3).is_ok());
        assert!(VotingConfig::new(0.0, 3).is_err());
        assert!(VotingConfig::new(1.1, 3).is_err());
        assert!(VotingConfig::new(0.75, 0).is_err());
    }
}
