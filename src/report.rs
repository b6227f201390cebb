//! Report generation for voting results.
//!
//! Produces machine-readable JSON reports for downstream adjudication plus a
//! human-readable console summary. The discrepancy report is the primary
//! handoff to whoever resolves outliers; no-consensus groups are a
//! first-class state there, not an error.

use crate::errors::AppResult;
use crate::fingerprint::FieldDiff;
use crate::grouping::GroupKey;
use crate::voting::{Confidence, ConsensusResult};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Aggregate statistics over all voting results.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total_message_versions: usize,
    pub with_consensus: usize,
    pub without_consensus: usize,
    pub by_confidence_level: BTreeMap<String, usize>,
    pub total_outliers: usize,
    pub average_confidence_score: f64,
}

/// One row per (message, version) in the full report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRow {
    pub message_name: String,
    pub protocol_version: u32,
    pub has_consensus: bool,
    pub confidence: Confidence,
    pub confidence_score: f64,
    pub fingerprint: Option<String>,
    pub agreement: String,
    pub sources: Vec<String>,
    pub outlier_count: usize,
}

/// One outlier across all groups, flattened for review queues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierRow {
    pub message_name: String,
    pub protocol_version: u32,
    pub source: String,
    pub fingerprint: String,
    pub winning_fingerprint: Option<String>,
    pub discrepancy: String,
    pub field_differences: Vec<FieldDiff>,
}

/// Comprehensive validation report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub generated_at: String,
    pub summary: ReportSummary,
    pub by_confidence: BTreeMap<String, Vec<String>>,
    pub messages: Vec<MessageRow>,
    pub outliers: Vec<OutlierRow>,
}

fn summarize(results: &BTreeMap<GroupKey, ConsensusResult>) -> ReportSummary {
    let total = results.len();
    let with_consensus = results.values().filter(|r| r.has_consensus).count();

    let mut by_confidence_level: BTreeMap<String, usize> = BTreeMap::new();
    for result in results.values() {
        *by_confidence_level
            .entry(result.confidence.to_string())
            .or_insert(0) += 1;
    }

    let total_outliers = results.values().map(|r| r.outliers.len()).sum();
    let average_confidence_score = if total > 0 {
        round3(results.values().map(|r| r.confidence_score).sum::<f64>() / total as f64)
    } else {
        0.0
    };

    ReportSummary {
        total_message_versions: total,
        with_consensus,
        without_consensus: total - with_consensus,
        by_confidence_level,
        total_outliers,
        average_confidence_score,
    }
}

/// Build the full validation report.
pub fn validation_report(results: &BTreeMap<GroupKey, ConsensusResult>) -> ValidationReport {
    let mut by_confidence: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut messages = Vec::new();
    let mut outliers = Vec::new();

    for ((name, version), result) in results {
        let key = format!("{}-v{}", name, version);
        by_confidence
            .entry(result.confidence.to_string())
            .or_default()
            .push(key);

        messages.push(MessageRow {
            message_name: name.clone(),
            protocol_version: *version,
            has_consensus: result.has_consensus,
            confidence: result.confidence,
            confidence_score: round3(result.confidence_score),
            fingerprint: result.winning_fingerprint.clone(),
            agreement: format!("{}/{}", result.agreement_count, result.total_count),
            sources: result.sources.clone(),
            outlier_count: result.outliers.len(),
        });

        for outlier in &result.outliers {
            outliers.push(OutlierRow {
                message_name: name.clone(),
                protocol_version: *version,
                source: outlier.source.clone(),
                fingerprint: outlier.fingerprint.clone(),
                winning_fingerprint: result.winning_fingerprint.clone(),
                discrepancy: outlier.discrepancy_summary.clone(),
                field_differences: outlier.field_differences.clone(),
            });
        }
    }

    ValidationReport {
        generated_at: chrono::Local::now().to_rfc3339(),
        summary: summarize(results),
        by_confidence,
        messages,
        outliers,
    }
}

/// One outlier inside a discrepancy issue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueOutlier {
    pub source: String,
    pub fingerprint: String,
    pub discrepancy: String,
    pub details: Vec<FieldDiff>,
}

/// One (message, version) needing adjudication.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Issue {
    pub message_name: String,
    pub protocol_version: u32,
    pub has_consensus: bool,
    pub confidence: Confidence,
    pub agreement: String,
    pub winning_fingerprint: Option<String>,
    pub agreeing_sources: Vec<String>,
    pub outliers: Vec<IssueOutlier>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscrepancySummary {
    pub total_messages_with_issues: usize,
    pub total_outliers: usize,
    pub no_consensus_count: usize,
}

/// Focused report on groups with outliers or without consensus.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscrepancyReport {
    pub generated_at: String,
    pub summary: DiscrepancySummary,
    pub issues: Vec<Issue>,
}

/// Build the discrepancy report for manual or automated adjudication.
pub fn discrepancy_report(results: &BTreeMap<GroupKey, ConsensusResult>) -> DiscrepancyReport {
    let problems: Vec<(&GroupKey, &ConsensusResult)> = results
        .iter()
        .filter(|(_, r)| !r.outliers.is_empty() || !r.has_consensus)
        .collect();

    let issues: Vec<Issue> = problems
        .iter()
        .map(|((name, version), result)| Issue {
            message_name: name.clone(),
            protocol_version: *version,
            has_consensus: result.has_consensus,
            confidence: result.confidence,
            agreement: format!("{}/{}", result.agreement_count, result.total_count),
            winning_fingerprint: result.winning_fingerprint.clone(),
            agreeing_sources: result.sources.clone(),
            outliers: result
                .outliers
                .iter()
                .map(|o| IssueOutlier {
                    source: o.source.clone(),
                    fingerprint: o.fingerprint.clone(),
                    discrepancy: o.discrepancy_summary.clone(),
                    details: o.field_differences.clone(),
                })
                .collect(),
        })
        .collect();

    DiscrepancyReport {
        generated_at: chrono::Local::now().to_rfc3339(),
        summary: DiscrepancySummary {
            total_messages_with_issues: problems.len(),
            total_outliers: problems.iter().map(|(_, r)| r.outliers.len()).sum(),
            no_consensus_count: problems.iter().filter(|(_, r)| !r.has_consensus).count(),
        },
        issues,
    }
}

/// Write any report as pretty JSON, creating parent directories.
pub fn write_report<T: Serialize>(report: &T, path: &Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(report)?)?;
    Ok(())
}

/// Print a human-readable voting summary to stdout.
pub fn print_summary(results: &BTreeMap<GroupKey, ConsensusResult>) {
    let summary = summarize(results);

    println!("\n{}", "=".repeat(60));
    println!("VALIDATION SUMMARY");
    println!("{}", "=".repeat(60));

    println!(
        "\nTotal message/version combinations: {}",
        summary.total_message_versions
    );
    println!("With consensus: {}", summary.with_consensus);
    println!("Without consensus: {}", summary.without_consensus);
    println!(
        "Average confidence score: {:.1}%",
        summary.average_confidence_score * 100.0
    );

    println!("\nBy confidence level:");
    for level in ["high", "medium", "low", "single_source", "no_consensus"] {
        if let Some(count) = summary.by_confidence_level.get(level) {
            println!("  {}: {}", level, count);
        }
    }

    println!(
        "\nTotal outliers (extraction errors): {}",
        summary.total_outliers
    );

    let no_consensus: Vec<_> = results.iter().filter(|(_, r)| !r.has_consensus).collect();
    if !no_consensus.is_empty() {
        println!(
            "\n--- Messages without consensus ({}) ---",
            no_consensus.len()
        );
        for ((name, version), result) in no_consensus.iter().take(10) {
            println!(
                "  {} v{}: {}/{}",
                name, version, result.agreement_count, result.total_count
            );
        }
        if no_consensus.len() > 10 {
            println!("  ... and {} more", no_consensus.len() - 10);
        }
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grouping::{group_instances, ExtractionInstance};
    use crate::types::{DataType, FieldDescriptor, MessageDefinition};
    use crate::voting::{vote_on_all_groups, VotingConfig};

    fn instance(source: &str, name: &str, type_at_4: &str) -> ExtractionInstance {
        let mut msg = MessageDefinition::new(name);
        msg.fields = vec![
            FieldDescriptor::new("iTOW", 0, DataType::Scalar("U4".to_string())),
            FieldDescriptor::new("flags", 4, DataType::Scalar(type_at_4.to_string())),
        ];
        ExtractionInstance::new(source.to_string(), msg).unwrap()
    }

    fn sample_results() -> BTreeMap<GroupKey, crate::voting::ConsensusResult> {
        let groups = group_instances(vec![
            // Clean consensus
            instance("src-A", "X-NAV-PVT", "X1"),
            instance("src-B", "X-NAV-PVT", "X1"),
            instance("src-C", "X-NAV-PVT", "X1"),
            // One outlier
            instance("src-A", "X-NAV-SAT", "X1"),
            instance("src-B", "X-NAV-SAT", "X1"),
            instance("src-C", "X-NAV-SAT", "U1"),
            // Even split
            instance("src-A", "X-CFG-RATE", "X1"),
            instance("src-B", "X-CFG-RATE", "U1"),
        ]);
        vote_on_all_groups(&groups, &VotingConfig::default(), 1).unwrap()
    }

    #[test]
    fn test_validation_report_summary() {
        let results = sample_results();
        let report = validation_report(&results);

        assert_eq!(report.summary.total_message_versions, 3);
        assert_eq!(report.summary.with_consensus, 1);
        assert_eq!(report.summary.without_consensus, 2);
        // X-NAV-SAT has 1 outlier, X-CFG-RATE has 1 relative to its nominal winner
        assert_eq!(report.summary.total_outliers, 2);
        assert_eq!(report.messages.len(), 3);
        assert_eq!(report.outliers.len(), 2);
        assert_eq!(report.summary.by_confidence_level["high"], 1);
    }

    #[test]
    fn test_validation_report_agreement_format() {
        let results = sample_results();
        let report = validation_report(&results);
        let sat_row = report
            .messages
            .iter()
            .find(|m| m.message_name == "X-NAV-SAT")
            .unwrap();
        assert_eq!(sat_row.agreement, "2/3");
        assert_eq!(sat_row.outlier_count, 1);
    }

    #[test]
    fn test_discrepancy_report_only_problem_groups() {
        let results = sample_results();
        let report = discrepancy_report(&results);

        assert_eq!(report.summary.total_messages_with_issues, 2);
        // X-NAV-SAT at 2/3 sits below the 0.75 threshold, like X-CFG-RATE at 1/2
        assert_eq!(report.summary.no_consensus_count, 2);
        let names: Vec<&str> = report
            .issues
            .iter()
            .map(|i| i.message_name.as_str())
            .collect();
        assert!(names.contains(&"X-NAV-SAT"));
        assert!(names.contains(&"X-CFG-RATE"));
        assert!(!names.contains(&"X-NAV-PVT"));
    }

    #[test]
    fn test_discrepancy_issue_details() {
        let results = sample_results();
        let report = discrepancy_report(&results);
        let sat = report
            .issues
            .iter()
            .find(|i| i.message_name == "X-NAV-SAT")
            .unwrap();
        assert!(!sat.has_consensus);
        assert_eq!(sat.agreement, "2/3");
        assert_eq!(sat.outliers.len(), 1);
        assert_eq!(sat.outliers[0].source, "src-C");
        assert_eq!(sat.outliers[0].details.len(), 1);
    }

    #[test]
    fn test_empty_results_report() {
        let results = BTreeMap::new();
        let report = validation_report(&results);
        assert_eq!(report.summary.total_message_versions, 0);
        assert_eq!(report.summary.average_confidence_score, 0.0);
        assert!(report.messages.is_empty());
    }
}
