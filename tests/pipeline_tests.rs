//! End-to-end pipeline tests: extraction inbox -> grouping -> voting ->
//! canonical output and reports.

mod common;

use common::{mon_ver, nav_pvt, write_extraction};
use message_consensus::grouping::{group_instances, load_instances};
use message_consensus::output::{
    load_canonical, write_canonical, AnnotationRegistry, WriteOptions,
};
use message_consensus::report::{discrepancy_report, validation_report};
use message_consensus::voting::{vote_on_all_groups, Confidence, VotingConfig};
use std::fs;

#[test]
fn test_full_pipeline_writes_canonical_records() {
    let inbox = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    // Three sources agree on everything; a fourth disagrees on X-NAV-PVT
    write_extraction(inbox.path(), "a.json", "src-A", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "b.json", "src-B", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "c.json", "src-C", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "d.json", "src-D", vec![nav_pvt("U1")]);

    let (instances, stats) = load_instances(inbox.path()).unwrap();
    assert_eq!(stats.files, 4);
    assert_eq!(stats.instances, 7);
    assert_eq!(stats.skipped, 0);

    let groups = group_instances(instances);
    // X-MON-VER groups under the version parsed from its version field
    assert!(groups.contains_key(&("X-MON-VER".to_string(), 1)));
    assert!(groups.contains_key(&("X-NAV-PVT".to_string(), 0)));
    assert_eq!(groups.len(), 2);

    let results = vote_on_all_groups(&groups, &VotingConfig::default(), 2).unwrap();

    let manifest = write_canonical(
        &results,
        out.path(),
        &WriteOptions {
            require_consensus: true,
            min_confidence: None,
            workers: 2,
        },
        &AnnotationRegistry::default(),
    )
    .unwrap();

    assert_eq!(manifest.stats.written, 2);
    assert_eq!(manifest.stats.skipped_no_consensus, 0);
    assert_eq!(manifest.stats.skipped_low_confidence, 0);

    // 3/3 agreement on the versioned message
    let ver = load_canonical(&out.path().join("messages/X-MON-VER-v1.json")).unwrap();
    assert_eq!(ver.protocol_version, 1);
    assert_eq!(ver.consensus.confidence, Confidence::High);
    assert_eq!(ver.consensus.confidence_score, 1.0);
    assert_eq!(ver.consensus.sources.len(), 3);
    assert!(ver.consensus.outliers.is_empty());

    // 3/4 agreement with one outlier on the unversioned message
    let pvt = load_canonical(&out.path().join("messages/X-NAV-PVT-v0.json")).unwrap();
    assert_eq!(pvt.protocol_version, 0);
    assert_eq!(pvt.consensus.agreement_count, 3);
    assert_eq!(pvt.consensus.total_count, 4);
    assert_eq!(pvt.consensus.confidence, Confidence::Medium);
    assert_eq!(pvt.consensus.outliers.len(), 1);
    assert_eq!(pvt.consensus.outliers[0].source, "src-D");
    assert_eq!(pvt.fields.len(), 3);

    // Manifest on disk matches the returned manifest
    let on_disk = common::read_json(&out.path().join("manifest.json")).unwrap();
    assert_eq!(on_disk["messages"].as_object().unwrap().len(), 2);
    assert_eq!(on_disk["stats"]["written"], 2);
    assert_eq!(
        on_disk["messages"]["X-NAV-PVT-v0"]["confidence"],
        "medium"
    );
}

#[test]
fn test_no_consensus_group_is_skipped() {
    let inbox = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    write_extraction(inbox.path(), "a.json", "src-A", vec![nav_pvt("X1")]);
    write_extraction(inbox.path(), "b.json", "src-B", vec![nav_pvt("U1")]);

    let (instances, _) = load_instances(inbox.path()).unwrap();
    let results =
        vote_on_all_groups(&group_instances(instances), &VotingConfig::default(), 1).unwrap();

    let manifest = write_canonical(
        &results,
        out.path(),
        &WriteOptions::default(),
        &AnnotationRegistry::default(),
    )
    .unwrap();

    assert_eq!(manifest.stats.written, 0);
    assert_eq!(manifest.stats.skipped_no_consensus, 1);
    assert!(!out.path().join("messages/X-NAV-PVT-v0.json").exists());
}

#[test]
fn test_min_confidence_filter_on_write() {
    let inbox = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    write_extraction(inbox.path(), "a.json", "src-A", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "b.json", "src-B", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "c.json", "src-C", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "d.json", "src-D", vec![nav_pvt("U1")]);

    let (instances, _) = load_instances(inbox.path()).unwrap();
    let results =
        vote_on_all_groups(&group_instances(instances), &VotingConfig::default(), 1).unwrap();

    let manifest = write_canonical(
        &results,
        out.path(),
        &WriteOptions {
            require_consensus: true,
            min_confidence: Some(Confidence::High),
            workers: 1,
        },
        &AnnotationRegistry::default(),
    )
    .unwrap();

    // X-NAV-PVT at 3/4 is medium and falls below the bar
    assert_eq!(manifest.stats.written, 1);
    assert_eq!(manifest.stats.skipped_low_confidence, 1);
    assert!(out.path().join("messages/X-MON-VER-v1.json").exists());
    assert!(!out.path().join("messages/X-NAV-PVT-v0.json").exists());
}

#[test]
fn test_annotations_are_injected_into_records() {
    let inbox = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();

    write_extraction(inbox.path(), "a.json", "src-A", vec![mon_ver()]);
    write_extraction(inbox.path(), "b.json", "src-B", vec![mon_ver()]);
    write_extraction(inbox.path(), "c.json", "src-C", vec![mon_ver()]);

    let annotations_path = out.path().join("annotations.json");
    fs::write(
        &annotations_path,
        r#"{"X-MON-VER-v1": [{"type": "note", "message": "string layout varies by firmware"}]}"#,
    )
    .unwrap();
    let registry = AnnotationRegistry::load(Some(&annotations_path)).unwrap();

    let (instances, _) = load_instances(inbox.path()).unwrap();
    let results =
        vote_on_all_groups(&group_instances(instances), &VotingConfig::default(), 1).unwrap();
    write_canonical(&results, out.path(), &WriteOptions::default(), &registry).unwrap();

    let record = load_canonical(&out.path().join("messages/X-MON-VER-v1.json")).unwrap();
    assert_eq!(record.annotations.len(), 1);
}

#[test]
fn test_unreadable_extraction_file_is_skipped() {
    let inbox = tempfile::tempdir().unwrap();

    write_extraction(inbox.path(), "good.json", "src-A", vec![nav_pvt("X1")]);
    fs::write(inbox.path().join("broken.json"), "{ not json at all").unwrap();

    let (instances, stats) = load_instances(inbox.path()).unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(instances.len(), 1);
    assert_eq!(stats.skipped, 1);
}

#[test]
fn test_reports_surface_outliers_and_splits() {
    let inbox = tempfile::tempdir().unwrap();

    write_extraction(inbox.path(), "a.json", "src-A", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "b.json", "src-B", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "c.json", "src-C", vec![nav_pvt("X1"), mon_ver()]);
    write_extraction(inbox.path(), "d.json", "src-D", vec![nav_pvt("U1")]);

    let (instances, _) = load_instances(inbox.path()).unwrap();
    let results =
        vote_on_all_groups(&group_instances(instances), &VotingConfig::default(), 1).unwrap();

    let validation = validation_report(&results);
    assert_eq!(validation.summary.total_message_versions, 2);
    assert_eq!(validation.summary.with_consensus, 2);
    assert_eq!(validation.summary.total_outliers, 1);

    let discrepancy = discrepancy_report(&results);
    assert_eq!(discrepancy.summary.total_messages_with_issues, 1);
    assert_eq!(discrepancy.issues[0].message_name, "X-NAV-PVT");
    assert_eq!(discrepancy.issues[0].outliers[0].source, "src-D");
    assert!(!discrepancy.issues[0].outliers[0].details.is_empty());
}
