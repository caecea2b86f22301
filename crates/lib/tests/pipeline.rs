//! End-to-end pipeline scenarios over small fixture corpora.

use std::path::Path;

use accord_lib::core::pipeline::state::RunType;
use accord_lib::{Pipeline, PipelineConfig, RunOptions};
use accord_lib_core::groups::{Disposition, DispositionedRecord, Group};
use accord_lib_core::helpers::Config as _;
use accord_lib_core::pairs::{CandidatePair, JoinReason, ScoredPair};
use accord_lib_core::records::Record;

fn record(id: &str, name: &str, relationship: &str, created: &str) -> Record {
    let mut r = Record::new(id, name);
    r.relationship = relationship.into();
    r.created_date = created.into();
    r
}

fn test_config() -> PipelineConfig {
    PipelineConfig::default().config(|c| {
        c.grouping.canopy_max_size = 8;
        c.parallel.workers = 2;
    })
}

fn run(records: &[Record], config: PipelineConfig, dir: &Path) -> accord_lib::RunSummary {
    let pipeline = Pipeline::new(config).unwrap();
    let mut options = RunOptions::new(dir);
    options.run_type = RunType::Test;
    pipeline.run(records, &options).unwrap()
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Vec<T> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

fn final_rows(summary: &accord_lib::RunSummary) -> Vec<DispositionedRecord> {
    read_jsonl(&summary.run_dir.join("final_output.jsonl"))
}

fn row<'a>(rows: &'a [DispositionedRecord], id: &str) -> &'a DispositionedRecord {
    rows.iter()
        .find(|r| r.record.account_id == id)
        .unwrap_or_else(|| panic!("no output row for {id}"))
}

#[test]
fn scenario_suffix_preserving_merge() {
    let records = vec![
        record("A1", "20-20 Plumbing and Heating Inc", "Company Name on W-2", "2020-01-01"),
        record("A2", "20/20 Plumbing & Heating, Inc.", "Other/Miscellaneous", "2021-01-01"),
        record("A3", "20 20 Plumbing & Heating Inc", "Other/Miscellaneous", "2022-01-01"),
    ];
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&records, test_config(), dir.path());

    assert_eq!(summary.groups, 1);
    assert_eq!(summary.merged_records, 3);

    let rows = final_rows(&summary);
    assert_eq!(rows.len(), 3);
    let a1 = row(&rows, "A1");
    assert!(a1.is_primary, "rank 10 beats rank 60");
    assert_eq!(a1.disposition, Disposition::Keep);
    assert_eq!(row(&rows, "A2").disposition, Disposition::Update);
    assert_eq!(row(&rows, "A3").disposition, Disposition::Update);

    // Suffixes agreed throughout, so nothing asked for a Verify.
    let groups: Vec<Group> = read_jsonl(&summary.run_dir.join("survivorship.jsonl"));
    assert_eq!(groups.len(), 1);
    assert!(!groups[0].has_suffix_mismatch);
    assert!(groups[0].edges.iter().all(|e| e.suffix_match));
}

#[test]
fn scenario_suffix_mismatch_penalty_blocks_merge_at_defaults() {
    let records = vec![
        record("B1", "Acme Holdings Inc", "Company Name on W-2", "2020-01-01"),
        record("B2", "Acme Holdings LLC", "Company Name on W-2", "2020-01-02"),
    ];
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&records, test_config(), dir.path());

    // Name components score 100 but the 25-point suffix penalty leaves 75,
    // below the medium threshold: no merge at default thresholds.
    let scored: Vec<ScoredPair> = read_jsonl(&summary.run_dir.join("scoring.jsonl"));
    assert_eq!(scored.len(), 1);
    assert_eq!(scored[0].score, 75);
    assert!(!scored[0].suffix_match);
    assert_eq!(summary.groups, 2);

    let rows = final_rows(&summary);
    assert_eq!(row(&rows, "B1").disposition, Disposition::Keep);
    assert_eq!(row(&rows, "B2").disposition, Disposition::Keep);
}

#[test]
fn scenario_suffix_mismatch_forces_verify_when_grouped() {
    let records = vec![
        record("B1", "Acme Holdings Inc", "Company Name on W-2", "2020-01-01"),
        record("B2", "Acme Holdings LLC", "Company Name on W-2", "2020-01-02"),
    ];
    // Lower the medium threshold so the residual 75 still unions (the pair
    // shares the "acme"/"holding" tokens).
    let mut config = test_config();
    config.similarity.medium = 75;
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&records, config, dir.path());

    assert_eq!(summary.groups, 1);
    let rows = final_rows(&summary);
    assert_eq!(row(&rows, "B1").disposition, Disposition::Verify);
    assert_eq!(row(&rows, "B2").disposition, Disposition::Verify);
    assert_eq!(
        row(&rows, "B1").disposition_reason,
        "suffix mismatch within group"
    );
}

#[test]
fn scenario_blacklist_deletion() {
    let records = vec![record("C1", "N/A", "", "")];
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&records, test_config(), dir.path());

    let rows = final_rows(&summary);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].disposition, Disposition::Delete);
    assert_eq!(rows[0].disposition_reason, "blacklisted phrase 'n/a'");
    assert_eq!(summary.candidate_pairs, 0);
}

#[test]
fn scenario_exact_equals_short_circuit() {
    let records = vec![
        record("D2", "Walmart", "", ""),
        record("D1", "Walmart", "", ""),
        record("D3", "Walmart ", "", ""),
    ];
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&records, test_config(), dir.path());

    let edges: Vec<ScoredPair> = read_jsonl(&summary.run_dir.join("exact_equals.jsonl"));
    assert_eq!(edges.len(), 3);
    for edge in &edges {
        assert_eq!(edge.score, 100);
        assert_eq!(edge.join_reason, Some(JoinReason::ExactEqualRaw));
    }

    assert_eq!(summary.groups, 1);
    let rows = final_rows(&summary);
    let d1 = row(&rows, "D1");
    assert!(d1.is_primary, "representative and survivor is min(account_id)");
    assert_eq!(d1.disposition, Disposition::Keep);
    assert_eq!(row(&rows, "D2").disposition, Disposition::Update);
    assert_eq!(row(&rows, "D3").disposition, Disposition::Update);
    assert_eq!(row(&rows, "D2").weakest_edge_to_primary, Some(100));
}

#[test]
fn scenario_suspicious_singleton() {
    let records = vec![record("E1", "test company", "", "")];
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&records, test_config(), dir.path());

    let rows = final_rows(&summary);
    assert_eq!(rows[0].disposition, Disposition::Verify);
    assert_eq!(rows[0].disposition_reason, "suspicious singleton name");
    assert_eq!(rows[0].group_size, 1);
}

#[test]
fn universal_invariants_hold_over_a_mixed_corpus() {
    let records = vec![
        record("A1", "20-20 Plumbing and Heating Inc", "Company Name on W-2", "2020-01-01"),
        record("A2", "20/20 Plumbing & Heating, Inc.", "Other/Miscellaneous", "2021-01-01"),
        record("A3", "20 20 Plumbing & Heating Inc", "Other/Miscellaneous", "2022-01-01"),
        record("B1", "Acme Holdings Inc", "Company Name on W-2", "2020-01-01"),
        record("B2", "Acme Holdings LLC", "Company Name on W-2", "2020-01-02"),
        record("C1", "N/A", "", ""),
        record("D1", "Walmart", "", ""),
        record("D2", "Walmart", "", ""),
        record("E1", "test company", "", ""),
        record("F1", "", "", ""),
        record("F2", "Inc.", "", ""),
    ];
    let dir = tempfile::tempdir().unwrap();
    let summary = run(&records, test_config(), dir.path());

    // Every input record appears in the output exactly once.
    let rows = final_rows(&summary);
    let mut ids: Vec<&str> = rows.iter().map(|r| r.record.account_id.as_str()).collect();
    ids.sort_unstable();
    let mut expected: Vec<&str> = records.iter().map(|r| r.account_id.as_str()).collect();
    expected.sort_unstable();
    assert_eq!(ids, expected);

    // Candidate pairs: ordered ids, no duplicates.
    let pairs: Vec<CandidatePair> = read_jsonl(&summary.run_dir.join("candidate_generation.jsonl"));
    let mut keys: Vec<(&str, &str)> = pairs
        .iter()
        .map(|p| (p.id_a.as_str(), p.id_b.as_str()))
        .collect();
    for (a, b) in &keys {
        assert!(a < b);
    }
    let before = keys.len();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), before);

    // Scores and jaccard stay clamped.
    let scored: Vec<ScoredPair> = read_jsonl(&summary.run_dir.join("scoring.jsonl"));
    for pair in &scored {
        assert!((0..=100).contains(&pair.score));
        assert!((0.0..=1.0).contains(&pair.jaccard));
    }

    // Groups: primary is a member; singletons carry no weakest edge.
    let groups: Vec<Group> = read_jsonl(&summary.run_dir.join("survivorship.jsonl"));
    for group in &groups {
        let primary = group.primary_id.as_ref().unwrap();
        assert!(group.member_ids().any(|m| m == primary));
        assert!(group.group_size >= 1);
        if group.is_singleton() {
            assert_eq!(group.members[0].weakest_edge_to_primary, None);
        }
    }

    // Empty and suffix-only names became audited singletons, not crashes.
    let audited: Vec<accord_lib_core::records::FilteredRecord> =
        read_jsonl(&summary.run_dir.join("filtering.jsonl"));
    assert!(audited.iter().any(|f| f.account_id == "F1"));
    assert!(audited.iter().any(|f| f.account_id == "F2"));
    assert_eq!(row(&rows, "F1").group_size, 1);
}
