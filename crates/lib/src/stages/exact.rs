//! Exact-equals pass: raw-identical names become immediate score-100 edges.
//!
//! Grouping on `raw_exact_key` guarantees character-identical names land in
//! the same cluster no matter what the blocking heuristics do, and dropping
//! the non-representative members materially cuts pair counts downstream.

use std::collections::BTreeMap;

use ahash::AHashMap;
use smol_str::SmolStr;

use accord_lib_core::pairs::{CandidatePair, ScoredPair};
use accord_lib_core::records::{FilterReason, FilteredRecord, NormalizedRecord};
use accord_lib_core::stages::Stage;

pub struct ExactEqualsOutcome {
    /// Score-100 edges covering every (i < j) pair of each exact group.
    pub exact_edges: Vec<ScoredPair>,
    /// Non-representative members, removed from blocking and scoring.
    pub filtered_out: Vec<FilteredRecord>,
    pub exact_groups: usize,
}

/// Groups records by `raw_exact_key` and collapses groups of at least
/// `min_group_size` into synthetic edges. The representative (smallest
/// account id) carries forward; an empty key never groups.
pub fn find_exact_groups(
    records: &[NormalizedRecord],
    min_group_size: usize,
) -> ExactEqualsOutcome {
    let mut by_key: AHashMap<&str, Vec<&SmolStr>> = AHashMap::new();
    for record in records {
        if record.raw_exact_key.is_empty() {
            continue;
        }
        by_key
            .entry(record.raw_exact_key.as_str())
            .or_default()
            .push(record.account_id());
    }

    // Hash-map iteration order is not deterministic; sort groups by their
    // representative before emitting anything.
    let mut groups: Vec<Vec<&SmolStr>> = by_key
        .into_values()
        .filter(|members| members.len() >= min_group_size)
        .collect();
    for members in &mut groups {
        members.sort();
    }
    groups.sort_by(|a, b| a[0].cmp(b[0]));

    let mut exact_edges = Vec::new();
    let mut filtered_out = Vec::new();
    let exact_groups = groups.len();

    for members in &groups {
        for (i, id_a) in members.iter().enumerate() {
            for id_b in &members[i + 1..] {
                let pair = CandidatePair::new(
                    (*id_a).clone(),
                    (*id_b).clone(),
                    "exact",
                    0,
                );
                exact_edges.push(ScoredPair::exact_equal(pair));
            }
        }
        let representative = members[0];
        for member in &members[1..] {
            filtered_out.push(FilteredRecord::new(
                (*member).clone(),
                Stage::ExactEquals,
                FilterReason::ExactDuplicate,
                format!("raw-identical to {representative}"),
            ));
        }
    }

    ExactEqualsOutcome {
        exact_edges,
        filtered_out,
        exact_groups,
    }
}

/// Reconstructs the non-representative audit rows from a committed edge
/// artifact, in the same order `find_exact_groups` emits them. Exact groups
/// are complete graphs, so each member sees the component minimum directly.
pub fn duplicates_from_edges(edges: &[ScoredPair]) -> Vec<FilteredRecord> {
    let mut representative: AHashMap<&SmolStr, &SmolStr> = AHashMap::new();
    for edge in edges {
        for (member, other) in [
            (&edge.pair.id_a, &edge.pair.id_b),
            (&edge.pair.id_b, &edge.pair.id_a),
        ] {
            let entry = representative.entry(member).or_insert(member);
            if other < *entry {
                *entry = other;
            }
        }
    }

    let mut members_by_rep: BTreeMap<&SmolStr, Vec<&SmolStr>> = BTreeMap::new();
    for (member, rep) in &representative {
        if member != rep {
            members_by_rep.entry(rep).or_default().push(member);
        }
    }

    let mut filtered = Vec::new();
    for (rep, mut members) in members_by_rep {
        members.sort();
        for member in members {
            filtered.push(FilteredRecord::new(
                member.clone(),
                Stage::ExactEquals,
                FilterReason::ExactDuplicate,
                format!("raw-identical to {rep}"),
            ));
        }
    }
    filtered
}
