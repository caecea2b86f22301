//! Vectorized disposition classification.
//!
//! The engine works over columnar buffers: one mask per rule, then a single
//! first-match-wins selection pass. A row-by-row path is retained behind the
//! `use_vectorized` flag purely as an equivalence oracle; the two paths are
//! bit-identical on disposition and reason.

use std::collections::BTreeMap;

use ahash::AHashMap;
use regex::Regex;
use smol_str::SmolStr;

use accord_lib_core::errors::{PipelineError, PipelineResult};
use accord_lib_core::groups::{Disposition, DispositionedRecord, Group};
use accord_lib_core::records::NormalizedRecord;
use accord_lib_core::stages::Stage;

use crate::core::config::DispositionConfig;
use crate::stages::normalize::base_form;

#[derive(Debug, Default)]
pub struct DispositionCounters {
    pub counts: BTreeMap<Disposition, u64>,
}

pub struct DispositionOutcome {
    pub records: Vec<DispositionedRecord>,
    pub counters: DispositionCounters,
}

/// Per-record group facts, gathered once and shared by both paths.
struct GroupFacts<'a> {
    group_id: &'a SmolStr,
    group_size: usize,
    is_primary: bool,
    primary_id: &'a SmolStr,
    weakest_edge_to_primary: Option<i64>,
    has_suffix_mismatch: bool,
}

/// Classifies every record into Keep, Update, Delete, or Verify, preserving
/// input record order.
pub fn classify(
    records: &[NormalizedRecord],
    groups: &[Group],
    config: &DispositionConfig,
) -> PipelineResult<DispositionOutcome> {
    let regex = Regex::new(&config.suspicious_singleton_regex)
        .map_err(|e| PipelineError::Config(format!("disposition.suspicious_singleton_regex: {e}")))?;

    // Phrases match against name_base, so they go through the same symbol
    // normalization as names; the reported reason keeps the configured form.
    let phrases: Vec<(String, &str)> = config
        .blacklist
        .phrases
        .iter()
        .map(|p| (base_form(&p.to_lowercase()), p.as_str()))
        .collect();
    let tokens: Vec<String> = config
        .blacklist
        .tokens
        .iter()
        .map(|t| t.to_lowercase())
        .collect();

    let facts = gather_facts(records, groups)?;

    let verdicts = if config.use_vectorized {
        classify_vectorized(records, &facts, config, &regex, &tokens, &phrases)
    } else {
        records
            .iter()
            .zip(&facts)
            .map(|(record, fact)| classify_row(record, fact, config, &regex, &tokens, &phrases))
            .collect()
    };

    let mut counters = DispositionCounters::default();
    let mut out = Vec::with_capacity(records.len());
    for ((record, fact), (disposition, reason)) in records.iter().zip(&facts).zip(verdicts) {
        *counters.counts.entry(disposition).or_default() += 1;
        out.push(DispositionedRecord {
            record: record.record.clone(),
            group_id: fact.group_id.clone(),
            group_size: fact.group_size,
            is_primary: fact.is_primary,
            weakest_edge_to_primary: fact.weakest_edge_to_primary,
            disposition,
            disposition_reason: reason,
        });
    }

    Ok(DispositionOutcome {
        records: out,
        counters,
    })
}

fn gather_facts<'a>(
    records: &[NormalizedRecord],
    groups: &'a [Group],
) -> PipelineResult<Vec<GroupFacts<'a>>> {
    let mut by_member: AHashMap<&SmolStr, GroupFacts<'a>> = AHashMap::new();
    for group in groups {
        let primary_id = group.primary_id.as_ref().ok_or_else(|| {
            PipelineError::stage(
                Stage::Disposition,
                format!("group {} reached disposition without a primary", group.group_id),
            )
        })?;
        for member in &group.members {
            by_member.insert(
                &member.account_id,
                GroupFacts {
                    group_id: &group.group_id,
                    group_size: group.group_size,
                    is_primary: &member.account_id == primary_id,
                    primary_id,
                    weakest_edge_to_primary: member.weakest_edge_to_primary,
                    has_suffix_mismatch: group.has_suffix_mismatch,
                },
            );
        }
    }

    records
        .iter()
        .map(|record| {
            by_member.remove(record.account_id()).ok_or_else(|| {
                PipelineError::stage(
                    Stage::Disposition,
                    format!("record '{}' belongs to no group", record.account_id()),
                )
            })
        })
        .collect()
}

/// Columnar path: one mask per rule, one selection sweep.
fn classify_vectorized(
    records: &[NormalizedRecord],
    facts: &[GroupFacts<'_>],
    config: &DispositionConfig,
    regex: &Regex,
    tokens: &[String],
    phrases: &[(String, &str)],
) -> Vec<(Disposition, String)> {
    let n = records.len();

    let override_mask: Vec<Option<Disposition>> = records
        .iter()
        .map(|r| config.manual_overrides.get(r.account_id().as_str()).copied())
        .collect();
    let blacklist_mask: Vec<Option<String>> = records
        .iter()
        .map(|r| blacklist_reason(r, tokens, phrases))
        .collect();
    let suspicious_mask: Vec<bool> = records
        .iter()
        .zip(facts)
        .map(|(r, f)| f.group_size == 1 && regex.is_match(&r.name_base))
        .collect();
    let suffix_mask: Vec<bool> = facts.iter().map(|f| f.has_suffix_mismatch).collect();
    let multi_mask: Vec<bool> = facts.iter().map(|f| f.group_size > 1).collect();

    (0..n)
        .map(|i| {
            if let Some(disposition) = override_mask[i] {
                return (disposition, "manual".to_string());
            }
            if let Some(reason) = &blacklist_mask[i] {
                return (Disposition::Delete, reason.clone());
            }
            if suspicious_mask[i] {
                return (Disposition::Verify, "suspicious singleton name".to_string());
            }
            if suffix_mask[i] {
                return (Disposition::Verify, "suffix mismatch within group".to_string());
            }
            if multi_mask[i] {
                if facts[i].is_primary {
                    (Disposition::Keep, "group primary".to_string())
                } else {
                    (
                        Disposition::Update,
                        format!("duplicate of {}", facts[i].primary_id),
                    )
                }
            } else {
                (Disposition::Keep, "unique record".to_string())
            }
        })
        .collect()
}

/// Row-by-row oracle. Must stay bit-identical to the vectorized path.
fn classify_row(
    record: &NormalizedRecord,
    fact: &GroupFacts<'_>,
    config: &DispositionConfig,
    regex: &Regex,
    tokens: &[String],
    phrases: &[(String, &str)],
) -> (Disposition, String) {
    if let Some(&disposition) = config.manual_overrides.get(record.account_id().as_str()) {
        return (disposition, "manual".to_string());
    }
    if let Some(reason) = blacklist_reason(record, tokens, phrases) {
        return (Disposition::Delete, reason);
    }
    if fact.group_size == 1 && regex.is_match(&record.name_base) {
        return (Disposition::Verify, "suspicious singleton name".to_string());
    }
    if fact.has_suffix_mismatch {
        return (Disposition::Verify, "suffix mismatch within group".to_string());
    }
    if fact.group_size > 1 {
        if fact.is_primary {
            (Disposition::Keep, "group primary".to_string())
        } else {
            (
                Disposition::Update,
                format!("duplicate of {}", fact.primary_id),
            )
        }
    } else {
        (Disposition::Keep, "unique record".to_string())
    }
}

fn blacklist_reason(
    record: &NormalizedRecord,
    tokens: &[String],
    phrases: &[(String, &str)],
) -> Option<String> {
    for token in tokens {
        if record.tokens.iter().any(|t| t.as_str() == token) {
            return Some(format!("blacklisted token '{token}'"));
        }
    }
    for (normalized, configured) in phrases {
        if !normalized.is_empty() && record.name_base.contains(normalized.as_str()) {
            return Some(format!("blacklisted phrase '{configured}'"));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_lib_core::groups::GroupMember;
    use accord_lib_core::records::Record;
    use pretty_assertions::assert_eq;

    use crate::core::config::NormalizationConfig;
    use crate::stages::normalize::normalize;

    fn normalized(rows: &[(&str, &str)]) -> Vec<NormalizedRecord> {
        let config = NormalizationConfig::default();
        rows.iter()
            .map(|(id, name)| normalize(&Record::new(*id, *name), &config))
            .collect()
    }

    fn singleton(id: &str) -> Group {
        Group {
            group_id: format!("grp_{id}").into(),
            members: vec![GroupMember {
                account_id: id.into(),
                weakest_edge_to_primary: None,
            }],
            primary_id: Some(id.into()),
            edges: vec![],
            has_suffix_mismatch: false,
            group_size: 1,
        }
    }

    fn pair_group(primary: &str, other: &str, suffix_mismatch: bool) -> Group {
        Group {
            group_id: format!("grp_{primary}").into(),
            members: vec![
                GroupMember {
                    account_id: primary.into(),
                    weakest_edge_to_primary: None,
                },
                GroupMember {
                    account_id: other.into(),
                    weakest_edge_to_primary: Some(92),
                },
            ],
            primary_id: Some(primary.into()),
            edges: vec![],
            has_suffix_mismatch: suffix_mismatch,
            group_size: 2,
        }
    }

    #[test]
    fn blacklisted_phrase_deletes_and_names_the_phrase() {
        let records = normalized(&[("C1", "N/A")]);
        let outcome = classify(&records, &[singleton("C1")], &DispositionConfig::default())
            .unwrap();
        assert_eq!(outcome.records[0].disposition, Disposition::Delete);
        assert_eq!(
            outcome.records[0].disposition_reason,
            "blacklisted phrase 'n/a'"
        );
    }

    #[test]
    fn suspicious_singleton_is_verified() {
        let records = normalized(&[("E1", "test company")]);
        let outcome = classify(&records, &[singleton("E1")], &DispositionConfig::default())
            .unwrap();
        assert_eq!(outcome.records[0].disposition, Disposition::Verify);
        assert_eq!(
            outcome.records[0].disposition_reason,
            "suspicious singleton name"
        );
    }

    #[test]
    fn suffix_mismatch_group_is_verified_throughout() {
        let records = normalized(&[("B1", "Acme Holdings Inc"), ("B2", "Acme Holdings LLC")]);
        let groups = vec![pair_group("B1", "B2", true)];
        let outcome = classify(&records, &groups, &DispositionConfig::default()).unwrap();
        assert_eq!(outcome.records[0].disposition, Disposition::Verify);
        assert_eq!(outcome.records[1].disposition, Disposition::Verify);
    }

    #[test]
    fn clean_group_splits_keep_and_update() {
        let records = normalized(&[("A1", "Acme Supply"), ("A2", "Acme Supply Co")]);
        let groups = vec![pair_group("A1", "A2", false)];
        let outcome = classify(&records, &groups, &DispositionConfig::default()).unwrap();
        assert_eq!(outcome.records[0].disposition, Disposition::Keep);
        assert_eq!(outcome.records[0].disposition_reason, "group primary");
        assert_eq!(outcome.records[1].disposition, Disposition::Update);
        assert_eq!(outcome.records[1].disposition_reason, "duplicate of A1");
    }

    #[test]
    fn manual_override_beats_everything() {
        let records = normalized(&[("C1", "N/A")]);
        let mut config = DispositionConfig::default();
        config
            .manual_overrides
            .insert("C1".to_string(), Disposition::Keep);
        let outcome = classify(&records, &[singleton("C1")], &config).unwrap();
        assert_eq!(outcome.records[0].disposition, Disposition::Keep);
        assert_eq!(outcome.records[0].disposition_reason, "manual");
    }

    #[test]
    fn blacklisted_token_names_the_token() {
        let records = normalized(&[("T1", "Zombie Test Kitchen")]);
        let mut config = DispositionConfig::default();
        config.blacklist.tokens.push("zombie".to_string());
        let outcome = classify(&records, &[singleton("T1")], &config).unwrap();
        assert_eq!(outcome.records[0].disposition, Disposition::Delete);
        assert_eq!(
            outcome.records[0].disposition_reason,
            "blacklisted token 'zombie'"
        );
    }

    #[test]
    fn vectorized_and_row_paths_are_bit_identical() {
        let records = normalized(&[
            ("A1", "Acme Supply"),
            ("A2", "Acme Supply Co"),
            ("C1", "N/A"),
            ("E1", "test company"),
            ("K1", "Zenith Freight"),
        ]);
        let groups = vec![
            pair_group("A1", "A2", false),
            singleton("C1"),
            singleton("E1"),
            singleton("K1"),
        ];

        let mut vectorized_config = DispositionConfig::default();
        vectorized_config
            .manual_overrides
            .insert("K1".to_string(), Disposition::Verify);
        let mut row_config = vectorized_config.clone();
        row_config.use_vectorized = false;

        let vectorized = classify(&records, &groups, &vectorized_config).unwrap();
        let legacy = classify(&records, &groups, &row_config).unwrap();
        assert_eq!(vectorized.records, legacy.records);
    }

    #[test]
    fn every_record_appears_exactly_once_in_input_order() {
        let records = normalized(&[("B2", "Beta"), ("A1", "Alpha"), ("C3", "Gamma")]);
        let groups = vec![singleton("A1"), singleton("B2"), singleton("C3")];
        let outcome = classify(&records, &groups, &DispositionConfig::default()).unwrap();
        let ids: Vec<&str> = outcome
            .records
            .iter()
            .map(|r| r.record.account_id.as_str())
            .collect();
        assert_eq!(ids, vec!["B2", "A1", "C3"]);
    }
}
