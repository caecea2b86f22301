//! Blocked candidate-pair generation.
//!
//! A pair becomes a candidate when both records co-occur in any bucket:
//! first-token, bigram, or numeric-aware. Buckets bound the work far below
//! the full cross product; banning, sharding, and the caps bound the buckets
//! themselves. Output order is contractual: block key ascending, then
//! (id_a, id_b) ascending, with `id_a < id_b` on every pair.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use smol_str::{SmolStr, format_smolstr};
use tracing::{debug, warn};

use accord_lib_core::pairs::CandidatePair;
use accord_lib_core::records::NormalizedRecord;

use crate::core::config::BlockingConfig;

#[derive(Debug, Default, Clone, Copy)]
pub struct BlockingCounters {
    pub blocks: u64,
    pub sharded_blocks: u64,
    pub banned_tokens: u64,
    pub raw_pairs: u64,
    pub pairs: u64,
    pub truncated: bool,
}

pub struct BlockingOutcome {
    pub pairs: Vec<CandidatePair>,
    pub counters: BlockingCounters,
}

/// One bucket membership before pair expansion. Ranks are positions in the
/// id-sorted survivor table, so packed rank pairs sort exactly like id pairs.
struct BucketEntry {
    key_idx: u32,
    shard_idx: u32,
    packed: u64,
}

pub fn generate_candidates(
    records: &[NormalizedRecord],
    survivors: &[usize],
    config: &BlockingConfig,
) -> BlockingOutcome {
    let mut counters = BlockingCounters::default();

    // Rank survivors by account id; the packed-u64 ordering below then
    // doubles as the id ordering invariant.
    let mut ranked: Vec<&NormalizedRecord> = survivors.iter().map(|&i| &records[i]).collect();
    ranked.sort_by(|a, b| a.account_id().cmp(b.account_id()));

    let banned = banned_first_tokens(&ranked, config.top_token_ban_k);
    counters.banned_tokens = banned.len() as u64;

    let mut buckets: BTreeMap<SmolStr, Vec<u32>> = BTreeMap::new();
    for (rank, record) in ranked.iter().enumerate() {
        let rank = rank as u32;
        for key in bucket_keys(record, &banned) {
            buckets.entry(key).or_default().push(rank);
        }
    }
    counters.blocks = buckets.len() as u64;

    let mut keys: Vec<SmolStr> = Vec::with_capacity(buckets.len());
    let mut entries: Vec<BucketEntry> = Vec::new();

    for (key, members) in buckets {
        if members.len() < 2 {
            continue;
        }
        let key_idx = keys.len() as u32;
        keys.push(key);

        let pair_count = members.len() * (members.len() - 1) / 2;
        if pair_count > config.block_cap {
            counters.sharded_blocks += 1;
            for (shard_idx, shard) in shard_members(&ranked, &members) {
                expand_pairs(&ranked, &shard, key_idx, shard_idx, config, &mut entries);
            }
        } else {
            expand_pairs(&ranked, &members, key_idx, 0, config, &mut entries);
        }
    }
    counters.raw_pairs = entries.len() as u64;

    // Cross-bucket dedup: stable sort by packed rank pair, keep the first
    // occurrence (the lexicographically smallest block key), then restore
    // the contractual output order.
    entries.sort_by_key(|e| e.packed);
    entries.dedup_by_key(|e| e.packed);
    entries.sort_by_key(|e| (e.key_idx, e.packed));

    if entries.len() > config.global_pair_cap {
        warn!(
            emitted = entries.len(),
            cap = config.global_pair_cap,
            "candidate pairs exceed the global cap; truncating in block-key order"
        );
        entries.truncate(config.global_pair_cap);
        counters.truncated = true;
    }
    counters.pairs = entries.len() as u64;

    let pairs = entries
        .iter()
        .map(|e| {
            let id_a = ranked[(e.packed >> 32) as usize].account_id().clone();
            let id_b = ranked[(e.packed & 0xffff_ffff) as usize].account_id().clone();
            CandidatePair {
                id_a,
                id_b,
                block_key: keys[e.key_idx as usize].clone(),
                shard_idx: e.shard_idx,
            }
        })
        .collect();

    debug!(
        blocks = counters.blocks,
        sharded = counters.sharded_blocks,
        pairs = counters.pairs,
        "candidate generation complete"
    );

    BlockingOutcome { pairs, counters }
}

/// The K most frequent first tokens, banned from the first-token key. They
/// stay reachable through the bigram and numeric keys.
fn banned_first_tokens(ranked: &[&NormalizedRecord], ban_k: usize) -> Vec<SmolStr> {
    if ban_k == 0 {
        return Vec::new();
    }
    let mut frequency: FxHashMap<&SmolStr, u64> = FxHashMap::default();
    for record in ranked {
        if let Some(first) = record.tokens.first() {
            *frequency.entry(first).or_default() += 1;
        }
    }
    let mut ordered: Vec<(&SmolStr, u64)> = frequency.into_iter().collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ordered
        .into_iter()
        .take(ban_k)
        .map(|(token, _)| token.clone())
        .collect()
}

fn bucket_keys(record: &NormalizedRecord, banned: &[SmolStr]) -> Vec<SmolStr> {
    let mut keys = Vec::with_capacity(3);
    let Some(first) = record.tokens.first() else {
        return keys;
    };

    if !banned.contains(first) {
        keys.push(format_smolstr!("t:{first}"));
    }
    if let Some(second) = record.tokens.get(1) {
        keys.push(format_smolstr!("b:{first} {second}"));
    }
    let digit = record
        .tokens
        .iter()
        .find(|t| t.bytes().all(|b| b.is_ascii_digit()));
    if let Some(digit) = digit {
        let alpha = record
            .tokens
            .iter()
            .find(|t| t.chars().any(char::is_alphabetic))
            .map_or("", |t| t.as_str());
        keys.push(format_smolstr!("n:{digit}|{alpha}"));
    }
    keys
}

/// Deterministic jumbo-block sharding by a secondary key: the initial of the
/// third token, falling back toward the front of the name. Shard indices are
/// 1-based so 0 keeps meaning "unsharded".
fn shard_members(
    ranked: &[&NormalizedRecord],
    members: &[u32],
) -> Vec<(u32, Vec<u32>)> {
    let mut shards: BTreeMap<char, Vec<u32>> = BTreeMap::new();
    for &rank in members {
        let tokens = &ranked[rank as usize].tokens;
        let token = tokens.get(2).or_else(|| tokens.get(1)).or_else(|| tokens.first());
        let initial = token
            .and_then(|t| t.chars().next())
            .unwrap_or('_');
        shards.entry(initial).or_default().push(rank);
    }
    shards
        .into_values()
        .enumerate()
        .map(|(i, shard)| (i as u32 + 1, shard))
        .collect()
}

fn expand_pairs(
    ranked: &[&NormalizedRecord],
    members: &[u32],
    key_idx: u32,
    shard_idx: u32,
    config: &BlockingConfig,
    entries: &mut Vec<BucketEntry>,
) {
    for (i, &a) in members.iter().enumerate() {
        let len_a = ranked[a as usize].name_core.chars().count();
        for &b in &members[i + 1..] {
            let len_b = ranked[b as usize].name_core.chars().count();
            if len_a.abs_diff(len_b) > length_window(config, len_a.max(len_b)) {
                continue;
            }
            entries.push(BucketEntry {
                key_idx,
                shard_idx,
                packed: (u64::from(a) << 32) | u64::from(b),
            });
        }
    }
}

fn length_window(config: &BlockingConfig, longer: usize) -> usize {
    if config.length_window > 0 {
        config.length_window
    } else {
        (longer / 4).max(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_lib_core::records::Record;

    use crate::core::config::NormalizationConfig;
    use crate::stages::normalize::normalize;

    fn normalized(rows: &[(&str, &str)]) -> Vec<NormalizedRecord> {
        let config = NormalizationConfig::default();
        rows.iter()
            .map(|(id, name)| normalize(&Record::new(*id, *name), &config))
            .collect()
    }

    fn all_survivors(records: &[NormalizedRecord]) -> Vec<usize> {
        (0..records.len()).collect()
    }

    #[test]
    fn pairs_are_unique_ordered_and_id_sorted() {
        let records = normalized(&[
            ("A3", "Acme Supply"),
            ("A1", "Acme Supply Co"),
            ("A2", "Acme Supplies"),
        ]);
        // Tiny tables would ban every first token at the default K.
        let mut config = BlockingConfig::default();
        config.top_token_ban_k = 0;
        let outcome = generate_candidates(&records, &all_survivors(&records), &config);

        for pair in &outcome.pairs {
            assert!(pair.id_a < pair.id_b);
        }
        // Same pair reachable via first-token and bigram keys must appear once.
        let mut seen: Vec<(&str, &str)> = outcome
            .pairs
            .iter()
            .map(|p| (p.id_a.as_str(), p.id_b.as_str()))
            .collect();
        let before = seen.len();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(before, seen.len());
        assert_eq!(before, 3);
    }

    #[test]
    fn output_is_deterministic() {
        let records = normalized(&[
            ("B1", "Zenith Freight"),
            ("B2", "Zenith Freight Lines"),
            ("B3", "Acme Supply"),
            ("B4", "Acme Supply Co"),
        ]);
        let survivors = all_survivors(&records);
        let config = BlockingConfig::default();
        let first = generate_candidates(&records, &survivors, &config);
        let second = generate_candidates(&records, &survivors, &config);
        assert_eq!(first.pairs, second.pairs);
    }

    #[test]
    fn banned_first_token_still_reachable_via_bigram() {
        let records = normalized(&[
            ("C1", "Acme Supply"),
            ("C2", "Acme Supply"),
            ("C3", "Acme Freight"),
        ]);
        // Ban every first token.
        let mut config = BlockingConfig::default();
        config.top_token_ban_k = 1;
        let outcome = generate_candidates(&records, &all_survivors(&records), &config);
        assert!(
            outcome
                .pairs
                .iter()
                .any(|p| p.id_a == "C1" && p.id_b == "C2"),
            "bigram key must keep banned-token records pairable"
        );
        assert!(outcome.pairs.iter().all(|p| p.block_key.starts_with("b:")));
    }

    #[test]
    fn numeric_key_pairs_digit_led_names() {
        let records = normalized(&[
            ("N1", "20-20 Plumbing and Heating Inc"),
            ("N2", "20/20 Plumbing & Heating, Inc."),
        ]);
        let mut config = BlockingConfig::default();
        config.top_token_ban_k = 0;
        let outcome = generate_candidates(&records, &all_survivors(&records), &config);
        assert!(
            outcome
                .pairs
                .iter()
                .any(|p| p.id_a == "N1" && p.id_b == "N2")
        );
        // The bigram key sorts first and wins the cross-bucket dedup.
        assert_eq!(outcome.pairs[0].block_key, "b:20 20");
    }

    #[test]
    fn length_window_prunes_wildly_different_names() {
        let records = normalized(&[
            ("L1", "Acme"),
            ("L2", "Acme International Logistics and Warehousing Group"),
        ]);
        let mut config = BlockingConfig::default();
        config.top_token_ban_k = 0;
        config.length_window = 5;
        let outcome = generate_candidates(&records, &all_survivors(&records), &config);
        assert!(outcome.pairs.is_empty());
    }

    #[test]
    fn jumbo_blocks_shard_deterministically() {
        let rows: Vec<(String, String)> = (0..40)
            .map(|i| {
                (
                    format!("S{i:02}"),
                    format!(
                        "Summit {} {}",
                        ["Alpha", "Beta", "Gamma", "Delta"][i % 4],
                        ["Logistics", "Freight", "Transport", "Warehousing"][(i / 4) % 4],
                    ),
                )
            })
            .collect();
        let borrowed: Vec<(&str, &str)> = rows
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        let records = normalized(&borrowed);

        let mut config = BlockingConfig::default();
        config.top_token_ban_k = 0;
        config.block_cap = 50;
        let outcome = generate_candidates(&records, &all_survivors(&records), &config);

        assert!(outcome.counters.sharded_blocks >= 1);
        assert!(outcome.pairs.iter().any(|p| p.shard_idx > 0));

        let again = generate_candidates(&records, &all_survivors(&records), &config);
        assert_eq!(outcome.pairs, again.pairs);
    }

    #[test]
    fn global_cap_truncates_with_flag() {
        let rows: Vec<(String, String)> = (0..20)
            .map(|i| (format!("G{i:02}"), "Granite Peak Supply".to_string()))
            .collect();
        let borrowed: Vec<(&str, &str)> = rows
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        let records = normalized(&borrowed);

        let mut config = BlockingConfig::default();
        config.global_pair_cap = 10;
        let outcome = generate_candidates(&records, &all_survivors(&records), &config);
        assert_eq!(outcome.pairs.len(), 10);
        assert!(outcome.counters.truncated);
    }
}
