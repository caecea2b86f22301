//! Deterministic survivor selection.
//!
//! The primary is the member with the strongest relationship rank, then the
//! configured tie-breakers, then (always, as a final backstop) the smallest
//! account id. No group leaves this stage with an ambiguous primary.

use ahash::{AHashMap, AHashSet};
use smol_str::SmolStr;

use accord_lib_core::errors::{PipelineError, PipelineResult};
use accord_lib_core::groups::Group;
use accord_lib_core::records::NormalizedRecord;
use accord_lib_core::stages::Stage;

use crate::core::config::{SurvivorshipConfig, TieBreaker};
use crate::utils::dates::created_date_sort_key;

/// One link in the configured tie-breaker chain. Every member of a group
/// produces the same variant at the same position, so the derived ordering
/// compares like with like.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum TieKey {
    Created(i64),
    Id(SmolStr),
}

/// Picks `primary_id` for every group and finalizes each non-primary
/// member's weakest edge to the primary.
pub fn select_survivors(
    groups: &mut [Group],
    records: &[NormalizedRecord],
    config: &SurvivorshipConfig,
) -> PipelineResult<()> {
    let by_id: AHashMap<&SmolStr, &NormalizedRecord> = records
        .iter()
        .map(|r| (r.account_id(), r))
        .collect();

    for group in groups.iter_mut() {
        let mut ranked: Vec<(i64, Vec<TieKey>, SmolStr)> = Vec::with_capacity(group.members.len());
        for member in &group.members {
            let record = by_id.get(&member.account_id).copied().ok_or_else(|| {
                PipelineError::stage(
                    Stage::Survivorship,
                    format!("group member '{}' not in record table", member.account_id),
                )
            })?;
            let rank = config
                .relationship_ranks
                .get(record.record.relationship.as_str())
                .copied()
                .unwrap_or(config.default_rank);
            let breaker_keys: Vec<TieKey> = config
                .tie_breakers
                .iter()
                .map(|tb| match tb {
                    TieBreaker::CreatedDate => {
                        TieKey::Created(created_date_sort_key(&record.record.created_date))
                    }
                    TieBreaker::AccountId => TieKey::Id(member.account_id.clone()),
                })
                .collect();
            ranked.push((rank, breaker_keys, member.account_id.clone()));
        }

        let primary = ranked
            .iter()
            .min_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(&b.2)))
            .map(|(_, _, id)| id.clone())
            .ok_or_else(|| {
                PipelineError::stage(Stage::Survivorship, "encountered an empty group")
            })?;

        let weakest = weakest_edges(group, &primary);
        for member in &mut group.members {
            member.weakest_edge_to_primary = if member.account_id == primary {
                None
            } else {
                weakest.get(&member.account_id).copied()
            };
        }
        group.primary_id = Some(primary);
    }

    Ok(())
}

/// Walks the accepted-edge forest outward from the primary, carrying the
/// running minimum score. Accepted edges span the group, so every member is
/// reached; anything unreachable would be a structural bug and surfaces as a
/// missing (null) entry rather than a panic.
fn weakest_edges(group: &Group, primary: &SmolStr) -> AHashMap<SmolStr, i64> {
    let mut adjacency: AHashMap<&SmolStr, Vec<(&SmolStr, i64)>> = AHashMap::new();
    for edge in &group.edges {
        adjacency.entry(&edge.id_a).or_default().push((&edge.id_b, edge.score));
        adjacency.entry(&edge.id_b).or_default().push((&edge.id_a, edge.score));
    }

    let mut weakest: AHashMap<SmolStr, i64> = AHashMap::new();
    let mut queue: Vec<(&SmolStr, i64)> = vec![(primary, i64::MAX)];
    let mut visited: AHashSet<&SmolStr> = AHashSet::new();
    visited.insert(primary);

    while let Some((current, path_min)) = queue.pop() {
        let Some(neighbors) = adjacency.get(current) else {
            continue;
        };
        for &(next, score) in neighbors {
            if visited.contains(next) {
                continue;
            }
            visited.insert(next);
            let next_min = path_min.min(score);
            weakest.insert(next.clone(), next_min);
            queue.push((next, next_min));
        }
    }

    weakest
}
