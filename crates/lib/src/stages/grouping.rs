//! Edge-gated grouping over a Union-Find arena.
//!
//! Records are dense indices into the normalized table; edges are flat
//! records. Gate decisions are computed by the worker pool; unions run on
//! this single thread in one deterministic order, which buys reproducibility
//! and freedom from path-compression races.

use ahash::{AHashMap, AHashSet};
use sha2::{Digest, Sha256};
use smol_str::{SmolStr, format_smolstr};

use accord_lib_core::errors::{PipelineError, PipelineResult};
use accord_lib_core::groups::{Group, GroupEdge, GroupMember};
use accord_lib_core::pairs::{JoinReason, ScoredPair};
use accord_lib_core::records::NormalizedRecord;
use accord_lib_core::stages::Stage;

use crate::core::config::{GroupingConfig, SimilarityConfig};
use crate::core::pipeline::runner::{Executor, StageExecutor};

#[derive(Debug, Default, Clone, Copy)]
pub struct GroupingCounters {
    pub groups: u64,
    pub edges_accepted: u64,
    pub gate_rejections: u64,
    pub canopy_rejections: u64,
}

pub struct GroupingOutcome {
    pub groups: Vec<Group>,
    pub counters: GroupingCounters,
}

struct UnionFind {
    parent: Vec<u32>,
    size: Vec<u32>,
}

impl UnionFind {
    fn new(n: usize) -> UnionFind {
        UnionFind {
            parent: (0..n as u32).collect(),
            size: vec![1; n],
        }
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            // Path halving keeps finds near-constant without recursion.
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    /// Unions two roots. Callers must pass distinct roots.
    fn union(&mut self, root_a: u32, root_b: u32) {
        let (small, large) = if self.size[root_a as usize] < self.size[root_b as usize] {
            (root_a, root_b)
        } else {
            (root_b, root_a)
        };
        self.parent[small as usize] = large;
        self.size[large as usize] += self.size[small as usize];
    }
}

struct FlatEdge {
    a: u32,
    b: u32,
    score: i64,
    suffix_match: bool,
    reason: JoinReason,
}

/// Partitions all records into disjoint groups. Exact edges union first and
/// ignore the canopy bound; scored edges gate on the thresholds and are
/// processed in (score desc, id_a, id_b) order.
pub fn build_groups(
    records: &[NormalizedRecord],
    scored: &mut [ScoredPair],
    exact_edges: &[ScoredPair],
    grouping: &GroupingConfig,
    similarity: &SimilarityConfig,
    executor: &StageExecutor,
    content_sig: &str,
) -> PipelineResult<GroupingOutcome> {
    let mut counters = GroupingCounters::default();

    let index_of: AHashMap<&SmolStr, u32> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.account_id(), i as u32))
        .collect();
    let resolve = |id: &SmolStr| -> PipelineResult<u32> {
        index_of.get(id).copied().ok_or_else(|| {
            PipelineError::stage(
                Stage::Grouping,
                format!("edge references unknown account_id '{id}'"),
            )
        })
    };

    let enhanced_sets: Vec<AHashSet<&str>> = records
        .iter()
        .map(|r| r.enhanced_tokens.iter().map(SmolStr::as_str).collect())
        .collect();

    let mut uf = UnionFind::new(records.len());
    let mut accepted: Vec<FlatEdge> = Vec::new();

    // Exact-equals edges always union; raw-identical names must never be
    // split by the canopy.
    for edge in exact_edges {
        let a = resolve(&edge.pair.id_a)?;
        let b = resolve(&edge.pair.id_b)?;
        let (root_a, root_b) = (uf.find(a), uf.find(b));
        if root_a == root_b {
            continue;
        }
        uf.union(root_a, root_b);
        accepted.push(FlatEdge {
            a,
            b,
            score: edge.score,
            suffix_match: edge.suffix_match,
            reason: JoinReason::ExactEqualRaw,
        });
    }

    // Workers gate in parallel; the union loop below stays serial.
    let decisions: Vec<PipelineResult<(u32, u32, Option<JoinReason>)>> =
        executor.parallel_map(&*scored, |pair| {
            let a = resolve(&pair.pair.id_a)?;
            let b = resolve(&pair.pair.id_b)?;
            let reason = if pair.score >= similarity.high {
                Some(JoinReason::EdgeHigh)
            } else if pair.score >= similarity.medium
                && shares_token(&enhanced_sets[a as usize], &enhanced_sets[b as usize])
            {
                Some(JoinReason::EdgeMediumSharedToken)
            } else {
                None
            };
            Ok((a, b, reason))
        });

    let mut gated: Vec<(usize, u32, u32, i64, JoinReason)> = Vec::new();
    for (idx, decision) in decisions.into_iter().enumerate() {
        let (a, b, reason) = decision?;
        match reason {
            Some(reason) => gated.push((idx, a, b, scored[idx].score, reason)),
            None => counters.gate_rejections += 1,
        }
    }
    gated.sort_by(|x, y| {
        y.3.cmp(&x.3)
            .then_with(|| scored[x.0].pair.id_a.cmp(&scored[y.0].pair.id_a))
            .then_with(|| scored[x.0].pair.id_b.cmp(&scored[y.0].pair.id_b))
    });

    for (idx, a, b, score, reason) in gated {
        let (root_a, root_b) = (uf.find(a), uf.find(b));
        if root_a == root_b {
            continue;
        }
        let merged = uf.size[root_a as usize] + uf.size[root_b as usize];
        if merged as usize > grouping.canopy_max_size {
            counters.canopy_rejections += 1;
            continue;
        }
        uf.union(root_a, root_b);
        scored[idx].join_reason = Some(reason);
        accepted.push(FlatEdge {
            a,
            b,
            score,
            suffix_match: scored[idx].suffix_match,
            reason,
        });
    }
    counters.edges_accepted = accepted.len() as u64;

    let groups = enumerate_groups(records, &mut uf, &accepted, content_sig);
    counters.groups = groups.len() as u64;

    Ok(GroupingOutcome { groups, counters })
}

fn shares_token(a: &AHashSet<&str>, b: &AHashSet<&str>) -> bool {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small.iter().any(|t| large.contains(t))
}

fn enumerate_groups(
    records: &[NormalizedRecord],
    uf: &mut UnionFind,
    accepted: &[FlatEdge],
    content_sig: &str,
) -> Vec<Group> {
    let mut members_by_root: AHashMap<u32, Vec<u32>> = AHashMap::new();
    for idx in 0..records.len() as u32 {
        members_by_root.entry(uf.find(idx)).or_default().push(idx);
    }
    let mut edges_by_root: AHashMap<u32, Vec<&FlatEdge>> = AHashMap::new();
    for edge in accepted {
        edges_by_root.entry(uf.find(edge.a)).or_default().push(edge);
    }

    let mut components: Vec<(u32, Vec<u32>)> = members_by_root.into_iter().collect();
    for (_, member_idxs) in &mut components {
        member_idxs.sort_by(|&x, &y| {
            records[x as usize]
                .account_id()
                .cmp(records[y as usize].account_id())
        });
    }
    // Deterministic group order: by smallest member id.
    components.sort_by(|(_, xs), (_, ys)| {
        records[xs[0] as usize]
            .account_id()
            .cmp(records[ys[0] as usize].account_id())
    });

    components
        .into_iter()
        .map(|(root, member_idxs)| {
            let member_ids: Vec<&SmolStr> = member_idxs
                .iter()
                .map(|&i| records[i as usize].account_id())
                .collect();

            let mut edges: Vec<GroupEdge> = edges_by_root
                .get(&root)
                .map(|edges| {
                    edges
                        .iter()
                        .map(|e| GroupEdge {
                            id_a: records[e.a as usize].account_id().clone(),
                            id_b: records[e.b as usize].account_id().clone(),
                            score: e.score,
                            suffix_match: e.suffix_match,
                            reason: e.reason,
                        })
                        .collect()
                })
                .unwrap_or_default();
            edges.sort_by(|x, y| x.id_a.cmp(&y.id_a).then_with(|| x.id_b.cmp(&y.id_b)));

            let has_suffix_mismatch = edges.iter().any(|e| !e.suffix_match);
            let group_size = member_ids.len();

            Group {
                group_id: group_id(content_sig, &member_ids),
                members: member_ids
                    .into_iter()
                    .map(|id| GroupMember {
                        account_id: id.clone(),
                        weakest_edge_to_primary: None,
                    })
                    .collect(),
                primary_id: None,
                edges,
                has_suffix_mismatch,
                group_size,
            }
        })
        .collect()
}

/// Deterministic group id: the run's content signature plus the sorted member
/// ids, hashed. Identical input and config reproduce identical ids.
fn group_id(content_sig: &str, member_ids: &[&SmolStr]) -> SmolStr {
    let mut hasher = Sha256::new();
    hasher.update(content_sig.as_bytes());
    for id in member_ids {
        hasher.update([0x1f]);
        hasher.update(id.as_bytes());
    }
    let digest = hex::encode(hasher.finalize());
    format_smolstr!("grp_{}", &digest[..16])
}
