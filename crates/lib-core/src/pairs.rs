use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Why an edge was allowed to participate in a union.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JoinReason {
    ExactEqualRaw,
    EdgeHigh,
    EdgeMediumSharedToken,
}

/// A pair of record ids proposed for scoring. `id_a < id_b` always holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePair {
    pub id_a: SmolStr,
    pub id_b: SmolStr,
    /// Opaque key of the block that produced the pair.
    pub block_key: SmolStr,
    /// 0 when the block was not sharded.
    pub shard_idx: u32,
}

impl CandidatePair {
    /// Builds a pair with the id ordering invariant enforced.
    pub fn new(
        a: impl Into<SmolStr>,
        b: impl Into<SmolStr>,
        block_key: impl Into<SmolStr>,
        shard_idx: u32,
    ) -> CandidatePair {
        let a = a.into();
        let b = b.into();
        let (id_a, id_b) = if a <= b { (a, b) } else { (b, a) };
        CandidatePair {
            id_a,
            id_b,
            block_key: block_key.into(),
            shard_idx,
        }
    }
}

/// A candidate pair with its composite similarity and component features.
/// Component fields are always populated, even when penalties push the final
/// score below downstream thresholds. `join_reason` stays empty until the
/// grouper accepts the edge (exact-equals edges arrive with it set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPair {
    #[serde(flatten)]
    pub pair: CandidatePair,
    /// Order-insensitive token-sort ratio, 0..=100.
    pub ratio_name: i64,
    /// Subset-tolerant token-set ratio, 0..=100.
    pub ratio_set: i64,
    /// Jaccard over enhanced tokens, 0..=1.
    pub jaccard: f64,
    pub num_style_match: bool,
    pub suffix_match: bool,
    pub punctuation_mismatch: bool,
    /// Weighted composite before penalties and clamping.
    pub base_score: f64,
    /// Final score, clamped to 0..=100.
    pub score: i64,
    pub join_reason: Option<JoinReason>,
}

impl ScoredPair {
    /// A synthetic score-100 edge for two raw-identical names.
    pub fn exact_equal(pair: CandidatePair) -> ScoredPair {
        ScoredPair {
            pair,
            ratio_name: 100,
            ratio_set: 100,
            jaccard: 1.0,
            num_style_match: true,
            suffix_match: true,
            punctuation_mismatch: false,
            base_score: 100.0,
            score: 100,
            join_reason: Some(JoinReason::ExactEqualRaw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_orders_ids() {
        let pair = CandidatePair::new("B2", "A1", "t:acme", 0);
        assert_eq!(pair.id_a, "A1");
        assert_eq!(pair.id_b, "B2");
    }

    #[test]
    fn exact_edge_is_suffix_matched_and_full_score() {
        let edge = ScoredPair::exact_equal(CandidatePair::new("A1", "A2", "exact", 0));
        assert_eq!(edge.score, 100);
        assert!(edge.suffix_match);
        assert_eq!(edge.join_reason, Some(JoinReason::ExactEqualRaw));
    }
}
