//! The typed pipeline configuration.
//!
//! Parsing a config file into this structure is a collaborator's concern; the
//! pipeline consumes the frozen value and hashes it into `config_hash` so a
//! resume can detect drift. Every map is a `BTreeMap` to keep the canonical
//! serialization (and therefore the hash) stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use accord_lib_core::errors::{PipelineError, PipelineResult};
use accord_lib_core::groups::Disposition;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PenaltyConfig {
    pub suffix_mismatch: i64,
    pub num_style_mismatch: i64,
    pub punctuation_mismatch: i64,
}

impl Default for PenaltyConfig {
    fn default() -> PenaltyConfig {
        PenaltyConfig {
            suffix_mismatch: 25,
            num_style_mismatch: 5,
            punctuation_mismatch: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityConfig {
    pub high: i64,
    pub medium: i64,
    pub gate_cutoff: i64,
    pub penalty: PenaltyConfig,
}

impl Default for SimilarityConfig {
    fn default() -> SimilarityConfig {
        SimilarityConfig {
            high: 92,
            medium: 84,
            gate_cutoff: 72,
            penalty: PenaltyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockingConfig {
    /// The K most frequent first tokens are banned from the first-token key.
    pub top_token_ban_k: usize,
    /// Buckets whose pair count would exceed this are sharded.
    pub block_cap: usize,
    /// Hard cap on total emitted pairs; excess is truncated with a warning.
    pub global_pair_cap: usize,
    /// Max `name_core` length difference within a bucket. 0 means
    /// proportional to the longer name.
    pub length_window: usize,
}

impl Default for BlockingConfig {
    fn default() -> BlockingConfig {
        BlockingConfig {
            top_token_ban_k: 30,
            block_cap: 200_000,
            global_pair_cap: 5_000_000,
            length_window: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    /// No union may grow a component past this size. Exact-equals edges are
    /// exempt.
    pub canopy_max_size: usize,
}

impl Default for GroupingConfig {
    fn default() -> GroupingConfig {
        GroupingConfig {
            canopy_max_size: 100,
        }
    }
}

/// Tie-breakers applied after relationship rank, in order.
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
pub enum TieBreaker {
    CreatedDate,
    AccountId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurvivorshipConfig {
    /// Lower rank wins. Relationships absent from the table get
    /// `default_rank`.
    pub relationship_ranks: BTreeMap<String, i64>,
    pub default_rank: i64,
    pub tie_breakers: Vec<TieBreaker>,
}

impl Default for SurvivorshipConfig {
    fn default() -> SurvivorshipConfig {
        let relationship_ranks = BTreeMap::from(
            [
                ("Company Name on W-2", 10),
                ("Current Employer", 20),
                ("Past Employer", 30),
                ("Vendor", 40),
                ("Other/Miscellaneous", 60),
            ]
            .map(|(k, v)| (k.to_string(), v)),
        );
        SurvivorshipConfig {
            relationship_ranks,
            default_rank: 999,
            tie_breakers: vec![TieBreaker::CreatedDate, TieBreaker::AccountId],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistConfig {
    /// Whole-token matches over `name_base`.
    pub tokens: Vec<String>,
    /// Substring matches over `name_base`. Phrases run through the same
    /// symbol normalization as names, so "n/a" matches a base of "n a".
    pub phrases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispositionConfig {
    pub blacklist: BlacklistConfig,
    /// Matched against `name_base`, which is lowercase and
    /// punctuation-stripped by the time it gets here.
    pub suspicious_singleton_regex: String,
    /// Reviewer decisions applied verbatim, ahead of every rule.
    pub manual_overrides: BTreeMap<String, Disposition>,
    /// Advisory; the row-by-row path is kept only as an equivalence oracle.
    pub use_vectorized: bool,
}

impl Default for DispositionConfig {
    fn default() -> DispositionConfig {
        DispositionConfig {
            blacklist: BlacklistConfig {
                tokens: Vec::new(),
                phrases: vec!["n/a".into(), "do not use".into()],
            },
            suspicious_singleton_regex:
                r"\b(test|testing|unknown|tbd|n a|na|none|no name|sample|dummy|placeholder|asdf|x{3,})\b"
                    .into(),
            manual_overrides: BTreeMap::new(),
            use_vectorized: true,
        }
    }
}

/// Enhancement tables for `enhanced_tokens`. When the whole collaborator is
/// absent the pipeline falls back to raw tokens and the scorer logs it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancementTables {
    pub weak_tokens: Vec<String>,
    pub plural_map: BTreeMap<String, String>,
    pub canonical_retail_terms: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub enhancement: Option<EnhancementTables>,
}

impl Default for NormalizationConfig {
    fn default() -> NormalizationConfig {
        let plural_map = BTreeMap::from(
            [
                ("holdings", "holding"),
                ("services", "service"),
                ("solutions", "solution"),
                ("stores", "store"),
                ("systems", "system"),
            ]
            .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        let canonical_retail_terms = BTreeMap::from(
            [
                ("assoc", "associates"),
                ("ctr", "center"),
                ("intl", "international"),
                ("mgmt", "management"),
                ("natl", "national"),
                ("svc", "service"),
                ("svcs", "service"),
            ]
            .map(|(k, v)| (k.to_string(), v.to_string())),
        );
        NormalizationConfig {
            enhancement: Some(EnhancementTables {
                weak_tokens: vec!["the".into(), "and".into(), "of".into(), "a".into()],
                plural_map,
                canonical_retail_terms,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExactEqualsConfig {
    pub min_group_size: usize,
}

impl Default for ExactEqualsConfig {
    fn default() -> ExactEqualsConfig {
        ExactEqualsConfig { min_group_size: 2 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// 0 means one worker per hardware thread.
    pub workers: usize,
}

/// The frozen run configuration. Immutable after orchestrator startup;
/// workers hold read-only references.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub similarity: SimilarityConfig,
    pub blocking: BlockingConfig,
    pub grouping: GroupingConfig,
    pub survivorship: SurvivorshipConfig,
    pub disposition: DispositionConfig,
    pub normalization: NormalizationConfig,
    pub exact_equals: ExactEqualsConfig,
    pub parallel: ParallelConfig,
}

impl PipelineConfig {
    /// Rejects configurations no run should start with.
    pub fn validate(&self) -> PipelineResult<()> {
        let s = &self.similarity;
        if !(0..=100).contains(&s.gate_cutoff)
            || !(0..=100).contains(&s.medium)
            || !(0..=100).contains(&s.high)
        {
            return Err(PipelineError::Config(
                "similarity thresholds must lie in 0..=100".into(),
            ));
        }
        if s.gate_cutoff > s.medium || s.medium > s.high {
            return Err(PipelineError::Config(format!(
                "similarity thresholds must be ordered gate <= medium <= high, got {} / {} / {}",
                s.gate_cutoff, s.medium, s.high
            )));
        }
        if s.penalty.suffix_mismatch < 0
            || s.penalty.num_style_mismatch < 0
            || s.penalty.punctuation_mismatch < 0
        {
            return Err(PipelineError::Config("penalties must be non-negative".into()));
        }
        if self.grouping.canopy_max_size < 2 {
            return Err(PipelineError::Config(
                "grouping.canopy_max_size must be at least 2".into(),
            ));
        }
        if self.exact_equals.min_group_size < 2 {
            return Err(PipelineError::Config(
                "exact_equals.min_group_size must be at least 2".into(),
            ));
        }
        if self.blocking.block_cap == 0 || self.blocking.global_pair_cap == 0 {
            return Err(PipelineError::Config(
                "blocking caps must be positive".into(),
            ));
        }
        if self.survivorship.tie_breakers.is_empty() {
            return Err(PipelineError::Config(
                "survivorship.tie_breakers must not be empty".into(),
            ));
        }
        regex::Regex::new(&self.disposition.suspicious_singleton_regex).map_err(|e| {
            PipelineError::Config(format!("disposition.suspicious_singleton_regex: {e}"))
        })?;
        Ok(())
    }

    /// Stable content hash of the frozen configuration.
    pub fn config_hash(&self) -> String {
        // Struct field order plus BTreeMap keys make this canonical.
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hex::encode(hasher.finalize())
    }
}
