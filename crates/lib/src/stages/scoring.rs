//! Vectorized pair scoring.
//!
//! Every candidate passes a token-set gate, then gets a weighted composite of
//! token-sort ratio, token-set ratio, and enhanced-token Jaccard, minus the
//! configured penalties. Input order is preserved; the scorer never sorts by
//! score. The bulk (serial sweep) and parallel (chunked) paths honor the gate
//! identically and agree on every component field; the rounded final score
//! may differ by at most one point, which is part of the contract.

use ahash::AHashMap;
use smol_str::SmolStr;
use tracing::warn;

use accord_lib_core::errors::{PipelineError, PipelineResult};
use accord_lib_core::pairs::{CandidatePair, ScoredPair};
use accord_lib_core::records::NormalizedRecord;
use accord_lib_core::stages::Stage;

use crate::core::config::{NormalizationConfig, SimilarityConfig};
use crate::core::pipeline::runner::{CancelFlag, Executor, StageExecutor};
use crate::utils::text;

/// Pairs handed to one worker between cancellation checkpoints.
const SCORING_CHUNK: usize = 2048;

#[derive(Debug, Default, Clone, Copy)]
pub struct ScoringCounters {
    pub scored: u64,
    pub gate_rejections: u64,
    pub enhanced_fallback: bool,
}

#[derive(Debug)]
pub struct ScoringOutcome {
    pub scored: Vec<ScoredPair>,
    pub counters: ScoringCounters,
}

/// Scores candidates against the normalized table. Pairs below the gate are
/// dropped (and counted), everything else is emitted in input order with all
/// component fields populated.
pub fn score_pairs(
    records: &[NormalizedRecord],
    pairs: &[CandidatePair],
    similarity: &SimilarityConfig,
    normalization: &NormalizationConfig,
    executor: &StageExecutor,
    cancel: &CancelFlag,
) -> PipelineResult<ScoringOutcome> {
    let mut counters = ScoringCounters::default();
    if normalization.enhancement.is_none() {
        counters.enhanced_fallback = true;
        warn!("enhanced normalization unavailable; jaccard falls back to raw tokens");
    }

    let by_id: AHashMap<&SmolStr, &NormalizedRecord> = records
        .iter()
        .map(|r| (r.account_id(), r))
        .collect();

    let scored: Vec<Option<ScoredPair>> = if executor.is_serial() {
        score_bulk(pairs, &by_id, similarity, cancel)?
    } else {
        score_parallel(pairs, &by_id, similarity, executor, cancel)?
    };

    let mut kept = Vec::with_capacity(scored.len());
    for entry in scored {
        match entry {
            Some(pair) => kept.push(pair),
            None => counters.gate_rejections += 1,
        }
    }
    counters.scored = kept.len() as u64;

    Ok(ScoringOutcome {
        scored: kept,
        counters,
    })
}

fn lookup<'a>(
    by_id: &AHashMap<&SmolStr, &'a NormalizedRecord>,
    id: &SmolStr,
) -> PipelineResult<&'a NormalizedRecord> {
    by_id.get(id).copied().ok_or_else(|| {
        PipelineError::stage(
            Stage::Scoring,
            format!("candidate pair references unknown account_id '{id}'"),
        )
    })
}

/// Single sweep over the packed pair list.
fn score_bulk(
    pairs: &[CandidatePair],
    by_id: &AHashMap<&SmolStr, &NormalizedRecord>,
    similarity: &SimilarityConfig,
    cancel: &CancelFlag,
) -> PipelineResult<Vec<Option<ScoredPair>>> {
    let mut out = Vec::with_capacity(pairs.len());
    for (i, pair) in pairs.iter().enumerate() {
        if i % SCORING_CHUNK == 0 {
            cancel.checkpoint()?;
        }
        let a = lookup(by_id, &pair.id_a)?;
        let b = lookup(by_id, &pair.id_b)?;
        out.push(score_candidate(pair, a, b, similarity));
    }
    Ok(out)
}

/// Work-stealing over fixed chunks; the indexed collect restores input order.
fn score_parallel(
    pairs: &[CandidatePair],
    by_id: &AHashMap<&SmolStr, &NormalizedRecord>,
    similarity: &SimilarityConfig,
    executor: &StageExecutor,
    cancel: &CancelFlag,
) -> PipelineResult<Vec<Option<ScoredPair>>> {
    let chunks: Vec<&[CandidatePair]> = pairs.chunks(SCORING_CHUNK).collect();
    let chunk_results: Vec<PipelineResult<Vec<Option<ScoredPair>>>> = executor
        .parallel_map(&chunks, |chunk| {
            cancel.checkpoint()?;
            chunk
                .iter()
                .map(|pair| {
                    let a = lookup(by_id, &pair.id_a)?;
                    let b = lookup(by_id, &pair.id_b)?;
                    Ok(score_candidate(pair, a, b, similarity))
                })
                .collect()
        });

    cancel.checkpoint()?;
    let mut out = Vec::with_capacity(pairs.len());
    for chunk in chunk_results {
        out.extend(chunk?);
    }
    Ok(out)
}

/// Scores one candidate through the full-pipeline surfaces (`name_base`,
/// which is already punctuation-stripped, so the punctuation penalty is
/// typically inert here).
pub fn score_candidate(
    pair: &CandidatePair,
    a: &NormalizedRecord,
    b: &NormalizedRecord,
    similarity: &SimilarityConfig,
) -> Option<ScoredPair> {
    score_surfaces(pair, a, b, &a.name_base, &b.name_base, similarity)
}

/// Scores one candidate against explicit surface forms. The contract allows
/// invoking the scorer on less-normalized surfaces, which is how the
/// punctuation-mismatch penalty gets exercised.
pub fn score_surfaces(
    pair: &CandidatePair,
    a: &NormalizedRecord,
    b: &NormalizedRecord,
    surface_a: &str,
    surface_b: &str,
    similarity: &SimilarityConfig,
) -> Option<ScoredPair> {
    if text::token_set_ratio(&a.tokens, &b.tokens) < similarity.gate_cutoff {
        return None;
    }

    let ratio_name = text::token_sort_ratio(&a.tokens, &b.tokens);
    let ratio_set = text::token_set_ratio(&a.tokens, &b.tokens);
    let jaccard = text::jaccard(&a.enhanced_tokens, &b.enhanced_tokens);

    let suffix_match = a.suffix_class == b.suffix_class;
    let num_style_match =
        text::digit_signature(&a.tokens) == text::digit_signature(&b.tokens);
    let punctuation_mismatch =
        text::punctuation_signature(surface_a) != text::punctuation_signature(surface_b);

    let base_score = 0.45 * ratio_name as f64 + 0.35 * ratio_set as f64 + 20.0 * jaccard;

    let mut penalized = base_score;
    if !suffix_match {
        penalized -= similarity.penalty.suffix_mismatch as f64;
    }
    if !num_style_match {
        penalized -= similarity.penalty.num_style_mismatch as f64;
    }
    if punctuation_mismatch {
        penalized -= similarity.penalty.punctuation_mismatch as f64;
    }
    let score = (penalized.round() as i64).clamp(0, 100);

    Some(ScoredPair {
        pair: pair.clone(),
        ratio_name,
        ratio_set,
        jaccard,
        num_style_match,
        suffix_match,
        punctuation_mismatch,
        base_score,
        score,
        join_reason: None,
    })
}
