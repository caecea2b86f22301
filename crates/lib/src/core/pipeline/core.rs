//! The orchestrator: a mini-DAG of nine stages with content-hash-guarded
//! resume, atomic artifact commits, and single-writer state.
//!
//! The driver itself is single-threaded; each stage fans work out through the
//! executor and joins before the next stage starts. No two stages execute
//! concurrently.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ahash::AHashSet;
use sha2::{Digest, Sha256};
use smol_str::{SmolStr, format_smolstr};
use tracing::{error, info};

use accord_lib_core::errors::{HashKind, HashMismatch, PipelineError, PipelineResult};
use accord_lib_core::groups::{Disposition, DispositionedRecord, Group};
use accord_lib_core::pairs::{CandidatePair, ScoredPair};
use accord_lib_core::records::{FilterReason, FilteredRecord, NormalizedRecord, Record};
use accord_lib_core::stages::{Stage, StageStatus};

use crate::core::config::PipelineConfig;
use crate::core::pipeline::artifacts;
use crate::core::pipeline::runner::{CancelFlag, Executor, StageExecutor};
use crate::core::pipeline::state::{
    DAG_VERSION, PipelineState, RUN_INDEX_FILE, RunIndex, RunIndexEntry, RunType, STATE_FILE,
    now_rfc3339,
};
use crate::stages::{blocking, disposition, exact, filter, grouping, normalize, scoring, survivorship};

/// Run-level switches. The CLI collaborator maps its flags onto this.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub outdir: PathBuf,
    pub resume_from: Option<Stage>,
    pub force: bool,
    pub no_resume: bool,
    pub run_type: RunType,
    pub cancel: CancelFlag,
}

impl RunOptions {
    pub fn new(outdir: impl Into<PathBuf>) -> RunOptions {
        RunOptions {
            outdir: outdir.into(),
            resume_from: None,
            force: false,
            no_resume: false,
            run_type: RunType::default(),
            cancel: CancelFlag::default(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RunSummary {
    pub run_id: SmolStr,
    pub run_dir: PathBuf,
    pub resumed_from: Option<Stage>,
    pub records_in: usize,
    pub filtered_out: u64,
    pub candidate_pairs: u64,
    pub scored_pairs: u64,
    pub groups: u64,
    pub merged_records: u64,
    pub dispositions: BTreeMap<Disposition, u64>,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        0
    }
}

/// In-memory stage outputs for the current run. Resumed stages are loaded
/// from their committed artifacts instead of recomputed.
#[derive(Default)]
struct StageData<'a> {
    valid_records: Vec<&'a Record>,
    input_errors: Vec<FilteredRecord>,
    normalized: Vec<NormalizedRecord>,
    exact_edges: Vec<ScoredPair>,
    exact_filtered: Vec<FilteredRecord>,
    audit: Vec<FilteredRecord>,
    survivors: Vec<usize>,
    pairs: Vec<CandidatePair>,
    scored: Vec<ScoredPair>,
    groups: Vec<Group>,
    dispositioned: Vec<DispositionedRecord>,
}

enum RunPlan {
    Fresh,
    Resume {
        run_dir: PathBuf,
        state: PipelineState,
        start: Stage,
    },
    NothingToDo {
        run_dir: PathBuf,
        state: PipelineState,
    },
}

pub struct Pipeline {
    config: PipelineConfig,
    executor: StageExecutor,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> PipelineResult<Pipeline> {
        config.validate()?;
        let executor = StageExecutor::from_workers(config.parallel.workers)?;
        Ok(Pipeline { config, executor })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, records: &[Record], options: &RunOptions) -> PipelineResult<RunSummary> {
        let (valid_records, input_errors) = validate_input(records)?;
        let input_hash = hash_records(records);
        let config_hash = self.config.config_hash();
        let content_sig = format!("{}{}", &input_hash[..8], &config_hash[..8]);

        fs::create_dir_all(&options.outdir)
            .map_err(|e| PipelineError::artifact(options.outdir.display().to_string(), e.to_string()))?;
        let index_path = options.outdir.join(RUN_INDEX_FILE);
        let mut index = RunIndex::load_or_default(&index_path)?;

        let plan = resolve_plan(&index, options, &input_hash, &config_hash)?;
        let (run_dir, mut state, start, resumed_from) = match plan {
            RunPlan::NothingToDo { run_dir, state } => {
                info!(run_id = %state.run_id, "all stages already completed; nothing to do");
                return Ok(self.summary_from_state(&state, &run_dir, records.len(), None));
            }
            RunPlan::Fresh => {
                let sequence = index.next_sequence(&content_sig);
                let run_id =
                    format_smolstr!("{}-{}-{:03}", options.run_type, content_sig, sequence);
                let run_dir = options.outdir.join(run_id.as_str());
                fs::create_dir_all(&run_dir).map_err(|e| {
                    PipelineError::artifact(run_dir.display().to_string(), e.to_string())
                })?;
                info!(run_id = %run_id, "starting fresh run");
                let state =
                    PipelineState::new(run_id, input_hash.clone(), config_hash.clone());
                (run_dir, state, Stage::Normalization, None)
            }
            RunPlan::Resume {
                run_dir,
                state,
                start,
            } => {
                info!(run_id = %state.run_id, from = %start, "resuming prior run");
                (run_dir, state, start, Some(start))
            }
        };

        state.reset_from(start);
        artifacts::gc_stale_temps(&run_dir);
        index.upsert(RunIndexEntry {
            run_id: state.run_id.clone(),
            run_type: options.run_type,
            input_hash: input_hash.clone(),
            config_hash: config_hash.clone(),
            status: StageStatus::Running,
            started_at: now_rfc3339(),
            finished_at: None,
            run_dir: run_dir.clone(),
        });
        index.save(&index_path)?;
        state.save(&run_dir)?;

        let mut ctx = StageData {
            valid_records,
            input_errors,
            ..StageData::default()
        };

        for stage in Stage::ALL {
            if stage < start {
                if let Err(e) = self.load_stage(stage, &state, &run_dir, &mut ctx) {
                    self.abort(&mut state, &run_dir, &mut index, &index_path, stage, &e);
                    return Err(e);
                }
                continue;
            }
            if let Err(e) = options.cancel.checkpoint() {
                self.abort(&mut state, &run_dir, &mut index, &index_path, stage, &e);
                return Err(e);
            }
            state.mark_running(stage)?;
            state.save(&run_dir)?;

            let started = Instant::now();
            match self.execute_stage(stage, &mut ctx, &run_dir, &content_sig, options) {
                Ok((artifact_path, metrics)) => {
                    let duration_ms = started.elapsed().as_millis() as u64;
                    state.mark_completed(
                        stage,
                        artifact_path.display().to_string(),
                        duration_ms,
                        metrics,
                    );
                    state.save(&run_dir)?;
                    info!(stage = %stage, duration_ms, "stage completed");
                }
                Err(e) => {
                    self.abort(&mut state, &run_dir, &mut index, &index_path, stage, &e);
                    return Err(e);
                }
            }
        }

        if let Some(entry) = index.runs.iter_mut().find(|e| e.run_id == state.run_id) {
            entry.status = StageStatus::Completed;
            entry.finished_at = Some(now_rfc3339());
        }
        index.latest_successful = Some(state.run_id.clone());
        index.save(&index_path)?;

        let summary = self.summary_from_state(&state, &run_dir, records.len(), resumed_from);
        info!(
            run_id = %summary.run_id,
            groups = summary.groups,
            merged = summary.merged_records,
            "run completed"
        );
        Ok(summary)
    }

    fn execute_stage(
        &self,
        stage: Stage,
        ctx: &mut StageData<'_>,
        run_dir: &Path,
        content_sig: &str,
        options: &RunOptions,
    ) -> PipelineResult<(PathBuf, BTreeMap<String, u64>)> {
        match stage {
            Stage::Normalization => {
                ctx.normalized = self
                    .executor
                    .parallel_map(&ctx.valid_records, |r| {
                        normalize::normalize(r, &self.config.normalization)
                    });
                let path = artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.normalized)?;
                let metrics =
                    BTreeMap::from([("records".to_string(), ctx.normalized.len() as u64)]);
                Ok((path, metrics))
            }
            Stage::ExactEquals => {
                let outcome = exact::find_exact_groups(
                    &ctx.normalized,
                    self.config.exact_equals.min_group_size,
                );
                ctx.exact_edges = outcome.exact_edges;
                ctx.exact_filtered = outcome.filtered_out;
                let path =
                    artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.exact_edges)?;
                let metrics = BTreeMap::from([
                    ("exact_groups".to_string(), outcome.exact_groups as u64),
                    ("exact_edges".to_string(), ctx.exact_edges.len() as u64),
                ]);
                Ok((path, metrics))
            }
            Stage::Filtering => {
                let outcome = filter::filter_records(&ctx.normalized, &ctx.exact_filtered);
                ctx.survivors = outcome.survivors;
                let mut audit = ctx.input_errors.clone();
                audit.extend(ctx.exact_filtered.iter().cloned());
                audit.extend(outcome.filtered_out);
                ctx.audit = audit;
                let path = artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.audit)?;
                let metrics = BTreeMap::from([
                    ("filtered".to_string(), ctx.audit.len() as u64),
                    ("survivors".to_string(), ctx.survivors.len() as u64),
                ]);
                Ok((path, metrics))
            }
            Stage::CandidateGeneration => {
                let outcome = blocking::generate_candidates(
                    &ctx.normalized,
                    &ctx.survivors,
                    &self.config.blocking,
                );
                ctx.pairs = outcome.pairs;
                let path = artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.pairs)?;
                let c = outcome.counters;
                let metrics = BTreeMap::from([
                    ("pairs".to_string(), c.pairs),
                    ("raw_pairs".to_string(), c.raw_pairs),
                    ("blocks".to_string(), c.blocks),
                    ("sharded_blocks".to_string(), c.sharded_blocks),
                    ("banned_tokens".to_string(), c.banned_tokens),
                    ("truncated".to_string(), u64::from(c.truncated)),
                ]);
                Ok((path, metrics))
            }
            Stage::Scoring => {
                let outcome = scoring::score_pairs(
                    &ctx.normalized,
                    &ctx.pairs,
                    &self.config.similarity,
                    &self.config.normalization,
                    &self.executor,
                    &options.cancel,
                )?;
                ctx.scored = outcome.scored;
                let path = artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.scored)?;
                let c = outcome.counters;
                let metrics = BTreeMap::from([
                    ("scored".to_string(), c.scored),
                    ("gate_rejections".to_string(), c.gate_rejections),
                    ("enhanced_fallback".to_string(), u64::from(c.enhanced_fallback)),
                ]);
                Ok((path, metrics))
            }
            Stage::Grouping => {
                let outcome = grouping::build_groups(
                    &ctx.normalized,
                    &mut ctx.scored,
                    &ctx.exact_edges,
                    &self.config.grouping,
                    &self.config.similarity,
                    &self.executor,
                    content_sig,
                )?;
                ctx.groups = outcome.groups;
                let path = artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.groups)?;
                let c = outcome.counters;
                let metrics = BTreeMap::from([
                    ("groups".to_string(), c.groups),
                    ("edges_accepted".to_string(), c.edges_accepted),
                    ("gate_rejections".to_string(), c.gate_rejections),
                    ("canopy_rejections".to_string(), c.canopy_rejections),
                ]);
                Ok((path, metrics))
            }
            Stage::Survivorship => {
                survivorship::select_survivors(
                    &mut ctx.groups,
                    &ctx.normalized,
                    &self.config.survivorship,
                )?;
                let path = artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.groups)?;
                let multi = ctx.groups.iter().filter(|g| g.group_size > 1).count() as u64;
                let merged: u64 = ctx
                    .groups
                    .iter()
                    .filter(|g| g.group_size > 1)
                    .map(|g| g.group_size as u64)
                    .sum();
                let metrics = BTreeMap::from([
                    ("multi_record_groups".to_string(), multi),
                    ("merged_records".to_string(), merged),
                ]);
                Ok((path, metrics))
            }
            Stage::Disposition => {
                let outcome =
                    disposition::classify(&ctx.normalized, &ctx.groups, &self.config.disposition)?;
                ctx.dispositioned = outcome.records;
                let path =
                    artifacts::write_jsonl(run_dir, stage.artifact_name(), &ctx.dispositioned)?;
                let metrics = outcome
                    .counters
                    .counts
                    .iter()
                    .map(|(d, n)| (d.to_string().to_lowercase(), *n))
                    .collect();
                Ok((path, metrics))
            }
            Stage::FinalOutput => {
                // Review-ready ordering: group, primary first, then id.
                let mut review = ctx.dispositioned.clone();
                review.sort_by(|a, b| {
                    a.group_id
                        .cmp(&b.group_id)
                        .then_with(|| b.is_primary.cmp(&a.is_primary))
                        .then_with(|| a.record.account_id.cmp(&b.record.account_id))
                });
                let path = artifacts::write_jsonl(run_dir, stage.artifact_name(), &review)?;
                let metrics = BTreeMap::from([("rows".to_string(), review.len() as u64)]);
                Ok((path, metrics))
            }
        }
    }

    /// Reads a completed stage's artifact back into the run context.
    fn load_stage(
        &self,
        stage: Stage,
        state: &PipelineState,
        run_dir: &Path,
        ctx: &mut StageData<'_>,
    ) -> PipelineResult<()> {
        let path = state
            .stage(stage)
            .artifact_path
            .map(PathBuf::from)
            .unwrap_or_else(|| run_dir.join(format!("{}.jsonl", stage.artifact_name())));

        match stage {
            Stage::Normalization => ctx.normalized = artifacts::read_jsonl(&path)?,
            Stage::ExactEquals => {
                ctx.exact_edges = artifacts::read_jsonl(&path)?;
                ctx.exact_filtered = exact::duplicates_from_edges(&ctx.exact_edges);
            }
            Stage::Filtering => {
                ctx.audit = artifacts::read_jsonl(&path)?;
                let audited: AHashSet<&SmolStr> =
                    ctx.audit.iter().map(|f| &f.account_id).collect();
                ctx.survivors = ctx
                    .normalized
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| !audited.contains(r.account_id()))
                    .map(|(i, _)| i)
                    .collect();
            }
            Stage::CandidateGeneration => ctx.pairs = artifacts::read_jsonl(&path)?,
            Stage::Scoring => ctx.scored = artifacts::read_jsonl(&path)?,
            Stage::Grouping | Stage::Survivorship => ctx.groups = artifacts::read_jsonl(&path)?,
            Stage::Disposition => ctx.dispositioned = artifacts::read_jsonl(&path)?,
            Stage::FinalOutput => {}
        }
        Ok(())
    }

    /// Persists the terminal status; best-effort, the original error wins.
    fn abort(
        &self,
        state: &mut PipelineState,
        run_dir: &Path,
        index: &mut RunIndex,
        index_path: &Path,
        stage: Stage,
        error: &PipelineError,
    ) {
        let status = if matches!(error, PipelineError::Interrupted) {
            StageStatus::Interrupted
        } else {
            StageStatus::Failed
        };
        state.mark_stopped(stage, status);
        if let Err(save_err) = state.save(run_dir) {
            error!(error = %save_err, "failed to persist state during abort");
        }
        if let Some(entry) = index.runs.iter_mut().find(|e| e.run_id == state.run_id) {
            entry.status = status;
            entry.finished_at = Some(now_rfc3339());
        }
        if let Err(save_err) = index.save(index_path) {
            error!(error = %save_err, "failed to persist run index during abort");
        }
        error!(
            stage = %stage,
            error = %error,
            hint = %error.next_step_hint(),
            "run aborted"
        );
    }

    fn summary_from_state(
        &self,
        state: &PipelineState,
        run_dir: &Path,
        records_in: usize,
        resumed_from: Option<Stage>,
    ) -> RunSummary {
        let dispositions = [
            Disposition::Keep,
            Disposition::Update,
            Disposition::Delete,
            Disposition::Verify,
        ]
        .into_iter()
        .map(|d| {
            (
                d,
                state.metric(Stage::Disposition, &d.to_string().to_lowercase()),
            )
        })
        .collect();

        RunSummary {
            run_id: state.run_id.clone(),
            run_dir: run_dir.to_path_buf(),
            resumed_from,
            records_in,
            filtered_out: state.metric(Stage::Filtering, "filtered"),
            candidate_pairs: state.metric(Stage::CandidateGeneration, "pairs"),
            scored_pairs: state.metric(Stage::Scoring, "scored"),
            groups: state.metric(Stage::Grouping, "groups"),
            merged_records: state.metric(Stage::Survivorship, "merged_records"),
            dispositions,
        }
    }
}

/// Duplicate ids are fatal; id-less rows are recoverable and audited.
fn validate_input(records: &[Record]) -> PipelineResult<(Vec<&Record>, Vec<FilteredRecord>)> {
    let mut seen: AHashSet<&SmolStr> = AHashSet::with_capacity(records.len());
    let mut valid = Vec::with_capacity(records.len());
    let mut input_errors = Vec::new();

    for (idx, record) in records.iter().enumerate() {
        if record.account_id.is_empty() {
            input_errors.push(FilteredRecord::new(
                format_smolstr!("row-{idx}"),
                Stage::Filtering,
                FilterReason::InputError,
                "missing account_id",
            ));
            continue;
        }
        if !seen.insert(&record.account_id) {
            return Err(PipelineError::Input(format!(
                "duplicate account_id '{}'",
                record.account_id
            )));
        }
        valid.push(record);
    }
    Ok((valid, input_errors))
}

/// Content-only hash of the input table, in row order.
fn hash_records(records: &[Record]) -> String {
    let mut hasher = Sha256::new();
    for record in records {
        let bytes = serde_json::to_vec(record).unwrap_or_default();
        hasher.update(&bytes);
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

fn resolve_plan(
    index: &RunIndex,
    options: &RunOptions,
    input_hash: &str,
    config_hash: &str,
) -> PipelineResult<RunPlan> {
    let prior = if options.no_resume {
        None
    } else {
        index
            .latest_matching(input_hash, config_hash)
            .filter(|e| e.run_dir.join(STATE_FILE).exists())
            .and_then(|e| {
                PipelineState::load(&e.run_dir)
                    .ok()
                    .filter(|s| s.dag_version == DAG_VERSION)
                    .map(|s| (e.run_dir.clone(), s))
            })
    };

    if let Some(resume_stage) = options.resume_from {
        if let Some((run_dir, state)) = prior {
            if state.all_completed_before(resume_stage) {
                return Ok(RunPlan::Resume {
                    run_dir,
                    state,
                    start: resume_stage,
                });
            }
        }
        if options.force {
            return Ok(RunPlan::Fresh);
        }
        return Err(refusal(index, input_hash, config_hash).into());
    }

    match prior {
        Some((run_dir, state)) => match state.earliest_non_completed() {
            Some(start) => Ok(RunPlan::Resume {
                run_dir,
                state,
                start,
            }),
            None => Ok(RunPlan::NothingToDo { run_dir, state }),
        },
        None => Ok(RunPlan::Fresh),
    }
}

/// Builds the refusal naming whichever frozen hash diverged from the most
/// recent run.
fn refusal(index: &RunIndex, input_hash: &str, config_hash: &str) -> HashMismatch {
    match index.latest() {
        Some(latest) if latest.input_hash != input_hash => HashMismatch {
            run_id: latest.run_id.clone(),
            kind: HashKind::Input,
            expected: latest.input_hash.clone(),
            actual: input_hash.to_string(),
        },
        Some(latest) if latest.config_hash != config_hash => HashMismatch {
            run_id: latest.run_id.clone(),
            kind: HashKind::Config,
            expected: latest.config_hash.clone(),
            actual: config_hash.to_string(),
        },
        Some(latest) => HashMismatch {
            run_id: latest.run_id.clone(),
            kind: HashKind::Input,
            expected: "a run with all prior stages completed".to_string(),
            actual: "an incomplete prior run".to_string(),
        },
        None => HashMismatch {
            run_id: "<none>".into(),
            kind: HashKind::Input,
            expected: "<no prior run>".to_string(),
            actual: input_hash.to_string(),
        },
    }
}
