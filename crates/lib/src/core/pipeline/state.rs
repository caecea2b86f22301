//! Per-run state and the cross-run index.
//!
//! The state file records, for every stage, its status, timestamps, metrics,
//! and committed artifact path. It is the single source of truth for resume.
//! The run index lives at the out-dir root and tracks all runs plus a
//! "latest successful" pointer. Both documents commit through the same
//! temp-then-rename protocol as artifacts.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use accord_lib_core::errors::{PipelineError, PipelineResult};
use accord_lib_core::stages::{Stage, StageStatus};

use crate::core::pipeline::artifacts;

pub const DAG_VERSION: &str = "2";
pub const STATE_FILE: &str = "state.json";
pub const RUN_INDEX_FILE: &str = "runs.json";

pub fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

/// The run mode recorded in run ids and the index.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RunType {
    #[default]
    Dev,
    Test,
    Prod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageState {
    pub status: StageStatus,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub duration_ms: Option<u64>,
    pub artifact_path: Option<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: SmolStr,
    pub dag_version: String,
    pub input_hash: String,
    pub config_hash: String,
    pub stages: BTreeMap<String, StageState>,
}

impl PipelineState {
    pub fn new(run_id: SmolStr, input_hash: String, config_hash: String) -> PipelineState {
        let stages = Stage::ALL
            .iter()
            .map(|s| (s.to_string(), StageState::default()))
            .collect();
        PipelineState {
            run_id,
            dag_version: DAG_VERSION.to_string(),
            input_hash,
            config_hash,
            stages,
        }
    }

    pub fn stage(&self, stage: Stage) -> StageState {
        self.stages.get(&stage.to_string()).cloned().unwrap_or_default()
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageState {
        self.stages.entry(stage.to_string()).or_default()
    }

    pub fn metric(&self, stage: Stage, key: &str) -> u64 {
        self.stages
            .get(&stage.to_string())
            .and_then(|s| s.metrics.get(key).copied())
            .unwrap_or(0)
    }

    /// Transitions are monotone within a run: a completed stage never goes
    /// back to running.
    pub fn mark_running(&mut self, stage: Stage) -> PipelineResult<()> {
        let entry = self.stage_mut(stage);
        if entry.status == StageStatus::Completed {
            return Err(PipelineError::stage(
                stage,
                "state regression: completed stage asked to run again",
            ));
        }
        entry.status = StageStatus::Running;
        entry.started_at = Some(now_rfc3339());
        entry.finished_at = None;
        Ok(())
    }

    pub fn mark_completed(
        &mut self,
        stage: Stage,
        artifact_path: String,
        duration_ms: u64,
        metrics: BTreeMap<String, u64>,
    ) {
        let entry = self.stage_mut(stage);
        entry.status = StageStatus::Completed;
        entry.finished_at = Some(now_rfc3339());
        entry.duration_ms = Some(duration_ms);
        entry.artifact_path = Some(artifact_path);
        entry.metrics = metrics;
    }

    pub fn mark_stopped(&mut self, stage: Stage, status: StageStatus) {
        let entry = self.stage_mut(stage);
        entry.status = status;
        entry.finished_at = Some(now_rfc3339());
    }

    /// Clears every stage from `start` onward back to pending. Used when a
    /// resume re-executes stages, so the monotone-transition rule keeps
    /// holding within the new invocation.
    pub fn reset_from(&mut self, start: Stage) {
        for stage in Stage::ALL.into_iter().filter(|&s| s >= start) {
            *self.stage_mut(stage) = StageState::default();
        }
    }

    pub fn earliest_non_completed(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|&s| self.stage(s).status != StageStatus::Completed)
    }

    pub fn all_completed_before(&self, stage: Stage) -> bool {
        Stage::ALL
            .into_iter()
            .take_while(|&s| s < stage)
            .all(|s| self.stage(s).status == StageStatus::Completed)
    }

    pub fn save(&self, run_dir: &Path) -> PipelineResult<()> {
        artifacts::write_json_doc(&run_dir.join(STATE_FILE), self)
    }

    pub fn load(run_dir: &Path) -> PipelineResult<PipelineState> {
        artifacts::read_json_doc(&run_dir.join(STATE_FILE))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunIndexEntry {
    pub run_id: SmolStr,
    pub run_type: RunType,
    pub input_hash: String,
    pub config_hash: String,
    pub status: StageStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub run_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunIndex {
    pub runs: Vec<RunIndexEntry>,
    pub latest_successful: Option<SmolStr>,
}

impl RunIndex {
    pub fn load_or_default(path: &Path) -> PipelineResult<RunIndex> {
        if path.exists() {
            artifacts::read_json_doc(path)
        } else {
            Ok(RunIndex::default())
        }
    }

    pub fn save(&self, path: &Path) -> PipelineResult<()> {
        artifacts::write_json_doc(path, self)
    }

    pub fn upsert(&mut self, entry: RunIndexEntry) {
        match self.runs.iter_mut().find(|e| e.run_id == entry.run_id) {
            Some(existing) => *existing = entry,
            None => self.runs.push(entry),
        }
    }

    /// The most recent run whose frozen hashes match the current run's.
    pub fn latest_matching(&self, input_hash: &str, config_hash: &str) -> Option<&RunIndexEntry> {
        self.runs
            .iter()
            .rev()
            .find(|e| e.input_hash == input_hash && e.config_hash == config_hash)
    }

    pub fn latest(&self) -> Option<&RunIndexEntry> {
        self.runs.last()
    }

    /// Sequence number for the next run sharing this content signature.
    pub fn next_sequence(&self, content_sig: &str) -> u32 {
        self.runs
            .iter()
            .filter(|e| e.run_id.contains(content_sig))
            .count() as u32
            + 1
    }
}
