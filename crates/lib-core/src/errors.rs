use smol_str::SmolStr;
use thiserror::Error;

use crate::stages::Stage;

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Which frozen hash disagreed across a resume attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum HashKind {
    Input,
    Config,
}

/// Input or config content changed across a resume. Fatal unless forced.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{kind} hash does not match run '{run_id}' (recorded {expected}, current {actual}); \
     pass force to discard the prior run and start fresh"
)]
pub struct HashMismatch {
    pub run_id: SmolStr,
    pub kind: HashKind,
    pub expected: String,
    pub actual: String,
}

/// The fatal error taxonomy. Per-item problems never surface here; they are
/// rejected into the filtered-out audit instead. Canopy and gate rejections
/// are observable counters, not errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// Missing or invalid configuration. Raised at startup, before any stage.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed input that cannot be isolated to a single audited row.
    #[error("malformed input: {0}")]
    Input(String),

    #[error(transparent)]
    HashMismatch(#[from] HashMismatch),

    /// Unrecoverable failure inside a stage. The orchestrator persists the
    /// failed state before propagating.
    #[error("stage {stage} failed: {description}")]
    Stage { stage: Stage, description: String },

    /// Artifact or state document could not be committed.
    #[error("artifact io failed for {path}: {description}")]
    Artifact { path: String, description: String },

    /// Cooperative cancellation was observed between chunks.
    #[error("run interrupted before completion")]
    Interrupted,
}

impl PipelineError {
    pub fn stage(stage: Stage, description: impl Into<String>) -> PipelineError {
        PipelineError::Stage {
            stage,
            description: description.into(),
        }
    }

    pub fn artifact(path: impl Into<String>, description: impl Into<String>) -> PipelineError {
        PipelineError::Artifact {
            path: path.into(),
            description: description.into(),
        }
    }

    /// Process exit code the CLI collaborator should surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Config(_) => 2,
            PipelineError::HashMismatch(_) => 3,
            PipelineError::Interrupted => 130,
            PipelineError::Input(_)
            | PipelineError::Stage { .. }
            | PipelineError::Artifact { .. } => 1,
        }
    }

    /// One-line operator hint logged next to a fatal error.
    pub fn next_step_hint(&self) -> String {
        match self {
            PipelineError::Config(_) => "fix the configuration and re-run".into(),
            PipelineError::HashMismatch(_) => {
                "re-run with force to abandon the prior run, or restore the original input".into()
            }
            PipelineError::Stage { stage, .. } => {
                format!("re-run with resume_from = {stage} once the cause is addressed")
            }
            PipelineError::Artifact { .. } => "check disk space and permissions, then re-run".into(),
            PipelineError::Interrupted => "re-run to resume from the last completed stage".into(),
            PipelineError::Input(_) => "repair the input table and re-run".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_dedicated() {
        let mismatch = PipelineError::from(HashMismatch {
            run_id: "r1".into(),
            kind: HashKind::Input,
            expected: "aa".into(),
            actual: "bb".into(),
        });
        assert_eq!(mismatch.exit_code(), 3);
        assert_eq!(PipelineError::Interrupted.exit_code(), 130);
        assert_eq!(PipelineError::Config("x".into()).exit_code(), 2);
        assert_eq!(
            PipelineError::stage(Stage::Grouping, "corrupt union-find state").exit_code(),
            1
        );
    }

    #[test]
    fn stage_failure_hint_names_the_stage() {
        let err = PipelineError::stage(Stage::Scoring, "boom");
        assert!(err.next_step_hint().contains("scoring"));
    }
}
