use serde::{Deserialize, Serialize};

/// The pipeline's stage graph, in execution order. The discriminant order is
/// load-bearing: resume logic compares stages by position.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Normalization,
    ExactEquals,
    Filtering,
    CandidateGeneration,
    Scoring,
    Grouping,
    Survivorship,
    Disposition,
    FinalOutput,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::Normalization,
        Stage::ExactEquals,
        Stage::Filtering,
        Stage::CandidateGeneration,
        Stage::Scoring,
        Stage::Grouping,
        Stage::Survivorship,
        Stage::Disposition,
        Stage::FinalOutput,
    ];

    pub fn index(self) -> usize {
        Stage::ALL.iter().position(|&s| s == self).unwrap_or(0)
    }

    /// File stem of the stage's committed artifact.
    pub fn artifact_name(self) -> &'static str {
        self.into()
    }
}

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
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Interrupted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stage_names_round_trip() {
        for stage in Stage::ALL {
            let name = stage.to_string();
            assert_eq!(Stage::from_str(&name).unwrap(), stage);
        }
        assert_eq!(Stage::CandidateGeneration.to_string(), "candidate_generation");
    }

    #[test]
    fn stage_order_is_monotone() {
        for window in Stage::ALL.windows(2) {
            assert!(window[0] < window[1]);
        }
    }
}
