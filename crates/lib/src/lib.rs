pub mod core;
pub mod stages;
pub mod utils;

pub use crate::core::config::PipelineConfig;
pub use crate::core::pipeline::core::{Pipeline, RunOptions, RunSummary};
pub use crate::core::pipeline::runner::CancelFlag;
pub use crate::core::pipeline::state::RunType;
