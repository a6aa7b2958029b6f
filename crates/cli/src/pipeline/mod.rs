//! Pipeline orchestration module.

mod orchestrator;
mod stats;

pub use orchestrator::Pipeline;
pub use stats::{PipelineStats, StoredCounts};
