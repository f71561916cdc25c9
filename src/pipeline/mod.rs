pub mod orchestrator;
pub mod stage;

pub use orchestrator::{Pipeline, PipelineError, RunReport, StageOutcome, StageRecord};
pub use stage::{Phase, PipelineState, Stage};
