pub mod config;
pub mod context;
pub mod orchestrator;
pub mod outcome;
pub mod phases;
pub mod structured;
pub mod task_pool;

pub use config::PipelineConfig;
pub use context::PipelineContext;
pub use orchestrator::PipelineOrchestrator;
pub use outcome::PhaseOutcome;
pub use phases::merge::{ConsensusMerger, MergeOutcome};
pub use structured::{parse_structured, ParseFailure};
pub use task_pool::TaskPool;
