// Pipeline phases for damage detection and consensus
//
// Each phase is self-contained with its own prompt builder and reply
// schema, and returns a PhaseOutcome. Only the orchestrator decides the
// job's terminal status.

pub mod llm_helper;

#[path = "01_identify.rs"]
pub mod identify;
#[path = "02_areas.rs"]
pub mod areas;
#[path = "03_specialists.rs"]
pub mod specialists;
#[path = "04_merge.rs"]
pub mod merge;
#[path = "05_enrich.rs"]
pub mod enrich;
#[path = "06_plan.rs"]
pub mod plan;
#[path = "07_summary.rs"]
pub mod summary;
