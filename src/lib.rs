//! dentscan - multi-phase vehicle damage assessment over vision LLMs
//!
//! A job takes a set of vehicle photographs and produces one canonical
//! damage report. Phases run in order: vehicle identification by repeated
//! voting, area bucketing, per-area specialist passes at several sampling
//! temperatures, a deterministic consensus merge over a controlled part
//! vocabulary, then text-only enrichment, repair planning and a narrative
//! summary.
//!
//! # Core Concepts
//!
//! - **Inference gateway**: every vision-LLM call goes through
//!   [`inference::InferenceGateway`], which applies the global concurrency
//!   cap, per-call timeouts and retries with backoff
//! - **Fail-soft phases**: phases return [`pipeline::PhaseOutcome`] values;
//!   a failed call degrades the report instead of aborting the job
//! - **Consensus merge**: [`pipeline::ConsensusMerger`] collapses repeated
//!   observations into unique `(part, area)` entries
//!
//! # Example Usage
//!
//! ```ignore
//! use dentscan::{DentscanConfig, PipelineOrchestrator};
//! use dentscan::cli::handlers::build_context;
//! use dentscan::images::scan_directory;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = DentscanConfig::default();
//! let images = scan_directory("./claim-1234".as_ref())?;
//! let job = PipelineOrchestrator::new(build_context(&config)?).run(images).await;
//! println!("{}: {} damaged parts", job.status, job.canonical_parts.len());
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod domain;
pub mod images;
pub mod inference;
pub mod ontology;
pub mod pipeline;
pub mod progress;
pub mod util;

pub use config::{ConfigError, DentscanConfig};
pub use domain::{
    CanonicalDamagePart, DamageArea, DamageCandidate, ImageRef, Job, JobStage, JobStatus,
    Severity, VehicleIdentity,
};
pub use inference::{BackendError, GatewayError, InferenceBackend, InferenceGateway};
pub use ontology::PartOntology;
pub use pipeline::{ConsensusMerger, PipelineConfig, PipelineContext, PipelineOrchestrator};
pub use util::{init_default, init_from_env, init_logging, LoggingConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
