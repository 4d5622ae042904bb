//! Pipeline context for managing dependencies

use std::sync::Arc;

use crate::inference::InferenceGateway;
use crate::ontology::PartOntology;
use crate::progress::{NoOpHandler, ProgressHandler};

use super::config::PipelineConfig;

/// Context that owns all long-lived pipeline dependencies.
///
/// Cheap to clone. Several orchestrators may share one gateway, and
/// therefore one concurrency limiter.
#[derive(Clone)]
pub struct PipelineContext {
    pub gateway: Arc<InferenceGateway>,
    pub ontology: Arc<PartOntology>,
    pub config: PipelineConfig,
    pub progress: Arc<dyn ProgressHandler>,
}

impl PipelineContext {
    pub fn new(
        gateway: Arc<InferenceGateway>,
        ontology: Arc<PartOntology>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            ontology,
            config,
            progress: Arc::new(NoOpHandler),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("gateway", &self.gateway)
            .field("labels", &self.ontology.labels().len())
            .field("config", &self.config)
            .finish()
    }
}
