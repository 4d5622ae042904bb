//! Progress handler trait and events

use crate::domain::{DamageArea, JobStage, JobStatus};
use std::time::Duration;
use uuid::Uuid;

/// Events emitted while a job runs
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Job accepted by the orchestrator
    JobStarted { job_id: Uuid, images: usize },

    /// Externally visible status changed
    StatusChanged { job_id: Uuid, status: JobStatus },

    StageStarted { job_id: Uuid, stage: JobStage },

    StageComplete {
        job_id: Uuid,
        stage: JobStage,
        duration: Duration,
        degraded: bool,
    },

    /// One specialist variant was dropped
    VariantFailed {
        job_id: Uuid,
        area: DamageArea,
        variant: String,
        temperature: f32,
        error: String,
    },

    /// Job reached a terminal status
    JobFinished {
        job_id: Uuid,
        status: JobStatus,
        parts: usize,
        total_time: Duration,
    },
}

impl ProgressEvent {
    pub fn job_id(&self) -> Uuid {
        match self {
            ProgressEvent::JobStarted { job_id, .. }
            | ProgressEvent::StatusChanged { job_id, .. }
            | ProgressEvent::StageStarted { job_id, .. }
            | ProgressEvent::StageComplete { job_id, .. }
            | ProgressEvent::VariantFailed { job_id, .. }
            | ProgressEvent::JobFinished { job_id, .. } => *job_id,
        }
    }
}

/// Trait for handling progress events
pub trait ProgressHandler: Send + Sync {
    /// Called when a progress event occurs
    fn on_progress(&self, event: &ProgressEvent);
}

/// No-op handler that ignores all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHandler;

impl ProgressHandler for NoOpHandler {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
