//! Logging-based progress handler

use super::{ProgressEvent, ProgressHandler};
use tracing::{debug, info, warn};

/// Handler that logs progress events using tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl ProgressHandler for LoggingHandler {
    fn on_progress(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::JobStarted { job_id, images } => {
                info!(job_id = %job_id, images, "Starting assessment");
            }
            ProgressEvent::StatusChanged { job_id, status } => {
                debug!(job_id = %job_id, status = %status, "Job status changed");
            }
            ProgressEvent::StageStarted { job_id, stage } => {
                info!(job_id = %job_id, phase = %stage, "Starting phase");
            }
            ProgressEvent::StageComplete {
                job_id,
                stage,
                duration,
                degraded,
            } => {
                if *degraded {
                    warn!(
                        job_id = %job_id,
                        phase = %stage,
                        duration_ms = duration.as_millis(),
                        "Phase complete with degraded output"
                    );
                } else {
                    info!(
                        job_id = %job_id,
                        phase = %stage,
                        duration_ms = duration.as_millis(),
                        "Phase complete"
                    );
                }
            }
            ProgressEvent::VariantFailed {
                job_id,
                area,
                variant,
                temperature,
                error,
            } => {
                warn!(
                    job_id = %job_id,
                    area = %area,
                    variant = %variant,
                    temperature,
                    error = %error,
                    "Specialist variant dropped"
                );
            }
            ProgressEvent::JobFinished {
                job_id,
                status,
                parts,
                total_time,
            } => {
                info!(
                    job_id = %job_id,
                    status = %status,
                    parts,
                    total_time_ms = total_time.as_millis(),
                    "Assessment finished"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobStage, JobStatus};
    use std::time::Duration;
    use uuid::Uuid;

    #[test]
    fn test_logging_handler_all_events() {
        let handler = LoggingHandler;
        let job_id = Uuid::new_v4();

        handler.on_progress(&ProgressEvent::JobStarted { job_id, images: 1 });
        handler.on_progress(&ProgressEvent::StatusChanged {
            job_id,
            status: JobStatus::Processing,
        });
        handler.on_progress(&ProgressEvent::StageComplete {
            job_id,
            stage: JobStage::Merging,
            duration: Duration::from_millis(3),
            degraded: true,
        });
        handler.on_progress(&ProgressEvent::JobFinished {
            job_id,
            status: JobStatus::FailedPartial,
            parts: 0,
            total_time: Duration::from_secs(1),
        });
    }
}
