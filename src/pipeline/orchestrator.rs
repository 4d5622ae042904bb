use super::context::PipelineContext;
use super::outcome::PhaseOutcome;
use super::phases::areas::AreaDetection;
use super::phases::identify::{AttemptReport, Identification};
use super::phases::merge::ConsensusMerger;
use super::phases::specialists::{SpecialistRun, VariantReport};
use super::phases::{areas, enrich, identify, plan, specialists, summary};
use crate::domain::{ImageRef, Job, JobStage, ReportTotals, StageRecord};
use crate::progress::ProgressEvent;
use futures_util::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Why a job stopped short of running every phase.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Interruption {
    #[error("job deadline exceeded during {0}")]
    Deadline(JobStage),

    #[error("{0} phase panicked: {1}")]
    Panic(JobStage, String),
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Drives one job through every phase. The job always ends in a terminal
/// status, whatever the phases do.
pub struct PipelineOrchestrator {
    ctx: PipelineContext,
}

impl PipelineOrchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    pub async fn run(&self, images: Vec<ImageRef>) -> Job {
        let job = Job::new(images);
        let span = info_span!("job", job_id = %job.id);
        self.execute(job).instrument(span).await
    }

    fn emit(&self, event: ProgressEvent) {
        self.ctx.progress.on_progress(&event);
    }

    fn transition(&self, job: &mut Job, stage: JobStage) {
        let previous = job.status;
        if job.advance(stage) && job.status != previous {
            self.emit(ProgressEvent::StatusChanged {
                job_id: job.id,
                status: job.status,
            });
        }
    }

    /// Runs one phase under the job deadline (when given) with panics
    /// contained. Returns `None` when the phase was interrupted.
    async fn stage<T, F>(
        &self,
        job: &mut Job,
        stage: JobStage,
        deadline: Option<tokio::time::Instant>,
        interrupted: &mut Option<Interruption>,
        phase: F,
    ) -> Option<T>
    where
        F: Future<Output = PhaseOutcome<T>>,
    {
        self.transition(job, stage);
        self.emit(ProgressEvent::StageStarted {
            job_id: job.id,
            stage,
        });

        let start = Instant::now();
        let guarded = AssertUnwindSafe(phase).catch_unwind();
        let result = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, guarded).await {
                Ok(caught) => caught.map_err(|p| Interruption::Panic(stage, panic_message(p))),
                Err(_) => Err(Interruption::Deadline(stage)),
            },
            None => guarded
                .await
                .map_err(|p| Interruption::Panic(stage, panic_message(p))),
        };

        let (value, reasons) = match result {
            Ok(outcome) => {
                let (value, reasons) = outcome.into_parts();
                (Some(value), reasons)
            }
            Err(interruption) => {
                warn!(phase = %stage, error = %interruption, "Phase interrupted");
                let reason = interruption.to_string();
                interrupted.get_or_insert(interruption);
                (None, vec![reason])
            }
        };

        let duration = start.elapsed();
        let degraded = !reasons.is_empty();
        job.warnings.extend(reasons.iter().cloned());
        job.diagnostics.stages.push(StageRecord {
            stage,
            duration_ms: duration.as_millis() as u64,
            degraded,
            reasons,
        });
        self.emit(ProgressEvent::StageComplete {
            job_id: job.id,
            stage,
            duration,
            degraded,
        });

        value
    }

    async fn execute(&self, mut job: Job) -> Job {
        let started = Instant::now();
        let ctx = &self.ctx;
        self.emit(ProgressEvent::JobStarted {
            job_id: job.id,
            images: job.images.len(),
        });

        if job.images.is_empty() {
            warn!("No images supplied, failing job");
            job.warnings.push("no images supplied".to_string());
            self.transition(&mut job, JobStage::Failed);
            return self.finish(job, started);
        }

        let job_id = job.id;
        let images = job.images.clone();
        let deadline = Some(tokio::time::Instant::now() + ctx.config.job_timeout);
        let mut interrupted: Option<Interruption> = None;

        let (tx, mut rx) = mpsc::unbounded_channel::<AttemptReport>();
        let identified = self
            .stage(
                &mut job,
                JobStage::Identifying,
                deadline,
                &mut interrupted,
                identify::execute(ctx, &images, Some(&tx)),
            )
            .await;
        drop(tx);
        let identification = identified.unwrap_or_else(|| {
            let mut salvaged = Vec::new();
            while let Ok(report) = rx.try_recv() {
                salvaged.push(report);
            }
            debug!(attempts = salvaged.len(), "Salvaged identification attempts");
            Identification::from_reports(salvaged, ctx.config.identification_attempts.max(3))
        });
        job.vehicle_identity = identification.identity;
        job.diagnostics.identification_failures = identification.failures;

        let mut detection = AreaDetection::default();
        if interrupted.is_none() {
            if let Some(found) = self
                .stage(
                    &mut job,
                    JobStage::DetectingAreas,
                    deadline,
                    &mut interrupted,
                    areas::execute(ctx, &images),
                )
                .await
            {
                detection = found;
            }
        }
        job.diagnostics.area_calls_failed = detection.calls_failed;

        let mut run = SpecialistRun::default();
        if interrupted.is_none() {
            let (tx, mut rx) = mpsc::unbounded_channel::<VariantReport>();
            let finished = self
                .stage(
                    &mut job,
                    JobStage::Specializing,
                    deadline,
                    &mut interrupted,
                    specialists::execute(ctx, job_id, &detection.areas, Some(&tx)),
                )
                .await;
            drop(tx);

            run = match finished {
                Some(run) => run,
                None => {
                    // Keep what the cancelled phase already produced.
                    let mut salvaged = Vec::new();
                    while let Ok(report) = rx.try_recv() {
                        salvaged.push(report);
                    }
                    debug!(variants = salvaged.len(), "Salvaged specialist reports");
                    SpecialistRun::from_reports(salvaged)
                }
            };
        }
        job.diagnostics.variants_failed = run.variants_failed;
        job.diagnostics.variants_succeeded = run.variants_succeeded;

        // Merge always runs, on whatever candidates exist, with no deadline.
        let merger = ConsensusMerger::new(&ctx.ontology);
        let candidates = run.candidates;
        let mut parts = match self
            .stage(&mut job, JobStage::Merging, None, &mut interrupted, async {
                PhaseOutcome::complete(merger.merge(&candidates))
            })
            .await
        {
            Some(merged) => {
                job.diagnostics.merge = Some(merged.stats);
                merged.parts
            }
            None => Vec::new(),
        };

        if interrupted.is_none() {
            let vehicle = job.vehicle_identity.clone();

            if let Some(enriched) = self
                .stage(
                    &mut job,
                    JobStage::Enriching,
                    deadline,
                    &mut interrupted,
                    enrich::execute(ctx, &vehicle, parts.clone()),
                )
                .await
            {
                parts = enriched;
            }

            if interrupted.is_none() {
                if let Some(planned) = self
                    .stage(
                        &mut job,
                        JobStage::Planning,
                        deadline,
                        &mut interrupted,
                        plan::execute(ctx, &vehicle, parts.clone()),
                    )
                    .await
                {
                    parts = planned;
                }
            }

            if interrupted.is_none() {
                let totals = ReportTotals::from_parts(&parts);
                job.summary = self
                    .stage(
                        &mut job,
                        JobStage::Summarizing,
                        deadline,
                        &mut interrupted,
                        summary::execute(ctx, &vehicle, &parts, &totals),
                    )
                    .await
                    .flatten();
            }
        }

        job.totals = ReportTotals::from_parts(&parts);
        job.canonical_parts = parts;

        let areas_lost = detection.all_calls_failed() && detection.areas.is_empty();
        let specialists_lost = run.variants_succeeded == 0 && run.variants_failed > 0;
        let terminal = if interrupted.is_some() || areas_lost || specialists_lost {
            JobStage::FailedPartial
        } else {
            JobStage::Completed
        };
        if areas_lost {
            job.warnings.push("every area detection call failed".to_string());
        }
        if specialists_lost {
            job.warnings.push("every specialist variant failed".to_string());
        }

        self.transition(&mut job, terminal);
        self.finish(job, started)
    }

    fn finish(&self, job: Job, started: Instant) -> Job {
        let total_time = started.elapsed();
        info!(
            status = %job.status,
            parts = job.canonical_parts.len(),
            vehicle = %job.vehicle_identity,
            total_time_ms = total_time.as_millis() as u64,
            "Pipeline complete"
        );
        self.emit(ProgressEvent::JobFinished {
            job_id: job.id,
            status: job.status,
            parts: job.canonical_parts.len(),
            total_time,
        });
        job
    }
}
