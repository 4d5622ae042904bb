use super::damage::{CanonicalDamagePart, DamageSummary, MergeStats, ReportTotals};
use super::image::ImageRef;
use super::vehicle::VehicleIdentity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Externally visible job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    FailedPartial,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::FailedPartial => "failed_partial",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::FailedPartial | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orchestrator state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStage {
    Pending,
    Identifying,
    DetectingAreas,
    Specializing,
    Merging,
    Enriching,
    Planning,
    Summarizing,
    Completed,
    FailedPartial,
    Failed,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStage::Pending => "pending",
            JobStage::Identifying => "identifying",
            JobStage::DetectingAreas => "detecting_areas",
            JobStage::Specializing => "specializing",
            JobStage::Merging => "merging",
            JobStage::Enriching => "enriching",
            JobStage::Planning => "planning",
            JobStage::Summarizing => "summarizing",
            JobStage::Completed => "completed",
            JobStage::FailedPartial => "failed_partial",
            JobStage::Failed => "failed",
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            JobStage::Pending => JobStatus::Pending,
            JobStage::Completed => JobStatus::Completed,
            JobStage::FailedPartial => JobStatus::FailedPartial,
            JobStage::Failed => JobStatus::Failed,
            _ => JobStatus::Processing,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-stage record kept for the report's diagnostics section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: JobStage,
    pub duration_ms: u64,
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobDiagnostics {
    pub stages: Vec<StageRecord>,
    pub identification_failures: usize,
    pub area_calls_failed: usize,
    pub variants_failed: usize,
    pub variants_succeeded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge: Option<MergeStats>,
}

/// The unit of work handed to and returned from the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub images: Vec<ImageRef>,
    pub vehicle_identity: VehicleIdentity,
    pub canonical_parts: Vec<CanonicalDamagePart>,
    pub summary: Option<DamageSummary>,
    pub totals: ReportTotals,
    pub status: JobStatus,
    pub stage: JobStage,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub diagnostics: JobDiagnostics,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(images: Vec<ImageRef>) -> Self {
        Self {
            id: Uuid::new_v4(),
            images,
            vehicle_identity: VehicleIdentity::unknown(),
            canonical_parts: Vec::new(),
            summary: None,
            totals: ReportTotals::default(),
            status: JobStatus::Pending,
            stage: JobStage::Pending,
            warnings: Vec::new(),
            diagnostics: JobDiagnostics::default(),
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Moves the state machine. Transitions out of a terminal stage are
    /// ignored and reported as `false`.
    pub fn advance(&mut self, stage: JobStage) -> bool {
        if self.stage.is_terminal() {
            return false;
        }
        self.stage = stage;
        self.status = stage.status();
        if stage.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new(Vec::new());
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.stage, JobStage::Pending);
        assert!(!job.vehicle_identity.is_known());
    }

    #[test]
    fn test_advance_maps_status() {
        let mut job = Job::new(Vec::new());
        assert!(job.advance(JobStage::Identifying));
        assert_eq!(job.status, JobStatus::Processing);
        assert!(job.advance(JobStage::Completed));
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_terminal_stage_is_sticky() {
        let mut job = Job::new(Vec::new());
        job.advance(JobStage::Failed);
        assert!(!job.advance(JobStage::Identifying));
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::FailedPartial).unwrap();
        assert_eq!(json, "\"failed_partial\"");
    }
}
