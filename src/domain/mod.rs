//! Data model shared by every pipeline phase

mod damage;
mod image;
mod job;
mod vehicle;

pub use damage::{
    CanonicalDamagePart, CostEstimate, DamageArea, DamageCandidate, DamageSummary, MergeStats,
    ReportTotals, Severity,
};
pub use image::{Angle, ImageCategory, ImageRef, RegionOfInterest};
pub use job::{Job, JobDiagnostics, JobStage, JobStatus, StageRecord};
pub use vehicle::VehicleIdentity;
