//! Output formatting for assessment reports and configuration
//!
//! JSON and YAML serialise the finished `Job` as-is; the human format is a
//! terminal summary.
//!
//! # Example
//!
//! ```ignore
//! use dentscan::cli::output::{OutputFormat, OutputFormatter};
//!
//! let formatter = OutputFormatter::new(OutputFormat::Json);
//! println!("{}", formatter.format_report(&job)?);
//! ```

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::config::DentscanConfig;
use crate::domain::{CanonicalDamagePart, Job, JobStatus};

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_report(&self, job: &Job) -> Result<String> {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(job).context("Failed to serialize report to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(job).context("Failed to serialize report to YAML")
            }
            OutputFormat::Human => Ok(self.format_report_human(job)),
        }
    }

    pub fn format_config(&self, config: &DentscanConfig) -> Result<String> {
        // Sorted keys keep the output stable between runs.
        let map: BTreeMap<String, String> = config.to_display_map().into_iter().collect();
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&map).context("Failed to serialize config to JSON")
            }
            OutputFormat::Yaml => {
                serde_yaml::to_string(&map).context("Failed to serialize config to YAML")
            }
            OutputFormat::Human => Ok(config.to_string()),
        }
    }

    fn format_report_human(&self, job: &Job) -> String {
        let mut out = String::new();

        let header = match job.status {
            JobStatus::Completed => "\u{2713} Damage Assessment",
            JobStatus::FailedPartial => "\u{26A0} Damage Assessment (Partial)",
            _ => "\u{2717} Damage Assessment (Failed)",
        };
        let _ = writeln!(out, "{}\n{}\n", header, RULE);

        let identity = &job.vehicle_identity;
        if identity.is_known() {
            let _ = writeln!(
                out,
                "Vehicle:   {} ({}% confidence, {} agreeing attempts)",
                identity,
                (identity.confidence * 100.0).round() as u32,
                identity.agreement_count
            );
        } else {
            let _ = writeln!(out, "Vehicle:   not identified");
        }
        let _ = writeln!(out, "Images:    {}", job.images.len());
        let _ = writeln!(out, "Status:    {}\n", job.status);

        if job.canonical_parts.is_empty() {
            out.push_str("No damaged parts reported.\n");
        } else {
            out.push_str("Damaged Parts:\n");
            let count = job.canonical_parts.len();
            for (i, part) in job.canonical_parts.iter().enumerate() {
                let connector = if i + 1 == count { "\u{2514}" } else { "\u{251C}" };
                let _ = writeln!(out, "{}\u{2500} {}", connector, describe_part(part));
            }
        }

        let totals = &job.totals;
        let _ = writeln!(
            out,
            "\nTotals: {} part(s), {} safety-critical, {:.1} labor h, {:.1} paint h",
            totals.part_count, totals.safety_critical_count, totals.labor_hours, totals.paint_hours
        );
        if let Some(cost) = &totals.cost {
            let _ = writeln!(out, "Estimated cost: {:.2} {}", cost.amount, cost.currency);
        }

        if let Some(summary) = &job.summary {
            let _ = writeln!(out, "\nSummary:\n{}", summary.executive_summary);
            if !summary.safety_highlights.is_empty() {
                out.push_str("\nSafety:\n");
                for highlight in &summary.safety_highlights {
                    let _ = writeln!(out, "  - {}", highlight);
                }
            }
            if !summary.repair_plan_overview.is_empty() {
                let _ = writeln!(out, "\nRepair plan:\n{}", summary.repair_plan_overview);
            }
        }

        if !job.warnings.is_empty() {
            out.push_str("\n\u{26A0} Warnings:\n");
            for warning in &job.warnings {
                let _ = writeln!(out, "  - {}", warning);
            }
        }

        if let Some(finished) = job.finished_at {
            let ms = (finished - job.created_at).num_milliseconds();
            let _ = writeln!(out, "\nProcessed in {}ms", ms);
        }

        out
    }
}

fn describe_part(part: &CanonicalDamagePart) -> String {
    let mut line = format!(
        "{} [{}] {} ({:.0}%, {} observation(s))",
        part.canonical_name,
        part.area,
        part.severity,
        part.confidence * 100.0,
        part.evidence_count
    );
    if part.safety_critical {
        line.push_str(" safety-critical");
    }
    if !part.classified {
        line.push_str(" unclassified");
    }
    if let Some(method) = &part.repair_method {
        let _ = write!(line, " - {}", method);
    }
    if let Some(cost) = &part.cost {
        let _ = write!(line, ", {:.2} {}", cost.amount, cost.currency);
    }
    line
}
