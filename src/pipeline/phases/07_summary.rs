use super::enrich::describe_parts;
use super::llm_helper::query_structured;
use crate::domain::{CanonicalDamagePart, DamageSummary, ReportTotals, Severity, VehicleIdentity};
use crate::inference::InferenceRequest;
use crate::pipeline::structured::lenient;
use crate::pipeline::{PhaseOutcome, PipelineContext};
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

const TEMPERATURE: f32 = 0.3;

#[derive(Debug, Deserialize)]
struct SummaryReply {
    #[serde(default, deserialize_with = "lenient::severity")]
    overall_severity: Option<Severity>,
    #[serde(default, alias = "summary", deserialize_with = "lenient::string")]
    executive_summary: String,
    #[serde(default)]
    safety_highlights: Value,
    #[serde(default, deserialize_with = "lenient::string")]
    repair_plan_overview: String,
}

/// Accepts a list of strings or a single string.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Summary for a report with nothing to repair.
pub fn no_damage_summary() -> DamageSummary {
    DamageSummary {
        overall_severity: None,
        executive_summary: "No damage was detected in the submitted images.".to_string(),
        safety_highlights: Vec::new(),
        repair_plan_overview: "No repairs required.".to_string(),
    }
}

fn build_prompt(
    vehicle: &VehicleIdentity,
    parts: &[CanonicalDamagePart],
    totals: &ReportTotals,
) -> String {
    let safety: Vec<&str> = parts
        .iter()
        .filter(|p| p.safety_critical)
        .map(|p| p.canonical_name.as_str())
        .collect();
    let cost = totals
        .cost
        .as_ref()
        .map(|c| format!("{:.2} {}", c.amount, c.currency))
        .unwrap_or_else(|| "not available".to_string());

    format!(
        r#"TASK: summary

Vehicle: {vehicle}

Damaged parts:
{parts}

Totals: {count} part(s), {labor:.1} labor hours, {paint:.1} paint hours, estimated cost {cost}
Safety-critical parts: {safety}

Write an overall assessment for the vehicle owner.

Respond with JSON:
{{
  "overall_severity": "minor" | "moderate" | "severe",
  "executive_summary": "two or three sentences",
  "safety_highlights": ["one entry per safety concern"],
  "repair_plan_overview": "order and grouping of the repair work"
}}
"#,
        vehicle = vehicle,
        parts = describe_parts(parts),
        count = totals.part_count,
        labor = totals.labor_hours,
        paint = totals.paint_hours,
        cost = cost,
        safety = if safety.is_empty() {
            "none".to_string()
        } else {
            safety.join(", ")
        },
    )
}

/// Produces the narrative. An empty parts list needs no call; a failed
/// call leaves the summary empty.
pub async fn execute(
    ctx: &PipelineContext,
    vehicle: &VehicleIdentity,
    parts: &[CanonicalDamagePart],
    totals: &ReportTotals,
) -> PhaseOutcome<Option<DamageSummary>> {
    if parts.is_empty() {
        return PhaseOutcome::complete(Some(no_damage_summary()));
    }

    let request = InferenceRequest::new(build_prompt(vehicle, parts, totals))
        .with_temperature(TEMPERATURE)
        .with_max_tokens(1000)
        .with_label("summary");

    match query_structured::<SummaryReply>(ctx, request).await {
        Ok(reply) => {
            let worst = parts.iter().map(|p| p.severity).max();
            PhaseOutcome::complete(Some(DamageSummary {
                overall_severity: reply.overall_severity.or(worst),
                executive_summary: reply.executive_summary,
                safety_highlights: string_list(&reply.safety_highlights),
                repair_plan_overview: reply.repair_plan_overview,
            }))
        }
        Err(e) => {
            warn!(error = %e, "Summary unavailable");
            PhaseOutcome::degraded(None, vec![format!("summary failed: {}", e)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::enrich::tests::part;
    use super::*;
    use crate::domain::DamageArea;
    use crate::inference::{MockInferenceBackend, MockResponse};
    use crate::pipeline::context::test_support::mock_context;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_empty_parts_use_local_summary() {
        let backend = Arc::new(MockInferenceBackend::new());
        let ctx = mock_context(backend.clone());

        let outcome = execute(&ctx, &VehicleIdentity::unknown(), &[], &ReportTotals::default()).await;
        assert_eq!(outcome.into_value(), Some(no_damage_summary()));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_summary_falls_back_to_worst_severity() {
        let backend = Arc::new(MockInferenceBackend::new());
        backend.on(
            "TASK: summary",
            MockResponse::json(json!({
                "executive_summary": "Front-end collision damage.",
                "safety_highlights": "Headlight must be replaced before driving at night.",
                "repair_plan_overview": "Replace, then refinish."
            })),
        );
        let ctx = mock_context(backend);
        let parts = vec![part("hood", DamageArea::Front)];
        let totals = ReportTotals::from_parts(&parts);

        let summary = execute(&ctx, &VehicleIdentity::unknown(), &parts, &totals)
            .await
            .into_value()
            .unwrap();
        assert_eq!(summary.overall_severity, Some(Severity::Moderate));
        assert_eq!(summary.safety_highlights.len(), 1);
    }

    #[tokio::test]
    async fn test_summary_failure_is_none() {
        let backend = Arc::new(MockInferenceBackend::new());
        let ctx = mock_context(backend);
        let parts = vec![part("hood", DamageArea::Front)];

        let outcome = execute(&ctx, &VehicleIdentity::unknown(), &parts, &ReportTotals::default()).await;
        assert!(outcome.is_degraded());
        assert_eq!(outcome.into_value(), None);
    }
}
