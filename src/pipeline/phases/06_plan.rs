use super::enrich::{describe_parts, locate_part};
use super::llm_helper::query_structured;
use crate::domain::{CanonicalDamagePart, CostEstimate, VehicleIdentity};
use crate::inference::InferenceRequest;
use crate::pipeline::structured::lenient;
use crate::pipeline::{PhaseOutcome, PipelineContext};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

const TEMPERATURE: f32 = 0.2;
pub const DEFAULT_CURRENCY: &str = "USD";

#[derive(Debug, Deserialize)]
struct PlanReply {
    #[serde(default, deserialize_with = "lenient::string")]
    currency: String,
    #[serde(default, alias = "damages", deserialize_with = "lenient::list")]
    parts: Vec<PlanEntry>,
}

#[derive(Debug, Deserialize)]
struct PlanEntry {
    #[serde(default, deserialize_with = "lenient::index")]
    index: Option<usize>,
    #[serde(default, alias = "name", alias = "canonical_name", deserialize_with = "lenient::string")]
    part: String,
    #[serde(default, deserialize_with = "lenient::string")]
    area: String,
    #[serde(default, alias = "labour_hours", deserialize_with = "lenient::number")]
    labor_hours: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    paint_hours: Option<f64>,
    #[serde(default)]
    cost: Value,
}

/// A bare number, a numeric string, or `{amount, currency}`.
fn parse_cost(value: &Value, default_currency: &str) -> Option<CostEstimate> {
    let (amount, currency) = match value {
        Value::Object(map) => {
            let amount = map
                .get("amount")
                .or_else(|| map.get("value"))
                .and_then(lenient::parse_number)?;
            let currency = map
                .get("currency")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|c| !c.is_empty());
            (amount, currency)
        }
        other => (lenient::parse_number(other)?, None),
    };

    Some(CostEstimate {
        amount,
        currency: currency.unwrap_or(default_currency).to_uppercase(),
    })
}

fn build_prompt(vehicle: &VehicleIdentity, parts: &[CanonicalDamagePart]) -> String {
    format!(
        r#"TASK: plan

Vehicle: {}

Damaged parts with recommended repairs:
{}

Estimate the repair effort for every part.

Respond with JSON:
{{
  "currency": "USD",
  "parts": [
    {{
      "index": 0,
      "part": "front bumper",
      "labor_hours": 2.5,
      "paint_hours": 1.5,
      "cost": 450.0
    }}
  ]
}}
"#,
        vehicle,
        describe_parts(parts)
    )
}

/// Attaches labor, paint and cost estimates. On failure the fields stay
/// empty and the parts come back untouched.
pub async fn execute(
    ctx: &PipelineContext,
    vehicle: &VehicleIdentity,
    mut parts: Vec<CanonicalDamagePart>,
) -> PhaseOutcome<Vec<CanonicalDamagePart>> {
    if parts.is_empty() {
        return PhaseOutcome::complete(parts);
    }

    let request = InferenceRequest::new(build_prompt(vehicle, &parts))
        .with_temperature(TEMPERATURE)
        .with_max_tokens(2000)
        .with_label("plan");

    let reply: PlanReply = match query_structured(ctx, request).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Planning unavailable, leaving estimates empty");
            return PhaseOutcome::degraded(parts, vec![format!("planning failed: {}", e)]);
        }
    };

    let currency = if reply.currency.is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        reply.currency
    };

    for entry in reply.parts {
        let Some(idx) = locate_part(&ctx.ontology, &parts, entry.index, &entry.part, &entry.area)
        else {
            debug!(part = %entry.part, "Plan entry matches no part");
            continue;
        };
        let part = &mut parts[idx];
        part.labor_hours = entry.labor_hours.or(part.labor_hours);
        part.paint_hours = entry.paint_hours.or(part.paint_hours);
        part.cost = parse_cost(&entry.cost, &currency).or(part.cost.take());
    }

    let unplanned = parts
        .iter()
        .filter(|p| p.labor_hours.is_none() && p.cost.is_none())
        .count();
    let reasons = if unplanned > 0 {
        vec![format!("{} part(s) left without an estimate", unplanned)]
    } else {
        Vec::new()
    };
    PhaseOutcome::degraded(parts, reasons)
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

    #[test]
    fn test_parse_cost_shapes() {
        assert_eq!(
            parse_cost(&json!(450), "EUR"),
            Some(CostEstimate {
                amount: 450.0,
                currency: "EUR".to_string()
            })
        );
        assert_eq!(
            parse_cost(&json!({"amount": "1,200", "currency": "gbp"}), "USD"),
            Some(CostEstimate {
                amount: 1200.0,
                currency: "GBP".to_string()
            })
        );
        assert_eq!(parse_cost(&json!("$99.50"), "USD").map(|c| c.amount), Some(99.5));
        assert_eq!(parse_cost(&Value::Null, "USD"), None);
        assert_eq!(parse_cost(&json!({"currency": "USD"}), "USD"), None);
    }

    #[tokio::test]
    async fn test_plan_attaches_estimates() {
        let backend = Arc::new(MockInferenceBackend::new());
        backend.on(
            "TASK: plan",
            MockResponse::json(json!({
                "currency": "EUR",
                "parts": [
                    {"index": 0, "labor_hours": "2.5", "paint_hours": 1, "cost": 300},
                    {"part": "trunk lid", "labor_hours": 4, "cost": {"amount": 900}}
                ]
            })),
        );
        let ctx = mock_context(backend);
        let parts = vec![part("hood", DamageArea::Front), part("trunk lid", DamageArea::Rear)];

        let outcome = execute(&ctx, &VehicleIdentity::unknown(), parts).await;
        assert!(!outcome.is_degraded());
        let parts = outcome.into_value();
        assert_eq!(parts[0].labor_hours, Some(2.5));
        assert_eq!(parts[0].paint_hours, Some(1.0));
        assert_eq!(parts[0].cost.as_ref().map(|c| c.currency.as_str()), Some("EUR"));
        assert_eq!(parts[1].cost.as_ref().map(|c| c.amount), Some(900.0));
        assert_eq!(parts[1].paint_hours, None);
    }

    #[tokio::test]
    async fn test_plan_failure_leaves_fields_empty() {
        let backend = Arc::new(MockInferenceBackend::new());
        backend.on("TASK: plan", MockResponse::text("I can't estimate that."));
        let ctx = mock_context(backend);

        let outcome = execute(&ctx, &VehicleIdentity::unknown(), vec![part("hood", DamageArea::Front)]).await;
        assert!(outcome.is_degraded());
        let parts = outcome.into_value();
        assert_eq!(parts.len(), 1);
        assert!(parts[0].cost.is_none());
        assert!(parts[0].labor_hours.is_none());
    }
}
