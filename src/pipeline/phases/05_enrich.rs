use super::llm_helper::query_structured;
use crate::domain::{CanonicalDamagePart, DamageArea, VehicleIdentity};
use crate::inference::InferenceRequest;
use crate::ontology::PartOntology;
use crate::pipeline::structured::lenient;
use crate::pipeline::{PhaseOutcome, PipelineContext};
use serde::Deserialize;
use tracing::{debug, warn};

const TEMPERATURE: f32 = 0.2;

/// Finds the part a text-pass reply entry refers to: a valid index wins,
/// otherwise the canonicalised name (and area, when given) must match
/// exactly one part.
pub fn locate_part(
    ontology: &PartOntology,
    parts: &[CanonicalDamagePart],
    index: Option<usize>,
    name: &str,
    area: &str,
) -> Option<usize> {
    if let Some(idx) = index.filter(|idx| *idx < parts.len()) {
        return Some(idx);
    }
    if name.trim().is_empty() {
        return None;
    }

    let canonical = ontology.canonicalize(name).name;
    let area = DamageArea::parse(area);
    let mut matches = parts
        .iter()
        .enumerate()
        .filter(|(_, p)| p.canonical_name == canonical && area.map_or(true, |a| a == p.area))
        .map(|(idx, _)| idx);

    let first = matches.next()?;
    matches.next().is_none().then_some(first)
}

/// One line per part, numbered from 0, shared by the text-only passes.
pub fn describe_parts(parts: &[CanonicalDamagePart]) -> String {
    parts
        .iter()
        .enumerate()
        .map(|(idx, p)| {
            let mut line = format!(
                "{}. {} ({} area, {} severity, confidence {:.2})",
                idx, p.canonical_name, p.area, p.severity, p.confidence
            );
            if !p.description.is_empty() {
                line.push_str(": ");
                line.push_str(&p.description);
            }
            if let Some(method) = &p.repair_method {
                line.push_str(&format!(" [repair: {}]", method));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Deserialize)]
struct EnrichReply {
    #[serde(default, alias = "damages", deserialize_with = "lenient::list")]
    parts: Vec<EnrichEntry>,
}

#[derive(Debug, Deserialize)]
struct EnrichEntry {
    #[serde(default, deserialize_with = "lenient::index")]
    index: Option<usize>,
    #[serde(default, alias = "name", alias = "canonical_name", deserialize_with = "lenient::string")]
    part: String,
    #[serde(default, deserialize_with = "lenient::string")]
    area: String,
    #[serde(default, deserialize_with = "lenient::string")]
    repair_method: String,
    #[serde(default, alias = "technical_notes", deserialize_with = "lenient::string")]
    technical_description: String,
}

fn build_prompt(vehicle: &VehicleIdentity, parts: &[CanonicalDamagePart]) -> String {
    format!(
        r#"TASK: enrich

Vehicle: {}

Damaged parts:
{}

For every part, recommend a repair method and give a short technical description of the work.

Respond with JSON:
{{
  "parts": [
    {{
      "index": 0,
      "part": "front bumper",
      "repair_method": "repair" | "replace" | "refinish" | "paintless dent repair",
      "technical_description": "remove bumper cover, plastic weld crack, refinish"
    }}
  ]
}}
"#,
        vehicle,
        describe_parts(parts)
    )
}

fn non_empty(s: String) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

/// Attaches repair methods. On failure the parts come back untouched.
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
        .with_label("enrich");

    let reply: EnrichReply = match query_structured(ctx, request).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "Enrichment unavailable, leaving repair methods empty");
            return PhaseOutcome::degraded(parts, vec![format!("enrichment failed: {}", e)]);
        }
    };

    let mut matched = 0;
    for entry in reply.parts {
        let Some(idx) = locate_part(&ctx.ontology, &parts, entry.index, &entry.part, &entry.area)
        else {
            debug!(part = %entry.part, "Enrichment entry matches no part");
            continue;
        };
        let part = &mut parts[idx];
        part.repair_method = non_empty(entry.repair_method).or(part.repair_method.take());
        part.technical_description =
            non_empty(entry.technical_description).or(part.technical_description.take());
        matched += 1;
    }

    let missing = parts.iter().filter(|p| p.repair_method.is_none()).count();
    debug!(matched, missing, "Enrichment applied");

    let reasons = if missing > 0 {
        vec![format!("{} part(s) left without a repair method", missing)]
    } else {
        Vec::new()
    };
    PhaseOutcome::degraded(parts, reasons)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::Severity;
    use crate::inference::{MockInferenceBackend, MockResponse};
    use crate::pipeline::context::test_support::mock_context;
    use serde_json::json;
    use std::sync::Arc;

    pub(crate) fn part(name: &str, area: DamageArea) -> CanonicalDamagePart {
        CanonicalDamagePart {
            canonical_name: name.to_string(),
            area,
            severity: Severity::Moderate,
            confidence: 0.8,
            evidence_count: 1,
            evidence_image_refs: Vec::new(),
            description: String::new(),
            classified: true,
            safety_critical: false,
            repair_method: None,
            technical_description: None,
            labor_hours: None,
            paint_hours: None,
            cost: None,
        }
    }

    #[test]
    fn test_locate_by_index_then_name() {
        let ontology = PartOntology::builtin();
        let parts = vec![
            part("hood", DamageArea::Front),
            part("left fender", DamageArea::Front),
            part("left fender", DamageArea::Side),
        ];

        assert_eq!(locate_part(&ontology, &parts, Some(2), "", ""), Some(2));
        assert_eq!(locate_part(&ontology, &parts, Some(9), "Bonnet", ""), Some(0));
        assert_eq!(locate_part(&ontology, &parts, None, "left fender", "side"), Some(2));
        // Ambiguous without an area.
        assert_eq!(locate_part(&ontology, &parts, None, "left fender", ""), None);
        assert_eq!(locate_part(&ontology, &parts, None, "", "front"), None);
    }

    #[tokio::test]
    async fn test_enrich_attaches_methods() {
        let backend = Arc::new(MockInferenceBackend::new());
        backend.on(
            "TASK: enrich",
            MockResponse::json(json!({"parts": [
                {"index": 0, "repair_method": "replace", "technical_description": "new panel"},
                {"part": "bonnet", "repair_method": "refinish"},
                {"part": "left fender", "area": "front", "repair_method": "repair"}
            ]})),
        );
        let ctx = mock_context(backend);
        let parts = vec![part("hood", DamageArea::Front), part("left fender", DamageArea::Front)];

        let outcome = execute(&ctx, &VehicleIdentity::unknown(), parts).await;
        assert!(!outcome.is_degraded());
        let parts = outcome.into_value();
        assert_eq!(parts[0].repair_method.as_deref(), Some("refinish"));
        assert_eq!(parts[0].technical_description.as_deref(), Some("new panel"));
        assert_eq!(parts[1].repair_method.as_deref(), Some("repair"));
    }

    #[tokio::test]
    async fn test_enrich_failure_keeps_parts() {
        let backend = Arc::new(MockInferenceBackend::new());
        let ctx = mock_context(backend);
        let parts = vec![part("hood", DamageArea::Front)];

        let outcome = execute(&ctx, &VehicleIdentity::unknown(), parts.clone()).await;
        assert!(outcome.is_degraded());
        assert_eq!(outcome.into_value(), parts);
    }

    #[tokio::test]
    async fn test_empty_parts_skip_call() {
        let backend = Arc::new(MockInferenceBackend::new());
        let ctx = mock_context(backend.clone());

        let outcome = execute(&ctx, &VehicleIdentity::unknown(), Vec::new()).await;
        assert!(!outcome.is_degraded());
        assert_eq!(backend.call_count(), 0);
    }
}
