use super::areas::{AreaEvidence, AreaMap};
use super::llm_helper::query_structured;
use crate::domain::{DamageArea, DamageCandidate, ImageRef, Severity};
use crate::inference::{ImageInput, InferenceRequest};
use crate::pipeline::structured::lenient;
use crate::pipeline::{PhaseOutcome, PipelineContext, TaskPool};
use crate::progress::ProgressEvent;
use serde::Deserialize;
use std::collections::BTreeSet;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PHASE: &str = "specialist";

/// Two complementary instructions per area.
pub const VARIANTS: [&str; 2] = ["surface", "structural"];

fn focus(area: DamageArea, variant: &str) -> &'static str {
    match (area, variant) {
        (DamageArea::Front, "surface") => {
            "Inspect bumper cover, hood, grille, headlights and fenders for dents, scratches, cracks and paint damage."
        }
        (DamageArea::Front, _) => {
            "Look past the cosmetic layer: misaligned panel gaps, pushed-in bumper reinforcement, radiator support and headlight mounts."
        }
        (DamageArea::Side, "surface") => {
            "Inspect doors, fenders, quarter panels, mirrors and rocker panels for dents, creases, scrapes and paint transfer."
        }
        (DamageArea::Side, _) => {
            "Look for deformed door frames, pillars, sills, wheels and tires, and doors that do not sit flush."
        }
        (DamageArea::Rear, "surface") => {
            "Inspect rear bumper, trunk lid or tailgate, taillights and quarter panels for dents, scratches and cracks."
        }
        (DamageArea::Rear, _) => {
            "Look for buckled trunk floor, misaligned tailgate gaps, broken light housings and damaged bumper reinforcement."
        }
        (DamageArea::Roof, "surface") => {
            "Inspect roof panel, sunroof and roof rails for hail dents, scratches and cracked glass."
        }
        (DamageArea::Roof, _) => {
            "Look for a deformed roof line, bent pillars and a windshield or rear window that no longer seats correctly."
        }
    }
}

/// Outcome of one (variant, temperature) call for one area.
#[derive(Debug, Clone)]
pub struct VariantReport {
    pub area: DamageArea,
    pub variant: &'static str,
    pub temperature: f32,
    pub result: Result<Vec<DamageCandidate>, String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecialistRun {
    pub candidates: Vec<DamageCandidate>,
    pub variants_succeeded: usize,
    pub variants_failed: usize,
    /// Areas where every variant failed.
    pub failed_areas: Vec<DamageArea>,
}

impl SpecialistRun {
    /// Folds reports in arrival order. Also used by the orchestrator to
    /// salvage reports that arrived before a job deadline.
    pub fn from_reports(reports: impl IntoIterator<Item = VariantReport>) -> Self {
        let mut run = SpecialistRun::default();
        let mut attempted = BTreeSet::new();
        let mut succeeded = BTreeSet::new();

        for report in reports {
            attempted.insert(report.area);
            match report.result {
                Ok(candidates) => {
                    run.variants_succeeded += 1;
                    succeeded.insert(report.area);
                    run.candidates.extend(candidates);
                }
                Err(_) => run.variants_failed += 1,
            }
        }

        run.failed_areas = attempted.difference(&succeeded).copied().collect();
        run
    }
}

#[derive(Debug, Deserialize)]
struct SpecialistReply {
    #[serde(default, alias = "parts", alias = "findings", deserialize_with = "lenient::list")]
    damages: Vec<DamageFinding>,
}

#[derive(Debug, Deserialize)]
struct DamageFinding {
    #[serde(default, alias = "name", alias = "part_name", deserialize_with = "lenient::string")]
    part: String,
    #[serde(default, deserialize_with = "lenient::string")]
    description: String,
    #[serde(default, deserialize_with = "lenient::severity")]
    severity: Option<Severity>,
    #[serde(default = "lenient::default_confidence", deserialize_with = "lenient::confidence")]
    confidence: f64,
    #[serde(default, alias = "image", deserialize_with = "lenient::index")]
    image_index: Option<usize>,
}

/// Region crops first (highest detector confidence first) each followed
/// by its full frame for context, deduplicated and capped.
pub fn curate_inputs(evidence: &[AreaEvidence], max_images: usize) -> Vec<ImageInput> {
    let mut ordered: Vec<&AreaEvidence> = evidence.iter().collect();
    ordered.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.image.content_hash.cmp(&b.image.content_hash))
    });

    fn push_unique(inputs: &mut Vec<ImageInput>, input: ImageInput) {
        let duplicate = inputs
            .iter()
            .any(|i| i.image.content_hash == input.image.content_hash && i.region == input.region);
        if !duplicate {
            inputs.push(input);
        }
    }

    let mut inputs: Vec<ImageInput> = Vec::new();
    for item in ordered {
        if let Some(region) = item.region {
            push_unique(&mut inputs, ImageInput::cropped(item.image.clone(), region));
        }
        push_unique(&mut inputs, ImageInput::full(item.image.clone()));
    }

    inputs.truncate(max_images.max(1));
    inputs
}

fn build_prompt(area: DamageArea, variant: &str, image_count: usize, vocabulary: &[&str]) -> String {
    format!(
        r#"TASK: area_specialist
AREA: {area}
VARIANT: {variant}

You are a vehicle damage assessor specialising in the {area} of the vehicle.
{focus}

The {count} attached images are numbered from 0. Some are close crops of the suspected damage, the others are wider frames for context.

Use part names from this vocabulary where possible:
{vocabulary}

Respond with JSON:
{{
  "damages": [
    {{
      "part": "front bumper",
      "description": "what is damaged and how",
      "severity": "minor" | "moderate" | "severe",
      "confidence": 0.0-1.0,
      "image_index": 0
    }}
  ]
}}

IMPORTANT:
- Report each damaged part once
- Include the side ("left"/"right") for parts that exist on both sides
- Return an empty "damages" list if nothing in the {area} is damaged
"#,
        area = area,
        variant = variant,
        focus = focus(area, variant),
        count = image_count,
        vocabulary = vocabulary.join(", "),
    )
}

async fn run_variant(
    ctx: &PipelineContext,
    area: DamageArea,
    variant: &'static str,
    temperature: f32,
    inputs: &[ImageInput],
) -> Result<Vec<DamageCandidate>, String> {
    let vocabulary = ctx.ontology.label_names();
    let request = InferenceRequest::new(build_prompt(area, variant, inputs.len(), &vocabulary))
        .with_images(inputs.iter().cloned())
        .with_temperature(temperature)
        .with_max_tokens(1200)
        .with_label(format!("{}:{}:{}@{}", PHASE, area, variant, temperature));

    let reply: SpecialistReply = query_structured(ctx, request)
        .await
        .map_err(|e| e.to_string())?;

    let all_images: Vec<ImageRef> = {
        let mut seen = BTreeSet::new();
        inputs
            .iter()
            .filter(|i| seen.insert(i.image.content_hash.clone()))
            .map(|i| i.image.clone())
            .collect()
    };

    Ok(reply
        .damages
        .into_iter()
        .filter(|d| !d.part.trim().is_empty())
        .map(|d| {
            let evidence = match d.image_index.and_then(|idx| inputs.get(idx)) {
                Some(input) => vec![input.image.clone()],
                None => all_images.clone(),
            };
            let mut candidate = DamageCandidate::new(area, d.part.trim(), d.confidence)
                .with_description(d.description.trim())
                .with_severity(d.severity)
                .with_variant(PHASE, variant, temperature);
            candidate.evidence_images = evidence;
            candidate
        })
        .collect())
}

/// Runs the prompt-by-temperature ensemble for every detected area.
///
/// Each finished variant is also sent to `sink` so that work survives if
/// the job deadline cancels this phase midway.
pub async fn execute(
    ctx: &PipelineContext,
    job_id: Uuid,
    areas: &AreaMap,
    sink: Option<&UnboundedSender<VariantReport>>,
) -> PhaseOutcome<SpecialistRun> {
    let max_images = ctx.config.max_images_per_call;
    let curated: Vec<(DamageArea, Vec<ImageInput>)> = areas
        .iter()
        .filter(|(_, evidence)| !evidence.is_empty())
        .map(|(area, evidence)| (*area, curate_inputs(evidence, max_images)))
        .collect();

    let tasks: Vec<(DamageArea, &[ImageInput], &'static str, f32)> = curated
        .iter()
        .flat_map(|(area, inputs)| {
            VARIANTS.iter().flat_map(move |variant| {
                ctx.config
                    .specialist_temperatures
                    .iter()
                    .map(move |temperature| (*area, inputs.as_slice(), *variant, *temperature))
            })
        })
        .collect();

    debug!(areas = curated.len(), variants = tasks.len(), "Running specialist ensemble");

    let pool = TaskPool::new("specialists", ctx.config.specialist_width);
    let reports = pool
        .run(tasks, |(area, inputs, variant, temperature)| async move {
            let result = run_variant(ctx, area, variant, temperature, inputs).await;
            if let Err(error) = &result {
                warn!(area = %area, variant, temperature, error = %error, "Specialist variant failed");
                ctx.progress.on_progress(&ProgressEvent::VariantFailed {
                    job_id,
                    area,
                    variant: variant.to_string(),
                    temperature,
                    error: error.clone(),
                });
            }
            let report = VariantReport {
                area,
                variant,
                temperature,
                result,
            };
            if let Some(sink) = sink {
                let _ = sink.send(report.clone());
            }
            report
        })
        .await;

    let run = SpecialistRun::from_reports(reports);
    info!(
        candidates = run.candidates.len(),
        succeeded = run.variants_succeeded,
        failed = run.variants_failed,
        "Specialist ensemble complete"
    );

    let mut reasons = Vec::new();
    if run.variants_failed > 0 {
        reasons.push(format!(
            "{} of {} specialist variants failed",
            run.variants_failed,
            run.variants_failed + run.variants_succeeded
        ));
    }
    for area in &run.failed_areas {
        reasons.push(format!("no specialist variant succeeded for the {} area", area));
    }

    PhaseOutcome::degraded(run, reasons)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RegionOfInterest;
    use crate::inference::{MockInferenceBackend, MockResponse};
    use crate::pipeline::context::test_support::mock_context;
    use serde_json::json;
    use std::sync::Arc;

    fn image(id: &str) -> ImageRef {
        ImageRef::new(id, format!("mem://{}", id), format!("hash-{}", id))
    }

    fn evidence(id: &str, region: Option<RegionOfInterest>, confidence: f64) -> AreaEvidence {
        AreaEvidence {
            image: image(id),
            region,
            confidence,
        }
    }

    #[test]
    fn test_curate_puts_crop_before_frame() {
        let roi = RegionOfInterest::new(0.1, 0.1, 0.5, 0.5);
        let inputs = curate_inputs(
            &[evidence("wide", None, 0.5), evidence("close", Some(roi), 0.9)],
            6,
        );
        assert_eq!(inputs.len(), 3);
        assert_eq!(inputs[0].image.id, "close");
        assert!(inputs[0].region.is_some());
        assert_eq!(inputs[1].image.id, "close");
        assert!(inputs[1].region.is_none());
        assert_eq!(inputs[2].image.id, "wide");
    }

    #[test]
    fn test_curate_dedupes_and_caps() {
        let inputs = curate_inputs(
            &[
                evidence("a", None, 0.5),
                evidence("a", None, 0.4),
                evidence("b", None, 0.3),
                evidence("c", None, 0.2),
            ],
            2,
        );
        assert_eq!(
            inputs.iter().map(|i| i.image.id.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_from_reports_tracks_failed_areas() {
        let run = SpecialistRun::from_reports(vec![
            VariantReport {
                area: DamageArea::Front,
                variant: "surface",
                temperature: 0.2,
                result: Ok(vec![DamageCandidate::new(DamageArea::Front, "hood", 0.7)]),
            },
            VariantReport {
                area: DamageArea::Rear,
                variant: "surface",
                temperature: 0.2,
                result: Err("timeout".to_string()),
            },
        ]);
        assert_eq!(run.candidates.len(), 1);
        assert_eq!(run.variants_succeeded, 1);
        assert_eq!(run.variants_failed, 1);
        assert_eq!(run.failed_areas, vec![DamageArea::Rear]);
    }

    #[tokio::test]
    async fn test_ensemble_fans_out_per_variant_and_temperature() {
        let backend = Arc::new(MockInferenceBackend::new());
        backend.on(
            "AREA: front",
            MockResponse::json(json!({"damages": [
                {"part": "Front Bumper", "description": "cracked cover", "severity": "high", "confidence": 0.8, "image_index": 0},
                {"part": "", "confidence": 0.9}
            ]})),
        );
        let ctx = mock_context(backend.clone());
        let mut areas = AreaMap::new();
        areas.insert(DamageArea::Front, vec![evidence("f", None, 0.9)]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let outcome = execute(&ctx, Uuid::new_v4(), &areas, Some(&tx)).await;
        let run = outcome.value();

        assert_eq!(backend.call_count(), 6);
        assert_eq!(run.variants_succeeded, 6);
        assert_eq!(run.candidates.len(), 6);
        let first = &run.candidates[0];
        assert_eq!(first.raw_part_name, "Front Bumper");
        assert_eq!(first.severity, Some(Severity::Severe));
        assert_eq!(first.source_phase, PHASE);
        assert_eq!(first.evidence_images.len(), 1);

        drop(tx);
        let mut streamed = 0;
        while rx.recv().await.is_some() {
            streamed += 1;
        }
        assert_eq!(streamed, 6);
    }

    #[tokio::test]
    async fn test_malformed_finding_keeps_valid_siblings() {
        let backend = Arc::new(MockInferenceBackend::new());
        backend.on(
            "AREA: front",
            MockResponse::json(json!({"damages": [
                {"part": "hood", "severity": "moderate", "confidence": 0.8},
                "scratched bumper",
                ["grille", 0.4]
            ]})),
        );
        let ctx = mock_context(backend.clone());
        let mut areas = AreaMap::new();
        areas.insert(DamageArea::Front, vec![evidence("f", None, 0.9)]);

        let outcome = execute(&ctx, Uuid::new_v4(), &areas, None).await;
        assert!(!outcome.is_degraded());
        let run = outcome.value();

        // One call per variant: the reply parses, so no repair retry.
        assert_eq!(backend.call_count(), 6);
        assert_eq!(run.variants_succeeded, 6);
        assert_eq!(run.variants_failed, 0);
        assert_eq!(run.candidates.len(), 6);
        assert!(run.candidates.iter().all(|c| c.raw_part_name == "hood"));
        assert!(run
            .candidates
            .iter()
            .all(|c| c.severity == Some(Severity::Moderate)));
    }

    #[tokio::test]
    async fn test_failed_area_does_not_fail_phase() {
        let backend = Arc::new(MockInferenceBackend::new());
        backend.on(
            "AREA: rear",
            MockResponse::json(json!({"damages": [{"part": "taillight", "confidence": 0.6}]})),
        );
        let ctx = mock_context(backend);
        let mut areas = AreaMap::new();
        areas.insert(DamageArea::Front, vec![evidence("f", None, 0.9)]);
        areas.insert(DamageArea::Rear, vec![evidence("r", None, 0.9), evidence("r2", None, 0.8)]);

        let outcome = execute(&ctx, Uuid::new_v4(), &areas, None).await;
        assert!(outcome.is_degraded());
        let run = outcome.value();
        assert_eq!(run.failed_areas, vec![DamageArea::Front]);
        assert_eq!(run.candidates.len(), 6);
        // No image index: every attached image counts as evidence.
        assert_eq!(run.candidates[0].evidence_images.len(), 2);
        assert!(run.candidates.iter().all(|c| c.area == DamageArea::Rear));
    }
}
