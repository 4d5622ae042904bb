use super::llm_helper::query_structured;
use crate::domain::{DamageArea, ImageRef, RegionOfInterest};
use crate::inference::{ImageInput, InferenceRequest};
use crate::pipeline::structured::lenient;
use crate::pipeline::{PhaseOutcome, PipelineContext, TaskPool};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

const TEMPERATURE: f32 = 0.1;

/// One image supporting an area, with the region the detector pointed at.
#[derive(Debug, Clone, PartialEq)]
pub struct AreaEvidence {
    pub image: ImageRef,
    pub region: Option<RegionOfInterest>,
    pub confidence: f64,
}

pub type AreaMap = BTreeMap<DamageArea, Vec<AreaEvidence>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AreaDetection {
    pub areas: AreaMap,
    pub calls_attempted: usize,
    pub calls_failed: usize,
    pub used_fallback: bool,
}

impl AreaDetection {
    pub fn all_calls_failed(&self) -> bool {
        self.calls_attempted > 0 && self.calls_failed == self.calls_attempted
    }
}

#[derive(Debug, Deserialize)]
struct ImageAreasReply {
    #[serde(default = "default_visible")]
    damage_visible: bool,
    #[serde(default, deserialize_with = "lenient::list")]
    areas: Vec<AreaHit>,
}

fn default_visible() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct AreaHit {
    #[serde(alias = "name", deserialize_with = "lenient::string")]
    area: String,
    #[serde(default = "lenient::default_confidence", deserialize_with = "lenient::confidence")]
    confidence: f64,
    #[serde(default, deserialize_with = "region")]
    region: Option<RegionOfInterest>,
}

#[derive(Debug, Deserialize)]
struct SetAreasReply {
    #[serde(default, deserialize_with = "lenient::list")]
    areas: Vec<SetAreaHit>,
}

#[derive(Debug, Deserialize)]
struct SetAreaHit {
    #[serde(alias = "name", deserialize_with = "lenient::string")]
    area: String,
    #[serde(default, alias = "images")]
    image_indices: Vec<Value>,
    #[serde(default = "lenient::default_confidence", deserialize_with = "lenient::confidence")]
    confidence: f64,
}

/// Malformed or degenerate regions are dropped rather than failing the reply.
fn region<'de, D: Deserializer<'de>>(d: D) -> Result<Option<RegionOfInterest>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(serde_json::from_value::<RegionOfInterest>(value)
        .ok()
        .and_then(|r| r.clamped()))
}

fn build_image_prompt() -> String {
    r#"TASK: area_detector

Look at the attached photograph of a vehicle and report which coarse areas show damage.

Areas: "front", "side", "rear", "roof".

Respond with JSON:
{
  "damage_visible": true,
  "areas": [
    {"area": "front", "confidence": 0.0-1.0, "region": {"x": 0.1, "y": 0.4, "width": 0.3, "height": 0.2}}
  ]
}

IMPORTANT:
- "region" is the damaged zone in normalised image coordinates (0-1), or null
- Set "damage_visible" to false and leave "areas" empty if no damage is visible
"#
    .to_string()
}

fn build_set_prompt(image_count: usize) -> String {
    format!(
        r#"TASK: area_detector_fallback

You are given {} photographs of the same vehicle, numbered from 0 in the order attached.
Report which coarse areas show damage and which photographs show each area.

Areas: "front", "side", "rear", "roof".

Respond with JSON:
{{
  "areas": [
    {{"area": "rear", "image_indices": [0, 2], "confidence": 0.0-1.0}}
  ]
}}
"#,
        image_count
    )
}

fn add_evidence(areas: &mut AreaMap, area: DamageArea, evidence: AreaEvidence) {
    let entries = areas.entry(area).or_default();
    match entries
        .iter_mut()
        .find(|e| e.image.id == evidence.image.id && e.region == evidence.region)
    {
        Some(existing) => existing.confidence = existing.confidence.max(evidence.confidence),
        None => entries.push(evidence),
    }
}

async fn classify_image(
    ctx: &PipelineContext,
    image: &ImageRef,
) -> Result<Vec<(DamageArea, Option<RegionOfInterest>, f64)>, String> {
    let request = InferenceRequest::new(build_image_prompt())
        .with_image(ImageInput::full(image.clone()))
        .with_temperature(TEMPERATURE)
        .with_max_tokens(400)
        .with_label(format!("areas:{}", image.id));

    let reply: ImageAreasReply = query_structured(ctx, request)
        .await
        .map_err(|e| e.to_string())?;

    if !reply.damage_visible {
        return Ok(Vec::new());
    }

    Ok(reply
        .areas
        .into_iter()
        .filter_map(|hit| {
            let area = DamageArea::parse(&hit.area)?;
            Some((area, hit.region, hit.confidence))
        })
        .collect())
}

async fn classify_set(
    ctx: &PipelineContext,
    images: &[ImageRef],
) -> Result<Vec<(DamageArea, Vec<ImageRef>, f64)>, String> {
    let request = InferenceRequest::new(build_set_prompt(images.len()))
        .with_images(images.iter().cloned().map(ImageInput::full))
        .with_temperature(TEMPERATURE)
        .with_max_tokens(600)
        .with_label("areas:fallback");

    let reply: SetAreasReply = query_structured(ctx, request)
        .await
        .map_err(|e| e.to_string())?;

    Ok(reply
        .areas
        .into_iter()
        .filter_map(|hit| {
            let area = DamageArea::parse(&hit.area)?;
            let mut supporting: Vec<ImageRef> = hit
                .image_indices
                .iter()
                .filter_map(|v| v.as_u64())
                .filter_map(|idx| images.get(idx as usize).cloned())
                .collect();
            if supporting.is_empty() {
                supporting = images.to_vec();
            }
            Some((area, supporting, hit.confidence))
        })
        .collect())
}

/// Buckets exterior images into damage areas.
///
/// Images with a reviewed angle are bucketed directly. The rest are
/// classified one call per distinct content hash; if that is disabled or
/// finds nothing, the whole set is classified in chunks instead.
pub async fn execute(ctx: &PipelineContext, images: &[ImageRef]) -> PhaseOutcome<AreaDetection> {
    let mut detection = AreaDetection::default();

    let exterior: Vec<&ImageRef> = images.iter().filter(|img| img.is_exterior()).collect();
    let mut unangled: Vec<ImageRef> = Vec::new();
    let mut duplicates: HashMap<&str, Vec<&ImageRef>> = HashMap::new();

    for image in &exterior {
        match image.angle {
            Some(angle) => add_evidence(
                &mut detection.areas,
                angle.area(),
                AreaEvidence {
                    image: (*image).clone(),
                    region: None,
                    confidence: 1.0,
                },
            ),
            None => {
                let copies = duplicates.entry(image.content_hash.as_str()).or_default();
                if copies.is_empty() {
                    unangled.push((*image).clone());
                }
                copies.push(*image);
            }
        }
    }

    debug!(
        exterior = exterior.len(),
        angled = exterior.len() - duplicates.values().map(Vec::len).sum::<usize>(),
        to_classify = unangled.len(),
        "Bucketing images"
    );

    let mut per_image_found = false;
    if ctx.config.area_bucketing && !unangled.is_empty() {
        let pool = TaskPool::new("area_detector", ctx.config.area_detector_width);
        let results = pool
            .run(unangled.iter(), |image| classify_image(ctx, image))
            .await;

        for (image, result) in unangled.iter().zip(results) {
            detection.calls_attempted += 1;
            match result {
                Ok(hits) => {
                    for (area, region, confidence) in hits {
                        per_image_found = true;
                        for copy in duplicates.get(image.content_hash.as_str()).into_iter().flatten() {
                            add_evidence(
                                &mut detection.areas,
                                area,
                                AreaEvidence {
                                    image: (*copy).clone(),
                                    region,
                                    confidence,
                                },
                            );
                        }
                    }
                }
                Err(error) => {
                    detection.calls_failed += 1;
                    warn!(image = %image.id, error = %error, "Area classification failed");
                }
            }
        }
    }

    if !unangled.is_empty() && !per_image_found {
        detection.used_fallback = true;
        let chunk_size = ctx.config.max_images_per_call.max(1);
        for chunk in unangled.chunks(chunk_size) {
            detection.calls_attempted += 1;
            match classify_set(ctx, chunk).await {
                Ok(hits) => {
                    for (area, supporting, confidence) in hits {
                        for image in supporting {
                            add_evidence(
                                &mut detection.areas,
                                area,
                                AreaEvidence {
                                    image,
                                    region: None,
                                    confidence,
                                },
                            );
                        }
                    }
                }
                Err(error) => {
                    detection.calls_failed += 1;
                    warn!(images = chunk.len(), error = %error, "Whole-set area classification failed");
                }
            }
        }
    }

    info!(
        areas = ?detection.areas.keys().map(|a| a.as_str()).collect::<Vec<_>>(),
        calls = detection.calls_attempted,
        failed = detection.calls_failed,
        fallback = detection.used_fallback,
        "Area detection complete"
    );

    let mut reasons = Vec::new();
    if detection.calls_failed > 0 {
        reasons.push(format!(
            "{} of {} area detection calls failed",
            detection.calls_failed, detection.calls_attempted
        ));
    }
    if detection.areas.is_empty() && !exterior.is_empty() {
        reasons.push("no damage areas detected".to_string());
    }

    PhaseOutcome::degraded(detection, reasons)
}
