use super::llm_helper::query_structured;
use crate::domain::{ImageCategory, ImageRef, VehicleIdentity};
use crate::inference::{ImageInput, InferenceRequest};
use crate::pipeline::structured::lenient;
use crate::pipeline::{PhaseOutcome, PipelineContext};
use futures_util::future::join_all;
use serde::Deserialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

const TEMPERATURE: f32 = 0.2;

/// Deterministic image selection for one identification attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubsetStrategy {
    /// Front-facing views first.
    FrontWeighted,
    /// One image per distinct angle before repeating any.
    MixedAngle,
    /// A single image: a document if present, else the best front view.
    SingleBest,
}

impl SubsetStrategy {
    const ORDER: [SubsetStrategy; 3] = [
        SubsetStrategy::FrontWeighted,
        SubsetStrategy::MixedAngle,
        SubsetStrategy::SingleBest,
    ];

    pub fn for_attempt(index: usize) -> Self {
        Self::ORDER[index % Self::ORDER.len()]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubsetStrategy::FrontWeighted => "front_weighted",
            SubsetStrategy::MixedAngle => "mixed_angle",
            SubsetStrategy::SingleBest => "single_best",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct IdentityGuess {
    #[serde(default, deserialize_with = "lenient::string")]
    pub make: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient::year")]
    pub year: Option<u16>,
    #[serde(default = "lenient::default_confidence", deserialize_with = "lenient::confidence")]
    pub confidence: f64,
}

impl IdentityGuess {
    pub fn new(make: &str, model: &str, year: Option<u16>, confidence: f64) -> Self {
        Self {
            make: make.to_string(),
            model: model.to_string(),
            year,
            confidence,
        }
    }

    fn is_usable(&self) -> bool {
        let make = self.make.trim();
        !make.is_empty() && !make.eq_ignore_ascii_case("unknown")
    }

    fn vote_key(&self) -> (String, String, Option<u16>) {
        (
            self.make.trim().to_lowercase(),
            self.model.trim().to_lowercase(),
            self.year,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    pub identity: VehicleIdentity,
    pub attempts: usize,
    pub failures: usize,
}

impl Identification {
    /// Votes over whichever attempts reported. Attempts that never
    /// reported count as failures.
    pub fn from_reports(reports: impl IntoIterator<Item = AttemptReport>, attempts: usize) -> Self {
        let mut results: Vec<Option<IdentityGuess>> = vec![None; attempts];
        for report in reports {
            if let Some(slot) = results.get_mut(report.attempt) {
                *slot = report.guess;
            }
        }
        Self::from_results(&results)
    }

    fn from_results(results: &[Option<IdentityGuess>]) -> Self {
        Self {
            identity: vote(results),
            attempts: results.len(),
            failures: results.iter().filter(|r| r.is_none()).count(),
        }
    }
}

/// Result of one finished identification attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    pub attempt: usize,
    pub guess: Option<IdentityGuess>,
}

fn build_prompt(strategy: SubsetStrategy, image_count: usize) -> String {
    let focus = match strategy {
        SubsetStrategy::FrontWeighted => {
            "Focus on the front fascia: grille shape, badge, headlight signature."
        }
        SubsetStrategy::MixedAngle => {
            "Use the overall body shape and proportions across the different viewpoints."
        }
        SubsetStrategy::SingleBest => {
            "If the image is a registration document or VIN plate, read the vehicle details from it."
        }
    };

    format!(
        r#"TASK: identify_vehicle
STRATEGY: {}

Identify the vehicle shown in the {} attached photograph(s).
{}

Respond with JSON:
{{
  "make": "Toyota",
  "model": "Corolla",
  "year": 2020,
  "confidence": 0.0-1.0
}}

IMPORTANT:
- Use "Unknown" for make when the vehicle cannot be identified
- Use null for year when it cannot be determined
"#,
        strategy.as_str(),
        image_count,
        focus
    )
}

/// Picks the images sent by one attempt. Interior shots never help with
/// identification and are skipped unless nothing else exists. `offset`
/// rotates the pool so repeated strategies see different images.
pub fn select_subset(
    images: &[ImageRef],
    strategy: SubsetStrategy,
    offset: usize,
    max_images: usize,
) -> Vec<ImageRef> {
    let mut pool: Vec<&ImageRef> = images
        .iter()
        .filter(|img| img.category != ImageCategory::Interior)
        .collect();
    if pool.is_empty() {
        pool = images.iter().collect();
    }
    if pool.is_empty() {
        return Vec::new();
    }
    let rotate = offset % pool.len();
    pool.rotate_left(rotate);

    let max_images = max_images.max(1);
    let selected: Vec<&ImageRef> = match strategy {
        SubsetStrategy::FrontWeighted => {
            let (front, rest): (Vec<&ImageRef>, Vec<&ImageRef>) = pool
                .iter()
                .copied()
                .partition(|img| img.angle.is_some_and(|a| a.is_front_facing()));
            front.into_iter().chain(rest).take(max_images).collect()
        }
        SubsetStrategy::MixedAngle => {
            let mut seen = Vec::new();
            let mut first_pass = Vec::new();
            let mut second_pass = Vec::new();
            for img in &pool {
                match img.angle {
                    Some(angle) if !seen.contains(&angle) => {
                        seen.push(angle);
                        first_pass.push(*img);
                    }
                    None if img.category == ImageCategory::Exterior => first_pass.push(*img),
                    _ => second_pass.push(*img),
                }
            }
            first_pass.into_iter().chain(second_pass).take(max_images).collect()
        }
        SubsetStrategy::SingleBest => pool
            .iter()
            .find(|img| img.category == ImageCategory::Document)
            .or_else(|| pool.iter().find(|img| img.angle.is_some_and(|a| a.is_front_facing())))
            .or_else(|| pool.first())
            .map(|img| vec![*img])
            .unwrap_or_default(),
    };

    selected.into_iter().cloned().collect()
}

/// Majority vote over attempt results, indexed by attempt order.
///
/// Groups by case-insensitive `(make, model, year)`. The largest group
/// wins; ties go to the higher mean confidence, then the lowest attempt
/// index. A winner with fewer than two members keeps its guess but with
/// zero confidence and agreement.
pub fn vote(attempts: &[Option<IdentityGuess>]) -> VehicleIdentity {
    struct Group<'a> {
        first: usize,
        members: Vec<&'a IdentityGuess>,
    }

    let mut groups: Vec<((String, String, Option<u16>), Group<'_>)> = Vec::new();

    for (idx, guess) in attempts.iter().enumerate() {
        let Some(guess) = guess.as_ref().filter(|g| g.is_usable()) else {
            continue;
        };
        let key = guess.vote_key();
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, group)) => group.members.push(guess),
            None => groups.push((
                key,
                Group {
                    first: idx,
                    members: vec![guess],
                },
            )),
        }
    }

    let mean = |g: &Group<'_>| {
        g.members.iter().map(|m| m.confidence).sum::<f64>() / g.members.len() as f64
    };

    let winner = groups.iter().map(|(_, g)| g).max_by(|a, b| {
        a.members
            .len()
            .cmp(&b.members.len())
            .then(mean(a).total_cmp(&mean(b)))
            .then(b.first.cmp(&a.first))
    });

    let Some(winner) = winner else {
        return VehicleIdentity::unknown();
    };

    let representative = winner.members[0];
    let agreed = winner.members.len() >= 2;
    VehicleIdentity {
        make: representative.make.trim().to_string(),
        model: representative.model.trim().to_string(),
        year: representative.year,
        confidence: if agreed { mean(winner) } else { 0.0 },
        agreement_count: if agreed { winner.members.len() as u32 } else { 0 },
    }
}

/// Runs every identification attempt and votes.
///
/// Each finished attempt is also sent to `sink` so a job deadline can
/// still vote on the attempts that completed.
pub async fn execute(
    ctx: &PipelineContext,
    images: &[ImageRef],
    sink: Option<&UnboundedSender<AttemptReport>>,
) -> PhaseOutcome<Identification> {
    let attempts = ctx.config.identification_attempts.max(3);
    let max_images = ctx.config.max_images_per_call;

    let calls = (0..attempts).map(|idx| {
        let strategy = SubsetStrategy::for_attempt(idx);
        let subset = select_subset(images, strategy, idx / SubsetStrategy::ORDER.len(), max_images);
        async move {
            let guess = attempt(ctx, idx, strategy, subset).await;
            if let Some(sink) = sink {
                let _ = sink.send(AttemptReport {
                    attempt: idx,
                    guess: guess.clone(),
                });
            }
            guess
        }
    });

    let results = join_all(calls).await;
    let identification = Identification::from_results(&results);
    let identity = &identification.identity;
    let failures = identification.failures;

    info!(
        vehicle = %identity,
        agreement = identity.agreement_count,
        failures,
        "Vehicle identification complete"
    );

    let mut reasons = Vec::new();
    if failures > 0 {
        reasons.push(format!("{} of {} identification attempts failed", failures, attempts));
    }
    if identity.agreement_count == 0 {
        reasons.push("no identification consensus".to_string());
    }

    PhaseOutcome::degraded(identification, reasons)
}

async fn attempt(
    ctx: &PipelineContext,
    idx: usize,
    strategy: SubsetStrategy,
    subset: Vec<ImageRef>,
) -> Option<IdentityGuess> {
    if subset.is_empty() {
        return None;
    }
    let request = InferenceRequest::new(build_prompt(strategy, subset.len()))
        .with_images(subset.into_iter().map(ImageInput::full))
        .with_temperature(TEMPERATURE)
        .with_max_tokens(300)
        .with_label(format!("identify:{}:{}", idx, strategy.as_str()));

    match query_structured::<IdentityGuess>(ctx, request).await {
        Ok(guess) if guess.is_usable() => Some(guess),
        Ok(_) => {
            debug!(attempt = idx, strategy = strategy.as_str(), "Vehicle not recognised");
            None
        }
        Err(e) => {
            warn!(attempt = idx, strategy = strategy.as_str(), error = %e, "Identification attempt failed");
            None
        }
    }
}
