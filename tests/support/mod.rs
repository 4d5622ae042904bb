//! Shared fixtures for integration tests
#![allow(dead_code)]

use dentscan::domain::{Angle, DamageArea, DamageCandidate, ImageRef, Severity};
use dentscan::inference::{
    ConcurrencyLimiter, GatewayConfig, InferenceGateway, MockInferenceBackend, MockResponse,
    RetryPolicy,
};
use dentscan::ontology::PartOntology;
use dentscan::pipeline::{PipelineConfig, PipelineContext};
use serde_json::json;
use std::sync::Arc;

pub fn image(id: &str) -> ImageRef {
    ImageRef::new(id, format!("mem://{}", id), format!("sha-{}", id))
}

pub fn angled(id: &str, angle: Angle) -> ImageRef {
    image(id).with_angle(angle)
}

/// Gateway without retries over the given mock, capped at `cap`.
pub fn context_with(
    backend: Arc<MockInferenceBackend>,
    cap: usize,
    config: PipelineConfig,
) -> PipelineContext {
    let gateway_config = GatewayConfig {
        retry: RetryPolicy::none(),
        ..GatewayConfig::default()
    };
    let gateway = InferenceGateway::new(backend, ConcurrencyLimiter::new(cap), gateway_config);
    PipelineContext::new(
        Arc::new(gateway),
        Arc::new(PartOntology::builtin()),
        config,
    )
}

pub fn context(backend: Arc<MockInferenceBackend>) -> PipelineContext {
    context_with(backend, 4, PipelineConfig::default())
}

/// Scripts every text-only pass with a minimal valid reply.
pub fn script_text_passes(backend: &MockInferenceBackend) {
    backend.on(
        "TASK: identify_vehicle",
        MockResponse::json(json!({"make": "Toyota", "model": "Corolla", "year": 2019, "confidence": 0.8})),
    );
    backend.on("TASK: enrich", MockResponse::json(json!({"parts": []})));
    backend.on("TASK: plan", MockResponse::json(json!({"parts": []})));
    backend.on(
        "TASK: summary",
        MockResponse::json(json!({"executive_summary": "Body damage."})),
    );
}

pub fn damages(parts: &[(&str, &str, f64)]) -> MockResponse {
    let damages: Vec<_> = parts
        .iter()
        .map(|(part, severity, confidence)| {
            json!({"part": part, "severity": severity, "confidence": confidence, "description": format!("{} damage", part)})
        })
        .collect();
    MockResponse::json(json!({ "damages": damages }))
}

pub fn candidate(
    area: DamageArea,
    name: &str,
    confidence: f64,
    severity: Option<Severity>,
    evidence: &[&str],
) -> DamageCandidate {
    evidence.iter().fold(
        DamageCandidate::new(area, name, confidence)
            .with_severity(severity)
            .with_description(format!("{} seen at {}", name, confidence)),
        |c, id| c.with_evidence(image(id)),
    )
}
