//! End-to-end pipeline runs over a scripted inference backend

mod support;

use dentscan::domain::{Angle, DamageArea, JobStage, JobStatus, Severity};
use dentscan::inference::{BackendError, MockInferenceBackend, MockResponse};
use dentscan::pipeline::{PipelineConfig, PipelineOrchestrator};
use dentscan::progress::{ChannelHandler, ProgressEvent};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{angled, context, context_with, damages, image, script_text_passes};

#[tokio::test]
async fn test_full_report() {
    let backend = Arc::new(MockInferenceBackend::new());
    script_text_passes(&backend);
    backend.on(
        "AREA: front",
        damages(&[("Bonnet", "major", 0.9), ("front bumper", "low", 0.6)]),
    );
    backend.on("AREA: rear", damages(&[("boot lid", "moderate", 0.7)]));
    backend.on(
        "TASK: plan",
        MockResponse::json(json!({
            "currency": "USD",
            "parts": [
                {"part": "hood", "labor_hours": 3, "paint_hours": 2, "cost": 800},
                {"part": "trunk lid", "labor_hours": 2, "cost": 500},
                {"part": "front bumper", "labor_hours": 1, "cost": 150}
            ]
        })),
    );

    let orchestrator = PipelineOrchestrator::new(context(backend.clone()));
    let job = orchestrator
        .run(vec![angled("f", Angle::Front), angled("r", Angle::Rear)])
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.vehicle_identity.make, "Toyota");
    assert_eq!(job.vehicle_identity.agreement_count, 3);

    let names: Vec<(&str, DamageArea, Severity)> = job
        .canonical_parts
        .iter()
        .map(|p| (p.canonical_name.as_str(), p.area, p.severity))
        .collect();
    assert_eq!(
        names,
        vec![
            ("hood", DamageArea::Front, Severity::Severe),
            ("trunk lid", DamageArea::Rear, Severity::Moderate),
            ("front bumper", DamageArea::Front, Severity::Minor),
        ]
    );
    assert!(job.canonical_parts.iter().all(|p| p.evidence_count == 6));
    assert_eq!(job.totals.labor_hours, 6.0);
    assert_eq!(job.totals.cost.as_ref().map(|c| c.amount), Some(1450.0));

    // 3 identification calls, no area detection for angled images,
    // 2 areas x 2 variants x 3 temperatures, then enrich, plan, summary.
    assert_eq!(backend.call_count(), 3 + 12 + 3);
    assert_eq!(backend.calls_matching("TASK: area_detector"), 0);
}

#[tokio::test]
async fn test_one_area_failing_still_completes() {
    let backend = Arc::new(MockInferenceBackend::new());
    script_text_passes(&backend);
    backend.on("AREA: front", damages(&[("hood", "minor", 0.8)]));
    backend.on(
        "AREA: rear",
        MockResponse::error(BackendError::Other {
            message: "model overloaded".to_string(),
        }),
    );

    let progress = Arc::new(ChannelHandler::new(256));
    let mut events = progress.subscribe();
    let ctx = context(backend).with_progress(progress);
    let job = PipelineOrchestrator::new(ctx)
        .run(vec![angled("f", Angle::Front), angled("r", Angle::Rear)])
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.canonical_parts.len(), 1);
    assert_eq!(job.canonical_parts[0].area, DamageArea::Front);
    assert_eq!(job.diagnostics.variants_failed, 6);
    assert_eq!(job.diagnostics.variants_succeeded, 6);
    assert!(job.warnings.iter().any(|w| w.contains("rear")));

    let mut failed_variants = 0;
    while let Ok(event) = events.try_recv() {
        if let ProgressEvent::VariantFailed { area, .. } = event {
            assert_eq!(area, DamageArea::Rear);
            failed_variants += 1;
        }
    }
    assert_eq!(failed_variants, 6);
}

#[tokio::test]
async fn test_chatty_specialist_replies_keep_valid_findings() {
    let backend = Arc::new(MockInferenceBackend::new());
    script_text_passes(&backend);
    backend.on(
        "AREA: front",
        MockResponse::json(json!({"damages": [
            {"part": "hood", "severity": "moderate", "confidence": 0.8},
            "scratched bumper"
        ]})),
    );

    let job = PipelineOrchestrator::new(context(backend))
        .run(vec![angled("f", Angle::Front)])
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.diagnostics.variants_failed, 0);
    assert_eq!(job.diagnostics.variants_succeeded, 6);
    assert_eq!(job.canonical_parts.len(), 1);
    assert_eq!(job.canonical_parts[0].canonical_name, "hood");
    assert_eq!(job.canonical_parts[0].severity, Severity::Moderate);
}

#[tokio::test]
async fn test_all_inference_failing_is_partial() {
    let backend = Arc::new(MockInferenceBackend::new());
    let job = PipelineOrchestrator::new(context(backend))
        .run(vec![image("a"), image("b")])
        .await;

    assert_eq!(job.status, JobStatus::FailedPartial);
    assert!(job.is_terminal());
    assert!(job.canonical_parts.is_empty());
    assert!(job.warnings.iter().any(|w| w.contains("area detection")));
}

#[tokio::test]
async fn test_no_images_fails_without_calls() {
    let backend = Arc::new(MockInferenceBackend::new());
    let job = PipelineOrchestrator::new(context(backend.clone()))
        .run(Vec::new())
        .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.stage, JobStage::Failed);
    assert_eq!(backend.call_count(), 0);
}

#[tokio::test]
async fn test_duplicate_photos_classified_once() {
    let backend = Arc::new(MockInferenceBackend::new());
    script_text_passes(&backend);
    backend.on(
        "TASK: area_detector",
        MockResponse::json(json!({"damage_visible": true, "areas": [{"area": "side", "confidence": 0.9}]})),
    );
    backend.on("AREA: side", damages(&[("left front door", "moderate", 0.7)]));

    let original = image("door");
    let mut copy = image("door-copy");
    copy.content_hash = original.content_hash.clone();

    let job = PipelineOrchestrator::new(context(backend.clone()))
        .run(vec![original, copy])
        .await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(backend.calls_matching("TASK: area_detector"), 1);
    assert_eq!(job.canonical_parts.len(), 1);
    assert_eq!(job.canonical_parts[0].canonical_name, "left front door");
    assert_eq!(job.canonical_parts[0].area, DamageArea::Side);
}

#[tokio::test]
async fn test_identification_majority_vote() {
    let backend = Arc::new(MockInferenceBackend::new());
    script_text_passes(&backend);
    backend.on(
        "STRATEGY: front_weighted",
        MockResponse::json(json!({"make": "Honda", "model": "Civic", "year": 2018, "confidence": 0.9})),
    );
    backend.on(
        "STRATEGY: mixed_angle",
        MockResponse::json(json!({"make": "honda", "model": "civic ", "year": 2018, "confidence": 0.5})),
    );
    backend.on(
        "STRATEGY: single_best",
        MockResponse::json(json!({"make": "Acura", "model": "ILX", "confidence": 0.95})),
    );

    let job = PipelineOrchestrator::new(context(backend))
        .run(vec![angled("f", Angle::Front), angled("s", Angle::Left)])
        .await;

    let identity = &job.vehicle_identity;
    assert_eq!(identity.make, "Honda");
    assert_eq!(identity.agreement_count, 2);
    assert!((identity.confidence - 0.7).abs() < 1e-9);
}

#[tokio::test]
async fn test_shared_gateway_respects_global_cap() {
    let backend = Arc::new(MockInferenceBackend::new().with_latency(Duration::from_millis(15)));
    script_text_passes(&backend);
    backend.on("TASK: area_specialist", damages(&[("roof", "minor", 0.5)]));

    let config = PipelineConfig::default().with_widths(8, 8);
    let ctx = context_with(backend.clone(), 2, config);
    let gateway = ctx.gateway.clone();

    let first = PipelineOrchestrator::new(ctx.clone());
    let second = PipelineOrchestrator::new(ctx);
    let (a, b) = tokio::join!(
        first.run(vec![angled("a1", Angle::Front), angled("a2", Angle::Top)]),
        second.run(vec![angled("b1", Angle::Rear), angled("b2", Angle::Right)]),
    );

    assert_eq!(a.status, JobStatus::Completed);
    assert_eq!(b.status, JobStatus::Completed);
    assert_ne!(a.id, b.id);
    assert!(backend.max_concurrent() <= 2);
    assert!(backend.max_concurrent() >= 1);
    assert_eq!(backend.active_calls(), 0);
    assert_eq!(gateway.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_job_deadline_keeps_partial_report() {
    let backend = Arc::new(MockInferenceBackend::new());
    script_text_passes(&backend);
    backend.on("AREA: front", damages(&[("grille", "severe", 0.8)]));
    backend.on(
        "AREA: rear",
        damages(&[("rear bumper", "minor", 0.4)]).with_delay(Duration::from_secs(60)),
    );

    let config = PipelineConfig::default()
        .with_temperatures(vec![0.3])
        .with_job_timeout(Duration::from_millis(400));
    let job = PipelineOrchestrator::new(context_with(backend, 4, config))
        .run(vec![angled("f", Angle::Front), angled("r", Angle::Rear)])
        .await;

    assert_eq!(job.status, JobStatus::FailedPartial);
    let names: Vec<&str> = job
        .canonical_parts
        .iter()
        .map(|p| p.canonical_name.as_str())
        .collect();
    assert_eq!(names, vec!["grille"]);
    assert_eq!(job.totals.part_count, 1);
    assert!(job.summary.is_none());
}
