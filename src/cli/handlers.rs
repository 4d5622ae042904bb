//! Command handlers. Each returns the process exit code.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::commands::{AssessArgs, ConfigArgs};
use super::output::OutputFormatter;
use crate::config::DentscanConfig;
use crate::domain::{Job, JobStatus};
use crate::images::{
    scan_directory, DefaultImageStore, FsImageStore, HttpImageStore, ImagePreparer, ImageStore,
};
use crate::inference::{
    ConcurrencyLimiter, GenAIBackend, InferenceBackend, InferenceGateway, RecordingBackend,
};
use crate::ontology::PartOntology;
use crate::pipeline::{PipelineContext, PipelineOrchestrator};
use crate::progress::LoggingHandler;

pub const EXIT_COMPLETED: i32 = 0;
pub const EXIT_FAILED: i32 = 1;
pub const EXIT_PARTIAL: i32 = 2;

pub fn exit_code(status: JobStatus) -> i32 {
    match status {
        JobStatus::Completed => EXIT_COMPLETED,
        JobStatus::FailedPartial => EXIT_PARTIAL,
        _ => EXIT_FAILED,
    }
}

/// Loads the configuration and layers the command-line flags on top.
pub fn resolve_config(args: &AssessArgs) -> Result<DentscanConfig> {
    let mut config = DentscanConfig::load(args.config.as_deref())?;

    if let Some(provider) = args.provider {
        config.set_provider(provider);
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(temperatures) = &args.temperatures {
        config.pipeline.specialist_temperatures = temperatures.clone();
    }
    if let Some(concurrency) = args.concurrency {
        config.global_concurrency_cap = concurrency;
    }
    if args.no_area_bucketing {
        config.pipeline.area_bucketing = false;
    }
    if let Some(secs) = args.job_timeout {
        config.pipeline.job_timeout = Duration::from_secs(secs);
    }

    config.validate()?;
    Ok(config)
}

fn load_ontology(config: &DentscanConfig) -> Result<PartOntology> {
    match &config.ontology_path {
        Some(path) => PartOntology::load(path)
            .with_context(|| format!("Failed to load ontology from {}", path.display())),
        None => Ok(PartOntology::builtin()),
    }
}

fn build_backend(config: &DentscanConfig) -> Result<Arc<dyn InferenceBackend>> {
    let http = HttpImageStore::new(config.per_call_timeout)?;
    let store: Arc<dyn ImageStore> = Arc::new(DefaultImageStore::new(FsImageStore::new(), http));
    let preparer = ImagePreparer::new(store, config.max_image_px, config.jpeg_quality);

    let backend: Arc<dyn InferenceBackend> = Arc::new(
        GenAIBackend::new(
            config.provider,
            config.model.clone(),
            config.per_call_timeout,
            preparer,
        )
        .context("Failed to create inference backend")?,
    );

    match (&config.recordings_dir, config.recording_mode) {
        (Some(dir), Some(mode)) => {
            info!(dir = %dir.display(), mode = mode.as_str(), "Recording inference exchanges");
            Ok(Arc::new(RecordingBackend::new(backend, mode, dir.clone())?))
        }
        _ => Ok(backend),
    }
}

pub fn build_context(config: &DentscanConfig) -> Result<PipelineContext> {
    let backend = build_backend(config)?;
    let gateway = InferenceGateway::new(
        backend,
        ConcurrencyLimiter::new(config.global_concurrency_cap),
        config.gateway_config(),
    );
    let ontology = load_ontology(config)?;

    Ok(PipelineContext::new(
        Arc::new(gateway),
        Arc::new(ontology),
        config.pipeline.clone(),
    )
    .with_progress(Arc::new(LoggingHandler)))
}

async fn run_assessment(args: &AssessArgs) -> Result<Job> {
    let config = resolve_config(args)?;
    debug!("{}", config);

    let images = scan_directory(&args.images_dir)
        .with_context(|| format!("Failed to read images from {}", args.images_dir.display()))?;
    info!(
        images = images.len(),
        dir = %args.images_dir.display(),
        "Starting assessment"
    );

    let ctx = build_context(&config)?;
    Ok(PipelineOrchestrator::new(ctx).run(images).await)
}

fn write_output(output: &str, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => std::fs::write(path, output)
            .with_context(|| format!("Failed to write report to {}", path.display())),
        None => {
            println!("{}", output);
            Ok(())
        }
    }
}

pub async fn handle_assess(args: &AssessArgs) -> i32 {
    let job = match run_assessment(args).await {
        Ok(job) => job,
        Err(e) => {
            error!("Assessment failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            return EXIT_FAILED;
        }
    };

    let formatter = OutputFormatter::new(args.format.into());
    let written = formatter
        .format_report(&job)
        .and_then(|output| write_output(&output, args.out.as_deref()));
    if let Err(e) = written {
        eprintln!("Error: {:#}", e);
        return EXIT_FAILED;
    }

    exit_code(job.status)
}

pub async fn handle_config(args: &ConfigArgs) -> i32 {
    let result = DentscanConfig::load(args.config.as_deref())
        .map_err(anyhow::Error::from)
        .and_then(|config| {
            if let Err(e) = config.validate() {
                eprintln!("\u{26A0} {}", e);
            }
            OutputFormatter::new(args.format.into()).format_config(&config)
        });

    match result {
        Ok(output) => {
            println!("{}", output);
            EXIT_COMPLETED
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            EXIT_FAILED
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands::{CliArgs, Commands};
    use clap::Parser;
    use serial_test::serial;

    fn assess_args(extra: &[&str]) -> AssessArgs {
        let mut argv = vec!["dentscan", "assess", "/tmp/photos"];
        argv.extend_from_slice(extra);
        match CliArgs::parse_from(argv).command {
            Commands::Assess(args) => args,
            _ => panic!("Expected Assess command"),
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(JobStatus::Completed), 0);
        assert_eq!(exit_code(JobStatus::FailedPartial), 2);
        assert_eq!(exit_code(JobStatus::Failed), 1);
    }

    #[test]
    #[serial]
    fn test_flags_override_config() {
        let args = assess_args(&[
            "--temperatures",
            "0.4",
            "--concurrency",
            "9",
            "--no-area-bucketing",
            "--job-timeout",
            "30",
        ]);
        let config = resolve_config(&args).unwrap();
        assert_eq!(config.pipeline.specialist_temperatures, vec![0.4]);
        assert_eq!(config.global_concurrency_cap, 9);
        assert!(!config.pipeline.area_bucketing);
        assert_eq!(config.pipeline.job_timeout, Duration::from_secs(30));
    }

    #[test]
    #[serial]
    fn test_invalid_flags_rejected() {
        let args = assess_args(&["--concurrency", "0"]);
        assert!(resolve_config(&args).is_err());

        let args = assess_args(&["--temperatures", "3.5"]);
        assert!(resolve_config(&args).is_err());
    }

    #[tokio::test]
    #[serial]
    async fn test_missing_directory_fails() {
        let args = assess_args(&[]);
        let args = AssessArgs {
            images_dir: "/nonexistent/dentscan/photos".into(),
            ..args
        };
        assert_eq!(handle_assess(&args).await, EXIT_FAILED);
    }
}
