//! Configuration management for dentscan
//!
//! Settings come from four layers, later ones winning: built-in defaults,
//! an optional TOML file, `DENTSCAN_*` environment variables, and CLI
//! flags (applied by the caller on the loaded value).
//!
//! # Environment Variables
//!
//! - `DENTSCAN_PROVIDER`: openai|ollama|anthropic|gemini|groq|xai - default: "openai"
//! - `DENTSCAN_MODEL`: model name - default depends on the provider
//! - `DENTSCAN_LOG_LEVEL`: trace|debug|info|warn|error - default: "info"
//! - `DENTSCAN_ONTOLOGY_PATH`: JSON part vocabulary replacing the bundled one
//! - `DENTSCAN_RECORDINGS_DIR`, `DENTSCAN_RECORDING_MODE` (record|replay|auto)
//! - `DENTSCAN_CONCURRENCY`: global cap on in-flight inference calls - default: 4
//! - `DENTSCAN_PER_CALL_TIMEOUT`: seconds - default: 60
//! - `DENTSCAN_RETRY_COUNT`: retries after the first attempt - default: 4
//! - `DENTSCAN_RETRY_BACKOFF_MS`, `DENTSCAN_RETRY_JITTER_MS` - default: 500, 250
//! - `DENTSCAN_TEMPERATURES`: comma separated - default: "0.2,0.5,0.8"
//! - `DENTSCAN_AREA_BUCKETING`: true|false - default: true
//! - `DENTSCAN_IDENTIFICATION_ATTEMPTS`, `DENTSCAN_AREA_DETECTOR_WIDTH`,
//!   `DENTSCAN_SPECIALIST_WIDTH`, `DENTSCAN_MAX_IMAGES_PER_CALL`
//! - `DENTSCAN_JOB_TIMEOUT`: seconds - default: 600
//! - `DENTSCAN_REPAIR_RETRY`: true|false - default: true
//! - `DENTSCAN_MAX_IMAGE_PX`, `DENTSCAN_JPEG_QUALITY` - default: 1600, 80
//!
//! Provider credentials are read by genai from the provider's own variables
//! (`OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `OLLAMA_HOST`, ...).

use crate::inference::{GatewayConfig, RecordingMode, RetryPolicy};
use crate::pipeline::PipelineConfig;
use genai::adapter::AdapterKind;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_MAX_IMAGE_PX: u32 = 1600;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_PER_CALL_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RETRY_COUNT: u32 = 4;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 500;
const DEFAULT_RETRY_JITTER_MS: u64 = 250;
const DEFAULT_CONCURRENCY: usize = 4;
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const MAX_TEMPERATURE: f32 = 2.0;

pub const VALID_PROVIDERS: &str = "openai, ollama, anthropic, gemini, groq, xai";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid provider: {0}. Valid options: openai, ollama, anthropic, gemini, groq, xai")]
    InvalidProvider(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
}

pub fn parse_provider(name: &str) -> Result<AdapterKind, ConfigError> {
    match name.trim().to_lowercase().as_str() {
        "openai" => Ok(AdapterKind::OpenAI),
        "ollama" => Ok(AdapterKind::Ollama),
        "anthropic" | "claude" => Ok(AdapterKind::Anthropic),
        "gemini" | "google" => Ok(AdapterKind::Gemini),
        "groq" => Ok(AdapterKind::Groq),
        "xai" | "grok" => Ok(AdapterKind::Xai),
        _ => Err(ConfigError::InvalidProvider(name.to_string())),
    }
}

/// Vision-capable model used when none is configured.
pub fn default_model(provider: AdapterKind) -> &'static str {
    match provider {
        AdapterKind::OpenAI => "gpt-4o",
        AdapterKind::Ollama => "qwen2.5vl:7b",
        AdapterKind::Anthropic => "claude-3-5-sonnet-latest",
        AdapterKind::Gemini => "gemini-2.0-flash",
        AdapterKind::Groq => "meta-llama/llama-4-scout-17b-16e-instruct",
        AdapterKind::Xai => "grok-2-vision-latest",
        _ => "default-model",
    }
}

/// Comma separated list such as `0.2,0.5,0.8`.
pub fn parse_temperatures(raw: &str) -> Result<Vec<f32>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>().map_err(|e| ConfigError::ParseError {
                field: "specialist_temperatures".to_string(),
                error: format!("'{}': {}", s, e),
            })
        })
        .collect()
}

fn parse_value<T>(field: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| ConfigError::ParseError {
        field: field.to_string(),
        error: format!("'{}': {}", raw, e),
    })
}

fn env_value<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => parse_value(key, &raw).map(Some),
        _ => Ok(None),
    }
}

fn parse_recording_mode(raw: &str) -> Result<RecordingMode, ConfigError> {
    RecordingMode::parse(raw).map_err(|e| ConfigError::ParseError {
        field: "recording_mode".to_string(),
        error: e.to_string(),
    })
}

/// Shape of the optional TOML file. Every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    provider: Option<String>,
    model: Option<String>,
    log_level: Option<String>,
    ontology_path: Option<PathBuf>,
    recordings_dir: Option<PathBuf>,
    recording_mode: Option<String>,
    max_image_px: Option<u32>,
    jpeg_quality: Option<u8>,
    per_call_timeout_secs: Option<u64>,
    retry_count: Option<u32>,
    retry_backoff_base_ms: Option<u64>,
    retry_jitter_ms: Option<u64>,
    global_concurrency_cap: Option<usize>,
    area_bucketing: Option<bool>,
    specialist_temperatures: Option<Vec<f32>>,
    identification_attempts: Option<usize>,
    area_detector_width: Option<usize>,
    specialist_width: Option<usize>,
    max_images_per_call: Option<usize>,
    job_timeout_secs: Option<u64>,
    repair_retry: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct DentscanConfig {
    pub provider: AdapterKind,
    pub model: String,
    pub log_level: String,

    /// Part vocabulary replacing the bundled one
    pub ontology_path: Option<PathBuf>,

    pub recordings_dir: Option<PathBuf>,
    pub recording_mode: Option<RecordingMode>,

    /// Longest image edge after downscaling
    pub max_image_px: u32,
    pub jpeg_quality: u8,

    pub per_call_timeout: Duration,
    pub retry_count: u32,
    pub retry_backoff_base: Duration,
    pub retry_jitter: Duration,

    /// In-flight inference calls across every job sharing the gateway
    pub global_concurrency_cap: usize,

    pub pipeline: PipelineConfig,
}

impl Default for DentscanConfig {
    /// Built-in defaults overlaid with `DENTSCAN_*` variables. Malformed
    /// variables are logged and skipped.
    fn default() -> Self {
        let mut config = Self::builtin();
        if let Err(e) = config.apply_env() {
            warn!(error = %e, "Ignoring malformed environment configuration");
        }
        config.resolve_model();
        config
    }
}

impl DentscanConfig {
    /// Defaults only, no environment.
    pub fn builtin() -> Self {
        let provider = AdapterKind::OpenAI;
        Self {
            provider,
            model: default_model(provider).to_string(),
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            ontology_path: None,
            recordings_dir: None,
            recording_mode: None,
            max_image_px: DEFAULT_MAX_IMAGE_PX,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            per_call_timeout: Duration::from_secs(DEFAULT_PER_CALL_TIMEOUT_SECS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_base: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
            retry_jitter: Duration::from_millis(DEFAULT_RETRY_JITTER_MS),
            global_concurrency_cap: DEFAULT_CONCURRENCY,
            pipeline: PipelineConfig::default(),
        }
    }

    /// Defaults, then `path` when given, then the environment. Unlike
    /// `Default`, malformed values are errors here.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::builtin();
        if let Some(path) = path {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            config.apply_toml(&contents)?;
        }
        config.apply_env()?;
        config.resolve_model();
        Ok(config)
    }

    pub fn apply_toml(&mut self, contents: &str) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(contents)?;

        if let Some(provider) = file.provider {
            self.set_provider(parse_provider(&provider)?);
        }
        if let Some(model) = file.model {
            self.model = model;
        }
        if let Some(level) = file.log_level {
            self.log_level = level.to_lowercase();
        }
        if let Some(mode) = file.recording_mode {
            self.recording_mode = Some(parse_recording_mode(&mode)?);
        }
        self.ontology_path = file.ontology_path.or(self.ontology_path.take());
        self.recordings_dir = file.recordings_dir.or(self.recordings_dir.take());
        self.max_image_px = file.max_image_px.unwrap_or(self.max_image_px);
        self.jpeg_quality = file.jpeg_quality.unwrap_or(self.jpeg_quality);
        if let Some(secs) = file.per_call_timeout_secs {
            self.per_call_timeout = Duration::from_secs(secs);
        }
        self.retry_count = file.retry_count.unwrap_or(self.retry_count);
        if let Some(ms) = file.retry_backoff_base_ms {
            self.retry_backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = file.retry_jitter_ms {
            self.retry_jitter = Duration::from_millis(ms);
        }
        self.global_concurrency_cap = file
            .global_concurrency_cap
            .unwrap_or(self.global_concurrency_cap);

        let p = &mut self.pipeline;
        p.area_bucketing = file.area_bucketing.unwrap_or(p.area_bucketing);
        if let Some(temps) = file.specialist_temperatures {
            p.specialist_temperatures = temps;
        }
        p.identification_attempts = file
            .identification_attempts
            .unwrap_or(p.identification_attempts);
        p.area_detector_width = file.area_detector_width.unwrap_or(p.area_detector_width);
        p.specialist_width = file.specialist_width.unwrap_or(p.specialist_width);
        p.max_images_per_call = file.max_images_per_call.unwrap_or(p.max_images_per_call);
        if let Some(secs) = file.job_timeout_secs {
            p.job_timeout = Duration::from_secs(secs);
        }
        p.repair_retry = file.repair_retry.unwrap_or(p.repair_retry);

        Ok(())
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(provider) = env::var("DENTSCAN_PROVIDER") {
            self.set_provider(parse_provider(&provider)?);
        }
        if let Ok(model) = env::var("DENTSCAN_MODEL") {
            self.model = model;
        }
        if let Ok(level) = env::var("DENTSCAN_LOG_LEVEL") {
            self.log_level = level.to_lowercase();
        }
        if let Ok(path) = env::var("DENTSCAN_ONTOLOGY_PATH") {
            self.ontology_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = env::var("DENTSCAN_RECORDINGS_DIR") {
            self.recordings_dir = Some(PathBuf::from(dir));
        }
        if let Ok(mode) = env::var("DENTSCAN_RECORDING_MODE") {
            self.recording_mode = Some(parse_recording_mode(&mode)?);
        }
        if let Some(px) = env_value("DENTSCAN_MAX_IMAGE_PX")? {
            self.max_image_px = px;
        }
        if let Some(quality) = env_value("DENTSCAN_JPEG_QUALITY")? {
            self.jpeg_quality = quality;
        }
        if let Some(secs) = env_value("DENTSCAN_PER_CALL_TIMEOUT")? {
            self.per_call_timeout = Duration::from_secs(secs);
        }
        if let Some(count) = env_value("DENTSCAN_RETRY_COUNT")? {
            self.retry_count = count;
        }
        if let Some(ms) = env_value("DENTSCAN_RETRY_BACKOFF_MS")? {
            self.retry_backoff_base = Duration::from_millis(ms);
        }
        if let Some(ms) = env_value("DENTSCAN_RETRY_JITTER_MS")? {
            self.retry_jitter = Duration::from_millis(ms);
        }
        if let Some(cap) = env_value("DENTSCAN_CONCURRENCY")? {
            self.global_concurrency_cap = cap;
        }

        let p = &mut self.pipeline;
        if let Some(on) = env_value("DENTSCAN_AREA_BUCKETING")? {
            p.area_bucketing = on;
        }
        if let Ok(raw) = env::var("DENTSCAN_TEMPERATURES") {
            p.specialist_temperatures = parse_temperatures(&raw)?;
        }
        if let Some(n) = env_value("DENTSCAN_IDENTIFICATION_ATTEMPTS")? {
            p.identification_attempts = n;
        }
        if let Some(n) = env_value("DENTSCAN_AREA_DETECTOR_WIDTH")? {
            p.area_detector_width = n;
        }
        if let Some(n) = env_value("DENTSCAN_SPECIALIST_WIDTH")? {
            p.specialist_width = n;
        }
        if let Some(n) = env_value("DENTSCAN_MAX_IMAGES_PER_CALL")? {
            p.max_images_per_call = n;
        }
        if let Some(secs) = env_value("DENTSCAN_JOB_TIMEOUT")? {
            p.job_timeout = Duration::from_secs(secs);
        }
        if let Some(on) = env_value("DENTSCAN_REPAIR_RETRY")? {
            p.repair_retry = on;
        }

        Ok(())
    }

    /// Switches provider. A model still at the old provider's default
    /// follows the switch; an explicitly chosen model is kept.
    pub fn set_provider(&mut self, provider: AdapterKind) {
        if self.model.is_empty() || self.model == default_model(self.provider) {
            self.model = default_model(provider).to_string();
        }
        self.provider = provider;
    }

    fn resolve_model(&mut self) {
        if self.model.trim().is_empty() {
            self.model = default_model(self.provider).to_string();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let fail = |msg: String| Err(ConfigError::ValidationFailed(msg));
        let p = &self.pipeline;

        if self.global_concurrency_cap == 0 {
            return fail("Concurrency cap must be at least 1".to_string());
        }
        if p.area_detector_width == 0 || p.specialist_width == 0 {
            return fail("Phase widths must be at least 1".to_string());
        }
        if p.max_images_per_call == 0 {
            return fail("max_images_per_call must be at least 1".to_string());
        }
        if p.specialist_temperatures.is_empty() {
            return fail("At least one specialist temperature is required".to_string());
        }
        if let Some(t) = p
            .specialist_temperatures
            .iter()
            .find(|t| !(0.0..=MAX_TEMPERATURE).contains(*t))
        {
            return fail(format!(
                "Temperature {} is outside [0, {}]",
                t, MAX_TEMPERATURE
            ));
        }
        if p.identification_attempts < crate::pipeline::config::MIN_IDENTIFICATION_ATTEMPTS {
            return fail(format!(
                "identification_attempts must be at least {}",
                crate::pipeline::config::MIN_IDENTIFICATION_ATTEMPTS
            ));
        }
        if self.per_call_timeout.is_zero() || p.job_timeout.is_zero() {
            return fail("Timeouts must be greater than zero".to_string());
        }
        if self.jpeg_quality == 0 || self.jpeg_quality > 100 {
            return fail("jpeg_quality must be between 1 and 100".to_string());
        }
        if self.max_image_px < 64 {
            return fail("max_image_px must be at least 64".to_string());
        }
        if self.model.trim().is_empty() {
            return fail("Model name must not be empty".to_string());
        }
        if self.recording_mode.is_some() && self.recordings_dir.is_none() {
            return fail("recording_mode requires recordings_dir".to_string());
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return fail(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                ))
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retry_count: self.retry_count,
            backoff_base: self.retry_backoff_base,
            jitter: self.retry_jitter,
            max_backoff: MAX_BACKOFF,
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            max_images_per_call: self.pipeline.max_images_per_call,
            per_call_timeout: self.per_call_timeout,
            retry: self.retry_policy(),
        }
    }

    pub fn to_display_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        let p = &self.pipeline;

        map.insert("provider".to_string(), self.provider.as_str().to_string());
        map.insert("model".to_string(), self.model.clone());
        map.insert("log_level".to_string(), self.log_level.clone());
        if let Some(ref path) = self.ontology_path {
            map.insert("ontology_path".to_string(), path.display().to_string());
        }
        if let Some(ref dir) = self.recordings_dir {
            map.insert("recordings_dir".to_string(), dir.display().to_string());
        }
        if let Some(mode) = self.recording_mode {
            map.insert("recording_mode".to_string(), mode.as_str().to_string());
        }
        map.insert("max_image_px".to_string(), self.max_image_px.to_string());
        map.insert("jpeg_quality".to_string(), self.jpeg_quality.to_string());
        map.insert(
            "per_call_timeout_secs".to_string(),
            self.per_call_timeout.as_secs().to_string(),
        );
        map.insert("retry_count".to_string(), self.retry_count.to_string());
        map.insert(
            "retry_backoff_base_ms".to_string(),
            self.retry_backoff_base.as_millis().to_string(),
        );
        map.insert(
            "retry_jitter_ms".to_string(),
            self.retry_jitter.as_millis().to_string(),
        );
        map.insert(
            "global_concurrency_cap".to_string(),
            self.global_concurrency_cap.to_string(),
        );
        map.insert("area_bucketing".to_string(), p.area_bucketing.to_string());
        map.insert(
            "specialist_temperatures".to_string(),
            format_temperatures(&p.specialist_temperatures),
        );
        map.insert(
            "identification_attempts".to_string(),
            p.identification_attempts.to_string(),
        );
        map.insert(
            "area_detector_width".to_string(),
            p.area_detector_width.to_string(),
        );
        map.insert("specialist_width".to_string(), p.specialist_width.to_string());
        map.insert(
            "max_images_per_call".to_string(),
            p.max_images_per_call.to_string(),
        );
        map.insert(
            "job_timeout_secs".to_string(),
            p.job_timeout.as_secs().to_string(),
        );
        map.insert("repair_retry".to_string(), p.repair_retry.to_string());

        map
    }
}

fn format_temperatures(temps: &[f32]) -> String {
    temps
        .iter()
        .map(|t| t.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for DentscanConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = &self.pipeline;
        writeln!(f, "Dentscan Configuration:")?;
        writeln!(f, "  Provider: {}", self.provider.as_str())?;
        writeln!(f, "  Model: {}", self.model)?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        if let Some(ref path) = self.ontology_path {
            writeln!(f, "  Ontology: {}", path.display())?;
        }
        if let (Some(dir), Some(mode)) = (&self.recordings_dir, self.recording_mode) {
            writeln!(f, "  Recordings: {} ({})", dir.display(), mode.as_str())?;
        }
        writeln!(f, "  Concurrency Cap: {}", self.global_concurrency_cap)?;
        writeln!(f, "  Per-call Timeout: {}s", self.per_call_timeout.as_secs())?;
        writeln!(
            f,
            "  Retries: {} (backoff {}ms, jitter {}ms)",
            self.retry_count,
            self.retry_backoff_base.as_millis(),
            self.retry_jitter.as_millis()
        )?;
        writeln!(f, "  Area Bucketing: {}", p.area_bucketing)?;
        writeln!(
            f,
            "  Temperatures: {}",
            format_temperatures(&p.specialist_temperatures)
        )?;
        writeln!(
            f,
            "  Widths: areas {}, specialists {}",
            p.area_detector_width, p.specialist_width
        )?;
        writeln!(f, "  Images per Call: {}", p.max_images_per_call)?;
        writeln!(f, "  Job Timeout: {}s", p.job_timeout.as_secs())?;
        writeln!(
            f,
            "  Image Preparation: {}px, quality {}",
            self.max_image_px, self.jpeg_quality
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    /// Sets a variable for the guard's lifetime.
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    #[test]
    fn test_builtin_defaults() {
        let config = DentscanConfig::builtin();
        assert_eq!(config.provider, AdapterKind::OpenAI);
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.global_concurrency_cap, 4);
        assert_eq!(config.retry_count, 4);
        assert_eq!(config.retry_policy().max_attempts(), 5);
        assert_eq!(config.per_call_timeout, Duration::from_secs(60));
        assert_eq!(config.pipeline.specialist_temperatures, vec![0.2, 0.5, 0.8]);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _guards = vec![
            EnvGuard::set("DENTSCAN_PROVIDER", "ollama"),
            EnvGuard::set("DENTSCAN_LOG_LEVEL", "DEBUG"),
            EnvGuard::set("DENTSCAN_CONCURRENCY", "8"),
            EnvGuard::set("DENTSCAN_TEMPERATURES", "0.1, 0.9"),
            EnvGuard::set("DENTSCAN_AREA_BUCKETING", "false"),
            EnvGuard::set("DENTSCAN_JOB_TIMEOUT", "120"),
        ];

        let config = DentscanConfig::load(None).unwrap();
        assert_eq!(config.provider, AdapterKind::Ollama);
        assert_eq!(config.model, "qwen2.5vl:7b");
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.global_concurrency_cap, 8);
        assert_eq!(config.pipeline.specialist_temperatures, vec![0.1, 0.9]);
        assert!(!config.pipeline.area_bucketing);
        assert_eq!(config.pipeline.job_timeout, Duration::from_secs(120));
    }

    #[test]
    #[serial]
    fn test_malformed_env_is_error_on_load() {
        let _guard = EnvGuard::set("DENTSCAN_CONCURRENCY", "lots");
        let err = DentscanConfig::load(None).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));

        // Default skips it instead.
        let config = DentscanConfig::default();
        assert_eq!(config.global_concurrency_cap, DEFAULT_CONCURRENCY);
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
provider = "anthropic"
model = "my-model"
specialist_temperatures = [0.3]
global_concurrency_cap = 2
recordings_dir = "/tmp/recordings"
recording_mode = "auto"
"#
        )
        .unwrap();
        let _guard = EnvGuard::set("DENTSCAN_CONCURRENCY", "6");

        let config = DentscanConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.provider, AdapterKind::Anthropic);
        assert_eq!(config.model, "my-model");
        assert_eq!(config.pipeline.specialist_temperatures, vec![0.3]);
        assert_eq!(config.global_concurrency_cap, 6);
        assert_eq!(config.recording_mode, Some(RecordingMode::Auto));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_file_key_rejected() {
        let mut config = DentscanConfig::builtin();
        let err = config.apply_toml("colour = \"blue\"").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_invalid_provider() {
        assert!(matches!(
            parse_provider("mainframe"),
            Err(ConfigError::InvalidProvider(_))
        ));
        assert_eq!(parse_provider("Claude").unwrap(), AdapterKind::Anthropic);
    }

    #[test]
    fn test_set_provider_keeps_explicit_model() {
        let mut config = DentscanConfig::builtin();
        config.set_provider(AdapterKind::Gemini);
        assert_eq!(config.model, "gemini-2.0-flash");

        config.model = "custom".to_string();
        config.set_provider(AdapterKind::Ollama);
        assert_eq!(config.model, "custom");
    }

    #[test]
    fn test_parse_temperatures() {
        assert_eq!(parse_temperatures("0.2,0.5, 0.8").unwrap(), vec![0.2, 0.5, 0.8]);
        assert!(parse_temperatures("0.2,warm").is_err());
        assert!(parse_temperatures("").unwrap().is_empty());
    }

    #[test]
    fn test_validation_rejections() {
        let cases: Vec<fn(&mut DentscanConfig)> = vec![
            |c| c.global_concurrency_cap = 0,
            |c| c.pipeline.specialist_width = 0,
            |c| c.pipeline.specialist_temperatures.clear(),
            |c| c.pipeline.specialist_temperatures = vec![2.5],
            |c| c.pipeline.identification_attempts = 2,
            |c| c.per_call_timeout = Duration::ZERO,
            |c| c.pipeline.job_timeout = Duration::ZERO,
            |c| c.log_level = "loud".to_string(),
            |c| c.recording_mode = Some(RecordingMode::Replay),
        ];

        for (i, mutate) in cases.into_iter().enumerate() {
            let mut config = DentscanConfig::builtin();
            mutate(&mut config);
            assert!(config.validate().is_err(), "case {} should be rejected", i);
        }
    }

    #[test]
    fn test_gateway_config() {
        let config = DentscanConfig::builtin();
        let gateway = config.gateway_config();
        assert_eq!(gateway.max_images_per_call, 6);
        assert_eq!(gateway.retry.backoff_base, Duration::from_millis(500));
        assert_eq!(gateway.retry.jitter, Duration::from_millis(250));
    }

    #[test]
    fn test_display_and_map() {
        let config = DentscanConfig::builtin();
        let display = format!("{}", config);
        assert!(display.contains("Dentscan Configuration:"));
        assert!(display.contains("Provider:"));

        let map = config.to_display_map();
        assert_eq!(map.get("specialist_temperatures").unwrap(), "0.2,0.5,0.8");
        assert_eq!(map.get("retry_count").unwrap(), "4");
    }
}
