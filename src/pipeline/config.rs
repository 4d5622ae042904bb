use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_TEMPERATURES: [f32; 3] = [0.2, 0.5, 0.8];
pub const MIN_IDENTIFICATION_ATTEMPTS: usize = 3;

/// Phase-level knobs. Gateway settings (timeouts, retries, global cap)
/// live in `GatewayConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Classify images one by one; when off, the whole set is classified
    /// in a single call.
    pub area_bucketing: bool,
    pub specialist_temperatures: Vec<f32>,
    pub identification_attempts: usize,
    pub area_detector_width: usize,
    pub specialist_width: usize,
    pub max_images_per_call: usize,
    pub job_timeout: Duration,
    /// Re-ask once at temperature 0 when a reply cannot be parsed.
    pub repair_retry: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            area_bucketing: true,
            specialist_temperatures: DEFAULT_TEMPERATURES.to_vec(),
            identification_attempts: MIN_IDENTIFICATION_ATTEMPTS,
            area_detector_width: 4,
            specialist_width: 4,
            max_images_per_call: 6,
            job_timeout: Duration::from_secs(600),
            repair_retry: true,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_area_bucketing(mut self, area_bucketing: bool) -> Self {
        self.area_bucketing = area_bucketing;
        self
    }

    pub fn with_temperatures(mut self, temperatures: Vec<f32>) -> Self {
        self.specialist_temperatures = temperatures;
        self
    }

    pub fn with_identification_attempts(mut self, attempts: usize) -> Self {
        self.identification_attempts = attempts.max(MIN_IDENTIFICATION_ATTEMPTS);
        self
    }

    pub fn with_widths(mut self, area_detector: usize, specialist: usize) -> Self {
        self.area_detector_width = area_detector;
        self.specialist_width = specialist;
        self
    }

    pub fn with_max_images_per_call(mut self, max_images: usize) -> Self {
        self.max_images_per_call = max_images;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn with_repair_retry(mut self, repair_retry: bool) -> Self {
        self.repair_retry = repair_retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert!(config.area_bucketing);
        assert_eq!(config.specialist_temperatures, vec![0.2, 0.5, 0.8]);
        assert_eq!(config.identification_attempts, 3);
        assert_eq!(config.job_timeout, Duration::from_secs(600));
        assert!(config.repair_retry);
    }

    #[test]
    fn test_builder_pattern() {
        let config = PipelineConfig::new()
            .with_area_bucketing(false)
            .with_temperatures(vec![0.0, 1.0])
            .with_identification_attempts(1)
            .with_widths(2, 8)
            .with_job_timeout(Duration::from_secs(30));

        assert!(!config.area_bucketing);
        assert_eq!(config.specialist_temperatures, vec![0.0, 1.0]);
        assert_eq!(config.identification_attempts, 3);
        assert_eq!(config.area_detector_width, 2);
        assert_eq!(config.specialist_width, 8);
        assert_eq!(config.job_timeout, Duration::from_secs(30));
    }
}
