use crate::domain::{ImageRef, RegionOfInterest};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One image attached to a request, optionally cropped to a region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInput {
    pub image: ImageRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<RegionOfInterest>,
}

impl ImageInput {
    pub fn full(image: ImageRef) -> Self {
        Self {
            image,
            region: None,
        }
    }

    pub fn cropped(image: ImageRef, region: RegionOfInterest) -> Self {
        Self {
            image,
            region: region.clamped(),
        }
    }
}

impl From<ImageRef> for ImageInput {
    fn from(image: ImageRef) -> Self {
        Self::full(image)
    }
}

/// A multimodal prompt for the inference service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub prompt: String,
    pub images: Vec<ImageInput>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Overrides the gateway's per-call timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Short tag used in logs (e.g. `specialist:front:surface`).
    pub label: String,
}

impl InferenceRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
            temperature: 0.2,
            max_tokens: None,
            timeout: None,
            label: String::new(),
        }
    }

    pub fn with_images(mut self, images: impl IntoIterator<Item = ImageInput>) -> Self {
        self.images.extend(images);
        self
    }

    pub fn with_image(mut self, image: impl Into<ImageInput>) -> Self {
        self.images.push(image.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub content: String,
    pub response_time: Duration,
}

impl InferenceResponse {
    pub fn text(content: impl Into<String>, response_time: Duration) -> Self {
        Self {
            content: content.into(),
            response_time,
        }
    }
}
