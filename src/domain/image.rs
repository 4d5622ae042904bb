use super::damage::DamageArea;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What an image depicts, as tagged at submission.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ImageCategory {
    #[default]
    Exterior,
    Interior,
    Document,
}

impl ImageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageCategory::Exterior => "exterior",
            ImageCategory::Interior => "interior",
            ImageCategory::Document => "document",
        }
    }
}

/// Canonical exterior viewpoint, usually set by a human reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Angle {
    Front,
    FrontLeft,
    FrontRight,
    Left,
    Right,
    Rear,
    RearLeft,
    RearRight,
    Top,
}

impl Angle {
    pub const ALL: [Angle; 9] = [
        Angle::Front,
        Angle::FrontLeft,
        Angle::FrontRight,
        Angle::Left,
        Angle::Right,
        Angle::Rear,
        Angle::RearLeft,
        Angle::RearRight,
        Angle::Top,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Angle::Front => "front",
            Angle::FrontLeft => "front_left",
            Angle::FrontRight => "front_right",
            Angle::Left => "left",
            Angle::Right => "right",
            Angle::Rear => "rear",
            Angle::RearLeft => "rear_left",
            Angle::RearRight => "rear_right",
            Angle::Top => "top",
        }
    }

    /// Accepts `front_left`, `front-left`, `front left` and `frontleft`.
    pub fn parse(s: &str) -> Option<Self> {
        let key: String = s
            .trim()
            .to_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphabetic())
            .collect();
        match key.as_str() {
            "front" => Some(Angle::Front),
            "frontleft" => Some(Angle::FrontLeft),
            "frontright" => Some(Angle::FrontRight),
            "left" | "leftside" => Some(Angle::Left),
            "right" | "rightside" => Some(Angle::Right),
            "rear" | "back" => Some(Angle::Rear),
            "rearleft" | "backleft" => Some(Angle::RearLeft),
            "rearright" | "backright" => Some(Angle::RearRight),
            "top" | "roof" => Some(Angle::Top),
            _ => None,
        }
    }

    /// Area an image taken from this viewpoint is bucketed into.
    pub fn area(&self) -> DamageArea {
        match self {
            Angle::Front | Angle::FrontLeft | Angle::FrontRight => DamageArea::Front,
            Angle::Rear | Angle::RearLeft | Angle::RearRight => DamageArea::Rear,
            Angle::Left | Angle::Right => DamageArea::Side,
            Angle::Top => DamageArea::Roof,
        }
    }

    pub fn is_front_facing(&self) -> bool {
        matches!(self, Angle::Front | Angle::FrontLeft | Angle::FrontRight)
    }
}

impl fmt::Display for Angle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to a submitted photograph. Immutable once part of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<Angle>,
    #[serde(default)]
    pub category: ImageCategory,
    #[serde(default)]
    pub is_closeup: bool,
    pub content_hash: String,
}

impl ImageRef {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            angle: None,
            category: ImageCategory::Exterior,
            is_closeup: false,
            content_hash: content_hash.into(),
        }
    }

    pub fn with_angle(mut self, angle: Angle) -> Self {
        self.angle = Some(angle);
        self
    }

    pub fn with_category(mut self, category: ImageCategory) -> Self {
        self.category = category;
        self
    }

    pub fn closeup(mut self) -> Self {
        self.is_closeup = true;
        self
    }

    pub fn is_exterior(&self) -> bool {
        self.category == ImageCategory::Exterior
    }
}

/// Normalised rectangle (all coordinates in `[0, 1]`) inside an image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RegionOfInterest {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Clamps into the unit square. Returns `None` for degenerate or
    /// non-finite boxes, and for boxes that already cover the whole frame.
    pub fn clamped(&self) -> Option<Self> {
        if ![self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
        {
            return None;
        }
        let x = self.x.clamp(0.0, 1.0);
        let y = self.y.clamp(0.0, 1.0);
        let width = self.width.clamp(0.0, 1.0 - x);
        let height = self.height.clamp(0.0, 1.0 - y);
        if width < 0.02 || height < 0.02 {
            return None;
        }
        if width > 0.98 && height > 0.98 {
            return None;
        }
        Some(Self::new(x, y, width, height))
    }

    /// Pixel rectangle `(x, y, w, h)` for an image of the given size.
    pub fn to_pixels(&self, img_width: u32, img_height: u32) -> (u32, u32, u32, u32) {
        let px = (self.x * img_width as f32).floor() as u32;
        let py = (self.y * img_height as f32).floor() as u32;
        let pw = ((self.width * img_width as f32).round() as u32)
            .max(1)
            .min(img_width.saturating_sub(px).max(1));
        let ph = ((self.height * img_height as f32).round() as u32)
            .max(1)
            .min(img_height.saturating_sub(py).max(1));
        (px, py, pw, ph)
    }
}
