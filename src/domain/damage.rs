use super::image::ImageRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse damage zone of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DamageArea {
    Front,
    Side,
    Rear,
    Roof,
}

impl DamageArea {
    pub const ALL: [DamageArea; 4] = [
        DamageArea::Front,
        DamageArea::Side,
        DamageArea::Rear,
        DamageArea::Roof,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DamageArea::Front => "front",
            DamageArea::Side => "side",
            DamageArea::Rear => "rear",
            DamageArea::Roof => "roof",
        }
    }

    /// Parses a model-supplied area label. `unknown` and anything
    /// unrecognised yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();
        let s = s.replace(['-', '_'], " ");
        let first = s.split_whitespace().next().unwrap_or("");
        match first {
            "front" | "frontal" => Some(DamageArea::Front),
            "side" | "left" | "right" | "lateral" | "driver" | "passenger" => {
                Some(DamageArea::Side)
            }
            "rear" | "back" => Some(DamageArea::Rear),
            "roof" | "top" => Some(DamageArea::Roof),
            _ => None,
        }
    }
}

impl fmt::Display for DamageArea {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Controlled severity vocabulary, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Moderate,
    Severe,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Minor => "minor",
            Severity::Moderate => "moderate",
            Severity::Severe => "severe",
        }
    }

    /// Folds free-form severity words onto the vocabulary. Unknown words
    /// return `None` and do not take part in severity votes.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "severe" | "high" | "major" | "heavy" | "critical" => Some(Severity::Severe),
            "moderate" | "medium" | "mid" => Some(Severity::Moderate),
            "minor" | "low" | "light" | "cosmetic" | "superficial" => Some(Severity::Minor),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, per-variant observation of a damaged part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageCandidate {
    pub area: DamageArea,
    pub raw_part_name: String,
    pub description: String,
    pub confidence: f64,
    pub severity: Option<Severity>,
    pub source_phase: String,
    pub prompt_variant: Option<String>,
    pub temperature: Option<f32>,
    pub evidence_images: Vec<ImageRef>,
    /// Number of original observations this candidate stands for. Raw
    /// specialist output carries 1; candidates rebuilt from merged parts
    /// carry the part's evidence count.
    pub support: u32,
}

impl DamageCandidate {
    pub fn new(area: DamageArea, raw_part_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            area,
            raw_part_name: raw_part_name.into(),
            description: String::new(),
            confidence: confidence.clamp(0.0, 1.0),
            severity: None,
            source_phase: String::new(),
            prompt_variant: None,
            temperature: None,
            evidence_images: Vec::new(),
            support: 1,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_severity(mut self, severity: Option<Severity>) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_evidence(mut self, image: ImageRef) -> Self {
        self.evidence_images.push(image);
        self
    }

    pub fn with_variant(mut self, phase: &str, variant: &str, temperature: f32) -> Self {
        self.source_phase = phase.to_string();
        self.prompt_variant = Some(variant.to_string());
        self.temperature = Some(temperature);
        self
    }
}

/// Repair cost estimate as returned by the planning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub amount: f64,
    pub currency: String,
}

/// Final, post-merge damaged part. `(canonical_name, area)` is unique
/// within a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalDamagePart {
    pub canonical_name: String,
    pub area: DamageArea,
    pub severity: Severity,
    pub confidence: f64,
    pub evidence_count: u32,
    pub evidence_image_refs: Vec<ImageRef>,
    pub description: String,
    pub classified: bool,
    pub safety_critical: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical_description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labor_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paint_hours: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<CostEstimate>,
}

impl CanonicalDamagePart {
    pub fn key(&self) -> (&str, DamageArea) {
        (self.canonical_name.as_str(), self.area)
    }
}

/// Narrative produced by the summary pass, or derived locally when the
/// pass is skipped or fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DamageSummary {
    pub overall_severity: Option<Severity>,
    pub executive_summary: String,
    #[serde(default)]
    pub safety_highlights: Vec<String>,
    #[serde(default)]
    pub repair_plan_overview: String,
}

/// Aggregates computed from the planned parts list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub part_count: usize,
    pub classified_count: usize,
    pub safety_critical_count: usize,
    pub labor_hours: f64,
    pub paint_hours: f64,
    pub cost: Option<CostEstimate>,
}

impl ReportTotals {
    /// Sums hours and costs. Costs are only totalled when every priced
    /// part uses the same currency.
    pub fn from_parts(parts: &[CanonicalDamagePart]) -> Self {
        let labor_hours = parts.iter().filter_map(|p| p.labor_hours).sum();
        let paint_hours = parts.iter().filter_map(|p| p.paint_hours).sum();

        let priced: Vec<&CostEstimate> = parts.iter().filter_map(|p| p.cost.as_ref()).collect();
        let cost = match priced.first() {
            Some(first) if priced.iter().all(|c| c.currency == first.currency) => {
                Some(CostEstimate {
                    amount: priced.iter().map(|c| c.amount).sum(),
                    currency: first.currency.clone(),
                })
            }
            _ => None,
        };

        Self {
            part_count: parts.len(),
            classified_count: parts.iter().filter(|p| p.classified).count(),
            safety_critical_count: parts.iter().filter(|p| p.safety_critical).count(),
            labor_hours,
            paint_hours,
            cost,
        }
    }
}

/// Provenance counters recorded by the merge engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub candidates_in: usize,
    pub groups: usize,
    pub unclassified: usize,
    pub cross_area_merges: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        high = { "high", Some(Severity::Severe) },
        major = { "Major", Some(Severity::Severe) },
        heavy = { " heavy ", Some(Severity::Severe) },
        medium = { "medium", Some(Severity::Moderate) },
        moderate = { "MODERATE", Some(Severity::Moderate) },
        light = { "light", Some(Severity::Minor) },
        cosmetic = { "cosmetic", Some(Severity::Minor) },
        unknown = { "catastrophic-ish", None },
        empty = { "", None },
    )]
    fn test_severity_normalize(raw: &str, expected: Option<Severity>) {
        assert_eq!(Severity::normalize(raw), expected);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Severe > Severity::Moderate);
        assert!(Severity::Moderate > Severity::Minor);
    }

    #[test]
    fn test_area_parse() {
        assert_eq!(DamageArea::parse("Front"), Some(DamageArea::Front));
        assert_eq!(DamageArea::parse("left side"), Some(DamageArea::Side));
        assert_eq!(DamageArea::parse("rear-left"), Some(DamageArea::Rear));
        assert_eq!(DamageArea::parse("unknown"), None);
        assert_eq!(DamageArea::parse(""), None);
    }

    fn part(labor: Option<f64>, cost: Option<(f64, &str)>) -> CanonicalDamagePart {
        CanonicalDamagePart {
            canonical_name: "hood".to_string(),
            area: DamageArea::Front,
            severity: Severity::Minor,
            confidence: 0.9,
            evidence_count: 1,
            evidence_image_refs: Vec::new(),
            description: String::new(),
            classified: true,
            safety_critical: false,
            repair_method: None,
            technical_description: None,
            labor_hours: labor,
            paint_hours: labor.map(|h| h / 2.0),
            cost: cost.map(|(amount, currency)| CostEstimate {
                amount,
                currency: currency.to_string(),
            }),
        }
    }

    #[test]
    fn test_totals_same_currency() {
        let totals = ReportTotals::from_parts(&[
            part(Some(2.0), Some((100.0, "EUR"))),
            part(Some(1.0), Some((50.0, "EUR"))),
            part(None, None),
        ]);
        assert_eq!(totals.part_count, 3);
        assert_eq!(totals.labor_hours, 3.0);
        assert_eq!(totals.paint_hours, 1.5);
        assert_eq!(totals.cost.unwrap().amount, 150.0);
    }

    #[test]
    fn test_totals_mixed_currency_drops_cost() {
        let totals = ReportTotals::from_parts(&[
            part(Some(2.0), Some((100.0, "EUR"))),
            part(Some(1.0), Some((50.0, "USD"))),
        ]);
        assert!(totals.cost.is_none());
    }
}
