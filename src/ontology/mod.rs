//! Controlled vocabulary of vehicle parts
//!
//! The vocabulary is a data asset: a list of canonical part labels (with
//! aliases, sidedness and safety metadata) plus a free-form synonym table.
//! A bundled default is compiled in; deployments can point `ontology_path`
//! at their own JSON file with the same shape.
//!
//! Canonicalisation folds case and punctuation, resolves synonyms, pulls
//! out a left/right side, then matches the remaining words against labels
//! and aliases (exact, then token overlap, then Jaro-Winkler). Sided labels
//! are re-prefixed with the side. Names that match nothing come back
//! unclassified under their folded form.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_ONTOLOGY: &str = include_str!("default_ontology.json");

/// Minimum token-Jaccard overlap to accept a fuzzy label match.
pub const JACCARD_THRESHOLD: f64 = 0.5;

/// Minimum Jaro-Winkler similarity for the secondary fuzzy match.
pub const JARO_WINKLER_THRESHOLD: f64 = 0.92;

/// Confidence ceiling applied to parts that map to no label.
pub const UNCLASSIFIED_CONFIDENCE_CAP: f64 = 0.25;

const UNKNOWN_PART: &str = "unknown part";

#[derive(Debug, Error)]
pub enum OntologyError {
    #[error("Failed to read ontology {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse ontology: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid ontology: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "left" | "lh" | "lhs" | "driver" => Some(Side::Left),
            "right" | "rh" | "rhs" | "passenger" => Some(Side::Right),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartLabel {
    pub name: String,
    #[serde(default)]
    pub sided: bool,
    #[serde(default)]
    pub safety_critical: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OntologyData {
    labels: Vec<PartLabel>,
    #[serde(default)]
    synonyms: BTreeMap<String, String>,
}

/// Result of resolving a raw part name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalPart {
    pub name: String,
    pub side: Option<Side>,
    pub classified: bool,
    pub safety_critical: bool,
}

/// Case, punctuation and whitespace folding used for every lookup.
pub fn fold(raw: &str) -> String {
    raw.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    let ta: std::collections::BTreeSet<&str> = a.split(' ').filter(|t| !t.is_empty()).collect();
    let tb: std::collections::BTreeSet<&str> = b.split(' ').filter(|t| !t.is_empty()).collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let inter = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    inter / union
}

#[derive(Debug, Clone)]
pub struct PartOntology {
    labels: Vec<PartLabel>,
    synonyms: HashMap<String, String>,
    /// Folded label name or alias -> label index.
    index: HashMap<String, usize>,
    /// Folded forms in label order, for fuzzy scans.
    forms: Vec<(String, usize)>,
}

impl PartOntology {
    /// Vocabulary bundled with the crate.
    pub fn builtin() -> Self {
        Self::from_json(DEFAULT_ONTOLOGY).expect("bundled ontology must be valid")
    }

    pub fn from_json(json: &str) -> Result<Self, OntologyError> {
        let data: OntologyData = serde_json::from_str(json)?;
        Self::from_data(data)
    }

    pub fn load(path: &Path) -> Result<Self, OntologyError> {
        let contents = std::fs::read_to_string(path).map_err(|source| OntologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&contents)
    }

    fn from_data(data: OntologyData) -> Result<Self, OntologyError> {
        if data.labels.is_empty() {
            return Err(OntologyError::Invalid("no labels defined".to_string()));
        }

        let mut labels = Vec::with_capacity(data.labels.len());
        let mut index = HashMap::new();
        let mut forms = Vec::new();

        for (idx, label) in data.labels.into_iter().enumerate() {
            let name = fold(&label.name);
            if name.is_empty() {
                return Err(OntologyError::Invalid(format!("label #{} has an empty name", idx)));
            }
            if name.split(' ').any(|t| Side::from_token(t).is_some()) {
                return Err(OntologyError::Invalid(format!(
                    "label '{}' must not contain a side word",
                    name
                )));
            }

            let mut aliases = Vec::new();
            for form in std::iter::once(name.clone()).chain(label.aliases.iter().map(|a| fold(a))) {
                if form.is_empty() {
                    continue;
                }
                if let Some(&other) = index.get(&form) {
                    if other != idx {
                        return Err(OntologyError::Invalid(format!(
                            "'{}' is claimed by more than one label",
                            form
                        )));
                    }
                    continue;
                }
                index.insert(form.clone(), idx);
                forms.push((form.clone(), idx));
                if form != name {
                    aliases.push(form);
                }
            }

            labels.push(PartLabel {
                name,
                sided: label.sided,
                safety_critical: label.safety_critical,
                aliases,
            });
        }

        let mut synonyms = HashMap::new();
        for (raw, target) in data.synonyms {
            let key = fold(&raw);
            if index.contains_key(&key) {
                return Err(OntologyError::Invalid(format!(
                    "synonym '{}' shadows a label or alias",
                    key
                )));
            }
            synonyms.insert(key, fold(&target));
        }

        Ok(Self {
            labels,
            synonyms,
            index,
            forms,
        })
    }

    pub fn labels(&self) -> &[PartLabel] {
        &self.labels
    }

    /// Canonical label names, used as a vocabulary hint in prompts.
    pub fn label_names(&self) -> Vec<&str> {
        self.labels.iter().map(|l| l.name.as_str()).collect()
    }

    /// Resolves a raw part name. Idempotent on its own output:
    /// `canonicalize(&canonicalize(x).name) == canonicalize(x)`.
    pub fn canonicalize(&self, raw: &str) -> CanonicalPart {
        let folded = fold(raw);
        if folded.is_empty() {
            return CanonicalPart {
                name: UNKNOWN_PART.to_string(),
                side: None,
                classified: false,
                safety_critical: false,
            };
        }

        let (raw_side, _) = split_side(&folded);
        let resolved = self.synonyms.get(&folded).cloned().unwrap_or(folded.clone());
        let (target_side, base) = split_side(&resolved);
        let base = self.synonyms.get(&base).cloned().unwrap_or(base);
        // A synonym target may carry its own side.
        let (base_side, base) = split_side(&base);
        let side = base_side.or(target_side).or(raw_side);

        match self.match_label(&base) {
            Some(idx) => {
                let label = &self.labels[idx];
                let name = match (label.sided, side) {
                    (true, Some(side)) => format!("{} {}", side, label.name),
                    _ => label.name.clone(),
                };
                CanonicalPart {
                    name,
                    side: if label.sided { side } else { None },
                    classified: true,
                    safety_critical: label.safety_critical,
                }
            }
            None => CanonicalPart {
                name: folded,
                side,
                classified: false,
                safety_critical: false,
            },
        }
    }

    fn match_label(&self, base: &str) -> Option<usize> {
        if base.is_empty() {
            return None;
        }
        if let Some(&idx) = self.index.get(base) {
            return Some(idx);
        }

        let mut best: Option<(f64, usize)> = None;
        for (form, idx) in &self.forms {
            let score = token_jaccard(base, form);
            if score >= JACCARD_THRESHOLD && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, *idx));
            }
        }
        if let Some((_, idx)) = best {
            return Some(idx);
        }

        let mut best: Option<(f64, usize)> = None;
        for (form, idx) in &self.forms {
            let score = strsim::jaro_winkler(base, form);
            if score >= JARO_WINKLER_THRESHOLD && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, *idx));
            }
        }
        best.map(|(_, idx)| idx)
    }
}

impl Default for PartOntology {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Splits off the first side word; the rest is returned re-joined.
fn split_side(folded: &str) -> (Option<Side>, String) {
    let mut side = None;
    let rest: Vec<&str> = folded
        .split(' ')
        .filter(|t| match Side::from_token(t) {
            Some(s) => {
                side.get_or_insert(s);
                false
            }
            None => !t.is_empty() && *t != "hand" && *t != "handed",
        })
        .collect();
    (side, rest.join(" "))
}
