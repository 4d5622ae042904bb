//! Parse-then-validate handling of model output
//!
//! Model replies are loosely structured: JSON wrapped in Markdown fences,
//! surrounded by prose, or sprinkled with Python literals and trailing
//! commas. `parse_structured` strips and repairs what it can, then
//! validates by deserialising into the caller's schema. Anything that still
//! does not fit is a `ParseFailure` value.

use crate::domain::Severity;
use regex::Regex;
use serde::de::{DeserializeOwned, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

const EXCERPT_LEN: usize = 200;

#[derive(Debug, Clone, Error, PartialEq)]
#[error("Malformed model output: {reason}")]
pub struct ParseFailure {
    pub reason: String,
    pub excerpt: String,
}

impl ParseFailure {
    fn new(reason: impl Into<String>, text: &str) -> Self {
        Self {
            reason: reason.into(),
            excerpt: text.chars().take(EXCERPT_LEN).collect(),
        }
    }
}

pub fn extract_json_from_markdown(content: &str) -> &str {
    let trimmed = content.trim();

    if let Some(start_idx) = trimmed.find("```json") {
        let after_fence = &trimmed[start_idx + 7..];
        if let Some(end_idx) = after_fence.find("```") {
            return after_fence[..end_idx].trim();
        }
    }

    if let Some(start_idx) = trimmed.find("```") {
        let after_fence = &trimmed[start_idx + 3..];
        if let Some(end_idx) = after_fence.find("```") {
            return after_fence[..end_idx].trim();
        }
    }

    trimmed
}

/// Slices to the outermost JSON object or array.
fn slice_to_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let close = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

struct Repairs {
    true_lit: Regex,
    false_lit: Regex,
    none_lit: Regex,
    trailing_comma: Regex,
    line_comment: Regex,
}

fn repairs() -> &'static Repairs {
    static RE: OnceLock<Repairs> = OnceLock::new();
    RE.get_or_init(|| Repairs {
        true_lit: Regex::new(r"\bTrue\b").expect("valid regex"),
        false_lit: Regex::new(r"\bFalse\b").expect("valid regex"),
        none_lit: Regex::new(r"\bNone\b").expect("valid regex"),
        trailing_comma: Regex::new(r",\s*([}\]])").expect("valid regex"),
        line_comment: Regex::new(r"(?m)^\s*//.*$").expect("valid regex"),
    })
}

/// First pass: Python literals and trailing commas.
fn repair_literals(text: &str) -> String {
    let r = repairs();
    let s = r.true_lit.replace_all(text, "true");
    let s = r.false_lit.replace_all(&s, "false");
    let s = r.none_lit.replace_all(&s, "null");
    r.trailing_comma.replace_all(&s, "$1").into_owned()
}

/// Second pass: curly quotes and whole-line comments.
fn repair_punctuation(text: &str) -> String {
    let s = text
        .replace(['\u{201c}', '\u{201d}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let s = repairs().line_comment.replace_all(&s, "");
    repair_literals(&s)
}

pub fn parse_structured<T: DeserializeOwned>(text: &str) -> Result<T, ParseFailure> {
    let stripped = extract_json_from_markdown(text);
    if stripped.is_empty() {
        return Err(ParseFailure::new("empty response", text));
    }

    let mut last_error = match serde_json::from_str::<T>(stripped) {
        Ok(value) => return Ok(value),
        Err(e) => e.to_string(),
    };

    let Some(sliced) = slice_to_json(stripped) else {
        return Err(ParseFailure::new(
            format!("no JSON object found ({})", last_error),
            text,
        ));
    };

    let mut candidate = sliced.to_string();
    let passes: [fn(&str) -> String; 3] = [|s| s.to_string(), repair_literals, repair_punctuation];
    for pass in passes {
        candidate = pass(&candidate);
        match serde_json::from_str::<T>(&candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(ParseFailure::new(last_error, text))
}

/// Lenient field deserialisers for model-produced JSON.
pub mod lenient {
    use super::*;

    pub const DEFAULT_CONFIDENCE: f64 = 0.5;

    pub fn default_confidence() -> f64 {
        DEFAULT_CONFIDENCE
    }

    /// Numbers are clamped to `[0, 1]`; values in `(1, 100]` are read as
    /// percentages. Labels `high|medium|low` map to 0.95/0.7/0.4.
    pub fn parse_confidence(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64().map(scale_confidence),
            Value::String(s) => {
                let t = s.trim().trim_end_matches('%').trim().to_lowercase();
                match t.as_str() {
                    "high" | "very high" => Some(0.95),
                    "medium" | "moderate" => Some(0.7),
                    "low" => Some(0.4),
                    _ => t.parse::<f64>().ok().map(scale_confidence),
                }
            }
            _ => None,
        }
    }

    fn scale_confidence(v: f64) -> f64 {
        if !v.is_finite() {
            return DEFAULT_CONFIDENCE;
        }
        let v = if v > 1.0 && v <= 100.0 { v / 100.0 } else { v };
        v.clamp(0.0, 1.0)
    }

    pub fn confidence<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(parse_confidence(&value).unwrap_or(DEFAULT_CONFIDENCE))
    }

    pub fn severity<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Severity>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(value.as_str().and_then(Severity::normalize))
    }

    /// Four-digit years between 1900 and 2100, from numbers or strings such
    /// as `"2019"` or `"2019-2021"`.
    pub fn year<'de, D: Deserializer<'de>>(d: D) -> Result<Option<u16>, D::Error> {
        let value = Value::deserialize(d)?;
        let year = match &value {
            Value::Number(n) => n.as_u64().and_then(|y| u16::try_from(y).ok()),
            Value::String(s) => {
                let digits: String = s
                    .chars()
                    .skip_while(|c| !c.is_ascii_digit())
                    .take_while(|c| c.is_ascii_digit())
                    .collect();
                digits.parse::<u16>().ok()
            }
            _ => None,
        };
        Ok(year.filter(|y| (1900..=2100).contains(y)))
    }

    pub fn parse_number(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => {
                let cleaned: String = s
                    .chars()
                    .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
                    .collect();
                cleaned.parse::<f64>().ok()
            }
            _ => None,
        }
        .filter(|v| v.is_finite() && *v >= 0.0)
    }

    /// Non-negative number from a number or a string like `"$1,200"`.
    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(parse_number(&value))
    }

    /// Strings, with `null` and non-strings read as empty.
    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::String(s) => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        })
    }

    /// Keeps the list elements that fit `T` and drops the rest, so one
    /// malformed item never costs its siblings. A lone object is read as a
    /// one-element list; anything else that is not an array is empty.
    pub fn list<'de, D, T>(d: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let items = match Value::deserialize(d)? {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            _ => return Ok(Vec::new()),
        };

        Ok(items
            .into_iter()
            .enumerate()
            .filter_map(|(i, item)| match serde_json::from_value::<T>(item) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    debug!(index = i, error = %e, "Dropping malformed list item");
                    None
                }
            })
            .collect())
    }

    /// Index from a number or numeric string.
    pub fn index<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::Number(n) => n.as_u64().map(|v| v as usize),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }
}
