use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;
use serde_json::Value;

use crate::models::diagnosis::{Diagnosis, Severity};
use crate::utils::error::AppError;
use crate::utils::logging::excerpt;

lazy_static! {
    /// Fragment patterns, narrowest first
    static ref FRAGMENT_PATTERNS: Vec<Regex> = [
        r"(?s)```json\s*(\{.*?\})\s*```",
        r"(?s)```[A-Za-z]*\s*(\{.*?\})\s*```",
        r#"(?s)(\{[^{}]*"diagnosis"[^{}]*\})"#,
        r"(?s)(\{.*\})",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect();
}

/// Confidence assumed when a structured reply omits it
const DEFAULT_CONFIDENCE: u8 = 50;

const NOT_PROVIDED: &str = "Not provided by the diagnosis service.";

/// What the reasoning service sent back
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Decoded into the fixed schema, strictly or after normalization
    Structured(Diagnosis),
    /// Nothing structured could be recovered
    Raw(String),
}

impl From<Reply> for Diagnosis {
    fn from(reply: Reply) -> Self {
        match reply {
            Reply::Structured(diagnosis) => diagnosis,
            Reply::Raw(text) => Diagnosis::from_unstructured(&text),
        }
    }
}

impl Reply {
    /// Decode a reply: strict first, then embedded fragments with widening patterns
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();

        if let Ok(diagnosis) = serde_json::from_str::<Diagnosis>(trimmed) {
            if let Some(diagnosis) = sanitize(diagnosis) {
                debug!("Diagnosis reply decoded strictly");
                return Reply::Structured(diagnosis);
            }
        }

        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if let Some(diagnosis) = normalize(&value) {
                info!("Diagnosis reply decoded via flexible parsing");
                return Reply::Structured(diagnosis);
            }
        }

        for pattern in FRAGMENT_PATTERNS.iter() {
            for capture in pattern.captures_iter(trimmed) {
                let fragment = match capture.get(1) {
                    Some(m) => m.as_str(),
                    None => continue,
                };
                if let Ok(value) = serde_json::from_str::<Value>(fragment) {
                    if let Some(diagnosis) = normalize(&value) {
                        info!("Diagnosis reply recovered from an embedded fragment");
                        return Reply::Structured(diagnosis);
                    }
                }
            }
        }

        let err = AppError::DiagnosisMalformedResponse(excerpt(trimmed, 120));
        warn!("{}", err);
        Reply::Raw(trimmed.to_string())
    }
}

fn filled(text: String) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        NOT_PROVIDED.to_string()
    } else {
        trimmed.to_string()
    }
}

fn non_blank(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Hold a schema-shaped reply to the same rules as a loosely shaped one:
/// confidence within 0 to 100 and no blank text fields.
///
/// A reply with neither a diagnosis nor a root cause is not a diagnosis.
fn sanitize(diagnosis: Diagnosis) -> Option<Diagnosis> {
    if diagnosis.diagnosis.trim().is_empty() && diagnosis.root_cause.trim().is_empty() {
        return None;
    }

    Some(Diagnosis {
        diagnosis: filled(diagnosis.diagnosis),
        severity: diagnosis.severity,
        root_cause: filled(diagnosis.root_cause),
        key_findings: non_blank(diagnosis.key_findings),
        recommendations: non_blank(diagnosis.recommendations),
        diagnostic_clues: non_blank(diagnosis.diagnostic_clues),
        technical_details: filled(diagnosis.technical_details),
        confidence: diagnosis.confidence.min(100),
        next_steps: filled(diagnosis.next_steps),
    })
}

/// Look a field up under its camelCase or snake_case name
fn field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    value
        .get(camel)
        .or_else(|| value.get(snake))
        .filter(|v| !v.is_null())
}

fn as_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => return None,
        Value::Array(items) => items
            .iter()
            .filter_map(as_text)
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Lists arrive as arrays, scalars or not at all; always hand back a list
fn as_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(as_text).collect(),
        Some(Value::String(s)) => s
            .lines()
            .map(|l| l.trim().trim_start_matches(['-', '*']).trim())
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        Some(other) => as_text(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn as_confidence(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => {
            // Fractions like 0.85 mean 85%
            let v = if v > 0.0 && v < 1.0 { v * 100.0 } else { v };
            v.round().clamp(0.0, 100.0) as u8
        }
        _ => DEFAULT_CONFIDENCE,
    }
}

/// Map a loosely shaped object onto the fixed schema.
///
/// An object that carries none of the text fields is not a diagnosis.
fn normalize(value: &Value) -> Option<Diagnosis> {
    if !value.is_object() {
        return None;
    }

    let diagnosis = field(value, "diagnosis", "diagnosis")
        .or_else(|| field(value, "summary", "summary"))
        .and_then(as_text);
    let root_cause = field(value, "rootCause", "root_cause").and_then(as_text);
    if diagnosis.is_none() && root_cause.is_none() {
        return None;
    }

    Some(Diagnosis {
        diagnosis: diagnosis.unwrap_or_else(|| NOT_PROVIDED.to_string()),
        severity: field(value, "severity", "severity")
            .and_then(as_text)
            .map(|s| Severity::parse(&s))
            .unwrap_or(Severity::Unknown),
        root_cause: root_cause.unwrap_or_else(|| NOT_PROVIDED.to_string()),
        key_findings: as_list(field(value, "keyFindings", "key_findings")),
        recommendations: as_list(field(value, "recommendations", "recommendations")),
        diagnostic_clues: as_list(field(value, "diagnosticClues", "diagnostic_clues")),
        technical_details: field(value, "technicalDetails", "technical_details")
            .and_then(as_text)
            .unwrap_or_else(|| NOT_PROVIDED.to_string()),
        confidence: as_confidence(field(value, "confidence", "confidence")),
        next_steps: field(value, "nextSteps", "next_steps")
            .and_then(as_text)
            .unwrap_or_else(|| NOT_PROVIDED.to_string()),
    })
}
