use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::logging::excerpt;

/// Highest confidence a degraded diagnosis may claim
pub const DEGRADED_MAX_CONFIDENCE: u8 = 60;

/// How bad the diagnosed problem is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
    Unknown,
}

impl Severity {
    /// Lenient parse, anything unrecognised is `Unknown`
    pub fn parse(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "low" | "minor" => Severity::Low,
            "medium" | "moderate" => Severity::Medium,
            "high" | "major" => Severity::High,
            "critical" | "severe" => Severity::Critical,
            _ => Severity::Unknown,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
            Severity::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Final fixed-schema output of the diagnosis stage
///
/// Every field is always populated, degraded results included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    /// One-sentence summary
    pub diagnosis: String,
    pub severity: Severity,
    pub root_cause: String,
    pub key_findings: Vec<String>,
    pub recommendations: Vec<String>,
    pub diagnostic_clues: Vec<String>,
    pub technical_details: String,
    /// 0 to 100
    pub confidence: u8,
    pub next_steps: String,
}

impl Diagnosis {
    /// The reasoning service answered, but not with anything structured
    pub fn from_unstructured(raw: &str) -> Self {
        let echo = excerpt(raw.trim(), 200);
        let details = excerpt(raw.trim(), 2000);
        Self {
            diagnosis: if echo.is_empty() {
                "The diagnosis service returned an empty answer.".to_string()
            } else {
                format!("Unstructured diagnosis: {}", echo)
            },
            severity: Severity::Unknown,
            root_cause: "Could not be determined from the diagnosis service reply.".to_string(),
            key_findings: Vec::new(),
            recommendations: vec![
                "Review the raw reply in the technical details.".to_string(),
                "Retry the capture to obtain a structured diagnosis.".to_string(),
            ],
            diagnostic_clues: Vec::new(),
            technical_details: format!("Raw response: {}", details),
            confidence: 30,
            next_steps: "Retry the diagnosis or inspect the captured statistics manually."
                .to_string(),
        }
    }

    /// The reasoning service could not be used at all
    pub fn unavailable(reason: &str, clues: Vec<String>) -> Self {
        Self {
            diagnosis: "Automatic diagnosis is unavailable; capture statistics are still attached."
                .to_string(),
            severity: Severity::Unknown,
            root_cause: "Unknown, the diagnosis service could not be reached.".to_string(),
            key_findings: Vec::new(),
            recommendations: vec![
                "Check the diagnosis service configuration and connectivity.".to_string(),
            ],
            diagnostic_clues: clues,
            technical_details: reason.to_string(),
            confidence: 0,
            next_steps: "Inspect the capture summary or retry once the service is reachable."
                .to_string(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.severity == Severity::Unknown && self.confidence <= DEGRADED_MAX_CONFIDENCE
    }
}
