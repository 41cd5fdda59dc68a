use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One analyzer's structured output plus human-readable clues
///
/// Every metric the analyzer knows about is present, zero when there was no data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub metrics: BTreeMap<String, f64>,
    pub clues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<InsightReport>,
}

impl Insight {
    /// Zero-value form: every named metric present and zero
    pub fn zeroed(metric_names: &[&str]) -> Self {
        Self {
            metrics: metric_names
                .iter()
                .map(|name| (name.to_string(), 0.0))
                .collect(),
            clues: Vec::new(),
            report: None,
        }
    }

    pub fn set(&mut self, name: &str, value: f64) {
        let value = if value.is_finite() { value } else { 0.0 };
        self.metrics.insert(name.to_string(), value);
    }

    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }
}

/// Analyzer-specific sub-report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InsightReport {
    Websites {
        hosts: BTreeMap<String, WebsitePerformance>,
    },
    Interconnection {
        local_isp: String,
        pairings: Vec<IspPairing>,
    },
    Game {
        flows: Vec<GameFlowReport>,
    },
}

/// Performance of one website, keyed by host name in the report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsitePerformance {
    pub ips: BTreeSet<String>,
    pub packets: usize,
    pub rtt_avg_ms: f64,
    pub rtt_min_ms: f64,
    pub rtt_max_ms: f64,
    pub rtt_samples: usize,
    pub requests: usize,
    pub responses: usize,
    /// 4xx/5xx responses
    pub errors: usize,
    pub error_rate: f64,
}

impl WebsitePerformance {
    /// Exchanges seen, counting a response whose request predates the capture
    pub fn exchanges(&self) -> usize {
        self.requests.max(self.responses)
    }
}

/// Coarse connection quality tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    /// No latency samples, nothing to rate
    #[serde(rename = "no_data")]
    NoData,
    Excellent,
    Good,
    Fair,
    Poor,
}

/// Connections between the local ISP and one remote ISP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IspPairing {
    pub local_isp: String,
    pub remote_isp: String,
    pub cross_isp: bool,
    pub remote_ips: usize,
    pub packets: usize,
    pub avg_latency_ms: f64,
    /// Estimated loss, percent
    pub loss_rate: f64,
    pub quality: QualityTier,
}

/// One flow accepted as game traffic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameFlowReport {
    pub local: String,
    pub remote: String,
    pub protocol: String,
    pub score: u32,
    pub packets: usize,
    pub avg_size: f64,
    pub packets_per_sec: f64,
    pub carrier: String,
    pub latency_ms: f64,
    /// Estimated loss, percent
    pub loss_rate: f64,
    pub jitter_ms: f64,
    pub quality: QualityTier,
}
