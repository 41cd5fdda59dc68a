use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::error::AppResult;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the REST API binds to
    pub host: String,

    /// Port for the REST API server
    pub port: u16,

    /// Directory capture files are written to
    pub capture_dir: PathBuf,

    /// Capture tool executable
    pub capture_tool: String,

    /// Field-extraction tool executable
    pub extract_tool: String,

    /// Timeout of one extraction pass, seconds
    pub extract_timeout_secs: u64,

    /// Grace window between asking the capture tool to stop and killing it, seconds
    pub capture_grace_secs: u64,

    /// Keep capture files after processing
    pub keep_captures: bool,

    /// Number of tasks that may run at the same time
    pub max_concurrent_tasks: usize,

    /// Reasoning service settings
    pub reasoning: ReasoningConfig,

    /// Static classification tables and thresholds
    pub heuristics: HeuristicsConfig,
}

/// Reasoning service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Chat-completions endpoint, empty disables the service
    pub url: String,

    pub model: String,

    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Hard timeout for one call, seconds
    pub timeout_secs: u64,

    /// Threads of the isolated reasoning worker
    pub worker_threads: usize,

    /// Cap on the statistics dump embedded in the prompt, characters
    pub max_prompt_chars: usize,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8000/v1/chat/completions".to_string(),
            model: "default".to_string(),
            api_key: None,
            timeout_secs: 30,
            worker_threads: 2,
            max_prompt_chars: 8000,
        }
    }
}

/// Hand-maintained heuristics; thresholds are tunable, not a contract
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeuristicsConfig {
    /// Flows or hosts with fewer packets are never a positive signal
    pub min_packets: usize,

    pub website: WebsiteThresholds,

    pub interconnection: TierThresholds,

    pub game: GameHeuristics,

    /// Carrier label for the local network, overrides detection
    pub local_isp: Option<String>,

    /// Carrier CIDR tables
    pub carriers: Vec<CarrierRanges>,
}

/// Website-access thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsiteThresholds {
    pub rtt_warn_ms: f64,
    pub rtt_high_ms: f64,
    /// Fraction of requests, 0.10 = 10%
    pub error_rate: f64,
}

impl Default for WebsiteThresholds {
    fn default() -> Self {
        Self {
            rtt_warn_ms: 50.0,
            rtt_high_ms: 100.0,
            error_rate: 0.10,
        }
    }
}

/// Upper bounds for each quality tier; anything above `fair` is poor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub excellent: TierLimit,
    pub good: TierLimit,
    pub fair: TierLimit,
}

/// Latency, loss and jitter ceilings of one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierLimit {
    pub latency_ms: f64,
    /// Percent
    pub loss: f64,
    pub jitter_ms: f64,
}

impl TierThresholds {
    fn interconnection() -> Self {
        Self {
            excellent: TierLimit { latency_ms: 50.0, loss: 1.0, jitter_ms: f64::MAX },
            good: TierLimit { latency_ms: 100.0, loss: 2.0, jitter_ms: f64::MAX },
            fair: TierLimit { latency_ms: 200.0, loss: 5.0, jitter_ms: f64::MAX },
        }
    }

    fn game() -> Self {
        Self {
            excellent: TierLimit { latency_ms: 50.0, loss: 1.0, jitter_ms: 10.0 },
            good: TierLimit { latency_ms: 100.0, loss: 3.0, jitter_ms: 30.0 },
            fair: TierLimit { latency_ms: 150.0, loss: 5.0, jitter_ms: 50.0 },
        }
    }
}

impl Default for TierThresholds {
    fn default() -> Self {
        Self::interconnection()
    }
}

/// Game-traffic scoring
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameHeuristics {
    pub ports: Vec<u16>,
    pub port_ranges: Vec<(u16, u16)>,
    pub min_packet_size: f64,
    pub max_packet_size: f64,
    /// Packets per second that counts as game-like
    pub min_packet_rate: f64,
    pub min_udp_ratio: f64,
    /// Smaller direction's share of packets for a flow to count as bidirectional
    pub min_direction_share: f64,
    pub weight_port: u32,
    pub weight_udp: u32,
    pub weight_size: u32,
    pub weight_rate: u32,
    pub weight_bidirectional: u32,
    pub accept_score: u32,
    pub tiers: TierThresholds,
}

impl Default for GameHeuristics {
    fn default() -> Self {
        Self {
            ports: vec![
                3074, 3478, 3479, 3480, 5060, 5062, 6672, 7777, 9000, 10012, 17500, 27015,
                27016, 27017, 27036,
            ],
            port_ranges: vec![(5000, 5500), (7000, 8100), (10000, 10100), (27000, 27050)],
            min_packet_size: 50.0,
            max_packet_size: 800.0,
            min_packet_rate: 10.0,
            min_udp_ratio: 0.8,
            min_direction_share: 0.2,
            weight_port: 30,
            weight_udp: 25,
            weight_size: 20,
            weight_rate: 15,
            weight_bidirectional: 10,
            accept_score: 60,
            tiers: TierThresholds::game(),
        }
    }
}

/// CIDR ranges that belong to one carrier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierRanges {
    pub carrier: String,
    pub cidrs: Vec<String>,
}

fn ranges(carrier: &str, cidrs: &[&str]) -> CarrierRanges {
    CarrierRanges {
        carrier: carrier.to_string(),
        cidrs: cidrs.iter().map(|c| c.to_string()).collect(),
    }
}

impl Default for HeuristicsConfig {
    fn default() -> Self {
        Self {
            min_packets: 10,
            website: WebsiteThresholds::default(),
            interconnection: TierThresholds::interconnection(),
            game: GameHeuristics::default(),
            local_isp: None,
            carriers: vec![
                ranges(
                    "China Telecom",
                    &[
                        "58.32.0.0/11", "61.128.0.0/10", "113.64.0.0/10", "116.224.0.0/12",
                        "180.96.0.0/11", "183.0.0.0/10", "202.96.0.0/12", "219.128.0.0/11",
                        "222.64.0.0/11",
                    ],
                ),
                ranges(
                    "China Unicom",
                    &[
                        "61.48.0.0/13", "112.80.0.0/12", "123.112.0.0/12", "125.32.0.0/12",
                        "202.106.0.0/16", "221.192.0.0/11",
                    ],
                ),
                ranges(
                    "China Mobile",
                    &[
                        "39.128.0.0/10", "111.0.0.0/10", "112.0.0.0/10", "117.128.0.0/10",
                        "120.192.0.0/10", "183.192.0.0/10", "223.64.0.0/11",
                    ],
                ),
            ],
        }
    }
}

impl HeuristicsConfig {
    /// Load from a JSON file; missing keys keep their defaults
    pub fn load(path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            capture_dir: std::env::temp_dir().join("netdiag-captures"),
            capture_tool: crate::capture::backend::default_capture_tool().to_string(),
            extract_tool: "tshark".to_string(),
            extract_timeout_secs: 12,
            capture_grace_secs: 5,
            keep_captures: false,
            max_concurrent_tasks: 4,
            reasoning: ReasoningConfig::default(),
            heuristics: HeuristicsConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_heuristics_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"min_packets": 20, "website": {{"rtt_high_ms": 150.0}}}}"#).unwrap();

        let heuristics = HeuristicsConfig::load(file.path()).unwrap();
        assert_eq!(heuristics.min_packets, 20);
        assert_eq!(heuristics.website.rtt_high_ms, 150.0);
        assert_eq!(heuristics.website.rtt_warn_ms, 50.0);
        assert_eq!(heuristics.game.accept_score, 60);
        assert_eq!(heuristics.carriers.len(), 3);
    }

    #[test]
    fn api_key_is_never_serialized() {
        let mut config = AppConfig::default();
        config.reasoning.api_key = Some("sk-secret".to_string());
        let text = serde_json::to_string(&config).unwrap();
        assert!(!text.contains("sk-secret"));
    }
}
