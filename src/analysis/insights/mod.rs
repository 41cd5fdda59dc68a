pub mod game;
pub mod interconnection;
pub mod website;

use log::debug;
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use crate::analysis::carrier::{is_private, CarrierTable, UNKNOWN};
use crate::models::config::{HeuristicsConfig, TierThresholds};
use crate::models::insight::{Insight, QualityTier};
use crate::models::record::FieldRecord;
use crate::models::stats::IssueInsights;
use crate::utils::error::{AppError, AppResult};

pub use game::GameTrafficAnalyzer;
pub use interconnection::InterconnectionAnalyzer;
pub use website::WebsiteAccessAnalyzer;

/// An issue-specific analyzer over one capture's records.
///
/// Analyzers only read their input, so several may run over the same records at once.
pub trait Analyzer: Send + Sync {
    fn name(&self) -> &'static str;

    fn analyze(&self, records: &[FieldRecord]) -> Insight;

    /// Analyze a whole capture. Most analyzers only need the flow records.
    fn analyze_input(&self, input: &InsightInput) -> Insight {
        self.analyze(&input.flows)
    }
}

/// The extracted records an analysis run works from
#[derive(Debug, Clone, Default)]
pub struct InsightInput {
    /// Per-packet flow records
    pub flows: Vec<FieldRecord>,
    /// Packets carrying an HTTP request, response or TLS server name
    pub names: Vec<FieldRecord>,
}

/// The three analyzers, run side by side
pub struct InsightSuite {
    website: Arc<dyn Analyzer>,
    interconnection: Arc<dyn Analyzer>,
    game: Arc<dyn Analyzer>,
}

impl InsightSuite {
    pub fn new(heuristics: &HeuristicsConfig) -> Self {
        let carriers = Arc::new(CarrierTable::from_config(&heuristics.carriers));
        Self {
            website: Arc::new(WebsiteAccessAnalyzer::new(heuristics)),
            interconnection: Arc::new(InterconnectionAnalyzer::new(heuristics, carriers.clone())),
            game: Arc::new(GameTrafficAnalyzer::new(heuristics, carriers)),
        }
    }

    /// Run every analyzer concurrently on blocking workers
    pub async fn run(&self, input: Arc<InsightInput>) -> AppResult<IssueInsights> {
        let spawn = |analyzer: Arc<dyn Analyzer>| {
            let input = input.clone();
            tokio::task::spawn_blocking(move || {
                let insight = analyzer.analyze_input(&input);
                debug!(
                    "{} analyzer: {} clues from {} records",
                    analyzer.name(),
                    insight.clues.len(),
                    input.flows.len()
                );
                insight
            })
        };

        let (website, interconnection, game) = tokio::join!(
            spawn(self.website.clone()),
            spawn(self.interconnection.clone()),
            spawn(self.game.clone())
        );

        let joined = |result: Result<Insight, tokio::task::JoinError>| {
            result.map_err(|e| AppError::InternalStateError(format!("analyzer crashed: {}", e)))
        };

        Ok(IssueInsights {
            website_access: joined(website)?,
            interconnection: joined(interconnection)?,
            game_traffic: joined(game)?,
        })
    }
}

/// A record seen from the capturing host
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Oriented {
    pub local_ip: IpAddr,
    pub local_port: Option<u16>,
    pub remote_ip: IpAddr,
    pub remote_port: Option<u16>,
    /// Sent by the local host
    pub outbound: bool,
}

/// Decide which side of a record is local.
///
/// A private address is local; between two addresses of the same kind the
/// higher (ephemeral) port is the client, and the client is local.
pub(crate) fn orient(record: &FieldRecord) -> Option<Oriented> {
    let (src, dst) = (record.src_ip?, record.dst_ip?);
    let outbound = match (is_private(src), is_private(dst)) {
        (true, false) => true,
        (false, true) => false,
        _ => match (record.src_port, record.dst_port) {
            (Some(sp), Some(dp)) => sp >= dp,
            _ => true,
        },
    };

    Some(if outbound {
        Oriented {
            local_ip: src,
            local_port: record.src_port,
            remote_ip: dst,
            remote_port: record.dst_port,
            outbound,
        }
    } else {
        Oriented {
            local_ip: dst,
            local_port: record.dst_port,
            remote_ip: src,
            remote_port: record.src_port,
            outbound,
        }
    })
}

/// Carrier of the local network: configured, or the most common carrier of
/// public local addresses, or `Unknown`
pub(crate) fn local_isp(
    configured: Option<&str>,
    carriers: &CarrierTable,
    records: &[FieldRecord],
) -> String {
    if let Some(label) = configured.map(str::trim).filter(|l| !l.is_empty()) {
        return label.to_string();
    }

    let mut counts: HashMap<&str, usize> = HashMap::new();
    for oriented in records.iter().filter_map(orient) {
        if is_private(oriented.local_ip) {
            continue;
        }
        if let Some(carrier) = carriers.lookup(oriented.local_ip) {
            *counts.entry(carrier).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(carrier, _)| carrier.to_string())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

/// Place latency (ms), loss (%) and jitter (ms) into a tier
/// Tier of a link; `None` latency means no samples were seen
pub(crate) fn quality_tier(
    latency: Option<f64>,
    loss: f64,
    jitter: f64,
    tiers: &TierThresholds,
) -> QualityTier {
    let latency = match latency {
        Some(ms) => ms,
        None => return QualityTier::NoData,
    };
    let within = |limit: &crate::models::config::TierLimit| {
        latency <= limit.latency_ms && loss <= limit.loss && jitter <= limit.jitter_ms
    };
    if within(&tiers.excellent) {
        QualityTier::Excellent
    } else if within(&tiers.good) {
        QualityTier::Good
    } else if within(&tiers.fair) {
        QualityTier::Fair
    } else {
        QualityTier::Poor
    }
}

pub(crate) fn tier_name(tier: QualityTier) -> &'static str {
    match tier {
        QualityTier::NoData => "unrated",
        QualityTier::Excellent => "excellent",
        QualityTier::Good => "good",
        QualityTier::Fair => "fair",
        QualityTier::Poor => "poor",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn flow_record(src: &str, sport: u16, dst: &str, dport: u16) -> FieldRecord {
        FieldRecord {
            src_ip: Some(src.parse().unwrap()),
            dst_ip: Some(dst.parse().unwrap()),
            src_port: Some(sport),
            dst_port: Some(dport),
            ..Default::default()
        }
    }

    #[test]
    fn private_side_is_local() {
        let out = orient(&flow_record("192.168.1.5", 50000, "93.184.216.34", 443)).unwrap();
        assert!(out.outbound);
        assert_eq!(out.remote_port, Some(443));

        let back = orient(&flow_record("93.184.216.34", 443, "192.168.1.5", 50000)).unwrap();
        assert!(!back.outbound);
        assert_eq!(back.local_ip, "192.168.1.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn ephemeral_port_is_local_between_public_hosts() {
        let rec = flow_record("203.0.113.7", 443, "198.51.100.2", 51515);
        let oriented = orient(&rec).unwrap();
        assert_eq!(oriented.local_ip, "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn configured_local_isp_wins() {
        let table = CarrierTable::default();
        assert_eq!(local_isp(Some("China Mobile"), &table, &[]), "China Mobile");
        assert_eq!(local_isp(None, &table, &[]), UNKNOWN);
    }

    #[test]
    fn local_isp_inferred_from_public_local_address() {
        let table = CarrierTable::from_config(&HeuristicsConfig::default().carriers);
        let records = vec![flow_record("111.13.100.91", 50000, "8.8.8.8", 53)];
        assert_eq!(local_isp(None, &table, &records), "China Mobile");
    }

    #[test]
    fn tiers_follow_thresholds() {
        let tiers = HeuristicsConfig::default().interconnection;
        assert_eq!(quality_tier(Some(20.0), 0.0, 0.0, &tiers), QualityTier::Excellent);
        assert_eq!(quality_tier(Some(80.0), 0.5, 0.0, &tiers), QualityTier::Good);
        assert_eq!(quality_tier(Some(40.0), 4.0, 0.0, &tiers), QualityTier::Fair);
        assert_eq!(quality_tier(Some(400.0), 0.0, 0.0, &tiers), QualityTier::Poor);
    }

    #[test]
    fn missing_latency_is_never_rated() {
        let tiers = HeuristicsConfig::default().interconnection;
        assert_eq!(quality_tier(None, 0.0, 0.0, &tiers), QualityTier::NoData);
        assert!(QualityTier::NoData < QualityTier::Fair);
        assert_eq!(
            serde_json::to_value(QualityTier::NoData).unwrap(),
            serde_json::json!("no_data")
        );
    }

    #[tokio::test]
    async fn suite_returns_zero_forms_for_empty_input() {
        let suite = InsightSuite::new(&HeuristicsConfig::default());
        let insights = suite.run(Arc::new(InsightInput::default())).await.unwrap();

        for insight in [
            &insights.website_access,
            &insights.interconnection,
            &insights.game_traffic,
        ] {
            assert!(!insight.metrics.is_empty());
            assert!(insight.metrics.values().all(|v| *v == 0.0));
            assert!(insight.clues.is_empty());
        }
    }
}
