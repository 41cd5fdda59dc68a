use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use super::{local_isp, orient, quality_tier, tier_name, Analyzer};
use crate::analysis::carrier::{CarrierTable, LAN, UNKNOWN};
use crate::analysis::summary::{mean, ratio, sampled_mean};
use crate::models::config::{HeuristicsConfig, TierThresholds};
use crate::models::insight::{Insight, InsightReport, IspPairing, QualityTier};
use crate::models::record::FieldRecord;

const METRICS: &[&str] = &[
    "pairings",
    "cross_isp_pairings",
    "remote_ips",
    "avg_latency_ms",
    "avg_loss_rate",
    "poor_pairings",
];

/// Buckets traffic by local carrier versus remote carrier
pub struct InterconnectionAnalyzer {
    carriers: Arc<CarrierTable>,
    tiers: TierThresholds,
    local_isp: Option<String>,
    min_packets: usize,
}

#[derive(Default)]
struct PairingAccumulator {
    remote_ips: HashSet<IpAddr>,
    packets: usize,
    tcp_packets: usize,
    retransmissions: usize,
    rtt: Vec<f64>,
}

impl InterconnectionAnalyzer {
    pub fn new(heuristics: &HeuristicsConfig, carriers: Arc<CarrierTable>) -> Self {
        Self {
            carriers,
            tiers: heuristics.interconnection.clone(),
            local_isp: heuristics.local_isp.clone(),
            min_packets: heuristics.min_packets,
        }
    }
}

impl Analyzer for InterconnectionAnalyzer {
    fn name(&self) -> &'static str {
        "interconnection"
    }

    fn analyze(&self, records: &[FieldRecord]) -> Insight {
        let mut insight = Insight::zeroed(METRICS);
        if records.is_empty() {
            return insight;
        }

        let local = local_isp(self.local_isp.as_deref(), &self.carriers, records);

        let mut buckets: BTreeMap<String, PairingAccumulator> = BTreeMap::new();
        for record in records {
            let oriented = match orient(record) {
                Some(o) => o,
                None => continue,
            };
            let remote = self.carriers.label(oriented.remote_ip);
            if remote == LAN {
                continue;
            }

            let acc = buckets.entry(remote).or_default();
            acc.remote_ips.insert(oriented.remote_ip);
            acc.packets += 1;
            if !record.is_udp() {
                acc.tcp_packets += 1;
                if record.tcp.retransmission {
                    acc.retransmissions += 1;
                }
            }
            if let Some(ms) = record.tcp.rtt_ms() {
                acc.rtt.push(ms);
            }
        }

        if buckets.is_empty() {
            return insight;
        }

        let mut pairings = Vec::with_capacity(buckets.len());
        for (remote, acc) in buckets {
            let latency = sampled_mean(&acc.rtt);
            let avg_latency_ms = latency.unwrap_or(0.0);
            let loss_rate = ratio(acc.retransmissions as f64, acc.tcp_packets as f64) * 100.0;
            let cross_isp = remote != local || local == UNKNOWN;
            let quality = quality_tier(latency, loss_rate, 0.0, &self.tiers);

            if acc.packets >= self.min_packets && quality >= QualityTier::Fair {
                insight.clues.push(format!(
                    "{} -> {}: {} link quality, {:.1}ms average latency, {:.1}% estimated loss{}",
                    local,
                    remote,
                    tier_name(quality),
                    avg_latency_ms,
                    loss_rate,
                    if cross_isp && remote != UNKNOWN {
                        " (cross-carrier path)"
                    } else {
                        ""
                    }
                ));
            }

            pairings.push(IspPairing {
                local_isp: local.clone(),
                remote_isp: remote,
                cross_isp,
                remote_ips: acc.remote_ips.len(),
                packets: acc.packets,
                avg_latency_ms,
                loss_rate,
                quality,
            });
        }
        pairings.sort_by(|a, b| b.packets.cmp(&a.packets).then_with(|| a.remote_isp.cmp(&b.remote_isp)));

        // Averages cover rated pairings only
        let rated: Vec<&IspPairing> = pairings
            .iter()
            .filter(|p| p.quality != QualityTier::NoData)
            .collect();
        let latencies: Vec<f64> = rated.iter().map(|p| p.avg_latency_ms).collect();
        let losses: Vec<f64> = rated.iter().map(|p| p.loss_rate).collect();

        insight.set("pairings", pairings.len() as f64);
        insight.set(
            "cross_isp_pairings",
            pairings.iter().filter(|p| p.cross_isp).count() as f64,
        );
        insight.set(
            "remote_ips",
            pairings.iter().map(|p| p.remote_ips).sum::<usize>() as f64,
        );
        insight.set("avg_latency_ms", mean(&latencies));
        insight.set("avg_loss_rate", mean(&losses));
        insight.set(
            "poor_pairings",
            pairings
                .iter()
                .filter(|p| p.quality == QualityTier::Poor)
                .count() as f64,
        );
        insight.report = Some(InsightReport::Interconnection {
            local_isp: local,
            pairings,
        });
        insight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::insights::tests::flow_record;
    use crate::models::record::{TcpTiming, Transport};

    fn analyzer(local_isp: Option<&str>) -> InterconnectionAnalyzer {
        let mut heuristics = HeuristicsConfig::default();
        heuristics.local_isp = local_isp.map(str::to_string);
        let carriers = Arc::new(CarrierTable::from_config(&heuristics.carriers));
        InterconnectionAnalyzer::new(&heuristics, carriers)
    }

    fn tcp_to(remote: &str, rtt_secs: f64, retransmission: bool) -> FieldRecord {
        FieldRecord {
            tcp: TcpTiming {
                ack_rtt: Some(rtt_secs),
                retransmission,
                ..Default::default()
            },
            protocols: "eth:ethertype:ip:tcp".to_string(),
            ..flow_record("192.168.1.5", 50000, remote, 443)
        }
    }

    #[test]
    fn empty_input_is_zero_form() {
        let insight = analyzer(None).analyze(&[]);
        assert_eq!(insight.metrics.len(), METRICS.len());
        assert!(insight.metrics.values().all(|v| *v == 0.0));
    }

    #[test]
    fn lan_only_traffic_has_no_pairings() {
        let records = vec![flow_record("192.168.1.5", 50000, "192.168.1.1", 53)];
        let insight = analyzer(None).analyze(&records);
        assert_eq!(insight.metric("pairings"), 0.0);
    }

    #[test]
    fn cross_carrier_slow_path_is_flagged() {
        let mut records: Vec<_> = (0..20).map(|i| tcp_to("123.125.114.144", 0.250, i < 2)).collect();
        records.extend((0..10).map(|_| tcp_to("111.13.100.91", 0.020, false)));

        let insight = analyzer(Some("China Mobile")).analyze(&records);
        assert_eq!(insight.metric("pairings"), 2.0);
        assert_eq!(insight.metric("cross_isp_pairings"), 1.0);
        assert_eq!(insight.metric("poor_pairings"), 1.0);
        assert_eq!(insight.clues.len(), 1);
        assert!(insight.clues[0].starts_with("China Mobile -> China Unicom: poor"));
        assert!(insight.clues[0].contains("cross-carrier"));

        match insight.report {
            Some(InsightReport::Interconnection { local_isp, pairings }) => {
                assert_eq!(local_isp, "China Mobile");
                assert_eq!(pairings[0].remote_isp, "China Unicom");
                assert!((pairings[0].loss_rate - 10.0).abs() < 1e-9);
                assert_eq!(pairings[1].quality, QualityTier::Excellent);
                assert!(!pairings[1].cross_isp);
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[test]
    fn udp_only_pairing_is_unrated() {
        let records: Vec<_> = (0..30)
            .map(|_| FieldRecord {
                transport: Some(Transport::Udp),
                protocols: "eth:ethertype:ip:udp:data".to_string(),
                ..flow_record("192.168.1.5", 50000, "123.125.114.144", 27015)
            })
            .collect();

        let insight = analyzer(Some("China Mobile")).analyze(&records);
        assert_eq!(insight.metric("pairings"), 1.0);
        assert_eq!(insight.metric("poor_pairings"), 0.0);
        assert_eq!(insight.metric("avg_latency_ms"), 0.0);
        assert!(insight.clues.is_empty());
        match insight.report {
            Some(InsightReport::Interconnection { pairings, .. }) => {
                assert_eq!(pairings[0].remote_isp, "China Unicom");
                assert_eq!(pairings[0].quality, QualityTier::NoData);
            }
            other => panic!("unexpected report: {other:?}"),
        }
    }

    #[test]
    fn unrated_pairing_stays_out_of_averages() {
        let mut records: Vec<_> = (0..10).map(|_| tcp_to("111.13.100.91", 0.040, false)).collect();
        records.extend((0..10).map(|_| FieldRecord {
            transport: Some(Transport::Udp),
            protocols: "eth:ethertype:ip:udp".to_string(),
            ..flow_record("192.168.1.5", 50001, "8.8.8.8", 53)
        }));

        let insight = analyzer(Some("China Mobile")).analyze(&records);
        assert_eq!(insight.metric("pairings"), 2.0);
        assert!((insight.metric("avg_latency_ms") - 40.0).abs() < 1e-6);
    }

    #[test]
    fn sparse_pairings_are_not_flagged() {
        let records: Vec<_> = (0..3).map(|_| tcp_to("8.8.8.8", 0.400, true)).collect();
        let insight = analyzer(None).analyze(&records);
        assert_eq!(insight.metric("pairings"), 1.0);
        assert!(insight.clues.is_empty());
    }
}
