use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use super::{local_isp, orient, quality_tier, tier_name, Analyzer};
use crate::analysis::carrier::{CarrierTable, LAN, UNKNOWN};
use crate::analysis::summary::{mean, ratio, sampled_mean};
use crate::models::config::{GameHeuristics, HeuristicsConfig};
use crate::models::insight::{GameFlowReport, Insight, InsightReport, QualityTier};
use crate::models::record::FieldRecord;

const METRICS: &[&str] = &[
    "candidate_flows",
    "game_flows",
    "avg_latency_ms",
    "avg_loss_rate",
    "avg_jitter_ms",
    "poor_flows",
];

/// Replies later than this are not paired with a request, seconds
const MAX_REPLY_GAP: f64 = 1.0;

/// An inter-arrival gap this many times the median counts as a lost packet
const LOSS_GAP_FACTOR: f64 = 3.0;

/// Scores flows for game-like traffic and rates the accepted ones
pub struct GameTrafficAnalyzer {
    heuristics: GameHeuristics,
    carriers: Arc<CarrierTable>,
    local_isp: Option<String>,
    min_packets: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct FlowKey {
    local: IpAddr,
    local_port: Option<u16>,
    remote: IpAddr,
    remote_port: Option<u16>,
}

#[derive(Default)]
struct FlowAccumulator {
    packets: usize,
    udp: usize,
    bytes: u64,
    outbound: usize,
    /// (timestamp, outbound)
    arrivals: Vec<(f64, bool)>,
    rtt: Vec<f64>,
}

/// Link measurements of one flow
#[derive(Debug, Default, PartialEq)]
struct LinkQuality {
    /// `None` when neither RTT samples nor paired replies exist
    latency_ms: Option<f64>,
    loss_rate: f64,
    jitter_ms: f64,
}

fn endpoint(ip: IpAddr, port: Option<u16>) -> String {
    match (ip, port) {
        (IpAddr::V6(v6), Some(p)) => format!("[{}]:{}", v6, p),
        (ip, Some(p)) => format!("{}:{}", ip, p),
        (ip, None) => ip.to_string(),
    }
}

impl GameTrafficAnalyzer {
    pub fn new(heuristics: &HeuristicsConfig, carriers: Arc<CarrierTable>) -> Self {
        Self {
            heuristics: heuristics.game.clone(),
            carriers,
            local_isp: heuristics.local_isp.clone(),
            min_packets: heuristics.min_packets,
        }
    }

    fn is_game_port(&self, port: Option<u16>) -> bool {
        let port = match port {
            Some(p) => p,
            None => return false,
        };
        self.heuristics.ports.contains(&port)
            || self
                .heuristics
                .port_ranges
                .iter()
                .any(|(low, high)| (*low..=*high).contains(&port))
    }

    fn score(&self, key: &FlowKey, flow: &FlowAccumulator, duration: f64) -> u32 {
        let h = &self.heuristics;
        let mut score = 0;

        if self.is_game_port(key.remote_port) || self.is_game_port(key.local_port) {
            score += h.weight_port;
        }
        if ratio(flow.udp as f64, flow.packets as f64) >= h.min_udp_ratio {
            score += h.weight_udp;
        }
        let avg_size = ratio(flow.bytes as f64, flow.packets as f64);
        if avg_size >= h.min_packet_size && avg_size <= h.max_packet_size {
            score += h.weight_size;
        }
        if ratio(flow.packets as f64, duration) >= h.min_packet_rate {
            score += h.weight_rate;
        }
        let minority = flow.outbound.min(flow.packets - flow.outbound);
        if ratio(minority as f64, flow.packets as f64) >= h.min_direction_share {
            score += h.weight_bidirectional;
        }
        score
    }
}

/// Latency from TCP RTT when present, otherwise from request/reply spacing;
/// loss from outsized inter-arrival gaps; jitter as mean interval variation.
fn measure(flow: &mut FlowAccumulator) -> LinkQuality {
    flow.arrivals
        .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let latency_ms = if !flow.rtt.is_empty() {
        sampled_mean(&flow.rtt)
    } else {
        let mut gaps = Vec::new();
        let mut pending: Option<f64> = None;
        for &(ts, outbound) in &flow.arrivals {
            if outbound {
                pending.get_or_insert(ts);
            } else if let Some(sent) = pending.take() {
                let gap = ts - sent;
                if gap >= 0.0 && gap <= MAX_REPLY_GAP {
                    gaps.push(gap * 1000.0);
                }
            }
        }
        sampled_mean(&gaps)
    };

    // Each direction keeps its own cadence
    let mut intervals = 0usize;
    let mut gaps = 0usize;
    let mut variation = Vec::new();
    for direction in [true, false] {
        let times: Vec<f64> = flow
            .arrivals
            .iter()
            .filter(|(_, outbound)| *outbound == direction)
            .map(|(ts, _)| *ts)
            .collect();
        let spacing: Vec<f64> = times.windows(2).map(|w| (w[1] - w[0]).max(0.0)).collect();
        if spacing.is_empty() {
            continue;
        }

        let mut sorted = spacing.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let median = sorted[sorted.len() / 2];
        if median > 0.0 {
            gaps += spacing
                .iter()
                .filter(|i| **i > median * LOSS_GAP_FACTOR)
                .count();
        }
        intervals += spacing.len();
        variation.extend(spacing.windows(2).map(|w| (w[1] - w[0]).abs() * 1000.0));
    }

    LinkQuality {
        latency_ms,
        loss_rate: ratio(gaps as f64, intervals as f64) * 100.0,
        jitter_ms: mean(&variation),
    }
}

impl Analyzer for GameTrafficAnalyzer {
    fn name(&self) -> &'static str {
        "game_traffic"
    }

    fn analyze(&self, records: &[FieldRecord]) -> Insight {
        let mut insight = Insight::zeroed(METRICS);
        if records.is_empty() {
            return insight;
        }

        let mut flows: HashMap<FlowKey, FlowAccumulator> = HashMap::new();
        for record in records {
            let oriented = match orient(record) {
                Some(o) => o,
                None => continue,
            };
            let key = FlowKey {
                local: oriented.local_ip,
                local_port: oriented.local_port,
                remote: oriented.remote_ip,
                remote_port: oriented.remote_port,
            };
            let flow = flows.entry(key).or_default();
            flow.packets += 1;
            flow.bytes += u64::from(record.size);
            if record.is_udp() {
                flow.udp += 1;
            }
            if oriented.outbound {
                flow.outbound += 1;
            }
            flow.arrivals.push((record.timestamp, oriented.outbound));
            if let Some(ms) = record.tcp.rtt_ms() {
                flow.rtt.push(ms);
            }
        }

        let local = local_isp(self.local_isp.as_deref(), &self.carriers, records);
        let mut candidates = 0usize;
        let mut accepted = Vec::new();

        for (key, mut flow) in flows {
            if flow.packets < self.min_packets {
                continue;
            }
            candidates += 1;

            let (first, last) = flow
                .arrivals
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (ts, _)| {
                    (lo.min(*ts), hi.max(*ts))
                });
            let duration = (last - first).max(0.0);

            let score = self.score(&key, &flow, duration);
            if score < self.heuristics.accept_score {
                continue;
            }

            let link = measure(&mut flow);
            let quality = quality_tier(
                link.latency_ms,
                link.loss_rate,
                link.jitter_ms,
                &self.heuristics.tiers,
            );
            let protocol = if flow.udp * 2 >= flow.packets { "UDP" } else { "TCP" };

            accepted.push(GameFlowReport {
                local: endpoint(key.local, key.local_port),
                remote: endpoint(key.remote, key.remote_port),
                protocol: protocol.to_string(),
                score,
                packets: flow.packets,
                avg_size: ratio(flow.bytes as f64, flow.packets as f64),
                packets_per_sec: ratio(flow.packets as f64, duration),
                carrier: self.carriers.label(key.remote),
                latency_ms: link.latency_ms.unwrap_or(0.0),
                loss_rate: link.loss_rate,
                jitter_ms: link.jitter_ms,
                quality,
            });
        }

        if accepted.is_empty() {
            insight.set("candidate_flows", candidates as f64);
            return insight;
        }
        accepted.sort_by(|a, b| b.packets.cmp(&a.packets).then_with(|| a.remote.cmp(&b.remote)));

        for flow in &accepted {
            if flow.quality == QualityTier::NoData {
                insight.clues.push(format!(
                    "Game traffic {} -> {} ({}, {}): no replies to measure latency, {:.1}% loss",
                    flow.local, flow.remote, flow.protocol, flow.carrier, flow.loss_rate
                ));
                continue;
            }
            insight.clues.push(format!(
                "Game traffic {} -> {} ({}, {}): {} quality, {:.1}ms latency, {:.1}% loss, {:.1}ms jitter",
                flow.local,
                flow.remote,
                flow.protocol,
                flow.carrier,
                tier_name(flow.quality),
                flow.latency_ms,
                flow.loss_rate,
                flow.jitter_ms
            ));

            let carrier_known = flow.carrier != UNKNOWN && flow.carrier != LAN;
            if carrier_known && local != UNKNOWN && flow.carrier != local && flow.quality >= QualityTier::Fair {
                insight.clues.push(format!(
                    "Game server {} is on {} while the local network is {}; prefer a {} server or region",
                    flow.remote, flow.carrier, local, local
                ));
            }
        }

        // Averages cover rated flows only
        let rated: Vec<&GameFlowReport> = accepted
            .iter()
            .filter(|f| f.quality != QualityTier::NoData)
            .collect();
        let pick = |f: fn(&GameFlowReport) -> f64| mean(&rated.iter().map(|r| f(r)).collect::<Vec<_>>());
        insight.set("candidate_flows", candidates as f64);
        insight.set("game_flows", accepted.len() as f64);
        insight.set("avg_latency_ms", pick(|f| f.latency_ms));
        insight.set("avg_loss_rate", pick(|f| f.loss_rate));
        insight.set("avg_jitter_ms", pick(|f| f.jitter_ms));
        insight.set(
            "poor_flows",
            accepted
                .iter()
                .filter(|f| f.quality == QualityTier::Poor)
                .count() as f64,
        );
        insight.report = Some(InsightReport::Game { flows: accepted });
        insight
    }
}
