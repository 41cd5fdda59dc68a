use std::collections::{BTreeMap, HashMap};

use super::{orient, Analyzer, InsightInput};
use crate::analysis::summary::{ratio, rtt_stats};
use crate::models::config::{HeuristicsConfig, WebsiteThresholds};
use crate::models::insight::{Insight, InsightReport, WebsitePerformance};
use crate::models::record::FieldRecord;

const METRICS: &[&str] = &[
    "hosts",
    "total_requests",
    "total_errors",
    "avg_rtt_ms",
    "slow_hosts",
    "error_hosts",
    "rtt_samples",
];

/// Per-website performance, keyed on HTTP `Host` or TLS server name
pub struct WebsiteAccessAnalyzer {
    thresholds: WebsiteThresholds,
    min_packets: usize,
}

#[derive(Default)]
struct HostAccumulator {
    perf: WebsitePerformance,
    rtt: Vec<f64>,
}

impl WebsiteAccessAnalyzer {
    pub fn new(heuristics: &HeuristicsConfig) -> Self {
        Self {
            thresholds: heuristics.website.clone(),
            min_packets: heuristics.min_packets,
        }
    }

    fn clues_for(&self, host: &str, perf: &WebsitePerformance) -> Vec<String> {
        let mut clues = Vec::new();
        if perf.packets < self.min_packets {
            return clues;
        }

        if perf.rtt_samples > 0 {
            if perf.rtt_avg_ms > self.thresholds.rtt_high_ms {
                clues.push(format!(
                    "{}: high latency, average RTT {:.1}ms over {} samples",
                    host, perf.rtt_avg_ms, perf.rtt_samples
                ));
            } else if perf.rtt_avg_ms > self.thresholds.rtt_warn_ms {
                clues.push(format!(
                    "{}: elevated latency, average RTT {:.1}ms",
                    host, perf.rtt_avg_ms
                ));
            }
        }

        if perf.exchanges() > 0 && perf.error_rate > self.thresholds.error_rate {
            clues.push(format!(
                "{}: {} of {} requests failed ({:.0}% error rate)",
                host,
                perf.errors,
                perf.exchanges(),
                perf.error_rate * 100.0
            ));
        }
        clues
    }
}

impl WebsiteAccessAnalyzer {
    /// Attribute `flows` to hosts named in `names`.
    ///
    /// Packet, RTT and address figures come from the flow records; request,
    /// response and error counts come from the name records only.
    pub fn analyze_with_names(&self, flows: &[FieldRecord], names: &[FieldRecord]) -> Insight {
        let mut insight = Insight::zeroed(METRICS);

        // Names are only present on a few packets of a connection; carry them over the stream
        let mut stream_hosts: HashMap<u64, String> = HashMap::new();
        for record in names.iter().chain(flows) {
            if let (Some(stream), Some(host)) = (record.tcp_stream, record.host_name()) {
                stream_hosts
                    .entry(stream)
                    .or_insert_with(|| host.to_lowercase());
            }
        }
        let host_of = |record: &FieldRecord| {
            record
                .host_name()
                .map(str::to_lowercase)
                .or_else(|| record.tcp_stream.and_then(|s| stream_hosts.get(&s).cloned()))
        };

        let mut hosts: BTreeMap<String, HostAccumulator> = BTreeMap::new();
        for record in flows {
            let host = match host_of(record) {
                Some(host) => host,
                None => continue,
            };

            let acc = hosts.entry(host).or_default();
            acc.perf.packets += 1;
            if let Some(oriented) = orient(record) {
                acc.perf.ips.insert(oriented.remote_ip.to_string());
            }
            if let Some(ms) = record.tcp.rtt_ms() {
                acc.rtt.push(ms);
            }
        }

        for record in names {
            let host = match host_of(record) {
                Some(host) => host,
                None => continue,
            };

            let acc = hosts.entry(host).or_default();
            if record.http.method.is_some() {
                acc.perf.requests += 1;
            }
            if let Some(status) = record.http.status {
                acc.perf.responses += 1;
                if status >= 400 {
                    acc.perf.errors += 1;
                }
            }
        }

        if hosts.is_empty() {
            return insight;
        }

        let mut all_rtt = Vec::new();
        let mut table = BTreeMap::new();
        let (mut requests, mut errors, mut slow, mut failing) = (0usize, 0usize, 0usize, 0usize);

        for (host, mut acc) in hosts {
            let rtt = rtt_stats(&acc.rtt);
            acc.perf.rtt_avg_ms = rtt.avg_ms;
            acc.perf.rtt_min_ms = rtt.min_ms;
            acc.perf.rtt_max_ms = rtt.max_ms;
            acc.perf.rtt_samples = rtt.samples;
            acc.perf.error_rate = ratio(acc.perf.errors as f64, acc.perf.exchanges() as f64);

            let clues = self.clues_for(&host, &acc.perf);
            if clues.iter().any(|c| c.contains("latency")) {
                slow += 1;
            }
            if clues.iter().any(|c| c.contains("error rate")) {
                failing += 1;
            }
            insight.clues.extend(clues);

            requests += acc.perf.requests;
            errors += acc.perf.errors;
            all_rtt.extend(acc.rtt);
            table.insert(host, acc.perf);
        }

        insight.set("hosts", table.len() as f64);
        insight.set("total_requests", requests as f64);
        insight.set("total_errors", errors as f64);
        insight.set("avg_rtt_ms", rtt_stats(&all_rtt).avg_ms);
        insight.set("slow_hosts", slow as f64);
        insight.set("error_hosts", failing as f64);
        insight.set("rtt_samples", all_rtt.len() as f64);
        insight.report = Some(InsightReport::Websites { hosts: table });
        insight
    }
}

impl Analyzer for WebsiteAccessAnalyzer {
    fn name(&self) -> &'static str {
        "website_access"
    }

    fn analyze(&self, records: &[FieldRecord]) -> Insight {
        self.analyze_with_names(records, records)
    }

    /// Names come from the dedicated pass; without it, from the flow records themselves
    fn analyze_input(&self, input: &InsightInput) -> Insight {
        if input.names.is_empty() {
            self.analyze(&input.flows)
        } else {
            self.analyze_with_names(&input.flows, &input.names)
        }
    }
}
