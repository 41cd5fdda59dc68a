use std::collections::{BTreeMap, HashMap};

use crate::models::record::FieldRecord;
use crate::models::stats::{BasicStats, DnsQuality, RttStats, SizeStats, TcpQuality, Talker, TimeRange};

/// DNS responses slower than this are counted as slow, seconds
pub const SLOW_DNS_SECS: f64 = 1.0;

const TOP_N: usize = 10;

/// `num / den`, or 0 when the denominator is 0
pub fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

pub fn mean(values: &[f64]) -> f64 {
    ratio(values.iter().sum(), values.len() as f64)
}

/// Mean of a non-empty sample set
pub fn sampled_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(mean(values))
    }
}

/// Reduce RTT samples (milliseconds) to avg/min/max/count
pub fn rtt_stats(samples: &[f64]) -> RttStats {
    if samples.is_empty() {
        return RttStats::default();
    }
    RttStats {
        avg_ms: mean(samples),
        min_ms: samples.iter().copied().fold(f64::INFINITY, f64::min),
        max_ms: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        samples: samples.len(),
    }
}

/// Highest counts first, ties by key
pub fn top_n(counts: HashMap<String, usize>, n: usize) -> Vec<Talker> {
    let mut talkers: Vec<Talker> = counts
        .into_iter()
        .map(|(key, packets)| Talker { key, packets })
        .collect();
    talkers.sort_by(|a, b| b.packets.cmp(&a.packets).then_with(|| a.key.cmp(&b.key)));
    talkers.truncate(n);
    talkers
}

/// Traffic volume, protocol mix, timing and size statistics
pub fn summarize(records: &[FieldRecord]) -> BasicStats {
    if records.is_empty() {
        return BasicStats::default();
    }

    let mut protocols: BTreeMap<String, usize> = BTreeMap::new();
    let mut destinations: HashMap<String, usize> = HashMap::new();
    let mut ports: HashMap<String, usize> = HashMap::new();
    let mut total_bytes = 0u64;
    let mut min_size = u32::MAX;
    let mut max_size = 0u32;
    let mut start = f64::INFINITY;
    let mut end = f64::NEG_INFINITY;

    for record in records {
        *protocols.entry(record.top_protocol()).or_insert(0) += 1;
        if let Some(ip) = record.dst_ip {
            *destinations.entry(ip.to_string()).or_insert(0) += 1;
        }
        if let Some(port) = record.dst_port {
            *ports.entry(port.to_string()).or_insert(0) += 1;
        }

        total_bytes += u64::from(record.size);
        min_size = min_size.min(record.size);
        max_size = max_size.max(record.size);
        start = start.min(record.timestamp);
        end = end.max(record.timestamp);
    }

    let total_packets = records.len();
    let duration = (end - start).max(0.0);

    BasicStats {
        total_packets,
        total_bytes,
        protocols,
        time_range: TimeRange {
            start,
            end,
            duration,
        },
        packet_size: SizeStats {
            min: min_size,
            max: max_size,
            avg: ratio(total_bytes as f64, total_packets as f64),
        },
        avg_rate: ratio(total_bytes as f64, duration),
        packet_rate: ratio(total_packets as f64, duration),
        top_destinations: top_n(destinations, TOP_N),
        top_ports: top_n(ports, TOP_N),
    }
}

/// Retransmission, duplicate-ACK and RTT counters
pub fn tcp_quality<'a, I>(records: I) -> TcpQuality
where
    I: IntoIterator<Item = &'a FieldRecord>,
{
    let mut quality = TcpQuality::default();
    let mut samples = Vec::new();

    for record in records {
        if record.tcp.retransmission {
            quality.retransmissions += 1;
        }
        if record.tcp.duplicate_ack {
            quality.duplicate_acks += 1;
        }
        if record.tcp.fast_retransmission {
            quality.fast_retransmissions += 1;
        }
        if let Some(ms) = record.tcp.rtt_ms() {
            samples.push(ms);
        }
    }

    quality.rtt = rtt_stats(&samples);
    quality
}

/// Query, failure and slow-response counters
pub fn dns_quality(records: &[FieldRecord]) -> DnsQuality {
    let mut quality = DnsQuality::default();
    let mut names: HashMap<String, usize> = HashMap::new();

    for record in records {
        let dns = &record.dns;
        if dns.query.is_none() && dns.rcode.is_none() && !dns.is_response {
            continue;
        }

        if dns.is_response {
            quality.responses += 1;
            if dns.rcode.unwrap_or(0) != 0 {
                quality.failures += 1;
            }
            if dns.time.map(|t| t > SLOW_DNS_SECS).unwrap_or(false) {
                quality.slow_queries += 1;
            }
        } else {
            quality.queries += 1;
            if let Some(name) = &dns.query {
                *names.entry(name.to_lowercase()).or_insert(0) += 1;
            }
        }
    }

    quality.top_queries = top_n(names, TOP_N);
    quality
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::{DnsFields, TcpTiming};

    fn packet(ts: f64, size: u32, protocols: &str) -> FieldRecord {
        FieldRecord {
            timestamp: ts,
            size,
            protocols: protocols.to_string(),
            dst_ip: Some("93.184.216.34".parse().unwrap()),
            dst_port: Some(443),
            ..Default::default()
        }
    }

    #[test]
    fn empty_input_is_all_zero() {
        let stats = summarize(&[]);
        assert_eq!(stats, BasicStats::default());
        assert_eq!(tcp_quality(&Vec::<FieldRecord>::new()), TcpQuality::default());
        assert_eq!(dns_quality(&[]), DnsQuality::default());
    }

    #[test]
    fn summarizes_traffic() {
        let records = vec![
            packet(10.0, 100, "eth:ip:tcp"),
            packet(12.0, 300, "eth:ip:tcp:tls"),
            packet(14.0, 200, "eth:ip:tcp:tls"),
        ];
        let stats = summarize(&records);

        assert_eq!(stats.total_packets, 3);
        assert_eq!(stats.total_bytes, 600);
        assert_eq!(stats.protocols.get("TLS"), Some(&2));
        assert_eq!(stats.protocols.get("TCP"), Some(&1));
        assert_eq!(stats.time_range.duration, 4.0);
        assert_eq!(stats.packet_size.min, 100);
        assert_eq!(stats.packet_size.max, 300);
        assert_eq!(stats.packet_size.avg, 200.0);
        assert_eq!(stats.avg_rate, 150.0);
        assert_eq!(stats.top_ports[0].key, "443");
        assert_eq!(stats.top_destinations[0].packets, 3);
    }

    #[test]
    fn single_packet_has_zero_rate() {
        let stats = summarize(&[packet(5.0, 60, "eth:ip:udp")]);
        assert_eq!(stats.time_range.duration, 0.0);
        assert_eq!(stats.avg_rate, 0.0);
        assert_eq!(stats.packet_rate, 0.0);
    }

    #[test]
    fn counts_tcp_anomalies_and_rtt() {
        let records = vec![
            FieldRecord {
                tcp: TcpTiming {
                    retransmission: true,
                    ..Default::default()
                },
                ..Default::default()
            },
            FieldRecord {
                tcp: TcpTiming {
                    duplicate_ack: true,
                    ack_rtt: Some(0.010),
                    ..Default::default()
                },
                ..Default::default()
            },
            FieldRecord {
                tcp: TcpTiming {
                    fast_retransmission: true,
                    retransmission: true,
                    ack_rtt: Some(0.030),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        let quality = tcp_quality(&records);
        assert_eq!(quality.retransmissions, 2);
        assert_eq!(quality.duplicate_acks, 1);
        assert_eq!(quality.fast_retransmissions, 1);
        assert_eq!(quality.rtt.samples, 2);
        assert!((quality.rtt.avg_ms - 20.0).abs() < 1e-9);
        assert!((quality.rtt.min_ms - 10.0).abs() < 1e-9);
        assert!((quality.rtt.max_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn counts_dns_failures_and_slow_answers() {
        let dns = |query: &str, is_response: bool, rcode: u16, time: Option<f64>| FieldRecord {
            dns: DnsFields {
                query: Some(query.to_string()),
                is_response,
                rcode: Some(rcode),
                time,
            },
            ..Default::default()
        };
        let records = vec![
            dns("example.com", false, 0, None),
            dns("example.com", true, 0, Some(0.02)),
            dns("missing.test", false, 0, None),
            dns("missing.test", true, 3, Some(1.5)),
        ];
        let quality = dns_quality(&records);
        assert_eq!(quality.queries, 2);
        assert_eq!(quality.responses, 2);
        assert_eq!(quality.failures, 1);
        assert_eq!(quality.slow_queries, 1);
        assert_eq!(quality.top_queries.len(), 2);
    }

    #[test]
    fn ratio_guards_zero_denominator() {
        assert_eq!(ratio(5.0, 0.0), 0.0);
        assert_eq!(mean(&[]), 0.0);
    }
}
