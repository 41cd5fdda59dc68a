use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::insight::Insight;

/// First and last packet timestamps of a capture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    /// Epoch seconds of the first packet
    pub start: f64,
    /// Epoch seconds of the last packet
    pub end: f64,
    /// `end - start`, seconds
    pub duration: f64,
}

/// Packet size distribution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeStats {
    pub min: u32,
    pub max: u32,
    pub avg: f64,
}

/// Packet count for one address or port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Talker {
    pub key: String,
    pub packets: usize,
}

/// Traffic volume statistics for a capture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicStats {
    /// Total number of packets
    pub total_packets: usize,

    /// Total bytes on the wire
    pub total_bytes: u64,

    /// Packets per top-level protocol
    pub protocols: BTreeMap<String, usize>,

    pub time_range: TimeRange,

    pub packet_size: SizeStats,

    /// Average data rate, bytes per second
    pub avg_rate: f64,

    /// Average packet rate, packets per second
    pub packet_rate: f64,

    /// Busiest destination addresses
    pub top_destinations: Vec<Talker>,

    /// Busiest destination ports
    pub top_ports: Vec<Talker>,
}

/// Reduced RTT sample list, milliseconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RttStats {
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub samples: usize,
}

/// TCP health counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcpQuality {
    pub retransmissions: usize,
    pub duplicate_acks: usize,
    pub fast_retransmissions: usize,
    pub rtt: RttStats,
}

/// DNS health counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DnsQuality {
    pub queries: usize,
    pub responses: usize,
    /// Responses with a non-zero response code
    pub failures: usize,
    /// Responses slower than one second
    pub slow_queries: usize,
    pub top_queries: Vec<Talker>,
}

/// Outcome of one extraction pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PassStatus {
    pub name: String,
    pub records: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

/// Output of the three issue-specific analyzers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueInsights {
    pub website_access: Insight,
    pub interconnection: Insight,
    pub game_traffic: Insight,
}

/// How the capture was taken
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureInfo {
    pub interface: String,
    pub filter: String,
    pub file_size: u64,
    pub duration: u64,
}

/// Everything the pipeline learned from one capture
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub capture: CaptureInfo,
    pub basic_stats: BasicStats,
    pub tcp_quality: TcpQuality,
    pub dns_quality: DnsQuality,
    pub insights: IssueInsights,
    pub extraction: Vec<PassStatus>,
}
