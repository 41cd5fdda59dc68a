use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// The file produced by one time-bounded capture run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureArtifact {
    /// Where the capture tool wrote the file
    pub path: PathBuf,

    /// File size in bytes
    pub size: u64,

    /// Requested capture duration in seconds
    pub duration: u64,

    /// Interface the capture ran on
    pub interface: String,

    /// Capture filter expression that was applied
    pub filter: String,
}

/// Transport protocol of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

/// HTTP fields of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpFields {
    pub host: Option<String>,
    pub method: Option<String>,
    pub status: Option<u16>,
}

/// TCP timing and anomaly fields of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpTiming {
    /// ACK round-trip time, seconds
    pub ack_rtt: Option<f64>,
    /// Handshake round-trip time, seconds
    pub initial_rtt: Option<f64>,
    pub retransmission: bool,
    pub duplicate_ack: bool,
    pub fast_retransmission: bool,
}

impl TcpTiming {
    /// RTT sample in milliseconds, preferring the ACK RTT
    pub fn rtt_ms(&self) -> Option<f64> {
        self.ack_rtt
            .or(self.initial_rtt)
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|secs| secs * 1000.0)
    }
}

/// DNS fields of a record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DnsFields {
    pub query: Option<String>,
    pub is_response: bool,
    pub rcode: Option<u16>,
    /// Response time, seconds
    pub time: Option<f64>,
}

/// One parsed row of field-projection output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    /// Epoch seconds
    pub timestamp: f64,
    /// Frame length in bytes
    pub size: u32,
    /// Colon-separated protocol stack, e.g. `eth:ethertype:ip:tcp:tls`
    pub protocols: String,
    pub src_ip: Option<IpAddr>,
    pub dst_ip: Option<IpAddr>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub transport: Option<Transport>,
    pub tcp_stream: Option<u64>,
    pub tls_sni: Option<String>,
    pub http: HttpFields,
    pub tcp: TcpTiming,
    pub dns: DnsFields,
}

impl FieldRecord {
    /// Highest protocol of the stack, upper-cased
    pub fn top_protocol(&self) -> String {
        self.protocols
            .rsplit(':')
            .find(|p| !p.is_empty())
            .map(|p| p.to_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    /// Host name this record talks to, from HTTP `Host` or TLS SNI
    pub fn host_name(&self) -> Option<&str> {
        self.http
            .host
            .as_deref()
            .or(self.tls_sni.as_deref())
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    pub fn is_udp(&self) -> bool {
        match self.transport {
            Some(t) => t == Transport::Udp,
            None => self.protocols.split(':').any(|p| p == "udp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_protocol_is_last_stack_element() {
        let record = FieldRecord {
            protocols: "eth:ethertype:ip:tcp:tls".to_string(),
            ..Default::default()
        };
        assert_eq!(record.top_protocol(), "TLS");
        assert_eq!(FieldRecord::default().top_protocol(), "UNKNOWN");
    }

    #[test]
    fn rtt_prefers_ack_sample() {
        let timing = TcpTiming {
            ack_rtt: Some(0.020),
            initial_rtt: Some(0.5),
            ..Default::default()
        };
        assert!((timing.rtt_ms().unwrap() - 20.0).abs() < 1e-9);

        let fallback = TcpTiming {
            initial_rtt: Some(0.5),
            ..Default::default()
        };
        assert!((fallback.rtt_ms().unwrap() - 500.0).abs() < 1e-9);
    }

    #[test]
    fn host_name_prefers_http_host() {
        let record = FieldRecord {
            http: HttpFields {
                host: Some("example.com".into()),
                ..Default::default()
            },
            tls_sni: Some("cdn.example.com".into()),
            ..Default::default()
        };
        assert_eq!(record.host_name(), Some("example.com"));
    }
}
