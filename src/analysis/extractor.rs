use futures::future::join_all;
use log::{debug, info, trace, warn};
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::models::record::{CaptureArtifact, FieldRecord, Transport};
use crate::models::request::IssueType;
use crate::models::stats::PassStatus;
use crate::utils::error::{AppError, AppResult};
use crate::utils::logging::excerpt;

/// A packet field the extraction tool can print
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldName {
    FrameTime,
    FrameLen,
    FrameProtocols,
    IpSrc,
    IpDst,
    Ipv6Src,
    Ipv6Dst,
    TcpSrcPort,
    TcpDstPort,
    UdpSrcPort,
    UdpDstPort,
    TcpStream,
    HttpHost,
    HttpMethod,
    HttpStatus,
    TlsSni,
    AckRtt,
    InitialRtt,
    Retransmission,
    DuplicateAck,
    FastRetransmission,
    DnsQuery,
    DnsResponse,
    DnsRcode,
    DnsTime,
}

/// The value did not have the expected type; the line is dropped
#[derive(Debug)]
struct BadValue;

impl FieldName {
    /// Field name as the extraction tool knows it
    pub fn tool_field(&self) -> &'static str {
        match self {
            FieldName::FrameTime => "frame.time_epoch",
            FieldName::FrameLen => "frame.len",
            FieldName::FrameProtocols => "frame.protocols",
            FieldName::IpSrc => "ip.src",
            FieldName::IpDst => "ip.dst",
            FieldName::Ipv6Src => "ipv6.src",
            FieldName::Ipv6Dst => "ipv6.dst",
            FieldName::TcpSrcPort => "tcp.srcport",
            FieldName::TcpDstPort => "tcp.dstport",
            FieldName::UdpSrcPort => "udp.srcport",
            FieldName::UdpDstPort => "udp.dstport",
            FieldName::TcpStream => "tcp.stream",
            FieldName::HttpHost => "http.host",
            FieldName::HttpMethod => "http.request.method",
            FieldName::HttpStatus => "http.response.code",
            FieldName::TlsSni => "tls.handshake.extensions_server_name",
            FieldName::AckRtt => "tcp.analysis.ack_rtt",
            FieldName::InitialRtt => "tcp.analysis.initial_rtt",
            FieldName::Retransmission => "tcp.analysis.retransmission",
            FieldName::DuplicateAck => "tcp.analysis.duplicate_ack",
            FieldName::FastRetransmission => "tcp.analysis.fast_retransmission",
            FieldName::DnsQuery => "dns.qry.name",
            FieldName::DnsResponse => "dns.flags.response",
            FieldName::DnsRcode => "dns.flags.rcode",
            FieldName::DnsTime => "dns.time",
        }
    }

    /// Fields that must be present on every line of a pass that asks for them
    fn is_required(&self) -> bool {
        matches!(self, FieldName::FrameTime | FieldName::FrameLen)
    }

    /// Store `value` into `record`. Empty optional values leave the record untouched.
    fn apply(&self, value: &str, record: &mut FieldRecord) -> Result<(), BadValue> {
        let value = value.trim();
        if value.is_empty() {
            return if self.is_required() { Err(BadValue) } else { Ok(()) };
        }

        match self {
            FieldName::FrameTime => record.timestamp = parse_num(value)?,
            FieldName::FrameLen => record.size = parse_num(value)?,
            FieldName::FrameProtocols => record.protocols = value.to_string(),
            FieldName::IpSrc | FieldName::Ipv6Src => {
                if record.src_ip.is_none() {
                    record.src_ip = Some(parse_ip(value)?);
                }
            }
            FieldName::IpDst | FieldName::Ipv6Dst => {
                if record.dst_ip.is_none() {
                    record.dst_ip = Some(parse_ip(value)?);
                }
            }
            FieldName::TcpSrcPort => {
                record.src_port = Some(parse_num(value)?);
                record.transport = Some(Transport::Tcp);
            }
            FieldName::TcpDstPort => {
                record.dst_port = Some(parse_num(value)?);
                record.transport = Some(Transport::Tcp);
            }
            FieldName::UdpSrcPort => {
                if record.transport != Some(Transport::Tcp) {
                    record.src_port = Some(parse_num(value)?);
                    record.transport = Some(Transport::Udp);
                }
            }
            FieldName::UdpDstPort => {
                if record.transport != Some(Transport::Tcp) {
                    record.dst_port = Some(parse_num(value)?);
                    record.transport = Some(Transport::Udp);
                }
            }
            FieldName::TcpStream => record.tcp_stream = Some(parse_num(value)?),
            FieldName::HttpHost => record.http.host = Some(value.to_string()),
            FieldName::HttpMethod => record.http.method = Some(value.to_string()),
            FieldName::HttpStatus => record.http.status = Some(parse_num(value)?),
            FieldName::TlsSni => record.tls_sni = Some(value.to_string()),
            FieldName::AckRtt => record.tcp.ack_rtt = Some(parse_num(value)?),
            FieldName::InitialRtt => record.tcp.initial_rtt = Some(parse_num(value)?),
            FieldName::Retransmission => record.tcp.retransmission = parse_flag(value),
            FieldName::DuplicateAck => record.tcp.duplicate_ack = parse_flag(value),
            FieldName::FastRetransmission => record.tcp.fast_retransmission = parse_flag(value),
            FieldName::DnsQuery => record.dns.query = Some(value.to_string()),
            FieldName::DnsResponse => record.dns.is_response = parse_flag(value),
            FieldName::DnsRcode => record.dns.rcode = Some(parse_num(value)?),
            FieldName::DnsTime => record.dns.time = Some(parse_num(value)?),
        }
        Ok(())
    }
}

fn parse_num<T: std::str::FromStr>(value: &str) -> Result<T, BadValue> {
    value.parse().map_err(|_| BadValue)
}

fn parse_ip(value: &str) -> Result<IpAddr, BadValue> {
    value.parse().map_err(|_| BadValue)
}

/// Presence flags print as `1`, `True`, or the field's own text; `0`/`False` mean unset
fn parse_flag(value: &str) -> bool {
    !matches!(value.to_ascii_lowercase().as_str(), "0" | "false")
}

/// Logical extraction passes over one capture file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    Basic,
    Behavior,
    Performance,
    Anomalies,
    Http,
    IssueSpecific,
}

impl PassKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassKind::Basic => "basic",
            PassKind::Behavior => "behavior",
            PassKind::Performance => "performance",
            PassKind::Anomalies => "anomalies",
            PassKind::Http => "http",
            PassKind::IssueSpecific => "issue_specific",
        }
    }
}

/// One invocation of the extraction tool
#[derive(Debug, Clone)]
pub struct ExtractionPass {
    pub kind: PassKind,
    /// Display filter, empty for every packet
    pub display_filter: String,
    pub fields: Vec<FieldName>,
}

impl ExtractionPass {
    fn new(kind: PassKind, display_filter: &str, fields: &[FieldName]) -> Self {
        Self {
            kind,
            display_filter: display_filter.to_string(),
            fields: fields.to_vec(),
        }
    }
}

const ADDRESS_FIELDS: &[FieldName] = &[
    FieldName::IpSrc,
    FieldName::IpDst,
    FieldName::Ipv6Src,
    FieldName::Ipv6Dst,
];

fn with_addresses(head: &[FieldName], tail: &[FieldName]) -> Vec<FieldName> {
    head.iter()
        .chain(ADDRESS_FIELDS)
        .chain(tail)
        .copied()
        .collect()
}

/// Display filter of the issue-specific pass
fn issue_display_filter(issue: IssueType) -> &'static str {
    match issue {
        IssueType::WebsiteAccess => "tcp.port == 80 || tcp.port == 443 || dns",
        IssueType::Interconnection => "tcp || udp",
        IssueType::GameLag => "udp || tcp",
        IssueType::General => "tcp || udp",
    }
}

/// The six passes run over every capture
pub fn standard_passes(issue: IssueType) -> Vec<ExtractionPass> {
    use FieldName::*;

    let basic = with_addresses(
        &[FrameTime, FrameLen, FrameProtocols],
        &[TcpSrcPort, TcpDstPort, UdpSrcPort, UdpDstPort],
    );
    let behavior = with_addresses(
        &[FrameTime, FrameLen],
        &[DnsQuery, DnsResponse, DnsRcode, DnsTime],
    );
    let performance = with_addresses(&[FrameTime, FrameLen], &[TcpStream, AckRtt, InitialRtt]);
    let anomalies = with_addresses(
        &[FrameTime, FrameLen],
        &[TcpStream, Retransmission, DuplicateAck, FastRetransmission],
    );
    let http = with_addresses(
        &[FrameTime, FrameLen],
        &[TcpSrcPort, TcpDstPort, TcpStream, HttpHost, HttpMethod, HttpStatus, TlsSni, AckRtt, InitialRtt],
    );
    let issue_fields = with_addresses(
        &[FrameTime, FrameLen, FrameProtocols],
        &[
            TcpSrcPort, TcpDstPort, UdpSrcPort, UdpDstPort, TcpStream, HttpHost, HttpMethod,
            HttpStatus, TlsSni, AckRtt, InitialRtt, Retransmission,
        ],
    );

    vec![
        ExtractionPass::new(PassKind::Basic, "", &basic),
        ExtractionPass::new(PassKind::Behavior, "dns", &behavior),
        ExtractionPass::new(
            PassKind::Performance,
            "tcp.analysis.ack_rtt || tcp.analysis.initial_rtt",
            &performance,
        ),
        ExtractionPass::new(
            PassKind::Anomalies,
            "tcp.analysis.retransmission || tcp.analysis.duplicate_ack || tcp.analysis.fast_retransmission",
            &anomalies,
        ),
        ExtractionPass::new(
            PassKind::Http,
            "http.request || http.response || tls.handshake.extensions_server_name",
            &http,
        ),
        ExtractionPass::new(PassKind::IssueSpecific, issue_display_filter(issue), &issue_fields),
    ]
}

/// Turn tab-delimited tool output into records, skipping malformed lines
pub fn parse_rows(stdout: &str, fields: &[FieldName]) -> Vec<FieldRecord> {
    let mut records = Vec::new();
    let mut skipped = 0usize;

    for line in stdout.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let columns: Vec<&str> = line.split('\t').collect();
        if columns.len() != fields.len() {
            skipped += 1;
            continue;
        }

        let mut record = FieldRecord::default();
        let parsed = fields
            .iter()
            .zip(&columns)
            .try_for_each(|(field, value)| field.apply(value, &mut record));
        match parsed {
            Ok(()) => records.push(record),
            Err(_) => {
                trace!("Skipping malformed line: {}", line);
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        debug!("Skipped {} malformed lines", skipped);
    }
    records
}

/// Result of one pass; a failed pass has no records
#[derive(Debug, Clone)]
pub struct PassOutput {
    pub kind: PassKind,
    pub records: Vec<FieldRecord>,
    pub failure: Option<String>,
}

/// Results of every pass over one capture
#[derive(Debug, Clone, Default)]
pub struct ExtractionReport {
    pub outputs: Vec<PassOutput>,
}

impl ExtractionReport {
    /// Records of a pass; empty when the pass failed or did not run
    pub fn records(&self, kind: PassKind) -> &[FieldRecord] {
        self.outputs
            .iter()
            .find(|o| o.kind == kind)
            .map(|o| o.records.as_slice())
            .unwrap_or(&[])
    }

    pub fn statuses(&self) -> Vec<PassStatus> {
        self.outputs
            .iter()
            .map(|o| PassStatus {
                name: o.kind.as_str().to_string(),
                records: o.records.len(),
                failure: o.failure.clone(),
            })
            .collect()
    }

    /// Every pass failed: the tool itself is unusable
    pub fn all_failed(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(|o| o.failure.is_some())
    }

    pub fn first_failure(&self) -> Option<&str> {
        self.outputs.iter().find_map(|o| o.failure.as_deref())
    }
}

/// Runs the field-extraction tool over capture files
pub struct FieldExtractor {
    tool: String,
    timeout: Duration,
}

impl FieldExtractor {
    pub fn new(tool: &str, timeout: Duration) -> Self {
        Self {
            tool: tool.to_string(),
            timeout,
        }
    }

    fn args(&self, artifact: &CaptureArtifact, pass: &ExtractionPass) -> Vec<String> {
        let mut args = vec![
            "-r".to_string(),
            artifact.path.display().to_string(),
            "-n".to_string(),
            "-T".to_string(),
            "fields".to_string(),
            "-E".to_string(),
            "separator=/t".to_string(),
            "-E".to_string(),
            "occurrence=f".to_string(),
            "-E".to_string(),
            "header=n".to_string(),
        ];
        if !pass.display_filter.is_empty() {
            args.push("-Y".to_string());
            args.push(pass.display_filter.clone());
        }
        for field in &pass.fields {
            args.push("-e".to_string());
            args.push(field.tool_field().to_string());
        }
        args
    }

    /// Run one pass. Never retried; the caller decides how to degrade.
    pub async fn extract(
        &self,
        artifact: &CaptureArtifact,
        pass: &ExtractionPass,
    ) -> AppResult<Vec<FieldRecord>> {
        let failure = |reason: String| AppError::ExtractionPassFailure {
            pass: pass.kind.as_str().to_string(),
            reason,
        };

        let mut cmd = Command::new(&self.tool);
        cmd.args(self.args(artifact, pass))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(failure(format!("failed to launch {}: {}", self.tool, e))),
            Err(_) => {
                return Err(failure(format!(
                    "timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(failure(format!(
                "{} exited with {:?}: {}",
                self.tool,
                output.status.code(),
                excerpt(stderr.trim(), 300)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_rows(&stdout, &pass.fields))
    }

    /// Run every pass; each one degrades to empty on its own
    pub async fn extract_all(&self, artifact: &CaptureArtifact, issue: IssueType) -> ExtractionReport {
        let passes = standard_passes(issue);
        let runs = passes.iter().map(|pass| async move {
            match self.extract(artifact, pass).await {
                Ok(records) => {
                    info!("Extraction pass {}: {} records", pass.kind.as_str(), records.len());
                    PassOutput {
                        kind: pass.kind,
                        records,
                        failure: None,
                    }
                }
                Err(e) => {
                    warn!("{}", e);
                    PassOutput {
                        kind: pass.kind,
                        records: Vec::new(),
                        failure: Some(e.to_string()),
                    }
                }
            }
        });

        ExtractionReport {
            outputs: join_all(runs).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn artifact() -> CaptureArtifact {
        CaptureArtifact {
            path: PathBuf::from("/tmp/does-not-matter.pcap"),
            size: 100,
            duration: 5,
            interface: "eth0".to_string(),
            filter: "tcp".to_string(),
        }
    }

    fn basic_fields() -> Vec<FieldName> {
        standard_passes(IssueType::General)
            .into_iter()
            .find(|p| p.kind == PassKind::Basic)
            .unwrap()
            .fields
    }

    #[test]
    fn parses_basic_rows() {
        let out = "1700000000.100000000\t74\teth:ethertype:ip:tcp\t192.168.1.2\t93.184.216.34\t\t\t51000\t443\t\t\n\
                   1700000000.200000000\t120\teth:ethertype:ip:udp:dns\t192.168.1.2\t8.8.8.8\t\t\t\t\t53000\t53\n";
        let records = parse_rows(out, &basic_fields());
        assert_eq!(records.len(), 2);

        assert_eq!(records[0].size, 74);
        assert_eq!(records[0].dst_port, Some(443));
        assert_eq!(records[0].transport, Some(Transport::Tcp));
        assert_eq!(records[1].top_protocol(), "DNS");
        assert_eq!(records[1].transport, Some(Transport::Udp));
        assert_eq!(records[1].dst_ip, Some("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn ipv6_addresses_fill_in() {
        let out = "1.0\t90\teth:ipv6:udp\t\t\t2001:db8::1\t2001:db8::2\t\t\t5000\t6000\n";
        let records = parse_rows(out, &basic_fields());
        assert_eq!(records[0].src_ip, Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let out = "garbage line\n\
                   notanumber\t74\teth:ip:tcp\t1.1.1.1\t2.2.2.2\t\t\t1\t2\t\t\n\
                   1.0\t\teth:ip:tcp\t1.1.1.1\t2.2.2.2\t\t\t1\t2\t\t\n\
                   1.0\t60\teth:ip:tcp\tnot-an-ip\t2.2.2.2\t\t\t1\t2\t\t\n\
                   1.0\t60\teth:ip:tcp\t1.1.1.1\t2.2.2.2\t\t\t1\t2\t\t\n";
        let records = parse_rows(out, &basic_fields());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].size, 60);
    }

    #[test]
    fn flags_and_timings_parse() {
        let fields = [
            FieldName::FrameTime,
            FieldName::FrameLen,
            FieldName::AckRtt,
            FieldName::Retransmission,
            FieldName::DuplicateAck,
        ];
        let records = parse_rows("2.5\t1500\t0.045000000\t1\t0\n", &fields);
        assert_eq!(records[0].tcp.ack_rtt, Some(0.045));
        assert!(records[0].tcp.retransmission);
        assert!(!records[0].tcp.duplicate_ack);
    }

    #[test]
    fn every_pass_requests_timestamp_and_size() {
        for pass in standard_passes(IssueType::WebsiteAccess) {
            assert_eq!(pass.fields[0], FieldName::FrameTime, "{:?}", pass.kind);
            assert_eq!(pass.fields[1], FieldName::FrameLen, "{:?}", pass.kind);
        }
        assert_eq!(standard_passes(IssueType::GameLag).len(), 6);
    }

    #[test]
    fn args_include_display_filter_and_fields() {
        let extractor = FieldExtractor::new("tshark", Duration::from_secs(10));
        let pass = &standard_passes(IssueType::General)[1];
        let args = extractor.args(&artifact(), pass);
        assert!(args.windows(2).any(|w| w[0] == "-Y" && w[1] == "dns"));
        assert!(args.windows(2).any(|w| w[0] == "-e" && w[1] == "dns.flags.rcode"));
    }

    #[tokio::test]
    async fn missing_tool_degrades_every_pass() {
        let extractor = FieldExtractor::new("/nonexistent/tshark", Duration::from_secs(2));
        let report = extractor.extract_all(&artifact(), IssueType::WebsiteAccess).await;

        assert_eq!(report.outputs.len(), 6);
        assert!(report.all_failed());
        assert!(report.records(PassKind::Basic).is_empty());
        for status in report.statuses() {
            assert_eq!(status.records, 0);
            assert!(status.failure.unwrap().contains("failed to launch"));
        }
    }
}
