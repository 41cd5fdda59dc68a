use std::net::IpAddr;

use crate::models::request::IssueType;

/// Capture filter for each issue type
pub fn base_filter(issue: IssueType) -> &'static str {
    match issue {
        IssueType::WebsiteAccess => "tcp port 80 or tcp port 443",
        IssueType::Interconnection => "tcp or udp",
        IssueType::GameLag => {
            "udp portrange 3074-3080 or udp portrange 3478-3480 or udp portrange 5000-5500 \
             or udp portrange 7000-8100 or udp portrange 9000-9100 or udp portrange 10000-10100 \
             or udp portrange 27000-27050 or tcp port 3074 or tcp portrange 27015-27030"
        }
        IssueType::General => "tcp or udp",
    }
}

/// Build the capture filter for a request.
///
/// A custom filter replaces everything else; otherwise the issue-type filter is
/// narrowed by target host and port.
pub fn build_filter(
    issue: IssueType,
    target_ip: Option<IpAddr>,
    target_port: Option<u16>,
    custom: Option<&str>,
) -> String {
    if let Some(custom) = custom.map(str::trim).filter(|c| !c.is_empty()) {
        return custom.to_string();
    }

    let mut filter = format!("({})", base_filter(issue));
    if let Some(ip) = target_ip {
        filter.push_str(&format!(" and host {}", ip));
    }
    if let Some(port) = target_port {
        filter.push_str(&format!(" and port {}", port));
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn website_filter_targets_http_ports() {
        assert_eq!(
            build_filter(IssueType::WebsiteAccess, None, None, None),
            "(tcp port 80 or tcp port 443)"
        );
    }

    #[test]
    fn narrowing_by_host_and_port() {
        let filter = build_filter(
            IssueType::Interconnection,
            Some("10.0.0.9".parse().unwrap()),
            Some(8443),
            None,
        );
        assert_eq!(filter, "(tcp or udp) and host 10.0.0.9 and port 8443");
    }

    #[test]
    fn custom_filter_overrides_everything() {
        let filter = build_filter(
            IssueType::GameLag,
            Some("10.0.0.9".parse().unwrap()),
            Some(1),
            Some("  icmp "),
        );
        assert_eq!(filter, "icmp");
    }

    #[test]
    fn blank_custom_filter_is_ignored() {
        let filter = build_filter(IssueType::General, None, None, Some("   "));
        assert_eq!(filter, "(tcp or udp)");
    }
}
