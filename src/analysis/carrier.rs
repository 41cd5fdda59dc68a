use ipnetwork::IpNetwork;
use log::warn;
use std::net::IpAddr;

use crate::models::config::CarrierRanges;

/// Label for private, loopback and link-local addresses
pub const LAN: &str = "LAN";

/// Label for public addresses outside every table
pub const UNKNOWN: &str = "Unknown";

/// Best-effort carrier lookup from static CIDR tables
#[derive(Debug, Clone, Default)]
pub struct CarrierTable {
    entries: Vec<(IpNetwork, String)>,
}

impl CarrierTable {
    /// Build from configuration; unparsable ranges are logged and skipped
    pub fn from_config(ranges: &[CarrierRanges]) -> Self {
        let mut entries = Vec::new();
        for range in ranges {
            for cidr in &range.cidrs {
                match cidr.parse::<IpNetwork>() {
                    Ok(net) => entries.push((net, range.carrier.clone())),
                    Err(e) => warn!("Ignoring carrier range {} for {}: {}", cidr, range.carrier, e),
                }
            }
        }
        Self { entries }
    }

    /// Carrier owning `ip`, if a table lists it
    pub fn lookup(&self, ip: IpAddr) -> Option<&str> {
        self.entries
            .iter()
            .find(|(net, _)| net.contains(ip))
            .map(|(_, carrier)| carrier.as_str())
    }

    /// Carrier, `LAN` or `Unknown`
    pub fn label(&self, ip: IpAddr) -> String {
        if is_private(ip) {
            return LAN.to_string();
        }
        self.lookup(ip).unwrap_or(UNKNOWN).to_string()
    }
}

/// Addresses that never leave the local network
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_multicast()
                || v4.is_unspecified()
                // carrier-grade NAT, 100.64.0.0/10
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xc0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_multicast()
                || v6.is_unspecified()
                || (first & 0xfe00) == 0xfc00
                || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::config::HeuristicsConfig;

    fn table() -> CarrierTable {
        CarrierTable::from_config(&HeuristicsConfig::default().carriers)
    }

    #[test]
    fn built_in_tables_resolve_carriers() {
        let table = table();
        assert_eq!(table.lookup("202.96.128.86".parse().unwrap()), Some("China Telecom"));
        assert_eq!(table.lookup("123.125.114.144".parse().unwrap()), Some("China Unicom"));
        assert_eq!(table.lookup("111.13.100.91".parse().unwrap()), Some("China Mobile"));
        assert_eq!(table.lookup("8.8.8.8".parse().unwrap()), None);
    }

    #[test]
    fn labels_private_and_unknown() {
        let table = table();
        assert_eq!(table.label("192.168.1.10".parse().unwrap()), LAN);
        assert_eq!(table.label("100.70.1.1".parse().unwrap()), LAN);
        assert_eq!(table.label("fe80::1".parse().unwrap()), LAN);
        assert_eq!(table.label("1.1.1.1".parse().unwrap()), UNKNOWN);
    }

    #[test]
    fn bad_ranges_are_skipped() {
        let table = CarrierTable::from_config(&[CarrierRanges {
            carrier: "Test".to_string(),
            cidrs: vec!["not-a-cidr".to_string(), "10.0.0.0/8".to_string()],
        }]);
        assert_eq!(table.lookup("10.1.2.3".parse().unwrap()), Some("Test"));
    }
}
