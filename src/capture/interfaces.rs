use log::{debug, info, warn};
use parking_lot::RwLock;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::models::interface::InterfaceInfo;
use crate::utils::error::{AppError, AppResult};

/// Interfaces probed, in order, when the caller does not name one
#[cfg(target_os = "macos")]
pub const DEFAULT_CANDIDATES: &[&str] = &["en0", "en1", "en2", "bridge0"];

#[cfg(target_os = "windows")]
pub const DEFAULT_CANDIDATES: &[&str] = &["Ethernet", "Wi-Fi", "WLAN"];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
pub const DEFAULT_CANDIDATES: &[&str] = &["eth0", "wlan0", "en0", "ens33", "enp0s3"];

/// Source of capturable network interfaces
pub trait InterfaceCatalog: Send + Sync {
    /// Every interface the platform reports
    fn list(&self) -> Vec<InterfaceInfo>;

    /// The interface used when the caller names none
    fn default_interface(&self) -> Option<InterfaceInfo> {
        pick_default(&self.list())
    }

    /// Validate a requested interface, falling back to the default
    fn resolve(&self, requested: Option<&str>) -> AppResult<InterfaceInfo> {
        let interfaces = self.list();

        if let Some(name) = requested {
            match interfaces.iter().find(|i| i.name == name) {
                Some(found) if found.is_up => return Ok(found.clone()),
                Some(_) => warn!("Interface {} is down, falling back to default", name),
                None => warn!("Interface {} not found, falling back to default", name),
            }
        }

        pick_default(&interfaces).ok_or_else(|| {
            AppError::InterfaceUnavailable(format!(
                "none of the candidate interfaces {:?} is present and up",
                DEFAULT_CANDIDATES
            ))
        })
    }
}

/// First candidate that is present and up, then any usable interface with an address
pub fn pick_default(interfaces: &[InterfaceInfo]) -> Option<InterfaceInfo> {
    for candidate in DEFAULT_CANDIDATES {
        if let Some(found) = interfaces
            .iter()
            .find(|i| i.name == *candidate && i.is_up)
        {
            return Some(found.clone());
        }
    }

    interfaces
        .iter()
        .find(|i| i.is_usable() && i.ipv4_address.is_some())
        .cloned()
}

/// Interfaces reported by the operating system, cached for a short while
pub struct SystemInterfaces {
    /// Cached interface info - to avoid repeated expensive calls
    cached: RwLock<Option<(Vec<InterfaceInfo>, Instant)>>,

    cache_duration: Duration,
}

impl SystemInterfaces {
    pub fn new() -> Self {
        Self {
            cached: RwLock::new(None),
            cache_duration: Duration::from_secs(60),
        }
    }

    fn fetch() -> Vec<InterfaceInfo> {
        info!("Fetching network interface information");

        pnet_datalink::interfaces()
            .into_iter()
            .map(|iface| {
                let mut info = InterfaceInfo::new(iface.name.clone())
                    .with_loopback(iface.is_loopback())
                    .with_up(iface.is_up());

                if !iface.description.is_empty() {
                    info.description = Some(iface.description.clone());
                }

                // First IPv4 address
                if let Some(ipv4) = iface.ips.iter().find_map(|net| match net.ip() {
                    IpAddr::V4(v4) => Some(v4),
                    IpAddr::V6(_) => None,
                }) {
                    info.ipv4_address = Some(ipv4.to_string());
                }

                info.mac_address = iface.mac.map(|mac| mac.to_string());
                info
            })
            .collect()
    }
}

impl Default for SystemInterfaces {
    fn default() -> Self {
        Self::new()
    }
}

impl InterfaceCatalog for SystemInterfaces {
    fn list(&self) -> Vec<InterfaceInfo> {
        {
            let cached = self.cached.read();
            if let Some((interfaces, fetched_at)) = &*cached {
                let elapsed = fetched_at.elapsed();
                if elapsed < self.cache_duration {
                    debug!(
                        "Using cached interface list ({} interfaces, {}s old)",
                        interfaces.len(),
                        elapsed.as_secs()
                    );
                    return interfaces.clone();
                }
            }
        }

        let interfaces = Self::fetch();
        *self.cached.write() = Some((interfaces.clone(), Instant::now()));
        interfaces
    }
}

/// Fixed interface list, for tests and for hosts where discovery is unreliable
pub struct StaticInterfaces(pub Vec<InterfaceInfo>);

impl InterfaceCatalog for StaticInterfaces {
    fn list(&self) -> Vec<InterfaceInfo> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> StaticInterfaces {
        StaticInterfaces(vec![
            InterfaceInfo::new("lo").with_loopback(true).with_ipv4("127.0.0.1"),
            InterfaceInfo::new("docker0").with_up(false),
            InterfaceInfo::new("uplink7").with_ipv4("192.168.1.20"),
        ])
    }

    #[test]
    fn named_interface_is_used_when_present() {
        let resolved = catalog().resolve(Some("lo")).unwrap();
        assert_eq!(resolved.name, "lo");
    }

    #[test]
    fn unknown_or_down_interface_falls_back_to_default() {
        assert_eq!(catalog().resolve(Some("nope0")).unwrap().name, "uplink7");
        assert_eq!(catalog().resolve(Some("docker0")).unwrap().name, "uplink7");
    }

    #[test]
    fn candidate_wins_over_other_usable_interfaces() {
        let candidate = DEFAULT_CANDIDATES[0];
        let catalog = StaticInterfaces(vec![
            InterfaceInfo::new("uplink7").with_ipv4("192.168.1.20"),
            InterfaceInfo::new(candidate),
        ]);
        assert_eq!(catalog.resolve(None).unwrap().name, candidate);
    }

    #[test]
    fn no_usable_interface_is_an_error() {
        let catalog = StaticInterfaces(vec![InterfaceInfo::new("lo").with_loopback(true)]);
        let err = catalog.resolve(None).unwrap_err();
        assert!(matches!(err, AppError::InterfaceUnavailable(_)));
    }
}
