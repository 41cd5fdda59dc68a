use serde::{Deserialize, Serialize};

/// A network interface that can be captured on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceInfo {
    /// Device system name passed to the capture tool
    pub name: String,

    /// Interface description, where the platform has one
    pub description: Option<String>,

    /// First IPv4 address, if any
    pub ipv4_address: Option<String>,

    /// MAC address, if any
    pub mac_address: Option<String>,

    pub is_loopback: bool,

    pub is_up: bool,
}

impl InterfaceInfo {
    /// Create an interface entry with just the device name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            ipv4_address: None,
            mac_address: None,
            is_loopback: false,
            is_up: true,
        }
    }

    pub fn with_ipv4(mut self, address: impl Into<String>) -> Self {
        self.ipv4_address = Some(address.into());
        self
    }

    pub fn with_loopback(mut self, is_loopback: bool) -> Self {
        self.is_loopback = is_loopback;
        self
    }

    pub fn with_up(mut self, is_up: bool) -> Self {
        self.is_up = is_up;
        self
    }

    /// Up and not loopback
    pub fn is_usable(&self) -> bool {
        self.is_up && !self.is_loopback
    }

    /// Name with the IPv4 address, for log lines
    pub fn formatted_display(&self) -> String {
        match &self.ipv4_address {
            Some(ip) => format!("{} ({})", self.name, ip),
            None => self.name.clone(),
        }
    }
}
