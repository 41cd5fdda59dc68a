use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::utils::error::{AppError, AppResult};

/// Shortest capture a caller may request, in seconds
pub const MIN_DURATION_SECS: u64 = 1;

/// Longest capture a caller may request, in seconds
pub const MAX_DURATION_SECS: u64 = 300;

/// The kind of problem the user wants diagnosed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    /// Slow or failing websites
    WebsiteAccess,
    /// Cross-provider (ISP to ISP) connectivity
    Interconnection,
    /// Laggy online games
    GameLag,
    /// Anything else
    #[serde(other)]
    General,
}

impl IssueType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueType::WebsiteAccess => "website_access",
            IssueType::Interconnection => "interconnection",
            IssueType::GameLag => "game_lag",
            IssueType::General => "general",
        }
    }
}

impl fmt::Display for IssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enable_diagnosis() -> bool {
    true
}

/// A diagnostic request as received on `POST /capture`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    /// What kind of problem to look for
    pub issue_type: IssueType,

    /// Capture duration in seconds
    pub duration: u64,

    /// Interface to capture on (default interface when absent)
    #[serde(default)]
    pub interface: Option<String>,

    /// Narrow the capture to one remote host
    #[serde(default, rename = "targetIP", alias = "targetIp")]
    pub target_ip: Option<IpAddr>,

    /// Narrow the capture to one port
    #[serde(default)]
    pub target_port: Option<u16>,

    /// Capture filter that replaces the issue-type filter entirely
    #[serde(default)]
    pub custom_filter: Option<String>,

    /// Free-text description of the problem, passed to the reasoning service
    #[serde(default)]
    pub user_description: Option<String>,

    /// Run the diagnosis stage after extraction
    #[serde(default = "default_enable_diagnosis")]
    pub enable_diagnosis: bool,
}

impl CaptureRequest {
    /// Create a request with the given issue type and duration and no narrowing
    pub fn new(issue_type: IssueType, duration: u64) -> Self {
        Self {
            issue_type,
            duration,
            interface: None,
            target_ip: None,
            target_port: None,
            custom_filter: None,
            user_description: None,
            enable_diagnosis: true,
        }
    }

    /// Reject requests that can never produce a task
    pub fn validate(&self) -> AppResult<()> {
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&self.duration) {
            return Err(AppError::InvalidRequest(format!(
                "duration must be between {} and {} seconds, got {}",
                MIN_DURATION_SECS, MAX_DURATION_SECS, self.duration
            )));
        }
        if let Some(filter) = &self.custom_filter {
            if filter.trim().is_empty() {
                return Err(AppError::InvalidRequest(
                    "customFilter must not be blank".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Non-blank user description, if any
    pub fn description(&self) -> Option<&str> {
        self.user_description
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_bounds() {
        for (duration, ok) in [(0, false), (1, true), (300, true), (301, false)] {
            let req = CaptureRequest::new(IssueType::WebsiteAccess, duration);
            assert_eq!(req.validate().is_ok(), ok, "duration {}", duration);
        }
    }

    #[test]
    fn deserializes_camel_case_body() {
        let req: CaptureRequest = serde_json::from_str(
            r#"{"issueType":"game_lag","duration":30,"targetIP":"1.2.3.4","targetPort":7000}"#,
        )
        .unwrap();
        assert_eq!(req.issue_type, IssueType::GameLag);
        assert_eq!(req.target_ip, Some("1.2.3.4".parse().unwrap()));
        assert_eq!(req.target_port, Some(7000));
        assert!(req.enable_diagnosis);
    }

    #[test]
    fn unknown_issue_type_is_general() {
        let req: CaptureRequest =
            serde_json::from_str(r#"{"issueType":"printer_offline","duration":5}"#).unwrap();
        assert_eq!(req.issue_type, IssueType::General);
    }

    #[test]
    fn blank_description_is_ignored() {
        let mut req = CaptureRequest::new(IssueType::General, 5);
        req.user_description = Some("   ".to_string());
        assert_eq!(req.description(), None);
    }
}
