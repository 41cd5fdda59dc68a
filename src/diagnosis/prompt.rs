use log::debug;

use crate::models::request::IssueType;
use crate::models::stats::CaptureSummary;
use crate::utils::logging::excerpt;

const INSTRUCTIONS: &str = "You are a network troubleshooting assistant. You receive statistics \
extracted from a short packet capture taken on the user's machine. Reply with a single JSON \
object and nothing else, using exactly these fields:
  \"diagnosis\": one-sentence summary of the problem,
  \"severity\": one of \"low\", \"medium\", \"high\", \"critical\",
  \"rootCause\": the most likely cause,
  \"keyFindings\": array of observations backed by the statistics,
  \"recommendations\": ordered array of actions for a non-expert user,
  \"diagnosticClues\": array of the clues you relied on,
  \"technicalDetails\": short technical explanation,
  \"confidence\": integer from 0 to 100,
  \"nextSteps\": what to do if the recommendations do not help.
Base every statement on the data; say so when the capture holds too little traffic to judge.";

const WEBSITE_GUIDANCE: &str = "The user reports websites that are slow or fail to load. \
Focus on per-host round-trip times, HTTP error responses, TCP retransmissions and DNS \
failures or slow lookups. Distinguish a single slow site from a general connectivity problem.";

const INTERCONNECTION_GUIDANCE: &str = "The user reports poor connectivity to services hosted \
on other carriers. Focus on the local carrier versus remote carrier pairings, their latency, \
estimated loss and quality tier, and whether cross-carrier paths are clearly worse than \
same-carrier ones.";

const GAME_GUIDANCE: &str = "The user reports lag in online games. Focus on flows identified as \
game traffic, their latency, jitter and estimated loss, the carrier hosting the game server, \
and whether a server on the user's own carrier would help.";

const GENERAL_GUIDANCE: &str = "The user reports a general network problem. Review the protocol \
mix, TCP quality counters, DNS behaviour and every analyzer's clues, and identify the most \
likely bottleneck.";

/// The two messages sent to the reasoning service
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

fn guidance(issue: IssueType) -> &'static str {
    match issue {
        IssueType::WebsiteAccess => WEBSITE_GUIDANCE,
        IssueType::Interconnection => INTERCONNECTION_GUIDANCE,
        IssueType::GameLag => GAME_GUIDANCE,
        IssueType::General => GENERAL_GUIDANCE,
    }
}

/// Assemble the prompt; the statistics dump is cut at `max_chars` characters
pub fn build_prompt(
    summary: &CaptureSummary,
    user_text: Option<&str>,
    issue: IssueType,
    max_chars: usize,
) -> Prompt {
    let dump = serde_json::to_string_pretty(summary)
        .unwrap_or_else(|e| format!("{{\"error\": \"statistics unavailable: {}\"}}", e));
    let truncated = dump.chars().count() > max_chars;
    let dump = if truncated { excerpt(&dump, max_chars) } else { dump };
    debug!(
        "Prompt statistics dump: {} chars{}",
        dump.chars().count(),
        if truncated { " (truncated)" } else { "" }
    );

    let mut user = format!("Issue type: {}\n{}\n\n", issue, guidance(issue));
    if let Some(text) = user_text.map(str::trim).filter(|t| !t.is_empty()) {
        user.push_str("The user describes the problem as:\n");
        user.push_str(text);
        user.push_str("\n\n");
    }
    user.push_str("Capture statistics (JSON");
    if truncated {
        user.push_str(", truncated");
    }
    user.push_str("):\n");
    user.push_str(&dump);

    Prompt {
        system: INSTRUCTIONS.to_string(),
        user,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selects_template_by_issue() {
        let summary = CaptureSummary::default();
        let game = build_prompt(&summary, None, IssueType::GameLag, 8000);
        assert!(game.user.contains("lag in online games"));
        let general = build_prompt(&summary, None, IssueType::General, 8000);
        assert!(general.user.contains("general network problem"));
        assert!(general.system.contains("\"nextSteps\""));
    }

    #[test]
    fn includes_user_description_when_present() {
        let summary = CaptureSummary::default();
        let prompt = build_prompt(&summary, Some("  YouTube buffers every evening "), IssueType::WebsiteAccess, 8000);
        assert!(prompt.user.contains("YouTube buffers every evening"));

        let blank = build_prompt(&summary, Some("   "), IssueType::WebsiteAccess, 8000);
        assert!(!blank.user.contains("describes the problem"));
    }

    #[test]
    fn statistics_dump_is_bounded() {
        let summary = CaptureSummary::default();
        let prompt = build_prompt(&summary, None, IssueType::General, 40);
        assert!(prompt.user.contains("truncated"));
        let dump = prompt.user.split("):\n").last().unwrap();
        assert!(dump.chars().count() <= 43);
    }
}
