pub mod client;
pub mod parser;
pub mod prompt;
pub mod worker;

use log::{info, log, Level};
use std::sync::Arc;
use std::time::Duration;

use crate::diagnosis::client::{HttpReasoningClient, ReasoningClient};
use crate::diagnosis::parser::Reply;
use crate::diagnosis::prompt::{build_prompt, Prompt};
use crate::diagnosis::worker::ReasoningWorker;
use crate::models::config::ReasoningConfig;
use crate::models::diagnosis::Diagnosis;
use crate::models::request::IssueType;
use crate::models::stats::CaptureSummary;
use crate::utils::error::{AppError, AppResult};

/// Turns a capture summary into a diagnosis through the reasoning service.
///
/// Always produces a diagnosis: failures of the service degrade into a
/// low-confidence result instead of an error.
pub struct DiagnosisStage {
    worker: Option<ReasoningWorker>,
    timeout: Duration,
    max_prompt_chars: usize,
}

impl DiagnosisStage {
    /// HTTP-backed stage; an empty URL disables the service
    pub fn from_config(config: &ReasoningConfig) -> AppResult<Self> {
        if config.url.trim().is_empty() {
            info!("Reasoning service URL is empty, automatic diagnosis disabled");
            return Ok(Self::disabled(config));
        }
        let client = HttpReasoningClient::new(config)
            .map_err(|e| AppError::ReasoningService(format!("{:#}", e)))?;
        info!("Reasoning service: {} (model {})", config.url, config.model);
        Self::with_client(Arc::new(client), config)
    }

    pub fn with_client(client: Arc<dyn ReasoningClient>, config: &ReasoningConfig) -> AppResult<Self> {
        Ok(Self {
            worker: Some(ReasoningWorker::start(client, config.worker_threads)?),
            timeout: Duration::from_secs(config.timeout_secs),
            max_prompt_chars: config.max_prompt_chars,
        })
    }

    pub fn disabled(config: &ReasoningConfig) -> Self {
        Self {
            worker: None,
            timeout: Duration::from_secs(config.timeout_secs),
            max_prompt_chars: config.max_prompt_chars,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(&self, prompt: Prompt) -> AppResult<String> {
        match &self.worker {
            Some(worker) => worker.complete(prompt, self.timeout).await,
            None => Err(AppError::ReasoningService(
                "no reasoning service is configured".to_string(),
            )),
        }
    }

    /// Diagnose one capture; the result is fully populated even when degraded
    pub async fn diagnose(
        &self,
        summary: &CaptureSummary,
        user_text: Option<&str>,
        issue: IssueType,
    ) -> Diagnosis {
        let clues: Vec<String> = [
            &summary.insights.website_access,
            &summary.insights.interconnection,
            &summary.insights.game_traffic,
        ]
        .iter()
        .flat_map(|insight| insight.clues.iter().cloned())
        .collect();

        let prompt = build_prompt(summary, user_text, issue, self.max_prompt_chars);
        match self.request(prompt).await {
            Ok(text) => {
                let mut diagnosis: Diagnosis = Reply::parse(&text).into();
                if diagnosis.diagnostic_clues.is_empty() {
                    diagnosis.diagnostic_clues = clues;
                }
                info!(
                    "Diagnosis ready: severity {}, confidence {}",
                    diagnosis.severity, diagnosis.confidence
                );
                diagnosis
            }
            Err(e) => {
                let level = if e.is_fatal() { Level::Error } else { Level::Warn };
                log!(level, "Diagnosis degraded: {}", e);
                Diagnosis::unavailable(&e.to_string(), clues)
            }
        }
    }
}
