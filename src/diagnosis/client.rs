use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::diagnosis::prompt::Prompt;
use crate::models::config::ReasoningConfig;
use crate::utils::logging::excerpt;

/// Sends a prompt to the reasoning service and returns its free-form answer
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions client
pub struct HttpReasoningClient {
    http_client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpReasoningClient {
    pub fn new(config: &ReasoningConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            url: config.url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }
}

#[async_trait]
impl ReasoningClient for HttpReasoningClient {
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: 0.2,
            stream: false,
        };

        info!(
            "Reasoning call [{}] to {} ({} prompt chars)",
            self.model,
            self.url,
            prompt.system.len() + prompt.user.len()
        );

        let mut builder = self.http_client.post(&self.url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .context("Failed to send request to the reasoning service")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Reasoning service error {}: {}", status, excerpt(&error_text, 300));
            anyhow::bail!("reasoning service returned {}: {}", status, excerpt(&error_text, 300));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .context("Failed to parse the reasoning service response")?;

        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("reasoning service response has no choices[0].message.content")?;

        info!("Reasoning reply ({} chars): {}", content.len(), excerpt(&content, 200));
        Ok(content)
    }
}
