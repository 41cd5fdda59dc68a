use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::diagnosis::client::ReasoningClient;
use crate::diagnosis::prompt::Prompt;
use crate::utils::error::{AppError, AppResult};

struct Job {
    prompt: Prompt,
    reply: oneshot::Sender<anyhow::Result<String>>,
}

/// Runs reasoning calls on a dedicated OS thread with its own runtime.
///
/// Callers only share a channel with it, never a scheduler. The thread exits
/// once every handle has been dropped.
#[derive(Clone)]
pub struct ReasoningWorker {
    jobs: mpsc::UnboundedSender<Job>,
}

impl ReasoningWorker {
    pub fn start(client: Arc<dyn ReasoningClient>, threads: usize) -> AppResult<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(threads.max(1))
            .thread_name("reasoning-rt")
            .enable_all()
            .build()?;
        let (jobs, mut queue) = mpsc::unbounded_channel::<Job>();

        std::thread::Builder::new()
            .name("reasoning-worker".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    while let Some(job) = queue.recv().await {
                        let client = client.clone();
                        tokio::spawn(async move {
                            let result = client.complete(&job.prompt).await;
                            if job.reply.send(result).is_err() {
                                debug!("Reasoning reply arrived after the caller gave up");
                            }
                        });
                    }
                });
                info!("Reasoning worker stopped");
            })?;

        Ok(Self { jobs })
    }

    /// Hand a prompt to the worker and wait at most `timeout` for the answer
    pub async fn complete(&self, prompt: Prompt, timeout: Duration) -> AppResult<String> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(Job { prompt, reply })
            .map_err(|_| AppError::InternalStateError("reasoning worker is not running".to_string()))?;

        match tokio::time::timeout(timeout, answer).await {
            Err(_) => {
                warn!("Reasoning call exceeded {}s", timeout.as_secs());
                Err(AppError::DiagnosisTimeout(timeout.as_secs()))
            }
            Ok(Err(_)) => Err(AppError::InternalStateError(
                "reasoning worker dropped the request".to_string(),
            )),
            Ok(Ok(Err(e))) => Err(AppError::ReasoningService(format!("{:#}", e))),
            Ok(Ok(Ok(text))) => Ok(text),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Answers with a fixed text after an optional delay
    pub(crate) struct ScriptedClient {
        pub answer: Result<String, String>,
        pub delay: Duration,
    }

    impl ScriptedClient {
        pub(crate) fn answering(text: &str) -> Self {
            Self {
                answer: Ok(text.to_string()),
                delay: Duration::ZERO,
            }
        }

        pub(crate) fn failing(reason: &str) -> Self {
            Self {
                answer: Err(reason.to_string()),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl ReasoningClient for ScriptedClient {
        async fn complete(&self, _prompt: &Prompt) -> anyhow::Result<String> {
            tokio::time::sleep(self.delay).await;
            self.answer.clone().map_err(|e| anyhow::anyhow!(e))
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "s".to_string(),
            user: "u".to_string(),
        }
    }

    #[tokio::test]
    async fn returns_client_answer() {
        let worker = ReasoningWorker::start(Arc::new(ScriptedClient::answering("ok")), 1).unwrap();
        let text = worker.complete(prompt(), Duration::from_secs(5)).await.unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn slow_client_times_out() {
        let client = ScriptedClient {
            delay: Duration::from_secs(30),
            ..ScriptedClient::answering("late")
        };
        let worker = ReasoningWorker::start(Arc::new(client), 1).unwrap();
        let err = worker
            .complete(prompt(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::DiagnosisTimeout(_)));
    }

    #[tokio::test]
    async fn client_errors_are_reasoning_errors() {
        let worker = ReasoningWorker::start(Arc::new(ScriptedClient::failing("connection refused")), 1).unwrap();
        let err = worker.complete(prompt(), Duration::from_secs(5)).await.unwrap_err();
        match err {
            AppError::ReasoningService(msg) => assert!(msg.contains("connection refused")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn usable_from_a_current_thread_runtime() {
        let worker = ReasoningWorker::start(Arc::new(ScriptedClient::answering("ok")), 1).unwrap();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let text = runtime
            .block_on(worker.complete(prompt(), Duration::from_secs(5)))
            .unwrap();
        assert_eq!(text, "ok");
    }
}
