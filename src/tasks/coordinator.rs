use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::analysis::extractor::{ExtractionReport, FieldExtractor, PassKind};
use crate::analysis::insights::{InsightInput, InsightSuite};
use crate::analysis::summary::{dns_quality, summarize, tcp_quality};
use crate::capture::backend::CaptureBackend;
use crate::capture::filter::build_filter;
use crate::capture::interfaces::InterfaceCatalog;
use crate::capture::orchestrator::CaptureOrchestrator;
use crate::diagnosis::DiagnosisStage;
use crate::models::config::AppConfig;
use crate::models::record::CaptureArtifact;
use crate::models::request::CaptureRequest;
use crate::models::stats::{CaptureInfo, CaptureSummary};
use crate::models::task::{Task, TaskId, TaskResult, TaskState};
use crate::tasks::store::TaskStore;
use crate::utils::error::{AppError, AppResult};

/// Pollable view of a task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskStatus {
    pub status: TaskState,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of asking for a task's result
#[derive(Debug, Clone)]
pub enum ResultLookup {
    NotFound,
    /// Still running, or failed
    NotReady {
        state: TaskState,
        error: Option<String>,
    },
    Ready(Box<TaskResult>),
}

/// Everything one task run needs, shared by every worker
struct Pipeline {
    store: Arc<dyn TaskStore>,
    orchestrator: CaptureOrchestrator,
    extractor: FieldExtractor,
    insights: InsightSuite,
    diagnosis: DiagnosisStage,
    keep_captures: bool,
}

/// Owns the task table and drives every task from `Pending` to a terminal state
pub struct TaskCoordinator {
    pipeline: Arc<Pipeline>,
    pool: Handle,
    permits: Arc<Semaphore>,
}

impl TaskCoordinator {
    /// Tasks are spawned onto `pool`, at most `max_concurrent_tasks` running at once
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn TaskStore>,
        backend: Arc<dyn CaptureBackend>,
        interfaces: Arc<dyn InterfaceCatalog>,
        diagnosis: DiagnosisStage,
        pool: Handle,
    ) -> Self {
        let pipeline = Pipeline {
            store,
            orchestrator: CaptureOrchestrator::new(backend, interfaces, config.capture_dir.clone()),
            extractor: FieldExtractor::new(
                &config.extract_tool,
                Duration::from_secs(config.extract_timeout_secs),
            ),
            insights: InsightSuite::new(&config.heuristics),
            diagnosis,
            keep_captures: config.keep_captures,
        };

        Self {
            pipeline: Arc::new(pipeline),
            pool,
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks.max(1))),
        }
    }

    pub fn interfaces(&self) -> &Arc<dyn InterfaceCatalog> {
        self.pipeline.orchestrator.interfaces()
    }

    /// Validate and enqueue a request. Returns immediately with the task id.
    pub fn submit(&self, request: CaptureRequest) -> AppResult<(TaskId, JoinHandle<()>)> {
        request.validate()?;
        let interface = self
            .interfaces()
            .resolve(request.interface.as_deref())
            .map_err(|e| AppError::InvalidRequest(e.to_string()))?;

        let task = Task::new(request);
        let id = task.id.clone();
        info!(
            "Task {} submitted: {} for {}s on {}",
            id, task.request.issue_type, task.request.duration, interface.name
        );
        self.pipeline.store.insert(task);

        let pipeline = self.pipeline.clone();
        let permits = self.permits.clone();
        let task_id = id.clone();
        let handle = self.pool.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Task {} could not be scheduled: {}", task_id, e);
                    return;
                }
            };
            pipeline.drive(&task_id).await;
        });

        Ok((id, handle))
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.pipeline.store.snapshot(id).map(|task| TaskStatus {
            status: task.state,
            progress: task.state.progress(),
            error: task.error,
        })
    }

    pub fn result(&self, id: &str) -> ResultLookup {
        match self.pipeline.store.snapshot(id) {
            None => ResultLookup::NotFound,
            Some(task) => match task.result() {
                Some(result) => ResultLookup::Ready(Box::new(result)),
                None => ResultLookup::NotReady {
                    state: task.state,
                    error: task.error,
                },
            },
        }
    }
}

impl Pipeline {
    fn set_state(&self, id: &str, next: TaskState) -> AppResult<()> {
        self.store.modify(id, &mut |task| task.transition(next))?;
        info!("Task {} -> {}", id, next);
        Ok(())
    }

    /// Run to a terminal state; a fatal error fails the task
    async fn drive(&self, id: &str) {
        let err = match self.run(id).await {
            Ok(()) => return,
            Err(e) => e,
        };

        error!("Task {} failed: {}", id, err);
        let reason = err.to_string();
        let outcome = self.store.modify(id, &mut |task| {
            if task.state.is_terminal() {
                Ok(())
            } else {
                task.fail(reason.clone())
            }
        });
        if let Err(e) = outcome {
            error!("Task {} could not be marked failed: {}", id, e);
        }
    }

    async fn run(&self, id: &str) -> AppResult<()> {
        let request = self
            .store
            .snapshot(id)
            .map(|task| task.request)
            .ok_or_else(|| AppError::InternalStateError(format!("unknown task {}", id)))?;

        self.set_state(id, TaskState::Capturing)?;
        let filter = build_filter(
            request.issue_type,
            request.target_ip,
            request.target_port,
            request.custom_filter.as_deref(),
        );
        let artifact = self
            .orchestrator
            .start_capture(request.interface.as_deref(), &filter, request.duration, id)
            .await?;

        self.set_state(id, TaskState::Processing)?;
        let processed = self.process(&request, &artifact).await;
        if self.keep_captures {
            info!("Keeping capture {}", artifact.path.display());
        } else {
            self.orchestrator.discard(&artifact).await;
        }
        let summary = processed?;

        if !request.enable_diagnosis {
            self.store.modify(id, &mut |task| {
                task.summary = Some(summary.clone());
                task.transition(TaskState::Done)
            })?;
            info!("Task {} -> {} (diagnosis disabled)", id, TaskState::Done);
            return Ok(());
        }

        self.store.modify(id, &mut |task| {
            task.summary = Some(summary.clone());
            task.transition(TaskState::Diagnosing)
        })?;
        info!("Task {} -> {}", id, TaskState::Diagnosing);

        let diagnosis = self
            .diagnosis
            .diagnose(&summary, request.description(), request.issue_type)
            .await;
        if diagnosis.is_degraded() {
            warn!("Task {} finished with a degraded diagnosis", id);
        }

        self.store.modify(id, &mut |task| {
            task.diagnosis = Some(diagnosis.clone());
            task.transition(TaskState::Done)
        })?;
        info!("Task {} -> {}", id, TaskState::Done);
        Ok(())
    }

    /// Extraction, statistics and insights over one capture file
    async fn process(&self, request: &CaptureRequest, artifact: &CaptureArtifact) -> AppResult<CaptureSummary> {
        let report = self.extractor.extract_all(artifact, request.issue_type).await;
        if report.all_failed() {
            return Err(AppError::ExtractionFailed(
                report
                    .first_failure()
                    .unwrap_or("no extraction pass succeeded")
                    .to_string(),
            ));
        }

        let insights = self.insights.run(Arc::new(insight_input(&report))).await?;

        Ok(CaptureSummary {
            capture: CaptureInfo {
                interface: artifact.interface.clone(),
                filter: artifact.filter.clone(),
                file_size: artifact.size,
                duration: artifact.duration,
            },
            basic_stats: summarize(report.records(PassKind::Basic)),
            tcp_quality: tcp_quality(
                report
                    .records(PassKind::Performance)
                    .iter()
                    .chain(report.records(PassKind::Anomalies)),
            ),
            dns_quality: dns_quality(report.records(PassKind::Behavior)),
            insights,
            extraction: report.statuses(),
        })
    }
}

/// Flows come from the issue-specific pass, or the basic pass when it came back empty;
/// host names and HTTP outcomes come from the HTTP pass
fn insight_input(report: &ExtractionReport) -> InsightInput {
    let specific = report.records(PassKind::IssueSpecific);
    let flows = if specific.is_empty() {
        report.records(PassKind::Basic)
    } else {
        specific
    };
    InsightInput {
        flows: flows.to_vec(),
        names: report.records(PassKind::Http).to_vec(),
    }
}
