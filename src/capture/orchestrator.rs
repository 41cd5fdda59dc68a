use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::capture::backend::{CaptureBackend, CaptureJob, CaptureOutcome};
use crate::capture::interfaces::InterfaceCatalog;
use crate::models::record::CaptureArtifact;
use crate::utils::error::{AppError, AppResult};
use crate::utils::logging::excerpt;

/// Resolves the interface, runs one capture and validates the file it produced
pub struct CaptureOrchestrator {
    backend: Arc<dyn CaptureBackend>,
    interfaces: Arc<dyn InterfaceCatalog>,
    capture_dir: PathBuf,
}

impl CaptureOrchestrator {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        interfaces: Arc<dyn InterfaceCatalog>,
        capture_dir: PathBuf,
    ) -> Self {
        Self {
            backend,
            interfaces,
            capture_dir,
        }
    }

    pub fn interfaces(&self) -> &Arc<dyn InterfaceCatalog> {
        &self.interfaces
    }

    /// Capture on `interface` (or the default) for `duration` seconds.
    ///
    /// The file is named after `file_stem` inside the capture directory.
    pub async fn start_capture(
        &self,
        interface: Option<&str>,
        filter: &str,
        duration: u64,
        file_stem: &str,
    ) -> AppResult<CaptureArtifact> {
        let iface = self.interfaces.resolve(interface)?;

        tokio::fs::create_dir_all(&self.capture_dir).await?;
        let output = self.capture_dir.join(format!("{}.pcap", file_stem));
        if tokio::fs::metadata(&output).await.is_ok() {
            tokio::fs::remove_file(&output).await?;
        }

        info!(
            "Starting {}s capture on {} with {} backend, filter: {}",
            duration,
            iface.formatted_display(),
            self.backend.name(),
            filter
        );

        let job = CaptureJob {
            interface: iface.name.clone(),
            filter: filter.to_string(),
            duration: Duration::from_secs(duration),
            output: output.clone(),
        };
        let outcome = self.backend.capture(&job).await?;

        let size = validate_artifact(&output, &outcome).await?;
        info!("Capture finished: {} ({} bytes)", output.display(), size);

        Ok(CaptureArtifact {
            path: output,
            size,
            duration,
            interface: iface.name,
            filter: filter.to_string(),
        })
    }

    /// Delete a capture file once it is no longer needed
    pub async fn discard(&self, artifact: &CaptureArtifact) {
        if let Err(e) = tokio::fs::remove_file(&artifact.path).await {
            warn!("Failed to remove {}: {}", artifact.path.display(), e);
        }
    }
}

/// The file must exist and be non-empty.
///
/// A tool that failed and left no file is reported as a tool failure, with its stderr.
async fn validate_artifact(path: &Path, outcome: &CaptureOutcome) -> AppResult<u64> {
    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);

    if size > 0 {
        if !outcome.success && !outcome.stopped {
            warn!(
                "Capture tool exited with {:?} but left {} bytes, continuing",
                outcome.exit_code, size
            );
        }
        return Ok(size);
    }

    if !outcome.success && !outcome.stopped {
        let stderr = outcome.stderr.trim();
        return Err(AppError::CaptureToolFailure(format!(
            "capture tool exited with code {:?}: {}",
            outcome.exit_code,
            if stderr.is_empty() {
                "no output (check capture permissions)".to_string()
            } else {
                excerpt(stderr, 300)
            }
        )));
    }

    Err(AppError::EmptyCapture(path.to_path_buf()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::capture::interfaces::StaticInterfaces;
    use crate::models::interface::InterfaceInfo;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Backend that writes a fixed payload instead of capturing
    pub(crate) struct FakeBackend {
        pub payload: Vec<u8>,
        pub outcome: CaptureOutcome,
        pub jobs: Mutex<Vec<CaptureJob>>,
    }

    impl FakeBackend {
        pub(crate) fn writing(payload: &[u8]) -> Self {
            Self {
                payload: payload.to_vec(),
                outcome: CaptureOutcome {
                    success: true,
                    exit_code: Some(0),
                    ..Default::default()
                },
                jobs: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CaptureBackend for FakeBackend {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn capture(&self, job: &CaptureJob) -> AppResult<CaptureOutcome> {
            self.jobs.lock().push(job.clone());
            if !self.payload.is_empty() {
                tokio::fs::write(&job.output, &self.payload).await?;
            }
            Ok(self.outcome.clone())
        }
    }

    pub(crate) fn test_interfaces() -> Arc<dyn InterfaceCatalog> {
        Arc::new(StaticInterfaces(vec![
            InterfaceInfo::new("uplink7").with_ipv4("192.168.1.20")
        ]))
    }

    fn orchestrator(backend: Arc<FakeBackend>, dir: &Path) -> CaptureOrchestrator {
        CaptureOrchestrator::new(backend, test_interfaces(), dir.to_path_buf())
    }

    #[tokio::test]
    async fn produces_artifact_for_non_empty_capture() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::writing(b"pcap-bytes"));
        let artifact = orchestrator(backend.clone(), dir.path())
            .start_capture(None, "tcp", 3, "task-1")
            .await
            .unwrap();

        assert_eq!(artifact.size, 10);
        assert_eq!(artifact.interface, "uplink7");
        assert_eq!(artifact.path, dir.path().join("task-1.pcap"));

        let jobs = backend.jobs.lock();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].duration, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn empty_file_is_empty_capture() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::writing(b""));
        let err = orchestrator(backend, dir.path())
            .start_capture(None, "tcp", 1, "task-2")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyCapture(_)));
    }

    #[tokio::test]
    async fn failed_tool_without_file_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let mut backend = FakeBackend::writing(b"");
        backend.outcome = CaptureOutcome {
            success: false,
            exit_code: Some(1),
            stderr: "You don't have permission to capture on that device".to_string(),
            ..Default::default()
        };
        let err = orchestrator(Arc::new(backend), dir.path())
            .start_capture(None, "tcp", 1, "task-3")
            .await
            .unwrap_err();
        match err {
            AppError::CaptureToolFailure(msg) => assert!(msg.contains("permission")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn no_interface_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = CaptureOrchestrator::new(
            Arc::new(FakeBackend::writing(b"x")),
            Arc::new(StaticInterfaces(Vec::new())),
            dir.path().to_path_buf(),
        );
        let err = orchestrator
            .start_capture(None, "tcp", 1, "task-4")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::InterfaceUnavailable(_)));
    }
}
