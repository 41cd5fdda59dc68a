use async_trait::async_trait;
use log::{debug, info, warn};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::utils::error::{AppError, AppResult};
use crate::utils::logging::excerpt;

/// One capture run handed to a backend
#[derive(Debug, Clone)]
pub struct CaptureJob {
    pub interface: String,
    pub filter: String,
    pub duration: Duration,
    pub output: PathBuf,
}

/// How the capture tool finished
#[derive(Debug, Clone, Default)]
pub struct CaptureOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// Whether the backend had to stop the tool itself
    pub stopped: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs the external capture tool for a bounded duration
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn capture(&self, job: &CaptureJob) -> AppResult<CaptureOutcome>;
}

/// Capture tool of the platform's backend
pub fn default_capture_tool() -> &'static str {
    if cfg!(target_os = "macos") {
        "tcpdump"
    } else {
        "dumpcap"
    }
}

/// Backend for the platform this binary was built for
pub fn platform_backend(tool: &str, grace: Duration) -> Arc<dyn CaptureBackend> {
    if cfg!(target_os = "macos") {
        Arc::new(SignalledBackend::new(tool, grace))
    } else {
        Arc::new(SelfTimedBackend::new(tool, grace))
    }
}

/// Capture tool that stops itself after the duration (dumpcap `-a duration:N`).
///
/// A wall-clock guard of duration plus grace still applies in case the tool hangs.
pub struct SelfTimedBackend {
    tool: String,
    grace: Duration,
}

impl SelfTimedBackend {
    pub fn new(tool: &str, grace: Duration) -> Self {
        Self {
            tool: tool.to_string(),
            grace,
        }
    }

    fn args(&self, job: &CaptureJob) -> Vec<String> {
        vec![
            "-i".to_string(),
            job.interface.clone(),
            "-f".to_string(),
            job.filter.clone(),
            "-a".to_string(),
            format!("duration:{}", job.duration.as_secs().max(1)),
            "-q".to_string(),
            "-w".to_string(),
            job.output.display().to_string(),
        ]
    }
}

#[async_trait]
impl CaptureBackend for SelfTimedBackend {
    fn name(&self) -> &'static str {
        "self-timed"
    }

    async fn capture(&self, job: &CaptureJob) -> AppResult<CaptureOutcome> {
        let mut child = spawn_tool(&self.tool, &self.args(job))?;
        let readers = PipeReaders::take(&mut child);

        let deadline = job.duration + self.grace;
        let (status, stopped) = match tokio::time::timeout(deadline, child.wait()).await {
            Ok(status) => (status.ok(), false),
            Err(_) => {
                warn!(
                    "{} ignored its {}s duration, stopping it",
                    self.tool,
                    job.duration.as_secs()
                );
                (stop_child(&mut child, self.grace).await, true)
            }
        };

        Ok(readers.finish(status, stopped).await)
    }
}

/// Capture tool that runs until signalled (tcpdump); we stop it after the duration
pub struct SignalledBackend {
    tool: String,
    grace: Duration,
}

impl SignalledBackend {
    pub fn new(tool: &str, grace: Duration) -> Self {
        Self {
            tool: tool.to_string(),
            grace,
        }
    }

    fn args(&self, job: &CaptureJob) -> Vec<String> {
        vec![
            "-i".to_string(),
            job.interface.clone(),
            "-n".to_string(),
            "-U".to_string(),
            "-w".to_string(),
            job.output.display().to_string(),
            job.filter.clone(),
        ]
    }
}

#[async_trait]
impl CaptureBackend for SignalledBackend {
    fn name(&self) -> &'static str {
        "signalled"
    }

    async fn capture(&self, job: &CaptureJob) -> AppResult<CaptureOutcome> {
        let mut child = spawn_tool(&self.tool, &self.args(job))?;
        let readers = PipeReaders::take(&mut child);

        let (status, stopped) = tokio::select! {
            status = child.wait() => {
                warn!("{} exited before the capture deadline", self.tool);
                (status.ok(), false)
            }
            _ = tokio::time::sleep(job.duration) => {
                debug!("Capture deadline reached, stopping {}", self.tool);
                (stop_child(&mut child, self.grace).await, true)
            }
        };

        Ok(readers.finish(status, stopped).await)
    }
}

fn spawn_tool(tool: &str, args: &[String]) -> AppResult<Child> {
    info!("Launching capture tool: {} {}", tool, args.join(" "));
    Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            AppError::CaptureToolFailure(format!(
                "failed to launch {}: {} (is it installed, and does this process have \
                 packet capture permission?)",
                tool, e
            ))
        })
}

/// Collects a child's stdout and stderr without streaming them
struct PipeReaders {
    stdout: Option<JoinHandle<String>>,
    stderr: Option<JoinHandle<String>>,
}

impl PipeReaders {
    fn take(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(read_pipe),
            stderr: child.stderr.take().map(read_pipe),
        }
    }

    async fn finish(self, status: Option<std::process::ExitStatus>, stopped: bool) -> CaptureOutcome {
        let stdout = join_pipe(self.stdout).await;
        let stderr = join_pipe(self.stderr).await;
        if !stderr.trim().is_empty() {
            debug!("Capture tool stderr: {}", excerpt(stderr.trim(), 500));
        }
        CaptureOutcome {
            success: status.map(|s| s.success()).unwrap_or(false),
            exit_code: status.and_then(|s| s.code()),
            stopped,
            stdout,
            stderr,
        }
    }
}

fn read_pipe<R>(mut pipe: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf).await;
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn join_pipe(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(unix)]
fn request_stop(child: &Child) -> bool {
    match child.id() {
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn request_stop(_child: &Child) -> bool {
    false
}

/// Ask the child to stop, then kill it if it has not exited within `grace`
pub(crate) async fn stop_child(
    child: &mut Child,
    grace: Duration,
) -> Option<std::process::ExitStatus> {
    if request_stop(child) {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            return status.ok();
        }
        warn!("Capture tool did not stop within {}s, killing it", grace.as_secs());
    }

    let _ = child.kill().await;
    child.wait().await.ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> CaptureJob {
        CaptureJob {
            interface: "eth0".to_string(),
            filter: "tcp port 443".to_string(),
            duration: Duration::from_secs(10),
            output: PathBuf::from("/tmp/task.pcap"),
        }
    }

    #[test]
    fn self_timed_args_bound_the_duration() {
        let args = SelfTimedBackend::new("dumpcap", Duration::from_secs(5)).args(&job());
        assert!(args.windows(2).any(|w| w[0] == "-a" && w[1] == "duration:10"));
        assert!(args.windows(2).any(|w| w[0] == "-f" && w[1] == "tcp port 443"));
    }

    #[test]
    fn signalled_args_end_with_filter() {
        let args = SignalledBackend::new("tcpdump", Duration::from_secs(5)).args(&job());
        assert_eq!(args.last().map(String::as_str), Some("tcp port 443"));
        assert!(!args.iter().any(|a| a.starts_with("duration:")));
    }

    #[tokio::test]
    async fn missing_tool_is_a_launch_failure() {
        let backend = SelfTimedBackend::new("/nonexistent/dumpcap", Duration::from_secs(1));
        let err = backend.capture(&job()).await.unwrap_err();
        match err {
            AppError::CaptureToolFailure(msg) => assert!(msg.contains("failed to launch")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_child_ends_a_running_process() {
        let mut child = Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let started = std::time::Instant::now();
        let status = stop_child(&mut child, Duration::from_secs(2)).await;
        assert!(status.is_some());
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
