mod analysis;
mod api;
mod capture;
mod diagnosis;
mod models;
mod tasks;
mod utils;

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::api::routes;
use crate::capture::backend::{default_capture_tool, platform_backend};
use crate::capture::interfaces::{InterfaceCatalog, SystemInterfaces};
use crate::diagnosis::DiagnosisStage;
use crate::models::config::{AppConfig, HeuristicsConfig, ReasoningConfig};
use crate::tasks::coordinator::TaskCoordinator;
use crate::tasks::store::MemoryTaskStore;
use crate::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Capture-and-diagnose service for everyday network problems")]
struct Args {
    /// Address the REST API binds to
    #[clap(long, env = "NETDIAG_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port for the REST API server
    #[clap(short, long, env = "NETDIAG_PORT", default_value = "3000")]
    port: u16,

    /// Directory capture files are written to
    #[clap(long, env = "NETDIAG_CAPTURE_DIR")]
    capture_dir: Option<PathBuf>,

    /// Capture tool executable (dumpcap, or tcpdump on macOS)
    #[clap(long, env = "NETDIAG_CAPTURE_TOOL")]
    capture_tool: Option<String>,

    /// Field-extraction tool executable
    #[clap(long, env = "NETDIAG_EXTRACT_TOOL", default_value = "tshark")]
    extract_tool: String,

    /// Timeout of one extraction pass, seconds
    #[clap(long, env = "NETDIAG_EXTRACT_TIMEOUT", default_value = "12")]
    extract_timeout: u64,

    /// Seconds between asking the capture tool to stop and killing it
    #[clap(long, env = "NETDIAG_CAPTURE_GRACE", default_value = "5")]
    capture_grace: u64,

    /// Keep capture files after processing
    #[clap(long, env = "NETDIAG_KEEP_CAPTURES")]
    keep_captures: bool,

    /// Number of tasks that may run at the same time
    #[clap(long, env = "NETDIAG_MAX_TASKS", default_value = "4")]
    max_tasks: usize,

    /// Chat-completions endpoint of the reasoning service, empty to disable
    #[clap(
        long,
        env = "NETDIAG_REASONING_URL",
        default_value = "http://127.0.0.1:8000/v1/chat/completions"
    )]
    reasoning_url: String,

    /// Model name sent to the reasoning service
    #[clap(long, env = "NETDIAG_REASONING_MODEL", default_value = "default")]
    reasoning_model: String,

    /// Bearer key for the reasoning service
    #[clap(long, env = "NETDIAG_REASONING_API_KEY", hide_env_values = true)]
    reasoning_api_key: Option<String>,

    /// Hard timeout of one reasoning call, seconds
    #[clap(long, env = "NETDIAG_REASONING_TIMEOUT", default_value = "30")]
    reasoning_timeout: u64,

    /// Threads of the isolated reasoning worker
    #[clap(long, env = "NETDIAG_REASONING_THREADS", default_value = "2")]
    reasoning_threads: usize,

    /// Carrier label of the local network, overrides detection
    #[clap(long, env = "NETDIAG_LOCAL_ISP")]
    local_isp: Option<String>,

    /// JSON file with heuristic thresholds and carrier tables
    #[clap(long, env = "NETDIAG_HEURISTICS")]
    heuristics: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, env = "NETDIAG_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn into_config(self) -> Result<AppConfig> {
        let defaults = AppConfig::default();

        let mut heuristics = match &self.heuristics {
            Some(path) => HeuristicsConfig::load(path)
                .with_context(|| format!("Failed to load heuristics from {}", path.display()))?,
            None => HeuristicsConfig::default(),
        };
        if self.local_isp.is_some() {
            heuristics.local_isp = self.local_isp;
        }

        Ok(AppConfig {
            host: self.host,
            port: self.port,
            capture_dir: self.capture_dir.unwrap_or(defaults.capture_dir),
            capture_tool: self
                .capture_tool
                .unwrap_or_else(|| default_capture_tool().to_string()),
            extract_tool: self.extract_tool,
            extract_timeout_secs: self.extract_timeout,
            capture_grace_secs: self.capture_grace,
            keep_captures: self.keep_captures,
            max_concurrent_tasks: self.max_tasks,
            reasoning: ReasoningConfig {
                url: self.reasoning_url,
                model: self.reasoning_model,
                api_key: self.reasoning_api_key,
                timeout_secs: self.reasoning_timeout,
                worker_threads: self.reasoning_threads,
                ..defaults.reasoning
            },
            heuristics,
        })
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logger with specified level
    logging::init_logger(logging::get_log_level(&args.log_level));

    info!("Starting netdiag v{}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config()?;
    info!(
        "Capture tool: {}, extraction tool: {}, captures in {}",
        config.capture_tool,
        config.extract_tool,
        config.capture_dir.display()
    );

    // Tasks run on their own runtime so a busy pipeline never stalls the HTTP workers
    let task_runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.max_concurrent_tasks.max(1))
        .thread_name("netdiag-task")
        .enable_all()
        .build()
        .context("Failed to build task runtime")?;

    let interfaces: Arc<dyn InterfaceCatalog> = Arc::new(SystemInterfaces::new());
    match interfaces.default_interface() {
        Some(iface) => info!("Default capture interface: {}", iface.formatted_display()),
        None => warn!("No default capture interface found; requests must name one"),
    }

    let diagnosis = DiagnosisStage::from_config(&config.reasoning)?;
    let coordinator = TaskCoordinator::new(
        &config,
        Arc::new(MemoryTaskStore::new()),
        platform_backend(&config.capture_tool, Duration::from_secs(config.capture_grace_secs)),
        interfaces,
        diagnosis,
        task_runtime.handle().clone(),
    );
    let app_state = web::Data::new(coordinator);
    let bind = (config.host.clone(), config.port);

    info!("Starting netdiag API server on {}:{}", config.host, config.port);

    // Start the HTTP server
    actix_rt::System::new().block_on(async move {
        HttpServer::new(move || {
            App::new()
                .app_data(app_state.clone())
                .configure(routes::configure)
        })
        .bind(bind)?
        .run()
        .await
    })?;

    info!("Server stopped, shutting down task runtime");
    task_runtime.shutdown_timeout(Duration::from_secs(5));
    Ok(())
}
