use std::path::PathBuf;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// No usable capture interface could be found
    #[error("No network interface available: {0}")]
    InterfaceUnavailable(String),

    /// The capture tool produced a missing or empty file
    #[error("Capture produced no data: {} is missing or empty", .0.display())]
    EmptyCapture(PathBuf),

    /// The capture tool could not be launched or exited abnormally
    #[error("Capture tool failure: {0}")]
    CaptureToolFailure(String),

    /// A single extraction pass failed (absorbed, the pass degrades to empty)
    #[error("Extraction pass '{pass}' failed: {reason}")]
    ExtractionPassFailure { pass: String, reason: String },

    /// Every extraction pass failed, the extraction tool is unusable
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// The reasoning service did not answer in time
    #[error("Diagnosis timed out after {0}s")]
    DiagnosisTimeout(u64),

    /// The reasoning service answered with something we could not read
    #[error("Malformed diagnosis response: {0}")]
    DiagnosisMalformedResponse(String),

    /// Transport or status error talking to the reasoning service
    #[error("Reasoning service error: {0}")]
    ReasoningService(String),

    /// Illegal state transition, unknown task, or a crashed worker
    #[error("Internal state error: {0}")]
    InternalStateError(String),

    /// Request rejected before a task was created
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error from I/O operations
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from JSON serialization/deserialization
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl AppError {
    /// Whether this error ends the task in `Failed`
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AppError::ExtractionPassFailure { .. }
                | AppError::DiagnosisTimeout(_)
                | AppError::DiagnosisMalformedResponse(_)
                | AppError::ReasoningService(_)
        )
    }
}

/// Result type for application
pub type AppResult<T> = Result<T, AppError>;
