use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::diagnosis::Diagnosis;
use crate::models::request::{CaptureRequest, IssueType};
use crate::models::stats::CaptureSummary;
use crate::utils::error::{AppError, AppResult};

/// Task identifier
pub type TaskId = String;

/// Lifecycle state of a diagnostic task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Capturing,
    Processing,
    Diagnosing,
    Done,
    Failed,
}

impl TaskState {
    /// Progress percentage shown to UIs
    pub fn progress(&self) -> u8 {
        match self {
            TaskState::Pending => 0,
            TaskState::Capturing => 25,
            TaskState::Processing => 50,
            TaskState::Diagnosing => 80,
            TaskState::Done => 100,
            TaskState::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed)
    }

    /// Edges of the task state machine
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Capturing)
                | (Capturing, Processing)
                | (Capturing, Failed)
                | (Processing, Done)
                | (Processing, Diagnosing)
                | (Processing, Failed)
                | (Diagnosing, Done)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Capturing => "capturing",
            TaskState::Processing => "processing",
            TaskState::Diagnosing => "diagnosing",
            TaskState::Done => "done",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One diagnostic request's lifecycle record
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub state: TaskState,
    pub request: CaptureRequest,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub summary: Option<CaptureSummary>,
    pub diagnosis: Option<Diagnosis>,
    pub error: Option<String>,
    /// Every state the task has been in, in order
    pub history: Vec<TaskState>,
}

impl Task {
    pub fn new(request: CaptureRequest) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            state: TaskState::Pending,
            request,
            created_at: now,
            updated_at: now,
            summary: None,
            diagnosis: None,
            error: None,
            history: vec![TaskState::Pending],
        }
    }

    /// Move to `next`, rejecting edges the state machine does not have
    pub fn transition(&mut self, next: TaskState) -> AppResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(AppError::InternalStateError(format!(
                "task {}: illegal transition {} -> {}",
                self.id, self.state, next
            )));
        }
        self.state = next;
        self.updated_at = Utc::now();
        self.history.push(next);
        Ok(())
    }

    /// Move to `Failed` and record the reason
    pub fn fail(&mut self, reason: String) -> AppResult<()> {
        self.transition(TaskState::Failed)?;
        self.error = Some(reason);
        Ok(())
    }

    /// The result view, only once the task is done
    pub fn result(&self) -> Option<TaskResult> {
        if self.state != TaskState::Done {
            return None;
        }
        Some(TaskResult {
            task_id: self.id.clone(),
            issue_type: self.request.issue_type,
            duration: self.request.duration,
            created_at: self.created_at,
            completed_at: self.updated_at,
            summary: self.summary.clone(),
            diagnosis: self.diagnosis.clone(),
        })
    }
}

/// What `GET /capture/result` returns for a finished task
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub task_id: TaskId,
    pub issue_type: IssueType,
    pub duration: u64,
    pub created_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub summary: Option<CaptureSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new(CaptureRequest::new(IssueType::WebsiteAccess, 10))
    }

    #[test]
    fn progress_is_a_function_of_state() {
        assert_eq!(TaskState::Pending.progress(), 0);
        assert_eq!(TaskState::Capturing.progress(), 25);
        assert_eq!(TaskState::Processing.progress(), 50);
        assert_eq!(TaskState::Diagnosing.progress(), 80);
        assert_eq!(TaskState::Done.progress(), 100);
        assert_eq!(TaskState::Failed.progress(), 0);
    }

    #[test]
    fn diagnosing_never_fails() {
        assert!(!TaskState::Diagnosing.can_transition_to(TaskState::Failed));
        assert!(TaskState::Diagnosing.can_transition_to(TaskState::Done));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use TaskState::*;
        for next in [Pending, Capturing, Processing, Diagnosing, Done, Failed] {
            assert!(!Done.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn illegal_transition_is_rejected() {
        let mut task = task();
        let err = task.transition(TaskState::Done).unwrap_err();
        assert!(matches!(err, AppError::InternalStateError(_)));
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn fail_records_error_and_history() {
        let mut task = task();
        task.transition(TaskState::Capturing).unwrap();
        task.fail("tool missing".to_string()).unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.error.as_deref(), Some("tool missing"));
        assert_eq!(
            task.history,
            vec![TaskState::Pending, TaskState::Capturing, TaskState::Failed]
        );
    }

    #[test]
    fn result_only_when_done() {
        let mut task = task();
        assert!(task.result().is_none());
        task.transition(TaskState::Capturing).unwrap();
        task.transition(TaskState::Processing).unwrap();
        assert!(task.result().is_none());
        task.transition(TaskState::Done).unwrap();
        assert_eq!(task.result().unwrap().task_id, task.id);
    }
}
