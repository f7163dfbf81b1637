//! Deployment run state

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;

/// Status of a `DeploymentRun`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed(String),
}

impl RunStatus {
    /// Runs only ever leave `Running`, and only once
    #[must_use]
    pub fn can_transition_to(&self, next: &RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Running, RunStatus::Succeeded | RunStatus::Failed(_))
        )
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Running => f.write_str("running"),
            RunStatus::Succeeded => f.write_str("succeeded"),
            RunStatus::Failed(_) => f.write_str("failed"),
        }
    }
}

/// Record of one `Runner::run` invocation
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentRun {
    stage: String,
    root_task: String,
    release_name: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    current_task_index: usize,
    completed_tasks: usize,
    total_tasks: usize,
    status: RunStatus,
}

impl DeploymentRun {
    /// Start a run; the release name is derived from `started_at`
    pub fn start(
        stage: impl Into<String>,
        root_task: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            stage: stage.into(),
            root_task: root_task.into(),
            release_name: release_name(started_at),
            started_at,
            finished_at: None,
            current_task_index: 0,
            completed_tasks: 0,
            total_tasks: 0,
            status: RunStatus::Running,
        }
    }

    #[must_use]
    pub fn stage(&self) -> &str {
        &self.stage
    }

    #[must_use]
    pub fn root_task(&self) -> &str {
        &self.root_task
    }

    #[must_use]
    pub fn release_name(&self) -> &str {
        &self.release_name
    }

    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Index of the leaf being (or last) executed
    #[must_use]
    pub fn current_task_index(&self) -> usize {
        self.current_task_index
    }

    #[must_use]
    pub fn completed_tasks(&self) -> usize {
        self.completed_tasks
    }

    #[must_use]
    pub fn total_tasks(&self) -> usize {
        self.total_tasks
    }

    #[must_use]
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Failure reason, if the run failed
    #[must_use]
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            RunStatus::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn set_total(&mut self, total: usize) {
        self.total_tasks = total;
    }

    pub(crate) fn begin_task(&mut self, index: usize) {
        self.current_task_index = index;
    }

    pub(crate) fn complete_task(&mut self) {
        self.completed_tasks += 1;
    }

    pub(crate) fn succeed(&mut self) -> Result<(), CoreError> {
        self.transition_to(RunStatus::Succeeded)
    }

    pub(crate) fn fail(&mut self, reason: impl Into<String>) -> Result<(), CoreError> {
        self.transition_to(RunStatus::Failed(reason.into()))
    }

    fn transition_to(&mut self, next: RunStatus) -> Result<(), CoreError> {
        if !self.status.can_transition_to(&next) {
            return Err(CoreError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Release directory name for a run started at `at`
#[must_use]
pub fn release_name(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn started() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 9, 30, 5).unwrap()
    }

    #[test]
    fn test_release_name_from_start() {
        let run = DeploymentRun::start("production", "deploy", started());
        assert_eq!(run.release_name(), "20261016093005");
        assert_eq!(run.status(), &RunStatus::Running);
        assert!(run.finished_at().is_none());
    }

    #[test]
    fn test_running_to_failed_once() {
        let mut run = DeploymentRun::start("production", "deploy", started());
        run.fail("task srv_stop failed with exit code 1").unwrap();

        assert_eq!(
            run.failure_reason(),
            Some("task srv_stop failed with exit code 1")
        );
        assert!(run.status().is_terminal());
        assert!(run.finished_at().is_some());

        let err = run.succeed().unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidTransition {
                from: "failed".to_string(),
                to: "succeeded".to_string(),
            }
        );
        assert!(run.fail("again").is_err());
    }

    #[test]
    fn test_progress_counters() {
        let mut run = DeploymentRun::start("production", "deploy", started());
        run.set_total(2);
        run.begin_task(0);
        run.complete_task();
        run.begin_task(1);
        run.complete_task();
        run.succeed().unwrap();

        assert!(run.succeeded());
        assert_eq!(run.current_task_index(), 1);
        assert_eq!(run.completed_tasks(), 2);
        assert_eq!(run.total_tasks(), 2);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_value(RunStatus::Failed("boom".into())).unwrap();
        assert_eq!(json, serde_json::json!({"state": "failed", "reason": "boom"}));

        let json = serde_json::to_value(RunStatus::Succeeded).unwrap();
        assert_eq!(json, serde_json::json!({"state": "succeeded"}));
    }
}
