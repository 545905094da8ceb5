//! Results handed back to callers of the orchestrator.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::BootError;
use crate::record::StepStatus;

/// What happened to one step during a run (or would happen, for a dry run).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum Disposition {
    /// Record already said `succeeded`; nothing evaluated.
    AlreadySucceeded,
    /// Idempotency check found the effect present; marked without running.
    Satisfied,
    Executed,
    /// Declared `enabled: false`; recorded as `skipped`.
    Disabled,
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        rollback_error: Option<String>,
    },
    /// Left `pending` because an earlier step failed.
    NotReached,
    /// Dry run: the action would execute.
    WouldExecute,
}

impl Disposition {
    pub fn label(&self) -> &'static str {
        match self {
            Disposition::AlreadySucceeded => "already succeeded",
            Disposition::Satisfied => "satisfied",
            Disposition::Executed => "executed",
            Disposition::Disabled => "disabled",
            Disposition::Failed { .. } => "failed",
            Disposition::NotReached => "not reached",
            Disposition::WouldExecute => "would execute",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub id: String,
    /// 1-based position in the environment's execution order.
    pub position: usize,
    pub action: String,
    #[serde(flatten)]
    pub disposition: Disposition,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    Failed {
        step: String,
        position: usize,
        cause: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub environment: String,
    pub dry_run: bool,
    pub steps: Vec<StepReport>,
    pub outcome: RunOutcome,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed)
    }

    /// Ids of steps whose action actually ran.
    pub fn executed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| {
                matches!(
                    s.disposition,
                    Disposition::Executed | Disposition::Failed { .. }
                )
            })
            .map(|s| s.id.as_str())
            .collect()
    }

    /// The halting failure as an error, for callers that propagate with `?`.
    pub fn failure(&self) -> Option<BootError> {
        match &self.outcome {
            RunOutcome::Completed => None,
            RunOutcome::Failed {
                step,
                position,
                cause,
            } => Some(BootError::StepExecution {
                step: step.clone(),
                position: *position,
                cause: cause.clone(),
            }),
        }
    }
}

/// A planned step, as shown by `plan`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlannedStep {
    pub id: String,
    pub position: usize,
    pub action: String,
    pub depends_on: Vec<String>,
    pub enabled: bool,
}

/// One row of `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepView {
    pub id: String,
    pub position: usize,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub attempts: u32,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvironmentSummary {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: usize,
}
