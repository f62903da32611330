//! Execution state models

use crate::core::document::DocumentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall status of one document run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Document is currently running
    Running,
    /// Every step completed
    Completed,
    /// A step failed fatally
    Failed,
    /// Run was cancelled or its caller went away
    Cancelled,
}

/// Per-document status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    /// Not attempted yet
    Nascent,
    /// An attempt is in flight
    Running,
    /// Last attempt deferred on missing data; waiting for a document change
    Blocked,
    /// Step finished successfully
    Complete,
    /// Step failed fatally
    Failed,
}

impl StepStatus {
    /// Terminal for this document
    pub fn stopped(self) -> bool {
        matches!(self, StepStatus::Complete | StepStatus::Failed)
    }

    /// Eligible for another attempt
    pub fn try_it(self) -> bool {
        matches!(self, StepStatus::Nascent | StepStatus::Blocked)
    }

    pub fn can_transition_to(self, next: StepStatus) -> bool {
        use StepStatus::*;
        matches!(
            (self, next),
            (Nascent, Running)
                | (Running, Complete)
                | (Running, Blocked)
                | (Running, Failed)
                | (Blocked, Running)
        )
    }

    /// Move to `next`.
    ///
    /// # Panics
    ///
    /// An illegal transition is a programming error and panics.
    pub fn transition(&mut self, next: StepStatus) {
        if !self.can_transition_to(next) {
            panic!("illegal step status transition {:?} -> {:?}", self, next);
        }
        *self = next;
    }
}

/// Outcome record for one `execute` call, delivered with the completion event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Document the run belongs to
    pub doc_id: DocumentId,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Error message for failed runs
    pub error: Option<String>,
}

impl RunSummary {
    pub fn new(doc_id: DocumentId) -> Self {
        Self {
            doc_id,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = ExecutionStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    pub fn cancel(&mut self) {
        self.status = ExecutionStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    /// Wall-clock time of the run, once it has ended
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}
