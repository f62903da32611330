//! Error types for pipeline loading and document execution

use crate::core::document::DocumentId;
use crate::templates::TemplateError;
use std::time::Duration;
use thiserror::Error;

/// Problems found while loading a pipeline definition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Failed to parse pipeline definition: {0}")]
    Parse(String),

    #[error("Unknown step implementation '{0}'")]
    UnknownStep(String),

    #[error("Step '{step}' has unexpected keys: {keys}")]
    UnexpectedKeys { step: String, keys: String },

    #[error("Step '{0}' does not name an implementation")]
    MissingImplementation(String),

    #[error("Step '{step}': {message}")]
    Invalid { step: String, message: String },

    #[error("Invalid timeout '{0}'")]
    InvalidTimeout(String),
}

/// Failure of a single step attempt
#[derive(Debug, Error)]
pub enum StepError {
    /// A value the step needs is not in the document yet
    #[error("Dependency not met: {0}")]
    DependencyNotMet(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Step failed: {0}")]
    Failed(String),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Engine(Box<EngineError>),

    /// The step was parked when its document recorded a fatal error or was disposed
    #[error("Abandoned after its document stopped")]
    Abandoned,
}

impl StepError {
    /// Whether the step should be retried after the next document change
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StepError::DependencyNotMet(_)
                | StepError::Template(TemplateError::MissingParameter(_))
        )
    }
}

impl From<EngineError> for StepError {
    fn from(error: EngineError) -> Self {
        StepError::Engine(Box::new(error))
    }
}

/// Errors surfaced by the engine API
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Invalid pipeline definition: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown document {0}")]
    UnknownDocument(DocumentId),

    #[error(transparent)]
    Step(#[from] StepError),

    #[error("Pipeline '{pipeline}' could not be resolved: {message}")]
    Resolve { pipeline: String, message: String },

    #[error("Key '{0}' is reserved and cannot be updated")]
    ReservedKey(String),

    #[error("Document {0} was cancelled")]
    Cancelled(DocumentId),

    #[error("Document {0} closed while a step was still waiting on it")]
    DocumentClosed(DocumentId),

    #[error("Step '{0}' executed before the engine initialized it")]
    NotInitialized(String),

    #[error("Pipeline task panicked: {0}")]
    Panicked(String),
}
