//! Core domain models for docflow
//!
//! This module defines the document, the pipeline definition tree, the
//! view a step gets of the world, and the states and errors of a run.

pub mod config;
pub mod document;
pub mod environment;
pub mod error;
pub mod scope;
pub mod state;

pub use config::{
    parse_duration, PipelineDefinition, StepDefinition, StepKind, DEFAULT_SECTION_NAME,
};
pub use document::{Document, DocumentChange, DocumentId, DOC_ID_KEY};
pub use environment::{Environment, StepMetadata};
pub use error::{ConfigError, EngineError, StepError};
pub use scope::{DocumentScope, Subscription};
pub use state::{ExecutionStatus, RunSummary, StepStatus};
