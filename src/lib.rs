//! docflow - a document-centric pipeline engine
//!
//! Steps read a layered view of a JSON document and contribute values
//! back to it. A step whose inputs are not there yet defers and is retried
//! whenever the document changes, so ordering follows the data rather than
//! a declared dependency graph.

pub mod cli;
pub mod core;
pub mod execution;
pub mod steps;
pub mod templates;

// Re-export commonly used types
pub use crate::core::{
    ConfigError, Document, DocumentId, EngineError, Environment, ExecutionStatus,
    PipelineDefinition, RunSummary, StepError, StepStatus, DOC_ID_KEY,
};
pub use crate::execution::{
    Engine, EngineConfig, EngineHandle, EnginePool, ExecutionEvent, PipelineResolver, SchedulingStrategy,
    StaticResolver,
};
pub use crate::steps::{ConfiguredStep, Step, StepRegistry};
pub use crate::templates::{TemplateError, TemplateProcessor};
