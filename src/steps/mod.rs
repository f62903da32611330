//! The step capability contract and the step implementations that ship with the engine

mod copy;
mod registry;

pub use copy::CopyStep;
pub use registry::{ConfiguredStep, StepFactory, StepRegistry};

use crate::core::{DocumentId, EngineError, Environment, StepError};
use crate::execution::EngineHandle;
use async_trait::async_trait;
use heck::ToSnakeCase;
use serde_json::Value;

/// A unit of work configured once from the pipeline definition.
///
/// `execute` may run several times for the same document: every deferred
/// attempt is retried against a fresh [`Environment`] after the document
/// changes, so implementations should not accumulate side effects.
#[async_trait]
pub trait Step: Send + Sync {
    /// One-time setup before the first document is executed
    async fn init(&self, _engine: &EngineHandle) -> Result<(), EngineError> {
        Ok(())
    }

    /// Run one attempt. `Ok(Some(value))` is merged under the register key when one is configured.
    ///
    /// Return [`StepError::DependencyNotMet`] (or let a missing template
    /// parameter propagate) to be retried on the next document change.
    async fn execute(&self, env: &Environment) -> Result<Option<Value>, StepError>;

    /// Called exactly once when this step is done with a document
    fn finish(&self, _doc_id: &DocumentId) {}

    fn short_name(&self) -> String {
        short_name_of::<Self>()
    }
}

/// Short name of an implementation type
pub fn short_name_of<T: ?Sized>() -> String {
    derive_short_name(std::any::type_name::<T>())
}

/// Derive a stable identifier from a type path: last segment, generics
/// dropped, trailing `Step` dropped, snake_case.
pub fn derive_short_name(type_path: &str) -> String {
    let without_generics = type_path.split('<').next().unwrap_or(type_path);
    let last = without_generics
        .rsplit(|c| c == ':' || c == '.')
        .next()
        .unwrap_or(without_generics)
        .trim();
    let base = match last.strip_suffix("Step") {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => last,
    };
    base.to_snake_case()
}
