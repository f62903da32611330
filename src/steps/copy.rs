use super::{ConfiguredStep, Step};
use crate::core::{ConfigError, Environment, StepDefinition, StepError};
use async_trait::async_trait;
use serde_json::Value;

/// Produces the value of its `from` variable.
///
/// `from` is usually a template over the document, so the step defers
/// until everything it references exists. The rendered text is decoded
/// as JSON when possible and kept as a string otherwise.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyStep;

impl ConfiguredStep for CopyStep {
    fn from_definition(definition: &StepDefinition) -> Result<Self, ConfigError> {
        if !definition.step_vars().contains_key("from") {
            return Err(ConfigError::Invalid {
                step: definition.display_name(),
                message: "copy requires a 'from' variable".to_string(),
            });
        }
        Ok(Self)
    }
}

#[async_trait]
impl Step for CopyStep {
    async fn execute(&self, env: &Environment) -> Result<Option<Value>, StepError> {
        let Some(from) = env.get_str("from")? else {
            return Err(StepError::DependencyNotMet("from".to_string()));
        };
        Ok(Some(
            serde_json::from_str(&from).unwrap_or_else(|_| Value::String(from)),
        ))
    }
}
