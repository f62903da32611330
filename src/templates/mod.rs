//! String templating for step variables

mod path;

pub use path::PathTemplateProcessor;

use serde_json::Value;
use thiserror::Error;

/// Errors raised while rendering a template
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The template referenced a variable that is not present
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Template syntax error: {0}")]
    Syntax(String),
}

/// Renders a template string against a JSON variable tree
pub trait TemplateProcessor: Send + Sync {
    fn render(&self, vars: &Value, template: &str) -> Result<String, TemplateError>;
}

/// Leaves every template untouched
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTemplateProcessor;

impl TemplateProcessor for NullTemplateProcessor {
    fn render(&self, _vars: &Value, template: &str) -> Result<String, TemplateError> {
        Ok(template.to_string())
    }
}
