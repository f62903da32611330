//! Step discovery by short name

use super::{short_name_of, CopyStep, Step};
use crate::core::{ConfigError, StepDefinition, StepKind};
use crate::execution::Section;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a step instance from its definition node
pub type StepFactory =
    Arc<dyn Fn(&StepDefinition) -> Result<Arc<dyn Step>, ConfigError> + Send + Sync>;

/// A step type that can be constructed from its definition
pub trait ConfiguredStep: Step + Sized + 'static {
    fn from_definition(definition: &StepDefinition) -> Result<Self, ConfigError>;
}

/// Maps short names to step factories. Sections are built by the registry itself.
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: HashMap<String, StepFactory>,
}

impl StepRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in steps
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register::<CopyStep>();
        registry
    }

    /// Register a step type under its derived short name
    pub fn register<S: ConfiguredStep>(&mut self) -> &mut Self {
        self.register_factory(short_name_of::<S>(), |definition| {
            Ok(Arc::new(S::from_definition(definition)?) as Arc<dyn Step>)
        })
    }

    pub fn register_factory<F>(&mut self, short_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&StepDefinition) -> Result<Arc<dyn Step>, ConfigError> + Send + Sync + 'static,
    {
        self.factories.insert(short_name.into(), Arc::new(factory));
        self
    }

    pub fn contains(&self, short_name: &str) -> bool {
        self.factories.contains_key(short_name)
    }

    /// Registered short names, sorted
    pub fn short_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the step tree for a definition node, failing on the first unknown implementation
    pub fn build(&self, definition: &StepDefinition) -> Result<Arc<dyn Step>, ConfigError> {
        match &definition.kind {
            StepKind::Section(_) => Ok(Arc::new(Section::from_definition(definition, self)?)),
            StepKind::Leaf { short_name, .. } => {
                let factory = self
                    .factories
                    .get(short_name)
                    .ok_or_else(|| ConfigError::UnknownStep(short_name.clone()))?;
                factory(definition)
            }
        }
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("steps", &self.short_names())
            .finish()
    }
}
