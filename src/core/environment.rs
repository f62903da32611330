//! The layered view a step sees during one attempt

use crate::core::document::{Document, DocumentId};
use crate::core::error::StepError;
use crate::templates::{TemplateError, TemplateProcessor};
use serde_json::{json, Map, Value};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Static description of the step an environment was built for
#[derive(Debug, Clone, PartialEq)]
pub struct StepMetadata {
    /// Display name (explicit `name` or the short name)
    pub name: String,
    pub short_name: String,
    pub timeout: Option<Duration>,
    /// The raw definition node
    pub config: Value,
}

impl StepMetadata {
    fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "short_name": self.short_name,
            "timeout": self.timeout.map(|t| t.as_secs_f64()),
            "config": self.config,
        })
    }
}

/// Read-only lookup over step variables, the document snapshot, the
/// engine-wide system configuration and the step's own metadata.
///
/// Step variables may contain templates; they are rendered against the
/// other layers on lookup. Document and system values are never rendered.
#[derive(Clone)]
pub struct Environment {
    vars: Arc<Map<String, Value>>,
    document: Arc<Document>,
    system: Arc<Value>,
    metadata: Arc<StepMetadata>,
    templates: Arc<dyn TemplateProcessor>,
    doc_id: Option<DocumentId>,
    context: OnceLock<Value>,
}

impl Environment {
    pub fn new(
        vars: Map<String, Value>,
        document: Arc<Document>,
        system: Arc<Value>,
        metadata: StepMetadata,
        templates: Arc<dyn TemplateProcessor>,
    ) -> Self {
        Self {
            vars: Arc::new(vars),
            document,
            system,
            metadata: Arc::new(metadata),
            templates,
            doc_id: None,
            context: OnceLock::new(),
        }
    }

    /// Bind the environment to the document it was built for
    pub fn with_document_id(mut self, doc_id: DocumentId) -> Self {
        self.doc_id = Some(doc_id);
        self
    }

    /// The document snapshot this environment was built from
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// The bound document id, else the one stored in the snapshot
    pub fn document_id(&self) -> Option<DocumentId> {
        self.doc_id
            .clone()
            .or_else(|| DocumentId::of(&self.document))
    }

    pub fn system(&self) -> &Value {
        &self.system
    }

    pub fn metadata(&self) -> &StepMetadata {
        &self.metadata
    }

    /// Unrendered step variables
    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    /// Look a key up, step variables first, then the document, the
    /// `doc`/`system`/`stepdef` namespaces and finally system fields.
    pub fn get(&self, key: &str) -> Result<Option<Value>, TemplateError> {
        if let Some(value) = self.vars.get(key) {
            return self.render_value(value).map(Some);
        }
        if let Some(value) = self.document.get(key) {
            return Ok(Some(value.clone()));
        }
        let found = match key {
            "doc" => Some(Value::Object((*self.document).clone())),
            "system" => Some((*self.system).clone()),
            "stepdef" => Some(self.metadata.to_value()),
            _ => self.system.get(key).cloned(),
        };
        Ok(found)
    }

    /// Like [`get`](Self::get) with strings returned raw and other values as JSON.
    /// `null` counts as absent.
    pub fn get_str(&self, key: &str) -> Result<Option<String>, TemplateError> {
        Ok(match self.get(key)? {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
        })
    }

    /// Fetch a value the step cannot run without
    pub fn require(&self, key: &str) -> Result<Value, StepError> {
        match self.get(key)? {
            None | Some(Value::Null) => Err(StepError::DependencyNotMet(key.to_string())),
            Some(value) => Ok(value),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.vars.contains_key(key)
            || self.document.contains_key(key)
            || matches!(key, "doc" | "system" | "stepdef")
            || self.system.get(key).is_some()
    }

    /// Render a template string against this environment
    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        self.templates.render(self.context(), template)
    }

    /// Render every string inside `value`, keeping its shape
    pub fn render_value(&self, value: &Value) -> Result<Value, TemplateError> {
        Ok(match value {
            Value::String(s) => Value::String(self.render(s)?),
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.render_value(item))
                    .collect::<Result<Vec<_>, TemplateError>>()?,
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| Ok((k.clone(), self.render_value(v)?)))
                    .collect::<Result<_, TemplateError>>()?,
            ),
            other => other.clone(),
        })
    }

    /// The variable tree templates are rendered against: raw step variables,
    /// document fields at top level, plus the `doc`, `system` and `stepdef` namespaces.
    pub fn context(&self) -> &Value {
        self.context.get_or_init(|| {
            let mut context = Map::new();
            if let Value::Object(system) = &*self.system {
                context.extend(system.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            context.extend(self.document.iter().map(|(k, v)| (k.clone(), v.clone())));
            context.extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
            context.insert("doc".to_string(), Value::Object((*self.document).clone()));
            context.insert("system".to_string(), (*self.system).clone());
            context.insert("stepdef".to_string(), self.metadata.to_value());
            Value::Object(context)
        })
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("step", &self.metadata.name)
            .field("vars", &self.vars)
            .field("document", &self.document)
            .finish()
    }
}
