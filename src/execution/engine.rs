//! Main execution engine - owns the documents and drives the root section per run

use crate::{
    core::{
        ConfigError, Document, DocumentId, EngineError, Environment, ExecutionStatus,
        PipelineDefinition, RunSummary, StepDefinition, StepError, StepStatus, DOC_ID_KEY,
    },
    execution::{executor::FinishGuard, DocumentStore},
    steps::{Step, StepRegistry},
    templates::{PathTemplateProcessor, TemplateProcessor},
};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

/// Events that can occur while documents are executed
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    DocumentStarted {
        doc_id: DocumentId,
    },
    DocumentChanged {
        doc_id: DocumentId,
        key: String,
    },
    /// Published exactly once per `execute` call
    DocumentCompleted {
        summary: RunSummary,
    },
    SectionStarted {
        doc_id: DocumentId,
        section: String,
    },
    SectionCompleted {
        doc_id: DocumentId,
        section: String,
    },
    SectionErrored {
        doc_id: DocumentId,
        section: String,
        error: String,
    },
    StepStatusChanged {
        doc_id: DocumentId,
        step: String,
        status: StepStatus,
        attempt: usize,
    },
}

impl ExecutionEvent {
    pub fn doc_id(&self) -> &DocumentId {
        match self {
            ExecutionEvent::DocumentStarted { doc_id }
            | ExecutionEvent::DocumentChanged { doc_id, .. }
            | ExecutionEvent::SectionStarted { doc_id, .. }
            | ExecutionEvent::SectionCompleted { doc_id, .. }
            | ExecutionEvent::SectionErrored { doc_id, .. }
            | ExecutionEvent::StepStatusChanged { doc_id, .. } => doc_id,
            ExecutionEvent::DocumentCompleted { summary } => &summary.doc_id,
        }
    }
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Engine-wide values visible to every step
    pub system: Value,

    /// Step implementations available to the pipeline definition
    pub registry: StepRegistry,

    pub templates: Arc<dyn TemplateProcessor>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self {
            system: json!({}),
            registry: StepRegistry::with_builtins(),
            templates: Arc::new(PathTemplateProcessor::new()),
        }
    }

    pub fn with_system(mut self, system: Value) -> Self {
        self.system = system;
        self
    }

    pub fn with_registry(mut self, registry: StepRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_templates(mut self, templates: Arc<dyn TemplateProcessor>) -> Self {
        self.templates = templates;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared engine state handed to steps and executors
pub type EngineHandle = Arc<EngineCore>;

/// Document cache, system configuration and event fan-out
pub struct EngineCore {
    documents: DocumentStore,
    system: Arc<Value>,
    templates: Arc<dyn TemplateProcessor>,
    event_handlers: RwLock<Vec<EventHandler>>,
}

impl EngineCore {
    pub fn new(config: EngineConfig) -> EngineHandle {
        let system = match config.system {
            Value::Null => json!({}),
            other => other,
        };
        Arc::new(Self {
            documents: DocumentStore::new(),
            system: Arc::new(system),
            templates: config.templates,
            event_handlers: RwLock::new(Vec::new()),
        })
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    pub fn system(&self) -> &Value {
        &self.system
    }

    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.write().push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    pub fn emit(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.read().clone();
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    pub fn get_document(&self, doc_id: &DocumentId) -> Result<Arc<Document>, EngineError> {
        self.documents.snapshot(doc_id)
    }

    /// Merge a single key into a document; resolves once subscribers have been notified
    pub async fn update_document(
        &self,
        doc_id: &DocumentId,
        key: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        self.documents.merge(doc_id, key, value)?;
        self.emit(ExecutionEvent::DocumentChanged {
            doc_id: doc_id.clone(),
            key: key.to_string(),
        });
        Ok(())
    }

    /// Fresh environment for one attempt of `definition` against the latest snapshot
    pub fn environment(
        &self,
        definition: &StepDefinition,
        doc_id: &DocumentId,
    ) -> Result<Environment, EngineError> {
        Ok(Environment::new(
            definition.step_vars(),
            self.documents.snapshot(doc_id)?,
            self.system.clone(),
            definition.metadata(),
            self.templates.clone(),
        )
        .with_document_id(doc_id.clone()))
    }
}

/// Runs documents through one pipeline definition
pub struct Engine {
    core: EngineHandle,
    root: Arc<dyn Step>,
    definition: Arc<StepDefinition>,
    initialized: OnceCell<()>,
}

impl Engine {
    /// Build an engine with the built-in steps and the given system configuration
    pub fn new(definition: &str, system: Value) -> Result<Self, EngineError> {
        Self::with_config(definition, EngineConfig::new().with_system(system))
    }

    pub fn with_config(definition: &str, config: EngineConfig) -> Result<Self, EngineError> {
        Self::from_definition(PipelineDefinition::parse(definition)?, config)
    }

    /// Build the step tree; unknown steps and malformed nodes fail here
    pub fn from_definition(
        pipeline: PipelineDefinition,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        if !(config.system.is_object() || config.system.is_null()) {
            return Err(ConfigError::Invalid {
                step: "system".to_string(),
                message: "system configuration must be a map".to_string(),
            }
            .into());
        }

        let root = config.registry.build(&pipeline.root)?;
        Ok(Self {
            core: EngineCore::new(config),
            root,
            definition: Arc::new(pipeline.root),
            initialized: OnceCell::new(),
        })
    }

    pub fn handle(&self) -> &EngineHandle {
        &self.core
    }

    pub fn definition(&self) -> &StepDefinition {
        &self.definition
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.core.add_event_handler(handler);
    }

    /// Initialize the step tree; runs once, before the first document
    pub async fn init(&self) -> Result<(), EngineError> {
        self.initialized
            .get_or_try_init(|| async { self.root.init(&self.core).await })
            .await
            .map(|_| ())
    }

    /// Run one document through the pipeline.
    ///
    /// Resolves with the final document, or the first fatal error. A run whose
    /// remaining steps stay blocked never resolves; apply a timeout around the call.
    pub async fn execute(&self, mut input: Document) -> Result<Document, EngineError> {
        self.init().await?;

        let doc_id = DocumentId::generate();
        input.insert(DOC_ID_KEY.to_string(), Value::String(doc_id.to_string()));
        let scope = self.core.documents().open(doc_id.clone(), input);
        let run = DocumentRun::new(self.core.clone(), doc_id.clone());

        info!("Document {} started", doc_id.short());
        self.core.emit(ExecutionEvent::DocumentStarted {
            doc_id: doc_id.clone(),
        });

        let env = match self.core.environment(&self.definition, &doc_id) {
            Ok(env) => env,
            Err(e) => return run.finish(Err(e)),
        };
        let root = self.root.clone();
        let root_doc = doc_id.clone();
        let task = scope.spawn(async move {
            let _finish = FinishGuard::new(root.clone(), root_doc);
            root.execute(&env).await
        });

        let outcome = match task.await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(StepError::Engine(inner))) => Err(*inner),
            Ok(Err(StepError::Abandoned)) if scope.is_disposed() => {
                Err(EngineError::Cancelled(doc_id.clone()))
            }
            Ok(Err(e)) => Err(EngineError::Step(e)),
            Err(join) if join.is_cancelled() => Err(EngineError::Cancelled(doc_id.clone())),
            Err(join) => Err(EngineError::Panicked(join.to_string())),
        };
        run.finish(outcome)
    }

    /// Current snapshot of an in-flight document
    pub fn get_document(&self, doc_id: &DocumentId) -> Result<Arc<Document>, EngineError> {
        self.core.get_document(doc_id)
    }

    pub async fn update_document(
        &self,
        doc_id: &DocumentId,
        key: &str,
        value: Value,
    ) -> Result<(), EngineError> {
        self.core.update_document(doc_id, key, value).await
    }

    /// Tear down everything running for a document. Returns `false` if it is not in flight.
    pub fn cancel(&self, doc_id: &DocumentId) -> bool {
        match self.core.documents().scope(doc_id) {
            Ok(scope) => {
                info!("Cancelling document {}", doc_id.short());
                scope.dispose()
            }
            Err(_) => false,
        }
    }

    /// Cancel every in-flight document; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let scopes = self.core.documents().scopes();
        if !scopes.is_empty() {
            info!("Cancelling {} in-flight documents", scopes.len());
        }
        scopes.iter().filter(|scope| scope.dispose()).count()
    }

    /// Number of documents currently in flight
    pub fn active_documents(&self) -> usize {
        self.core.documents().len()
    }
}

/// Closes a document exactly once: on completion, or on drop when the
/// caller abandons the `execute` future.
struct DocumentRun {
    core: EngineHandle,
    summary: RunSummary,
    closed: bool,
}

impl DocumentRun {
    fn new(core: EngineHandle, doc_id: DocumentId) -> Self {
        Self {
            core,
            summary: RunSummary::new(doc_id),
            closed: false,
        }
    }

    fn finish(mut self, outcome: Result<(), EngineError>) -> Result<Document, EngineError> {
        let doc_id = self.summary.doc_id.clone();
        let last = self.close();

        let result = match outcome {
            Ok(()) => {
                self.summary.complete();
                last.map(Arc::unwrap_or_clone)
                    .ok_or_else(|| EngineError::UnknownDocument(doc_id.clone()))
            }
            Err(e) => {
                match &e {
                    EngineError::Cancelled(_) => self.summary.cancel(),
                    _ => self.summary.fail(e.to_string()),
                }
                Err(e)
            }
        };

        match self.summary.status {
            ExecutionStatus::Completed => info!("Document {} completed", doc_id.short()),
            status => error!("Document {} ended {:?}: {:?}", doc_id.short(), status, self.summary.error),
        }
        self.publish();
        result
    }

    fn close(&mut self) -> Option<Arc<Document>> {
        self.closed = true;
        self.core.documents().close(&self.summary.doc_id)
    }

    fn publish(&self) {
        self.core.emit(ExecutionEvent::DocumentCompleted {
            summary: self.summary.clone(),
        });
    }
}

impl Drop for DocumentRun {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        debug!("Document {} dropped before completion", self.summary.doc_id.short());
        self.close();
        self.summary.cancel();
        self.publish();
    }
}
