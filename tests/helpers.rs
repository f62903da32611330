//! Test utility functions for docflow
#![allow(dead_code)]

use async_trait::async_trait;
use docflow::core::{Document, DocumentId, Environment, ExecutionStatus, RunSummary, StepError, StepStatus};
use docflow::execution::{Engine, EngineConfig, ExecutionEvent};
use docflow::steps::{Step, StepRegistry};
use docflow::EngineError;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Step that never produces anything
pub struct NeverStep;

#[async_trait]
impl Step for NeverStep {
    async fn execute(&self, _env: &Environment) -> Result<Option<Value>, StepError> {
        std::future::pending().await
    }
}

/// Step that always fails with its `message` variable
pub struct FailingStep;

#[async_trait]
impl Step for FailingStep {
    async fn execute(&self, env: &Environment) -> Result<Option<Value>, StepError> {
        let message = env.get_str("message")?.unwrap_or_else(|| "failing step".to_string());
        Err(StepError::Failed(message))
    }
}

/// Produces its `value` variable and counts calls to execute and finish
#[derive(Default)]
pub struct TrackedStep {
    pub executions: AtomicUsize,
    pub finished: AtomicUsize,
}

impl TrackedStep {
    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for TrackedStep {
    async fn execute(&self, env: &Environment) -> Result<Option<Value>, StepError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        Ok(Some(env.require("value")?))
    }

    fn finish(&self, _doc_id: &DocumentId) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }
}

/// Built-in steps plus `never` and `failing`
pub fn test_registry() -> StepRegistry {
    let mut registry = StepRegistry::with_builtins();
    registry
        .register_factory("never", |_| Ok(Arc::new(NeverStep) as Arc<dyn Step>))
        .register_factory("failing", |_| Ok(Arc::new(FailingStep) as Arc<dyn Step>));
    registry
}

/// Test registry with one shared `tracked` step instance
pub fn tracked_registry(tracked: Arc<TrackedStep>) -> StepRegistry {
    let mut registry = test_registry();
    registry.register_factory("tracked", move |_| Ok(tracked.clone() as Arc<dyn Step>));
    registry
}

pub fn engine_for(yaml: &str) -> Engine {
    engine_with(yaml, test_registry())
}

pub fn engine_with(yaml: &str, registry: StepRegistry) -> Engine {
    Engine::with_config(yaml, EngineConfig::new().with_registry(registry))
        .expect("pipeline definition should build")
}

/// Build an input document from a JSON object literal
pub fn doc(value: Value) -> Document {
    match value {
        Value::Object(map) => map,
        other => panic!("test documents must be objects, got {}", other),
    }
}

pub fn empty_doc() -> Document {
    doc(json!({}))
}

/// Records every event an engine emits
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ExecutionEvent>>>,
}

impl EventLog {
    pub fn attach(engine: &Engine) -> Self {
        let log = Self::default();
        let events = log.events.clone();
        engine.add_event_handler(move |event| events.lock().push(event));
        log
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().clone()
    }

    pub fn completions(&self) -> Vec<RunSummary> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ExecutionEvent::DocumentCompleted { summary } => Some(summary),
                _ => None,
            })
            .collect()
    }

    /// How many times each key was merged
    pub fn changes_per_key(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for event in self.events() {
            if let ExecutionEvent::DocumentChanged { key, .. } = event {
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        counts
    }

    pub fn status_count(&self, step: &str, status: StepStatus) -> usize {
        self.events()
            .iter()
            .filter(|event| {
                matches!(event, ExecutionEvent::StepStatusChanged { step: s, status: st, .. }
                    if s == step && *st == status)
            })
            .count()
    }

    /// Document that most recently started
    pub fn started(&self) -> Option<DocumentId> {
        self.events().iter().rev().find_map(|event| match event {
            ExecutionEvent::DocumentStarted { doc_id } => Some(doc_id.clone()),
            _ => None,
        })
    }

    /// Poll until `step` has reported `status`, or panic after a second
    pub async fn wait_for_status(&self, step: &str, status: StepStatus) {
        self.wait_for_count(step, status, 1).await;
    }

    /// Poll until `step` has reported `status` at least `count` times
    pub async fn wait_for_count(&self, step: &str, status: StepStatus, count: usize) {
        for _ in 0..100 {
            if self.status_count(step, status) >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("step {} reached {:?} fewer than {} times", step, status, count);
    }
}

/// Execute with a generous deadline so a hung run fails the test instead of stalling it
pub async fn execute(engine: &Engine, input: Document) -> Result<Document, EngineError> {
    tokio::time::timeout(Duration::from_secs(5), engine.execute(input))
        .await
        .expect("document should finish within five seconds")
}

pub fn assert_completed_once(log: &EventLog, status: ExecutionStatus) {
    let completions = log.completions();
    assert_eq!(completions.len(), 1, "expected exactly one completion: {:?}", completions);
    assert_eq!(completions[0].status, status);
}

pub fn assert_step_failed(result: &Result<Document, EngineError>, message: &str) {
    match result {
        Err(EngineError::Step(StepError::Failed(m))) => assert!(
            m.contains(message),
            "failure '{}' should mention '{}'",
            m,
            message
        ),
        other => panic!("expected a step failure, got {:?}", other),
    }
}
