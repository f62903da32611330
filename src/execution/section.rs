//! Section - a composite step running its children sequentially or concurrently

use crate::{
    core::{
        ConfigError, DocumentId, DocumentScope, EngineError, Environment, StepDefinition,
        StepError, StepKind, StepStatus, DEFAULT_SECTION_NAME,
    },
    execution::{EngineHandle, ExecutionEvent, StatusSender, StepExecutor},
    steps::{Step, StepRegistry},
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// How a section combines its children
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// A child starts once the previous one has stopped or blocked
    #[default]
    Sequential,

    /// All children start together; the section joins on all of them
    Concurrent,
}

struct ChildStep {
    step: Arc<dyn Step>,
    definition: Arc<StepDefinition>,
}

/// Runs child steps (leaves or nested sections) against one document.
///
/// The output of a section is the first `return` value produced by its
/// children in declaration order.
pub struct Section {
    name: String,
    strategy: SchedulingStrategy,
    children: Vec<ChildStep>,
    engine: OnceLock<EngineHandle>,
}

impl Section {
    pub fn from_definition(
        definition: &StepDefinition,
        registry: &StepRegistry,
    ) -> Result<Self, ConfigError> {
        let StepKind::Section(children) = &definition.kind else {
            return Err(ConfigError::Invalid {
                step: definition.display_name(),
                message: "not a section".to_string(),
            });
        };

        let children = children
            .iter()
            .map(|child| {
                Ok(ChildStep {
                    step: registry.build(child)?,
                    definition: Arc::new(child.clone()),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            name: definition
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_SECTION_NAME.to_string()),
            strategy: if definition.concurrent {
                SchedulingStrategy::Concurrent
            } else {
                SchedulingStrategy::Sequential
            },
            children,
            engine: OnceLock::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn spawn_child(
        &self,
        index: usize,
        engine: &EngineHandle,
        doc_id: &DocumentId,
        scope: &DocumentScope,
        status_tx: &StatusSender,
        tasks: &mut JoinSet<(usize, Result<Option<Value>, StepError>)>,
    ) {
        let child = &self.children[index];
        let executor = StepExecutor::new(
            engine.clone(),
            child.step.clone(),
            child.definition.clone(),
            doc_id.clone(),
        )
        .with_status_reporter(index, status_tx.clone());
        let handle = tasks.spawn(async move { (index, executor.run().await) });
        scope.track(handle);
    }

    /// Drive the children to a terminal state and join on all of them.
    ///
    /// Sequential sections start the next child once the latest one has
    /// stopped or blocked, and start nothing new after a failure.
    async fn run_children(
        &self,
        engine: &EngineHandle,
        doc_id: &DocumentId,
    ) -> Result<Option<Value>, StepError> {
        let scope = engine.documents().scope(doc_id)?;
        let count = self.children.len();
        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let mut statuses = vec![StepStatus::Nascent; count];
        let mut joined = vec![false; count];
        let mut outputs: Vec<Option<Value>> = vec![None; count];
        let mut first_error: Option<StepError> = None;
        let mut abandoned = false;

        let mut tasks = JoinSet::new();
        let mut started = match self.strategy {
            SchedulingStrategy::Concurrent => count,
            SchedulingStrategy::Sequential => count.min(1),
        };
        for index in 0..started {
            self.spawn_child(index, engine, doc_id, &scope, &status_tx, &mut tasks);
        }

        while !tasks.is_empty() {
            tokio::select! {
                Some((index, status)) = status_rx.recv() => {
                    statuses[index] = status;
                    let suspended = statuses[..started].iter().all(|s| s.stopped() || *s == StepStatus::Blocked)
                        && statuses.iter().any(|s| *s == StepStatus::Blocked);
                    if suspended && started == count {
                        debug!("Section {} suspended: every unfinished step is blocked", self.name);
                    }
                }
                Some(result) = tasks.join_next() => {
                    let (index, result) = result.map_err(|e| {
                        StepError::Failed(format!("step task in section {} ended abnormally: {}", self.name, e))
                    })?;
                    joined[index] = true;
                    match result {
                        Ok(returned) => outputs[index] = returned,
                        Err(StepError::Abandoned) => abandoned = true,
                        Err(e) => {
                            if first_error.is_none() {
                                first_error = Some(e);
                            }
                        }
                    }
                }
                else => break,
            }

            if started < count && first_error.is_none() && !scope.is_halted() {
                let latest = started - 1;
                if joined[latest] || statuses[latest] == StepStatus::Blocked {
                    self.spawn_child(started, engine, doc_id, &scope, &status_tx, &mut tasks);
                    started += 1;
                }
            }
        }

        // Siblings were allowed to finish; now surface the first fatal error.
        if let Some(error) = first_error {
            return Err(error);
        }
        if abandoned || started < count {
            return Err(StepError::Abandoned);
        }
        Ok(outputs.into_iter().flatten().next())
    }
}

#[async_trait]
impl Step for Section {
    async fn init(&self, engine: &EngineHandle) -> Result<(), EngineError> {
        // Sections shared between engines keep the first handle.
        let _ = self.engine.set(engine.clone());
        for child in &self.children {
            child.step.init(engine).await?;
        }
        Ok(())
    }

    async fn execute(&self, env: &Environment) -> Result<Option<Value>, StepError> {
        let engine = self
            .engine
            .get()
            .ok_or_else(|| EngineError::NotInitialized(self.name.clone()))?;
        let doc_id = env.document_id().ok_or_else(|| {
            StepError::Failed(format!("section {} executed without a document id", self.name))
        })?;

        info!(
            "Section {} started for document {} ({} steps, {:?})",
            self.name,
            doc_id.short(),
            self.children.len(),
            self.strategy
        );
        engine.emit(ExecutionEvent::SectionStarted {
            doc_id: doc_id.clone(),
            section: self.name.clone(),
        });

        let result = self.run_children(engine, &doc_id).await;

        match &result {
            Ok(_) => {
                info!("Section {} completed for document {}", self.name, doc_id.short());
                engine.emit(ExecutionEvent::SectionCompleted {
                    doc_id,
                    section: self.name.clone(),
                });
            }
            Err(e) => {
                warn!("Section {} errored for document {}: {}", self.name, doc_id.short(), e);
                engine.emit(ExecutionEvent::SectionErrored {
                    doc_id,
                    section: self.name.clone(),
                    error: e.to_string(),
                });
            }
        }

        result
    }

    fn finish(&self, doc_id: &DocumentId) {
        debug!("Section {} finished with document {}", self.name, doc_id.short());
    }
}
