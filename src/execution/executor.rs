//! Step executor - drives one step against one document

use crate::{
    core::{
        DocumentId, DocumentScope, EngineError, Environment, StepDefinition, StepError,
        StepStatus, Subscription,
    },
    execution::{EngineHandle, ExecutionEvent},
    steps::Step,
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Status updates a section receives from its children: (child index, new status)
pub type StatusSender = mpsc::UnboundedSender<(usize, StepStatus)>;

/// Calls [`Step::finish`] when dropped, so it runs exactly once on every exit path
pub(crate) struct FinishGuard {
    step: Arc<dyn Step>,
    doc_id: DocumentId,
}

impl FinishGuard {
    pub(crate) fn new(step: Arc<dyn Step>, doc_id: DocumentId) -> Self {
        Self { step, doc_id }
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.step.finish(&self.doc_id);
    }
}

/// Runs one step for one document: attempts, defers on missing data,
/// retries on document changes, and round-trips registered results
/// through the engine before completing.
pub struct StepExecutor {
    engine: EngineHandle,
    step: Arc<dyn Step>,
    definition: Arc<StepDefinition>,
    doc_id: DocumentId,
    label: String,
    status: StepStatus,
    attempts: usize,
    reporter: Option<(usize, StatusSender)>,
}

impl StepExecutor {
    pub fn new(
        engine: EngineHandle,
        step: Arc<dyn Step>,
        definition: Arc<StepDefinition>,
        doc_id: DocumentId,
    ) -> Self {
        let label = definition.display_name();
        Self {
            engine,
            step,
            definition,
            doc_id,
            label,
            status: StepStatus::Nascent,
            attempts: 0,
            reporter: None,
        }
    }

    /// Report every status change to the owning section
    pub fn with_status_reporter(mut self, index: usize, sender: StatusSender) -> Self {
        self.reporter = Some((index, sender));
        self
    }

    pub fn status(&self) -> StepStatus {
        self.status
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Run until the step completes or fails. Returns the step's `return` value.
    ///
    /// Never resolves while the step stays blocked and nothing changes the document.
    pub async fn run(mut self) -> Result<Option<Value>, StepError> {
        let _finish = FinishGuard::new(self.step.clone(), self.doc_id.clone());
        let scope = self.engine.documents().scope(&self.doc_id)?;
        // Subscribe before the first attempt so no change between attempts is missed.
        let mut changes = scope.subscribe();

        loop {
            if scope.is_halted() {
                debug!("Step {} abandoned for document {}", self.label, self.doc_id.short());
                return Err(StepError::Abandoned);
            }

            self.attempts += 1;
            self.set_status(StepStatus::Running);

            match self.attempt(&mut changes).await {
                Ok(returned) => {
                    self.set_status(StepStatus::Complete);
                    return Ok(returned);
                }
                Err(e) if e.is_recoverable() => {
                    debug!(
                        "Step {} deferred on document {}: {}",
                        self.label,
                        self.doc_id.short(),
                        e
                    );
                    self.set_status(StepStatus::Blocked);
                    if !self.wait_for_change(&scope, &mut changes).await? {
                        debug!("Step {} abandoned while blocked", self.label);
                        return Err(StepError::Abandoned);
                    }
                }
                Err(e) => {
                    error!("Step {} failed on document {}: {}", self.label, self.doc_id.short(), e);
                    self.set_status(StepStatus::Failed);
                    scope.halt();
                    return Err(e);
                }
            }
        }
    }

    /// One attempt, bounded by the step's timeout
    async fn attempt(&self, changes: &mut Subscription) -> Result<Option<Value>, StepError> {
        // Anything queued so far is already visible in the snapshot taken below.
        changes.drain();
        let env = self.engine.environment(&self.definition, &self.doc_id)?;

        match self.definition.timeout {
            Some(limit) => match timeout(limit, self.attempt_once(env, changes)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("Step {} timed out after {:?}", self.label, limit);
                    Err(StepError::Timeout(limit))
                }
            },
            None => self.attempt_once(env, changes).await,
        }
    }

    async fn attempt_once(
        &self,
        env: Environment,
        changes: &mut Subscription,
    ) -> Result<Option<Value>, StepError> {
        if !self.should_run(&env)? {
            info!("Step {} skipped: when condition is false", self.label);
            return Ok(None);
        }

        let produced = self.step.execute(&env).await?;

        let merged = match (self.definition.register.as_deref(), produced) {
            (Some(key), Some(value)) => {
                self.engine.update_document(&self.doc_id, key, value).await?;
                self.await_echo(key, changes).await?;
                true
            }
            _ => false,
        };

        let Some(template) = &self.definition.returns else {
            return Ok(None);
        };
        if !merged {
            return Ok(Some(env.render_value(template)?));
        }

        // The merge already happened, so a retry is not an option from here on.
        let env = self.engine.environment(&self.definition, &self.doc_id)?;
        env.render_value(template).map(Some).map_err(|e| {
            StepError::Failed(format!("return value of {} could not be rendered: {}", self.label, e))
        })
    }

    fn should_run(&self, env: &Environment) -> Result<bool, StepError> {
        let Some(when) = &self.definition.when else {
            return Ok(true);
        };
        Ok(match env.render_value(when)? {
            Value::Bool(flag) => flag,
            Value::String(text) => text.trim().eq_ignore_ascii_case("true"),
            _ => false,
        })
    }

    /// Wait for the change notification carrying our own merge
    async fn await_echo(&self, key: &str, changes: &mut Subscription) -> Result<(), StepError> {
        loop {
            match changes.recv().await {
                Ok(change) if change.key == key => return Ok(()),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Step {} lagged {} changes waiting for '{}'", self.label, skipped, key);
                    if self.engine.get_document(&self.doc_id)?.contains_key(key) {
                        return Ok(());
                    }
                }
                Err(RecvError::Closed) => {
                    return Err(EngineError::DocumentClosed(self.doc_id.clone()).into())
                }
            }
        }
    }

    /// Park until the document changes. `Ok(false)` when the document halted instead.
    async fn wait_for_change(
        &self,
        scope: &DocumentScope,
        changes: &mut Subscription,
    ) -> Result<bool, StepError> {
        tokio::select! {
            received = changes.recv() => match received {
                Ok(change) => {
                    debug!("Step {} woken by change to '{}'", self.label, change.key);
                    Ok(true)
                }
                Err(RecvError::Lagged(_)) => Ok(true),
                Err(RecvError::Closed) => Err(EngineError::DocumentClosed(self.doc_id.clone()).into()),
            },
            _ = scope.halted() => Ok(false),
        }
    }

    fn set_status(&mut self, next: StepStatus) {
        self.status.transition(next);
        if let Some((index, sender)) = &self.reporter {
            // The section may already be gone after an early exit.
            let _ = sender.send((*index, next));
        }
        self.engine.emit(ExecutionEvent::StepStatusChanged {
            doc_id: self.doc_id.clone(),
            step: self.label.clone(),
            status: next,
            attempt: self.attempts,
        });
    }
}
