//! Engine pool - one initialized engine per resolved pipeline

use crate::{
    core::EngineError,
    execution::{Engine, EngineConfig},
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Turns a pipeline name into its definition text
#[async_trait]
pub trait PipelineResolver: Send + Sync {
    async fn resolve(&self, name: &str) -> Result<String, EngineError>;
}

/// Resolves names from an in-memory table
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    pipelines: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pipeline(mut self, name: impl Into<String>, definition: impl Into<String>) -> Self {
        self.pipelines.insert(name.into(), definition.into());
        self
    }
}

#[async_trait]
impl PipelineResolver for StaticResolver {
    async fn resolve(&self, name: &str) -> Result<String, EngineError> {
        self.pipelines
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Resolve {
                pipeline: name.to_string(),
                message: "no such pipeline".to_string(),
            })
    }
}

/// Hands out engines by pipeline name.
///
/// Names are resolved on every lookup; engines are cached by the resolved
/// definition text, so two names for the same pipeline share one engine.
/// Every engine is built from the pool's [`EngineConfig`] and initialized
/// before it is handed out.
pub struct EnginePool {
    resolver: Arc<dyn PipelineResolver>,
    config: EngineConfig,
    engines: RwLock<HashMap<String, Arc<Engine>>>,
}

impl EnginePool {
    pub fn new(resolver: impl PipelineResolver + 'static) -> Self {
        Self::with_config(resolver, EngineConfig::new())
    }

    pub fn with_config(resolver: impl PipelineResolver + 'static, config: EngineConfig) -> Self {
        Self {
            resolver: Arc::new(resolver),
            config,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// The engine for `name`, built and initialized on first use
    pub async fn engine_for(&self, name: &str) -> Result<Arc<Engine>, EngineError> {
        let definition = self.resolver.resolve(name).await?;

        let cached = self.engines.read().get(&definition).cloned();
        if let Some(engine) = cached {
            debug!("Pipeline {} served from the pool", name);
            return Ok(engine);
        }

        let engine = Arc::new(Engine::with_config(&definition, self.config.clone())?);
        engine.init().await?;
        info!("Pipeline {} added to the pool", name);

        // A concurrent lookup may have built the same pipeline meanwhile; keep the first.
        let engine = self
            .engines
            .write()
            .entry(definition)
            .or_insert(engine)
            .clone();
        Ok(engine)
    }

    /// Number of pooled engines
    pub fn len(&self) -> usize {
        self.engines.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.read().is_empty()
    }

    /// Drop every pooled engine and cancel the documents still running on them.
    /// Returns how many engines were released.
    pub fn cleanup_all(&self) -> usize {
        let engines: Vec<Arc<Engine>> = self.engines.write().drain().map(|(_, e)| e).collect();
        for engine in &engines {
            engine.cancel_all();
        }
        info!("Released {} pooled engines", engines.len());
        engines.len()
    }
}
