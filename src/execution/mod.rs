//! Document execution: the engine, its document store, sections and step executors

pub mod engine;
pub mod executor;
pub mod pool;
pub mod section;
pub mod store;

pub use engine::{Engine, EngineConfig, EngineCore, EngineHandle, EventHandler, ExecutionEvent};
pub use pool::{EnginePool, PipelineResolver, StaticResolver};
pub use executor::{StatusSender, StepExecutor};
pub use section::{SchedulingStrategy, Section};
pub use store::DocumentStore;
