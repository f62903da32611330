//! Scenario-based tests for docflow

mod blocked_forever;
mod concurrent_sections;
mod empty_pipeline;
mod enrichment_chain;
mod failure_handling;
