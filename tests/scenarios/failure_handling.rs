//! Test: Failure Handling - a fatal step error ends the document

use crate::helpers::*;
use docflow::core::{ExecutionStatus, StepStatus};
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_failing_step_rejects_execute() {
    let yaml = r#"
- failing:
    message: "disk on fire"
"#;
    let engine = engine_for(yaml);
    let log = EventLog::attach(&engine);

    let result = execute(&engine, empty_doc()).await;

    assert_step_failed(&result, "disk on fire");
    assert_eq!(engine.active_documents(), 0);
    assert_completed_once(&log, ExecutionStatus::Failed);
    assert!(log.completions()[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("disk on fire")));
}

/// A sibling blocked on data that will never come must not keep the failure from surfacing
#[tokio::test]
async fn test_failure_with_blocked_sibling_resolves() {
    let yaml = r#"
concurrent: true
steps:
  - copy:
      from: "{{ doc.absent }}"
    register: never_there
  - failing:
      message: "bad input"
"#;
    let engine = engine_for(yaml);
    let log = EventLog::attach(&engine);

    let result = execute(&engine, empty_doc()).await;

    assert_step_failed(&result, "bad input");
    assert_eq!(log.status_count("failing", StepStatus::Failed), 1);
    assert_eq!(log.status_count("copy", StepStatus::Complete), 0);
    assert_completed_once(&log, ExecutionStatus::Failed);
    assert_eq!(engine.active_documents(), 0);
}

/// Later steps of a sequential section never start once one has failed
#[tokio::test]
async fn test_sequential_failure_skips_the_rest() {
    let tracked = Arc::new(TrackedStep::default());
    let yaml = r#"
- failing: {}
- tracked:
    value: 1
  register: after
"#;
    let engine = engine_with(yaml, tracked_registry(tracked.clone()));

    let result = execute(&engine, empty_doc()).await;

    assert_step_failed(&result, "failing step");
    assert_eq!(tracked.executions(), 0);
    assert_eq!(tracked.finished(), 0);
}

/// finish runs exactly once per step and document, however the run ends
#[tokio::test]
async fn test_finish_called_once_per_document() {
    let tracked = Arc::new(TrackedStep::default());
    let yaml = r#"
concurrent: true
steps:
  - tracked:
      value: "{{ doc.later }}"
    register: first
  - copy:
      from: "soon"
    register: later
"#;
    let engine = engine_with(yaml, tracked_registry(tracked.clone()));

    let result = execute(&engine, empty_doc()).await.unwrap();
    assert_eq!(result["first"], json!("soon"));
    assert!(tracked.executions() >= 1);
    assert_eq!(tracked.finished(), 1);

    let failing = engine_with(
        "concurrent: true\nsteps:\n  - tracked:\n      value: \"{{ doc.absent }}\"\n  - failing: {}\n",
        tracked_registry(tracked.clone()),
    );
    assert_step_failed(&execute(&failing, empty_doc()).await, "failing step");
    assert_eq!(tracked.finished(), 2);
}

/// A `return` template that cannot be rendered after the merge is fatal
#[tokio::test]
async fn test_unrenderable_return_is_fatal() {
    let yaml = r#"
- copy:
    from: "1"
  register: one
  return: "{{ doc.missing }}"
"#;
    let engine = engine_for(yaml);

    let result = execute(&engine, empty_doc()).await;
    assert_step_failed(&result, "could not be rendered");
}
