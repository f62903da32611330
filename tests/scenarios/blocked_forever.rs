//! Test: Blocked Forever - data that never arrives leaves the run pending until someone intervenes

use crate::helpers::*;
use docflow::core::{ExecutionStatus, StepStatus};
use docflow::EngineError;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const WAITING: &str = r#"
- copy:
    from: "{{ doc.absent }}"
  register: copied
"#;

#[tokio::test]
async fn test_never_resolves_and_cleans_up_when_dropped() {
    let tracked = Arc::new(TrackedStep::default());
    let yaml = r#"
concurrent: true
steps:
  - copy:
      from: "{{ doc.absent }}"
    register: copied
  - tracked:
      value: "{{ doc.absent }}"
"#;
    let engine = engine_with(yaml, tracked_registry(tracked.clone()));
    let log = EventLog::attach(&engine);

    let outcome = tokio::time::timeout(Duration::from_millis(200), engine.execute(empty_doc())).await;
    assert!(outcome.is_err(), "run should still be pending, got {:?}", outcome);

    // Dropping the pending future releases the document and its tasks
    assert_eq!(engine.active_documents(), 0);
    assert_completed_once(&log, ExecutionStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(tracked.finished(), 1);
    assert!(log.status_count("copy", StepStatus::Blocked) >= 1);
    assert_eq!(log.status_count("copy", StepStatus::Complete), 0);
}

#[tokio::test]
async fn test_external_update_unblocks_run() {
    let engine = Arc::new(engine_for(WAITING));
    let log = EventLog::attach(&engine);

    let runner = engine.clone();
    let task = tokio::spawn(async move { runner.execute(empty_doc()).await });

    log.wait_for_status("copy", StepStatus::Blocked).await;
    let doc_id = log.started().unwrap();
    assert!(!engine.get_document(&doc_id).unwrap().contains_key("copied"));

    engine.update_document(&doc_id, "absent", json!("here")).await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result["absent"], json!("here"));
    assert_eq!(result["copied"], json!("here"));
    assert!(engine.get_document(&doc_id).is_err());
}

#[tokio::test]
async fn test_cancel_releases_blocked_run() {
    let engine = Arc::new(engine_for(WAITING));
    let log = EventLog::attach(&engine);

    let runner = engine.clone();
    let task = tokio::spawn(async move { runner.execute(empty_doc()).await });

    log.wait_for_status("copy", StepStatus::Blocked).await;
    let doc_id = log.started().unwrap();
    assert!(engine.cancel(&doc_id));
    assert!(!engine.cancel(&doc_id));

    let result = tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled(id)) if id == doc_id));
    assert_eq!(engine.active_documents(), 0);
    assert_completed_once(&log, ExecutionStatus::Cancelled);
}

/// A blocked step is retried once per document change and never while nothing changes
#[tokio::test]
async fn test_blocked_step_retries_once_per_change() {
    let tracked = Arc::new(TrackedStep::default());
    let yaml = r#"
- tracked:
    value: "{{ doc.needed }}"
  register: result
"#;
    let engine = Arc::new(engine_with(yaml, tracked_registry(tracked.clone())));
    let log = EventLog::attach(&engine);

    let runner = engine.clone();
    let task = tokio::spawn(async move { runner.execute(empty_doc()).await });

    log.wait_for_status("tracked", StepStatus::Blocked).await;
    let doc_id = log.started().unwrap();
    let executions = tracked.executions();
    let running = log.status_count("tracked", StepStatus::Running);
    let blocked = log.status_count("tracked", StepStatus::Blocked);
    assert_eq!((executions, running, blocked), (1, 1, 1));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tracked.executions(), executions);
    assert_eq!(log.status_count("tracked", StepStatus::Running), running);
    assert_eq!(log.status_count("tracked", StepStatus::Blocked), blocked);

    // An unrelated key still wakes the step, which blocks again
    engine.update_document(&doc_id, "other", json!(1)).await.unwrap();
    log.wait_for_count("tracked", StepStatus::Blocked, blocked + 1).await;
    assert_eq!(tracked.executions(), executions + 1);
    assert_eq!(log.status_count("tracked", StepStatus::Running), running + 1);

    engine.update_document(&doc_id, "needed", json!("now")).await.unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(result["result"], json!("now"));
    assert_eq!(tracked.executions(), executions + 2);
    assert_eq!(log.changes_per_key().get("result"), Some(&1));
}
