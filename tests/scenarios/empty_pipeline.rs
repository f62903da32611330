//! Test: Empty Pipeline - a definition with no steps returns the input

use crate::helpers::*;
use docflow::core::ExecutionStatus;
use docflow::DOC_ID_KEY;
use serde_json::json;

#[tokio::test]
async fn test_empty_list_returns_input() {
    let engine = engine_for("[]");
    let log = EventLog::attach(&engine);

    let result = execute(&engine, doc(json!({ "a": 1, "b": [true] }))).await.unwrap();

    assert_eq!(result["a"], json!(1));
    assert_eq!(result["b"], json!([true]));
    assert_eq!(result.len(), 3);
    let id = result[DOC_ID_KEY].as_str().unwrap();
    assert_eq!(log.started().as_ref().map(|d| d.as_str()), Some(id));
    assert!(log.changes_per_key().is_empty());
    assert_completed_once(&log, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_map_without_steps() {
    let engine = engine_for("name: nothing\n");
    assert_eq!(engine.definition().display_name(), "nothing");

    let result = execute(&engine, empty_doc()).await.unwrap();
    assert_eq!(result.len(), 1);
    assert!(result.contains_key(DOC_ID_KEY));
}

/// An id supplied by the caller is replaced with a fresh one
#[tokio::test]
async fn test_caller_cannot_choose_the_id() {
    let engine = engine_for("[]");
    let result = execute(&engine, doc(json!({ DOC_ID_KEY: "mine" }))).await.unwrap();
    assert_ne!(result[DOC_ID_KEY], json!("mine"));
}
