//! Test: Enrichment Chain - steps wait for the data they read, whatever order they are declared in

use crate::helpers::*;
use docflow::core::ExecutionStatus;
use serde_json::json;

/// Declared back to front, so every step but the last one listed starts out blocked
#[tokio::test]
async fn test_concurrent_chain_declared_in_reverse() {
    let yaml = r#"
name: spell
concurrent: true
steps:
  - copy:
      from: "{{ doc.cat }}w"
    register: cats
  - copy:
      from: "{{ doc.ca }}o"
    register: cat
  - copy:
      from: "{{ doc.c }}e"
    register: ca
  - copy:
      from: "{{ doc.x }}m"
    register: c
"#;
    let engine = engine_for(yaml);
    let log = EventLog::attach(&engine);

    let result = execute(&engine, doc(json!({ "x": "" }))).await.unwrap();

    assert_eq!(result["c"], json!("m"));
    assert_eq!(result["ca"], json!("me"));
    assert_eq!(result["cat"], json!("meo"));
    assert_eq!(result["cats"], json!("meow"));
    assert_eq!(result["x"], json!(""));
    assert!(result.contains_key(docflow::DOC_ID_KEY));

    // Each key is merged exactly once, no matter how often its step was retried
    let changes = log.changes_per_key();
    for key in ["c", "ca", "cat", "cats"] {
        assert_eq!(changes.get(key), Some(&1), "key {} merged {:?} times", key, changes.get(key));
    }
    assert_eq!(changes.len(), 4);
    assert_completed_once(&log, ExecutionStatus::Completed);
    assert_eq!(engine.active_documents(), 0);
}

#[tokio::test]
async fn test_sequential_chain_in_order() {
    let yaml = r#"
- copy:
    from: "{{ doc.x }}m"
  register: c
- copy:
    from: "{{ doc.c }}e"
  register: ca
- copy:
    from: "{{ doc.ca }}o"
  register: cat
- copy:
    from: "{{ doc.cat }}w"
  register: cats
"#;
    let engine = engine_for(yaml);
    let log = EventLog::attach(&engine);

    let result = execute(&engine, doc(json!({ "x": "" }))).await.unwrap();

    assert_eq!(result["cats"], json!("meow"));
    // In declaration order nothing ever has to wait
    assert_eq!(log.status_count("copy", docflow::StepStatus::Blocked), 0);
    assert_eq!(log.status_count("copy", docflow::StepStatus::Complete), 4);
}

/// Without `concurrent`, a blocked step hands over to the next one, so a reversed chain still finishes
#[tokio::test]
async fn test_sequential_chain_declared_in_reverse() {
    let yaml = r#"
- copy:
    from: "{{ doc.cat }}w"
  register: cats
- copy:
    from: "{{ doc.ca }}o"
  register: cat
- copy:
    from: "{{ doc.c }}e"
  register: ca
- copy:
    from: "{{ doc.x }}m"
  register: c
"#;
    let engine = engine_for(yaml);
    let log = EventLog::attach(&engine);

    let result = execute(&engine, doc(json!({ "x": "" }))).await.unwrap();

    assert_eq!(result["cats"], json!("meow"));
    let changes = log.changes_per_key();
    for key in ["c", "ca", "cat", "cats"] {
        assert_eq!(changes.get(key), Some(&1), "key {} merged {:?} times", key, changes.get(key));
    }
    assert!(log.status_count("copy", docflow::StepStatus::Blocked) >= 3);
    assert_completed_once(&log, ExecutionStatus::Completed);
}

/// Values from the system configuration and step variables feed templates too
#[tokio::test]
async fn test_system_and_vars_in_templates() {
    let yaml = r#"
- name: greet
  copy:
    from: "{{ system.greeting }}, {{ doc.name }}{{ punct }}"
  vars:
    punct: "!"
  register: message
"#;
    let engine = docflow::Engine::with_config(
        yaml,
        docflow::EngineConfig::new()
            .with_registry(test_registry())
            .with_system(json!({ "greeting": "hello" })),
    )
    .unwrap();

    let result = execute(&engine, doc(json!({ "name": "ada" }))).await.unwrap();
    assert_eq!(result["message"], json!("hello, ada!"));
}

/// The same engine serves one document after another with no state carried over
#[tokio::test]
async fn test_engine_is_reusable() {
    let engine = engine_for("- copy:\n    from: \"{{ doc.x }}!\"\n  register: y\n");

    let first = execute(&engine, doc(json!({ "x": "a" }))).await.unwrap();
    let second = execute(&engine, doc(json!({ "x": "b" }))).await.unwrap();

    assert_eq!(first["y"], json!("a!"));
    assert_eq!(second["y"], json!("b!"));
    assert_ne!(first[docflow::DOC_ID_KEY], second[docflow::DOC_ID_KEY]);
}
