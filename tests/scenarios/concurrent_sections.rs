//! Test: Concurrent Sections - parallel steps, nested sections, and many documents at once

use crate::helpers::*;
use docflow::core::ExecutionStatus;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_parallel_registers_both_land() {
    let yaml = r#"
concurrent: true
steps:
  - copy:
      from: "{{ doc.x }}-left"
    register: left
  - copy:
      from: "{{ doc.x }}-right"
    register: right
"#;
    let engine = engine_for(yaml);
    let log = EventLog::attach(&engine);

    let result = execute(&engine, doc(json!({ "x": "go" }))).await.unwrap();

    assert_eq!(result["left"], json!("go-left"));
    assert_eq!(result["right"], json!("go-right"));
    assert_eq!(log.changes_per_key().len(), 2);
}

/// A nested section's `return` becomes the value its parent registers
#[tokio::test]
async fn test_nested_section_registers_its_return() {
    let yaml = r#"
name: outer
steps:
  - name: inner
    concurrent: true
    register: summary
    steps:
      - copy:
          from: "{{ doc.a }}+"
        register: b
        return: "{{ doc.b }}{{ doc.b }}"
      - copy:
          from: "1"
        register: a
  - copy:
      from: "{{ doc.summary }}!"
    register: final
"#;
    let engine = engine_for(yaml);
    let log = EventLog::attach(&engine);

    let result = execute(&engine, empty_doc()).await.unwrap();

    // "1" decodes as a number, which renders back as text
    assert_eq!(result["a"], json!(1));
    assert_eq!(result["b"], json!("1+"));
    assert_eq!(result["summary"], json!("1+1+"));
    assert_eq!(result["final"], json!("1+1+!"));

    let sections: Vec<String> = log
        .events()
        .into_iter()
        .filter_map(|event| match event {
            docflow::ExecutionEvent::SectionCompleted { section, .. } => Some(section),
            _ => None,
        })
        .collect();
    assert_eq!(sections, vec!["inner".to_string(), "outer".to_string()]);
}

/// Documents run side by side on one engine without seeing each other's data
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_documents_in_parallel() {
    let yaml = r#"
concurrent: true
steps:
  - copy:
      from: "{{ doc.doubled }}/{{ doc.n }}"
    register: label
  - copy:
      from: "{{ doc.n }}{{ doc.n }}"
    register: doubled
"#;
    let engine = Arc::new(engine_for(yaml));
    let log = EventLog::attach(&engine);

    let mut tasks = JoinSet::new();
    for n in 0..20 {
        let engine = engine.clone();
        tasks.spawn(async move { (n, execute(&engine, doc(json!({ "n": format!("n{}", n) }))).await) });
    }

    let mut seen = 0;
    while let Some(joined) = tasks.join_next().await {
        let (n, result) = joined.unwrap();
        let result = result.unwrap();
        assert_eq!(result["doubled"], json!(format!("n{}n{}", n, n)));
        assert_eq!(result["label"], json!(format!("n{}n{}/n{}", n, n, n)));
        seen += 1;
    }

    assert_eq!(seen, 20);
    assert_eq!(engine.active_documents(), 0);
    let completions = log.completions();
    assert_eq!(completions.len(), 20);
    assert!(completions.iter().all(|s| s.status == ExecutionStatus::Completed));
}
