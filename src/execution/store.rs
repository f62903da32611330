//! The engine-owned document cache

use crate::core::{Document, DocumentChange, DocumentId, DocumentScope, EngineError, DOC_ID_KEY};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

struct DocumentEntry {
    document: Arc<Document>,
    scope: Arc<DocumentScope>,
}

/// In-flight documents keyed by id.
///
/// Readers get immutable snapshots. Every write goes through [`merge`](Self::merge),
/// which applies the change and publishes the notification under one write
/// lock, so merges for a document are serialized and a listener woken by a
/// notification always sees the merged value.
#[derive(Default)]
pub struct DocumentStore {
    entries: RwLock<HashMap<DocumentId, DocumentEntry>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a document; returns its resource scope
    pub fn open(&self, doc_id: DocumentId, document: Document) -> Arc<DocumentScope> {
        let scope = DocumentScope::new(doc_id.clone());
        self.entries.write().insert(
            doc_id,
            DocumentEntry {
                document: Arc::new(document),
                scope: scope.clone(),
            },
        );
        scope
    }

    /// Current snapshot; replaced, never mutated, by later merges
    pub fn snapshot(&self, doc_id: &DocumentId) -> Result<Arc<Document>, EngineError> {
        self.entries
            .read()
            .get(doc_id)
            .map(|entry| entry.document.clone())
            .ok_or_else(|| EngineError::UnknownDocument(doc_id.clone()))
    }

    pub fn scope(&self, doc_id: &DocumentId) -> Result<Arc<DocumentScope>, EngineError> {
        self.entries
            .read()
            .get(doc_id)
            .map(|entry| entry.scope.clone())
            .ok_or_else(|| EngineError::UnknownDocument(doc_id.clone()))
    }

    /// Apply a single-key change, then notify the document's subscribers
    pub fn merge(&self, doc_id: &DocumentId, key: &str, value: Value) -> Result<(), EngineError> {
        if key == DOC_ID_KEY {
            return Err(EngineError::ReservedKey(key.to_string()));
        }
        let mut entries = self.entries.write();
        let entry = entries
            .get_mut(doc_id)
            .ok_or_else(|| EngineError::UnknownDocument(doc_id.clone()))?;

        Arc::make_mut(&mut entry.document).insert(key.to_string(), value);
        debug!("Merged '{}' into document {}", key, doc_id.short());

        entry.scope.notify(DocumentChange {
            doc_id: doc_id.clone(),
            key: key.to_string(),
        });
        Ok(())
    }

    /// Stop tracking a document and dispose its scope; returns the final snapshot
    pub fn close(&self, doc_id: &DocumentId) -> Option<Arc<Document>> {
        let entry = self.entries.write().remove(doc_id)?;
        entry.scope.dispose();
        Some(entry.document)
    }

    /// Scopes of every in-flight document
    pub fn scopes(&self) -> Vec<Arc<DocumentScope>> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.scope.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
