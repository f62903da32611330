//! Document model - the JSON record built up by one pipeline run

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Reserved document key holding the generated document id
pub const DOC_ID_KEY: &str = "__uuid__";

/// A mutable, string-keyed map of JSON values
pub type Document = serde_json::Map<String, Value>;

/// Unique identity of an in-flight document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for log lines and terminal output
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }

    /// Read the id stored under [`DOC_ID_KEY`], if any
    pub fn of(document: &Document) -> Option<Self> {
        document
            .get(DOC_ID_KEY)
            .and_then(Value::as_str)
            .map(Self::from)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocumentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Notification published after a merge into a document has been applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentChange {
    /// Document the merge was applied to
    pub doc_id: DocumentId,

    /// Field that was written
    pub key: String,
}
