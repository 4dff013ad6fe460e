//! The remote document store seam.
//!
//! The engine only ever talks to a [`RemoteAdapter`]; production wires in a
//! hosted document database, tests use [`memory::MemoryRemote`].

pub mod memory;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

use classpet_shared::{ClassCode, ClassScope, DocPath, ValidationError};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote adapter not initialized")]
    NotInitialized,

    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Write rejected: {0}")]
    Rejected(String),

    #[error("Malformed document at {path}: {reason}")]
    Malformed { path: String, reason: String },
}

impl RemoteError {
    /// Worth retrying later from the offline queue.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NotInitialized | Self::Unavailable(_))
    }
}

impl From<ValidationError> for RemoteError {
    fn from(e: ValidationError) -> Self {
        Self::Rejected(e.to_string())
    }
}

/// A document as returned by a query or snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDoc {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
enum Condition {
    Eq(String, Value),
    Gte(String, Value),
}

/// Conjunction of field conditions applied to a collection query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryFilter {
    conditions: Vec<Condition>,
}

impl QueryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    pub fn gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions
            .push(Condition::Gte(field.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluate against a document body.  A missing field never matches.
    pub fn matches(&self, data: &Value) -> bool {
        self.conditions.iter().all(|cond| match cond {
            Condition::Eq(field, want) => data.get(field) == Some(want),
            Condition::Gte(field, min) => data
                .get(field)
                .map(|have| compare(have, min) != Some(std::cmp::Ordering::Less))
                .unwrap_or(false),
        })
    }
}

fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (DateTime::parse_from_rfc3339(x), DateTime::parse_from_rfc3339(y)) {
                (Ok(x), Ok(y)) => Some(x.cmp(&y)),
                _ => Some(x.cmp(y)),
            }
        }
        _ => None,
    }
}

/// Snapshot stream for a live query.  Dropping the receiver ends the
/// subscription.
pub type SnapshotStream = mpsc::UnboundedReceiver<Vec<RemoteDoc>>;

#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    /// Whether the backing client finished initializing.
    fn is_initialized(&self) -> bool;

    /// Sign in without credentials; returns the new user id.
    async fn sign_in_anonymously(&self) -> Result<String, RemoteError>;

    /// Create or overwrite a document.
    async fn save_doc(&self, path: &DocPath, data: Value) -> Result<(), RemoteError>;

    async fn get_doc(&self, path: &DocPath) -> Result<Option<Value>, RemoteError>;

    async fn query_docs(
        &self,
        collection: &DocPath,
        filter: &QueryFilter,
    ) -> Result<Vec<RemoteDoc>, RemoteError>;

    /// Deleting a missing document is not an error.
    async fn delete_doc(&self, path: &DocPath) -> Result<(), RemoteError>;

    /// Live query.  The first message is the current result set; later
    /// messages are full re-snapshots after each change.
    async fn subscribe(
        &self,
        collection: &DocPath,
        filter: &QueryFilter,
    ) -> Result<SnapshotStream, RemoteError>;

    async fn resolve_code_to_scope(
        &self,
        code: &ClassCode,
    ) -> Result<Option<ClassScope>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq_and_gte() {
        let filter = QueryFilter::all()
            .eq("studentId", "s1")
            .gte("timestamp", "2024-03-01T00:00:00Z");

        assert!(!filter.matches(&json!({
            "studentId": "s1",
            "timestamp": "2024-03-01T08:59:59+09:00"
        })));
        assert!(filter.matches(&json!({
            "studentId": "s1",
            "timestamp": "2024-03-01T10:00:00+09:00"
        })));
        assert!(!filter.matches(&json!({ "studentId": "s2", "timestamp": "2024-03-02T00:00:00Z" })));
        assert!(!filter.matches(&json!({ "studentId": "s1" })));
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(QueryFilter::all().matches(&json!({})));
    }

    #[test]
    fn test_transient_errors() {
        assert!(RemoteError::Unavailable("down".into()).is_transient());
        assert!(RemoteError::NotInitialized.is_transient());
        assert!(!RemoteError::Rejected("denied".into()).is_transient());
    }
}
