//! In-memory record sink, used when no backend is configured and in tests.

use super::RecordSink;
use crate::error::SinkError;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Records per table, in insertion order. Every stored record has an `id`.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<RwLock<HashMap<String, Vec<Value>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one table's records.
    pub fn snapshot(&self, table: &str) -> Vec<Value> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .cloned()
            .unwrap_or_default()
    }
}

fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait::async_trait]
impl RecordSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(&self, table: &str, data: Value) -> Result<(), SinkError> {
        let Value::Object(mut obj) = data else {
            return Err(SinkError::Rejected("Record must be a JSON object".to_string()));
        };
        obj.entry("id")
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));

        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        store.entry(table.to_string()).or_default().push(Value::Object(obj));
        tracing::debug!("MemorySink: created record in '{}'", table);
        Ok(())
    }

    async fn update(&self, table: &str, id: &str, data: Value) -> Result<(), SinkError> {
        let Value::Object(mut obj) = data else {
            return Err(SinkError::Rejected("Record must be a JSON object".to_string()));
        };

        let mut store = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let existing = store
            .get_mut(table)
            .and_then(|rows| rows.iter_mut().find(|r| record_id(r).as_deref() == Some(id)))
            .ok_or_else(|| SinkError::NotFound(format!("{} {}", table, id)))?;

        obj.insert("id".to_string(), Value::String(id.to_string()));
        *existing = Value::Object(obj);
        tracing::debug!("MemorySink: updated record {} in '{}'", id, table);
        Ok(())
    }

    async fn records(&self, table: &str) -> Result<Vec<Value>, SinkError> {
        Ok(self.snapshot(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_assigns_id() {
        let sink = MemorySink::new();
        sink.create("services", json!({"name": "Cut"})).await.unwrap();
        sink.create("services", json!({"id": "s-2", "name": "Dye"})).await.unwrap();

        let rows = sink.records("services").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0]["id"].as_str().is_some_and(|id| !id.is_empty()));
        assert_eq!(rows[1]["id"], json!("s-2"));
        assert!(sink.records("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_replaces_existing() {
        let sink = MemorySink::new();
        sink.create("services", json!({"id": "s-1", "name": "Cut"})).await.unwrap();
        sink.update("services", "s-1", json!({"name": "Trim"})).await.unwrap();
        assert_eq!(sink.snapshot("services"), vec![json!({"id": "s-1", "name": "Trim"})]);

        let err = sink.update("services", "nope", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Record not found: services nope");
    }

    #[tokio::test]
    async fn test_rejects_non_objects() {
        let sink = MemorySink::new();
        assert!(sink.create("services", json!([1, 2])).await.is_err());
    }
}
