//! Persistence abstraction for imported records.
//!
//! The engine never talks to storage directly. Each row that passes
//! validation is handed to a [`RecordSink`], which may be the in-memory
//! store or the hosted Supabase backend.

pub mod memory;
pub mod supabase;

pub use memory::MemorySink;
pub use supabase::SupabaseSink;

use crate::error::SinkError;
use serde_json::Value;

/// Async trait implemented by each persistence backend.
///
/// `table` is the config's backend table name. An `Err` fails only the row
/// being written.
#[async_trait::async_trait]
pub trait RecordSink: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self, table: &str, data: Value) -> Result<(), SinkError>;

    async fn update(&self, table: &str, id: &str, data: Value) -> Result<(), SinkError>;

    /// Stored records, used when an export request carries no records of its own.
    async fn records(&self, table: &str) -> Result<Vec<Value>, SinkError>;
}
