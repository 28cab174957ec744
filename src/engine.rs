//! Import/export engine: the three operations a page triggers, plus the
//! reactive state it renders.

use crate::config::ImportExportConfig;
use crate::error::EngineError;
use crate::exporter::export_records;
use crate::importer::Importer;
use crate::progress::{ImportResult, ImportStatus, ImportTracker};
use crate::sink::RecordSink;
use crate::template::{generate_template, GeneratedFile};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

/// One entity's engine instance, bound to a sink and a session tracker.
pub struct ImportExportEngine {
    config: Arc<ImportExportConfig>,
    sink: Arc<dyn RecordSink>,
    tracker: ImportTracker,
}

impl ImportExportEngine {
    pub fn new(
        config: Arc<ImportExportConfig>,
        sink: Arc<dyn RecordSink>,
        tracker: ImportTracker,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        Ok(Self {
            config,
            sink,
            tracker,
        })
    }

    pub fn download_template(&self) -> Result<GeneratedFile, EngineError> {
        generate_template(&self.config)
    }

    pub async fn import_file(&self, filename: &str, data: &[u8]) -> Result<ImportResult, EngineError> {
        Importer::new(self.config.clone(), self.sink.clone())
            .run(filename, data, &self.tracker)
            .await
    }

    /// Export `records`, or the sink's stored records when `None`.
    pub async fn export_data(&self, records: Option<Vec<Value>>) -> Result<GeneratedFile, EngineError> {
        self.tracker.begin_export();
        let exported = self.export_inner(records).await;
        self.tracker.finish_export();
        exported
    }

    async fn export_inner(&self, records: Option<Vec<Value>>) -> Result<GeneratedFile, EngineError> {
        let records = match records {
            Some(records) => records,
            None => self.sink.records(self.config.table_name()).await?,
        };
        export_records(&self.config, &records, Utc::now().date_naive())
    }

    pub fn reset_import(&self) {
        self.tracker.reset();
    }

    pub fn status(&self) -> ImportStatus {
        self.tracker.snapshot()
    }
}
