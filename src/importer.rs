//! Row parsing and validation for uploaded spreadsheets.
//!
//! Rows are processed strictly in file order, one at a time: each record is
//! awaited at the sink before the next row starts, so progress reflects
//! exactly what has been written. A failing row never stops the import;
//! its message is collected and processing moves on.

use crate::config::ImportExportConfig;
use crate::error::EngineError;
use crate::field::normalize_header;
use crate::progress::{ImportProgress, ImportResult, ImportTracker};
use crate::sheet_parser::{parse_upload, ParsedSheet, SheetRow};
use crate::sink::RecordSink;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Drives one config's uploads into a sink.
#[derive(Clone)]
pub struct Importer {
    config: Arc<ImportExportConfig>,
    sink: Arc<dyn RecordSink>,
}

impl Importer {
    pub fn new(config: Arc<ImportExportConfig>, sink: Arc<dyn RecordSink>) -> Self {
        Self { config, sink }
    }

    /// Import an uploaded file, reporting through `tracker`.
    ///
    /// Only a file that cannot be read returns `Err`; the tracker still ends
    /// up Complete with a zero-count result holding that single message.
    /// A tracker that is already importing is left untouched and the call
    /// fails with [`EngineError::ImportInProgress`].
    pub async fn run(
        &self,
        filename: &str,
        data: &[u8],
        tracker: &ImportTracker,
    ) -> Result<ImportResult, EngineError> {
        if !tracker.try_begin_import() {
            warn!("Refusing import of {}: session is already importing", filename);
            return Err(EngineError::ImportInProgress);
        }
        let guard = FinishGuard {
            tracker,
            finished: false,
        };
        info!(
            "Starting import of {} ({} bytes) for {} via {} sink",
            filename,
            data.len(),
            self.config.entity_name,
            self.sink.name()
        );

        let sheet = match parse_upload(filename, data, Some(self.config.sheet_name())) {
            Ok(sheet) => sheet,
            Err(e) => {
                error!("Import of {} failed before processing: {}", filename, e);
                guard.finish(ImportResult::file_error(e.to_string()));
                return Err(e);
            }
        };

        let result = self.process(&sheet, tracker).await;
        info!(
            "Import of {} complete: {} total, {} succeeded, {} failed{}",
            filename,
            result.total,
            result.success,
            result.failed,
            if result.cancelled { " (cancelled)" } else { "" }
        );
        guard.finish(result.clone());
        Ok(result)
    }

    async fn process(&self, sheet: &ParsedSheet, tracker: &ImportTracker) -> ImportResult {
        let total = sheet.rows.len();
        let mut result = ImportResult::empty(total);

        // Header only (or an untouched template): nothing to do, not an error.
        if total == 0 {
            info!("Sheet '{}' has no data rows", sheet.name);
            return result;
        }

        let columns = resolve_columns(&self.config, &sheet.headers);

        for (idx, row) in sheet.rows.iter().enumerate() {
            if tracker.is_cancelled() {
                warn!(
                    "Import cancelled before row {} ({} of {} rows processed)",
                    row.number, idx, total
                );
                result.cancelled = true;
                break;
            }

            match self.process_row(row, &columns).await {
                Ok(()) => {
                    debug!("Row {} imported", row.number);
                    result.success += 1;
                }
                Err(message) => {
                    warn!("Row {} failed: {}", row.number, message);
                    result.record_failure(row.number, &message);
                }
            }

            tracker.update_progress(ImportProgress::new(
                idx + 1,
                total,
                Some(progress_label(row, &columns)),
            ));
        }

        result
    }

    /// Validate, coerce and write a single row.
    async fn process_row(&self, row: &SheetRow, columns: &[Option<usize>]) -> Result<(), String> {
        let mut record = Map::new();

        for (field, column) in self.config.fields.iter().zip(columns) {
            let Some(idx) = column else {
                if field.required {
                    return Err(format!(
                        "Required field \"{}\" not found in file",
                        field.header_name
                    ));
                }
                continue;
            };

            let raw = row.cell(*idx);
            if raw.trim().is_empty() {
                if field.required {
                    return Err(format!("{} is required", field.header_name));
                }
                continue;
            }

            record.insert(field.field_name.clone(), field.coerce(raw)?);
        }

        if let Some(validate) = &self.config.hooks.validate_row {
            if let Some(message) = validate(&record, row.number) {
                return Err(message);
            }
        }

        let table = self.config.table_name();
        let update_id = self
            .config
            .id_field
            .as_ref()
            .and_then(|field| record.get(field))
            .and_then(id_text);

        let written = match update_id {
            Some(id) => self.sink.update(table, &id, Value::Object(record)).await,
            None => self.sink.create(table, Value::Object(record)).await,
        };
        written.map_err(|e| e.to_string())
    }
}

/// Moves the tracker to Complete if a run stops without reporting a result
/// (a panic below it, or the future being dropped mid-import).
struct FinishGuard<'a> {
    tracker: &'a ImportTracker,
    finished: bool,
}

impl FinishGuard<'_> {
    fn finish(mut self, result: ImportResult) {
        self.finished = true;
        self.tracker.finish_import(result);
    }
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            error!("Import ended without a result; marking session complete");
            self.tracker
                .finish_import(ImportResult::file_error(ABORTED_MESSAGE));
        }
    }
}

const ABORTED_MESSAGE: &str = "Import aborted before completion";

/// Column index for each field, matched on normalised header text.
fn resolve_columns(config: &ImportExportConfig, headers: &[String]) -> Vec<Option<usize>> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    config
        .fields
        .iter()
        .map(|field| {
            let wanted = normalize_header(&field.header_name);
            normalized.iter().position(|h| *h == wanted)
        })
        .collect()
}

/// First field's cell text, or `Row <n>` when it is absent.
fn progress_label(row: &SheetRow, columns: &[Option<usize>]) -> String {
    columns
        .first()
        .copied()
        .flatten()
        .map(|idx| row.cell(idx).to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("Row {}", row.number))
}

fn id_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
