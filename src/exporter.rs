//! Export mapping: in-memory records back to a downloadable spreadsheet.

use crate::config::ImportExportConfig;
use crate::error::EngineError;
use crate::template::{new_workbook, value_to_cell_text, GeneratedFile};
use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Worksheet};
use serde_json::Value;
use std::collections::HashSet;
use tracing::info;

/// One exported row: `(column header, value)` pairs in column order.
/// The first row's headers name the columns for every row.
pub type ExportRow = Vec<(String, Value)>;

/// Map a record to a row. Priority: closure hook, declarative
/// `export_columns`, then one column per field descriptor.
fn map_record(config: &ImportExportConfig, record: &Value) -> ExportRow {
    if let Some(mapper) = &config.hooks.export_mapper {
        return mapper(record);
    }

    let lookup = |field: &str| record.get(field).cloned().unwrap_or_else(|| Value::String(String::new()));

    if !config.export_columns.is_empty() {
        return config
            .export_columns
            .iter()
            .map(|c| (c.header.clone(), lookup(&c.field)))
            .collect();
    }

    config
        .fields
        .iter()
        .map(|f| (f.header_name.clone(), lookup(&f.field_name)))
        .collect()
}

/// Headers whose numeric values get the currency number format.
fn currency_headers(config: &ImportExportConfig) -> HashSet<String> {
    let currency_fields: Vec<_> = config.fields.iter().filter(|f| f.currency).collect();
    let mut headers: HashSet<String> = currency_fields.iter().map(|f| f.header_name.clone()).collect();
    for column in &config.export_columns {
        if currency_fields.iter().any(|f| f.field_name == column.field) {
            headers.insert(column.header.clone());
        }
    }
    headers
}

/// Serialize records into `<prefix>_Export_<date>.xlsx`.
pub fn export_records(
    config: &ImportExportConfig,
    records: &[Value],
    today: NaiveDate,
) -> Result<GeneratedFile, EngineError> {
    if records.is_empty() {
        return Err(EngineError::NoExportData);
    }

    let rows: Vec<ExportRow> = records.iter().map(|r| map_record(config, r)).collect();
    let headers: Vec<String> = rows
        .first()
        .map(|r| r.iter().map(|(h, _)| h.clone()).collect())
        .unwrap_or_default();

    let bold = Format::new().set_bold();
    let money = config
        .currency
        .as_ref()
        .map(|c| Format::new().set_num_format(format!("\"{}\" {}", c.code, c.num_format)));
    let currency_cols = currency_headers(config);

    let mut sheet = Worksheet::new();
    sheet.set_name(config.sheet_name())?;

    for (col, header) in headers.iter().enumerate() {
        let col = col as u16;
        sheet.set_column_width(col, (header.chars().count() + 5).max(12) as f64)?;
        sheet.write_string_with_format(0, col, header.as_str(), &bold)?;
    }

    for (idx, row) in rows.iter().enumerate() {
        let r = idx as u32 + 1;
        // Cells are placed by position; headers may repeat.
        for (col, ((_, value), header)) in row.iter().zip(&headers).enumerate() {
            let col = col as u16;
            match value {
                Value::Null => {}
                Value::String(s) if s.is_empty() => {}
                Value::Number(n) => {
                    let n = n.as_f64().unwrap_or_default();
                    match &money {
                        Some(format) if currency_cols.contains(header) => {
                            sheet.write_number_with_format(r, col, n, format)?;
                        }
                        _ => {
                            sheet.write_number(r, col, n)?;
                        }
                    }
                }
                Value::Bool(b) => {
                    sheet.write_boolean(r, col, *b)?;
                }
                other => {
                    sheet.write_string(r, col, value_to_cell_text(other))?;
                }
            }
        }
    }

    let mut workbook = new_workbook()?;
    workbook.push_worksheet(sheet);
    let bytes = workbook.save_to_buffer()?;
    let file_name = format!("{}_Export_{}.xlsx", config.file_prefix(), today.format("%Y-%m-%d"));

    info!("Exported {} records to {}", records.len(), file_name);

    Ok(GeneratedFile { file_name, bytes })
}
