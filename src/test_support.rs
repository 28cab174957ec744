//! Fixtures shared by the unit test suites.

use crate::config::ImportExportConfig;
use crate::field::{FieldDescriptor, FieldType};
use rust_xlsxwriter::{Workbook, Worksheet};

/// Build an xlsx workbook in memory; empty strings leave the cell blank.
pub fn xlsx_bytes(sheets: &[(&str, Vec<Vec<&str>>)]) -> Vec<u8> {
    let mut workbook = Workbook::new();
    for (name, rows) in sheets {
        let mut worksheet = Worksheet::new();
        worksheet.set_name(*name).unwrap();
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                if !value.is_empty() {
                    worksheet.write_string(r as u32, c as u16, *value).unwrap();
                }
            }
        }
        workbook.push_worksheet(worksheet);
    }
    workbook.save_to_buffer().unwrap()
}

/// Read every cell of one sheet back as text, for asserting on generated files.
pub fn read_sheet(bytes: &[u8], sheet: &str) -> Vec<Vec<String>> {
    use calamine::{open_workbook_auto_from_rs, Reader};
    let mut workbook = open_workbook_auto_from_rs(std::io::Cursor::new(bytes)).unwrap();
    let range = workbook.worksheet_range(sheet).unwrap();
    range
        .rows()
        .map(|row| row.iter().map(|c| c.to_string()).collect())
        .collect()
}

pub fn sheet_names(bytes: &[u8]) -> Vec<String> {
    use calamine::{open_workbook_auto_from_rs, Reader};
    let workbook = open_workbook_auto_from_rs(std::io::Cursor::new(bytes)).unwrap();
    workbook.sheet_names()
}

/// Salon service config used across the engine tests.
pub fn service_config() -> ImportExportConfig {
    ImportExportConfig::new(
        "Service",
        vec![
            FieldDescriptor::new("Name", "name", FieldType::Text)
                .required()
                .example("Haircut"),
            FieldDescriptor::new("Price", "price", FieldType::Number)
                .example(45)
                .describe("Price before tax"),
            FieldDescriptor::new(
                "Rate",
                "rate",
                FieldType::Enum(vec!["Low".to_string(), "High".to_string()]),
            )
            .example("Low"),
            FieldDescriptor::new("Active", "active", FieldType::Boolean).example("Yes"),
        ],
    )
}

/// Sink that remembers every call, optionally rejecting records whose
/// `name` matches `reject_name` and cancelling a tracker on first write.
#[derive(Default)]
pub struct RecordingSink {
    pub created: std::sync::Mutex<Vec<serde_json::Value>>,
    pub updated: std::sync::Mutex<Vec<(String, serde_json::Value)>>,
    pub reject_name: Option<String>,
    pub cancel_on_write: Option<crate::progress::ImportTracker>,
}

#[async_trait::async_trait]
impl crate::sink::RecordSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn create(&self, _table: &str, data: serde_json::Value) -> Result<(), crate::error::SinkError> {
        if let Some(tracker) = &self.cancel_on_write {
            tracker.cancel();
        }
        if self.reject_name.as_deref().is_some_and(|n| data["name"] == n) {
            return Err(crate::error::SinkError::Rejected("duplicate key value".to_string()));
        }
        self.created.lock().unwrap().push(data);
        Ok(())
    }

    async fn update(&self, _table: &str, id: &str, data: serde_json::Value) -> Result<(), crate::error::SinkError> {
        self.updated.lock().unwrap().push((id.to_string(), data));
        Ok(())
    }

    async fn records(&self, _table: &str) -> Result<Vec<serde_json::Value>, crate::error::SinkError> {
        Ok(self.created.lock().unwrap().clone())
    }
}
